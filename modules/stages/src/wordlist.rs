//! Wordlist resolution for the brute-force stages: explicit override,
//! then a repo-local wordlists/ directory, then the embedded fallback.

use std::path::{Path, PathBuf};

/// Common subdomain labels used when no wordlist file is available. Small
/// on purpose; real coverage comes from an operator-supplied list.
pub const BUILTIN_SUBDOMAIN_LABELS: &[&str] = &[
    "www", "mail", "remote", "blog", "webmail", "server", "ns1", "ns2", "smtp", "secure", "vpn",
    "m", "shop", "ftp", "api", "dev", "staging", "test", "portal", "admin", "cdn", "app", "beta",
    "docs", "status", "git", "gitlab", "jenkins", "grafana", "jira", "confluence", "intranet",
    "db", "mysql", "redis", "elastic", "kibana", "auth", "sso", "login", "proxy", "gateway",
    "assets", "static", "img", "files", "backup", "old", "new", "demo", "sandbox",
];

/// Fallback directory paths for dir_fuzz when no wordlist is configured.
pub const BUILTIN_DIR_PATHS: &[&str] = &[
    "admin", "login", "dashboard", "api", "api/v1", "api/v2", "backup", "config", ".git/HEAD",
    ".env", "uploads", "static", "assets", "docs", "swagger", "swagger-ui", "graphql", "debug",
    "server-status", "phpinfo.php", "robots.txt", "sitemap.xml", "wp-admin", "wp-login.php",
    ".well-known/security.txt", "health", "metrics", "actuator", "console", "test",
];

/// First existing path wins: explicit override, then conventional
/// locations relative to the working directory.
pub fn resolve_wordlist(explicit: Option<&Path>, conventional: &[&str]) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
    }
    conventional
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

pub const SUBDOMAIN_WORDLIST_LOCATIONS: &[&str] =
    &["wordlists/subdomains.txt", "wordlists/n0kovo_subdomains.txt"];

pub const DIR_WORDLIST_LOCATIONS: &[&str] =
    &["wordlists/directories.txt", "wordlists/directory-list.txt"];
