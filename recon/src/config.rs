use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use pipeline::ScanConfig;
use recon_core::breaker::BreakerConfig;

#[derive(Debug, Default, Deserialize, Clone)]
pub struct WordlistsSection {
    pub subdomains: Option<PathBuf>,
    pub directories: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ScanSection {
    pub threads: Option<usize>,
    pub stage_timeout_secs: Option<u64>,
    pub long_stage_timeout_secs: Option<u64>,
    pub crawl_depth: Option<u32>,
    pub dir_fuzz_hosts: Option<usize>,
    pub port_scan_hosts: Option<usize>,
    pub param_urls: Option<usize>,
    pub js_files_cap: Option<usize>,
    pub severity: Option<String>,
    pub env_allow: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct BreakerSection {
    pub threshold: Option<u32>,
    pub cooldown_secs: Option<u64>,
    pub cooldown_cap_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct FileConfig {
    pub tools: Option<HashMap<String, PathBuf>>,
    pub wordlists: Option<WordlistsSection>,
    pub scan: Option<ScanSection>,
    pub breaker: Option<BreakerSection>,
}

/// Load YAML config: the explicit path, or ./recon.yaml when present.
pub fn load_config(path: Option<&Path>) -> Option<FileConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new("recon.yaml");
            if p.exists() {
                p.to_path_buf()
            } else {
                return None;
            }
        }
    };
    let s = std::fs::read_to_string(path).ok()?;
    serde_yaml::from_str(&s).ok()
}

/// Merge order: defaults, then file values, then CLI flags.
pub struct CliOverrides {
    pub threads: Option<usize>,
    pub passive_only: bool,
    pub strict: bool,
    pub wordlist: Option<PathBuf>,
}

pub fn build_scan_config(file: Option<&FileConfig>, cli: &CliOverrides) -> ScanConfig {
    let mut cfg = ScanConfig::default();

    if let Some(file) = file {
        if let Some(scan) = &file.scan {
            if let Some(threads) = scan.threads {
                cfg.permits = threads;
            }
            if let Some(secs) = scan.stage_timeout_secs {
                cfg.stage_budget = Duration::from_secs(secs);
            }
            if let Some(secs) = scan.long_stage_timeout_secs {
                cfg.long_stage_budget = Duration::from_secs(secs);
            }
            if let Some(depth) = scan.crawl_depth {
                cfg.crawl_depth = depth;
            }
            if let Some(n) = scan.dir_fuzz_hosts {
                cfg.dir_fuzz_hosts = n;
            }
            if let Some(n) = scan.port_scan_hosts {
                cfg.port_scan_hosts = n;
            }
            if let Some(n) = scan.param_urls {
                cfg.param_urls = n;
            }
            if let Some(n) = scan.js_files_cap {
                cfg.js_files_cap = n;
            }
            if let Some(severity) = &scan.severity {
                cfg.nuclei_severity = severity.clone();
            }
            if let Some(allow) = &scan.env_allow {
                cfg.env_allow = allow.clone();
            }
        }
        if let Some(wordlists) = &file.wordlists {
            cfg.wordlist = wordlists.subdomains.clone();
            cfg.dir_wordlist = wordlists.directories.clone();
        }
        if let Some(breaker) = &file.breaker {
            let defaults = BreakerConfig::default();
            cfg.breaker = BreakerConfig {
                threshold: breaker.threshold.unwrap_or(defaults.threshold),
                cooldown: breaker
                    .cooldown_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.cooldown),
                cooldown_cap: breaker
                    .cooldown_cap_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.cooldown_cap),
            };
        }
    }

    if let Some(threads) = cli.threads {
        cfg.permits = threads;
    }
    if cli.wordlist.is_some() {
        cfg.wordlist = cli.wordlist.clone();
    }
    cfg.passive_only = cli.passive_only;
    cfg.strict = cli.strict;
    cfg
}

/// Tool path overrides from the config file, as the registry expects them.
pub fn tool_overrides(file: Option<&FileConfig>) -> HashMap<String, PathBuf> {
    file.and_then(|f| f.tools.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_beat_file_values() {
        let yaml = "\
scan:
  threads: 4
  crawl_depth: 5
breaker:
  threshold: 3
";
        let file: FileConfig = serde_yaml::from_str(yaml).unwrap();
        let cli = CliOverrides {
            threads: Some(25),
            passive_only: true,
            strict: false,
            wordlist: None,
        };
        let cfg = build_scan_config(Some(&file), &cli);
        assert_eq!(cfg.permits, 25);
        assert_eq!(cfg.crawl_depth, 5);
        assert_eq!(cfg.breaker.threshold, 3);
        assert!(cfg.passive_only);
    }

    #[test]
    fn defaults_survive_missing_sections() {
        let cli = CliOverrides {
            threads: None,
            passive_only: false,
            strict: false,
            wordlist: None,
        };
        let cfg = build_scan_config(None, &cli);
        assert_eq!(cfg.permits, 10);
        assert_eq!(cfg.breaker.threshold, 10);
        assert_eq!(cfg.breaker.cooldown, Duration::from_secs(60));
    }

    #[test]
    fn tool_override_paths_parse() {
        let yaml = "\
tools:
  subfinder: /opt/tools/subfinder
";
        let file: FileConfig = serde_yaml::from_str(yaml).unwrap();
        let overrides = tool_overrides(Some(&file));
        assert_eq!(
            overrides.get("subfinder"),
            Some(&PathBuf::from("/opt/tools/subfinder"))
        );
    }
}
