//! The immutable per-run configuration snapshot and its resume hash.

use std::path::PathBuf;
use std::time::Duration;

use sha2::{Digest, Sha256};

use recon_core::breaker::BreakerConfig;
use recon_core::target::{Scope, Target};

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Governor permits: global bound on in-flight tool invocations.
    pub permits: usize,
    pub passive_only: bool,
    pub strict: bool,
    /// Default wall-clock budget per stage.
    pub stage_budget: Duration,
    /// Budget for the slow stages (brute force, fuzzing, port/vuln scans).
    pub long_stage_budget: Duration,
    pub crawl_depth: u32,
    pub dir_fuzz_hosts: usize,
    pub port_scan_hosts: usize,
    pub param_urls: usize,
    pub js_files_cap: usize,
    /// Severity filter handed to the vulnerability scanner.
    pub nuclei_severity: String,
    pub wordlist: Option<PathBuf>,
    pub dir_wordlist: Option<PathBuf>,
    /// Extra environment variables allowed through to child tools.
    pub env_allow: Vec<String>,
    pub breaker: BreakerConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            permits: 10,
            passive_only: false,
            strict: false,
            stage_budget: Duration::from_secs(600),
            long_stage_budget: Duration::from_secs(1800),
            crawl_depth: 3,
            dir_fuzz_hosts: 10,
            port_scan_hosts: 5,
            param_urls: 50,
            js_files_cap: 50,
            nuclei_severity: "medium,high,critical".into(),
            wordlist: None,
            dir_wordlist: None,
            env_allow: Vec::new(),
            breaker: BreakerConfig::default(),
        }
    }
}

/// Stages that get the long budget.
const LONG_STAGES: &[&str] = &["wordlist_enum", "dir_fuzz", "port_scan", "vuln_scan", "screenshot"];

impl ScanConfig {
    pub fn budget_for(&self, stage: &str) -> Duration {
        if LONG_STAGES.contains(&stage) {
            self.long_stage_budget
        } else {
            self.stage_budget
        }
    }

    /// Fingerprint of everything that changes artifact content. Tool
    /// versions are deliberately excluded; a resume with the same knobs is
    /// valid across tool upgrades.
    pub fn resume_hash(&self, target: &Target, scope: &Scope, stage_names: &[&str]) -> String {
        let mut names: Vec<&str> = stage_names.to_vec();
        names.sort_unstable();
        let canonical = format!(
            "target={};scope={};stages={};passive_only={};crawl_depth={};dir_fuzz_hosts={};port_scan_hosts={};param_urls={};js_files_cap={};severity={};wordlist={};dir_wordlist={}",
            target.fqdn(),
            scope.fingerprint(),
            names.join(","),
            self.passive_only,
            self.crawl_depth,
            self.dir_fuzz_hosts,
            self.port_scan_hosts,
            self.param_urls,
            self.js_files_cap,
            self.nuclei_severity,
            self.wordlist
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            self.dir_wordlist
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        );
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_across_stage_order() {
        let cfg = ScanConfig::default();
        let target = Target::parse("example.com").unwrap();
        let scope = Scope::default();
        let a = cfg.resume_hash(&target, &scope, &["passive_enum", "probe_http"]);
        let b = cfg.resume_hash(&target, &scope, &["probe_http", "passive_enum"]);
        assert_eq!(a, b);
    }

    #[test]
    fn hash_changes_with_scope_and_flags() {
        let target = Target::parse("example.com").unwrap();
        let cfg = ScanConfig::default();
        let base = cfg.resume_hash(&target, &Scope::default(), &["probe_http"]);

        let scoped = Scope::new(Some("^api"), None).unwrap();
        assert_ne!(base, cfg.resume_hash(&target, &scoped, &["probe_http"]));

        let mut passive = ScanConfig::default();
        passive.passive_only = true;
        assert_ne!(base, passive.resume_hash(&target, &Scope::default(), &["probe_http"]));
    }

    #[test]
    fn governor_permits_do_not_affect_resume() {
        let target = Target::parse("example.com").unwrap();
        let scope = Scope::default();
        let a = ScanConfig::default().resume_hash(&target, &scope, &["probe_http"]);
        let mut wide = ScanConfig::default();
        wide.permits = 50;
        assert_eq!(a, wide.resume_hash(&target, &scope, &["probe_http"]));
    }
}
