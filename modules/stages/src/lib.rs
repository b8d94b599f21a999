//! The stage catalog: one module per pipeline stage, plus the shared
//! helpers for tool output parsing and filename hygiene.

pub mod crawl;
pub mod enumerate;
pub mod fuzz;
pub mod js_analyze;
pub mod links;
pub mod params;
pub mod ports;
pub mod probe;
pub mod resolve;
pub mod takeover;
pub mod visual;
pub mod vuln;
pub mod wordlist;

use std::sync::Arc;

use pipeline::{SkipReason, Stage, StageOutcome};
use recon_core::EngineError;

/// Every tool stage in dependency order. The aggregator and reporter are
/// appended by the caller.
pub fn catalog() -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(enumerate::PassiveEnum),
        Arc::new(enumerate::WordlistEnum),
        Arc::new(enumerate::MergeSubdomains),
        Arc::new(resolve::DnsResolve),
        Arc::new(probe::ProbeHttp),
        Arc::new(visual::Screenshot),
        Arc::new(takeover::TakeoverCheck),
        Arc::new(crawl::Crawl),
        Arc::new(js_analyze::JsAnalyze),
        Arc::new(params::ParamDiscover),
        Arc::new(fuzz::DirFuzz),
        Arc::new(ports::PortScan),
        Arc::new(vuln::VulnScan),
        Arc::new(links::BrokenLinks),
    ]
}

/// Map an engine error to the stage outcome the failure policy dictates.
pub(crate) fn outcome_for(err: EngineError) -> StageOutcome {
    match err {
        EngineError::Cancelled => StageOutcome::Skipped(SkipReason::Cancelled),
        EngineError::ToolMissing(tool) => {
            StageOutcome::Skipped(SkipReason::ToolMissing(vec![tool]))
        }
        other => StageOutcome::Failed(other.to_string()),
    }
}

/// Some tools exit nonzero to mean "ran fine, found nothing". Their empty
/// output is a valid result, not a failure.
pub(crate) fn exit_means_ok_empty(tool: &str, exit_code: Option<i32>) -> bool {
    matches!(tool, "ffuf" | "nuclei" | "arjun") && matches!(exit_code, Some(0) | Some(1))
}

/// Host component of a probed URL, for breaker keys and per-host files.
pub(crate) fn host_of_url(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Flatten a host or URL into a safe single-component filename.
pub(crate) fn sanitize_host_filename(host: &str) -> String {
    let stripped = host.split_once("://").map(|(_, rest)| rest).unwrap_or(host);
    let flat: String = stripped
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    flat.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_policy_per_tool() {
        assert!(exit_means_ok_empty("ffuf", Some(1)));
        assert!(exit_means_ok_empty("nuclei", Some(0)));
        assert!(exit_means_ok_empty("arjun", Some(1)));
        assert!(!exit_means_ok_empty("subfinder", Some(1)));
        assert!(!exit_means_ok_empty("ffuf", Some(2)));
    }

    #[test]
    fn url_host_extraction() {
        assert_eq!(
            host_of_url("https://API.Example.com:8443/login"),
            Some("api.example.com".to_string())
        );
        assert_eq!(host_of_url("not a url"), None);
    }

    #[test]
    fn filenames_are_flattened() {
        assert_eq!(
            sanitize_host_filename("https://a.example.com:443/x"),
            "a.example.com_443_x"
        );
        assert_eq!(sanitize_host_filename("a/b\\c"), "a_b_c");
    }
}
