//! Endpoint crawling via katana, splitting out JavaScript files for the
//! analyzer.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::info;

use pipeline::{RunContext, SkipReason, Stage, StageOutcome};
use recon_core::EngineError;

use crate::outcome_for;

pub struct Crawl;

#[async_trait]
impl Stage for Crawl {
    fn name(&self) -> &'static str {
        "crawl"
    }

    fn depends_on(&self) -> Vec<&'static str> {
        vec!["probe_http"]
    }

    fn required_tools(&self) -> Vec<&'static str> {
        vec!["katana"]
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let live = match ctx.store.artifact_path("subdomains/live.txt") {
            Ok(p) => p,
            Err(e) => return outcome_for(e),
        };
        let args = vec![
            "-list".to_string(),
            live.display().to_string(),
            "-d".to_string(),
            ctx.config.crawl_depth.to_string(),
            "-jc".to_string(),
            "-silent".to_string(),
        ];
        let result = match ctx.run_tool("katana", args, ctx.config.stage_budget).await {
            Ok(res) => res,
            Err(EngineError::Cancelled) => return StageOutcome::Skipped(SkipReason::Cancelled),
            Err(e) => return outcome_for(e),
        };

        let (urls, js_files) = split_crawled_urls(&result.stdout_utf8());
        if urls.is_empty() && result.timed_out {
            return StageOutcome::Skipped(SkipReason::Timeout);
        }
        info!(urls = urls.len(), js = js_files.len(), "crawl finished");

        let urls_artifact = match ctx.store.write_lines(self.name(), "endpoints/urls.txt", &urls) {
            Ok(a) => a,
            Err(e) => return outcome_for(e),
        };
        match ctx.store.write_lines(self.name(), "js/files.txt", &js_files) {
            Ok(js_artifact) => StageOutcome::Ok(vec![urls_artifact, js_artifact]),
            Err(e) => outcome_for(e),
        }
    }
}

/// Crawled URL list → (all URLs, the JavaScript subset). Matches `.js`
/// endings including querystring and fragment forms.
pub fn split_crawled_urls(raw: &str) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut urls = BTreeSet::new();
    let mut js = BTreeSet::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || !line.starts_with("http") {
            continue;
        }
        urls.insert(line.to_string());
        if line.ends_with(".js") || line.contains(".js?") || line.contains(".js#") {
            js.insert(line.to_string());
        }
    }
    (urls, js)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_js_from_urls() {
        let raw = "\
https://a.example.com/login
https://a.example.com/static/app.js
https://a.example.com/vendor.js?v=2
not-a-url
https://b.example.com/api/users
";
        let (urls, js) = split_crawled_urls(raw);
        assert_eq!(urls.len(), 4);
        assert_eq!(js.len(), 2);
        assert!(js.contains("https://a.example.com/static/app.js"));
        assert!(js.contains("https://a.example.com/vendor.js?v=2"));
    }

    #[test]
    fn output_is_sorted_regardless_of_crawl_order() {
        let (a, _) = split_crawled_urls("https://z.example.com/\nhttps://a.example.com/\n");
        let first = a.iter().next().unwrap();
        assert_eq!(first, "https://a.example.com/");
    }
}
