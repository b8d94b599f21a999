//! Broken-link hijack candidates via socialhunter.

use async_trait::async_trait;
use tracing::info;

use pipeline::{RunContext, SkipReason, Stage, StageOutcome};
use recon_core::EngineError;

use crate::outcome_for;

pub struct BrokenLinks;

#[async_trait]
impl Stage for BrokenLinks {
    fn name(&self) -> &'static str {
        "broken_links"
    }

    fn depends_on(&self) -> Vec<&'static str> {
        vec!["probe_http"]
    }

    fn required_tools(&self) -> Vec<&'static str> {
        vec!["socialhunter"]
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let live = match ctx.store.artifact_path("subdomains/live.txt") {
            Ok(p) => p,
            Err(e) => return outcome_for(e),
        };
        let args = vec!["-f".to_string(), live.display().to_string()];
        let result = match ctx
            .run_tool("socialhunter", args, ctx.config.stage_budget)
            .await
        {
            Ok(res) => res,
            Err(EngineError::Cancelled) => return StageOutcome::Skipped(SkipReason::Cancelled),
            Err(e) => return outcome_for(e),
        };

        let links = parse_broken_links(&result.stdout_utf8());
        if links.is_empty() && result.timed_out {
            return StageOutcome::Skipped(SkipReason::Timeout);
        }
        info!(candidates = links.len(), "broken link check finished");
        match ctx
            .store
            .write_lines(self.name(), "reports/broken_links.txt", &links)
        {
            Ok(artifact) => StageOutcome::Ok(vec![artifact]),
            Err(e) => outcome_for(e),
        }
    }
}

/// Lines that reference a URL; banner and progress noise is dropped.
pub fn parse_broken_links(raw: &str) -> Vec<String> {
    let mut links: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| l.contains("http://") || l.contains("https://"))
        .map(String::from)
        .collect();
    links.sort();
    links.dedup();
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_url_lines() {
        let raw = "\
Checking 12 urls
Possible Takeover: https://twitter.com/gone-handle at https://a.example.com
done in 3s
";
        let links = parse_broken_links(raw);
        assert_eq!(links.len(), 1);
        assert!(links[0].contains("twitter.com"));
    }
}
