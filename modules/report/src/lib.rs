//! Aggregation and reporting: summary.json, the Markdown executive
//! summary, the static HTML report, and run-to-run diffing.

pub mod aggregate;
pub mod diff;
pub mod html;
pub mod markdown;

pub use aggregate::Aggregate;
pub use diff::{diff_runs, Change};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use pipeline::{RunContext, Stage, StageOutcome};

use crate::aggregate::Summary;

/// The two post-processing stages appended after the tool catalog.
pub fn reporting_stages() -> Vec<Arc<dyn Stage>> {
    vec![Arc::new(Aggregate), Arc::new(Report)]
}

/// Renders summary.md and full_report.html from summary.json plus
/// redacted artifact excerpts.
pub struct Report;

#[async_trait]
impl Stage for Report {
    fn name(&self) -> &'static str {
        "report"
    }

    fn depends_on(&self) -> Vec<&'static str> {
        vec!["aggregate"]
    }

    // Renders from artifacts only; always runs, passive mode included.
    fn passive(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let summary: Summary = match ctx.store.read_json("summary.json") {
            Ok(s) => s,
            Err(e) => return StageOutcome::Failed(format!("summary.json unreadable: {e}")),
        };

        let md = markdown::render(&ctx.store, &summary);
        let md_artifact = match ctx.store.write(
            self.name(),
            "reports/summary.md",
            artifacts::ContentType::TextLines,
            md.as_bytes(),
        ) {
            Ok(a) => a,
            Err(e) => return StageOutcome::Failed(e.to_string()),
        };

        let html = html::render(&ctx.store, &summary);
        match ctx.store.write(
            self.name(),
            "reports/full_report.html",
            artifacts::ContentType::Binary,
            html.as_bytes(),
        ) {
            Ok(html_artifact) => {
                info!("reports rendered");
                StageOutcome::Ok(vec![md_artifact, html_artifact])
            }
            Err(e) => StageOutcome::Failed(e.to_string()),
        }
    }
}
