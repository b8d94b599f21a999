//! Subdomain discovery: passive tool union, wordlist brute force, and the
//! scope-filtered merge every downstream stage reads.

use std::collections::BTreeSet;
use std::net::ToSocketAddrs;

use async_trait::async_trait;
use tracing::{info, warn};

use pipeline::{RunContext, SkipReason, Stage, StageOutcome};
use recon_core::redact;
use recon_core::target::{Scope, Target};
use recon_core::EngineError;

use crate::wordlist::{
    resolve_wordlist, BUILTIN_SUBDOMAIN_LABELS, SUBDOMAIN_WORDLIST_LOCATIONS,
};
use crate::{exit_means_ok_empty, outcome_for};

const PASSIVE_TOOLS: &[&str] = &["subfinder", "assetfinder", "amass"];

fn passive_args(tool: &str, domain: &str) -> Vec<String> {
    let args: Vec<&str> = match tool {
        "subfinder" => vec!["-d", domain, "-silent"],
        "assetfinder" => vec!["--subs-only", domain],
        _ => vec!["enum", "-passive", "-d", domain],
    };
    args.into_iter().map(String::from).collect()
}

/// Union the output of every installed passive enumerator. One tool
/// failing, or missing entirely, never fails the stage.
pub struct PassiveEnum;

#[async_trait]
impl Stage for PassiveEnum {
    fn name(&self) -> &'static str {
        "passive_enum"
    }

    fn passive(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let domain = ctx.target.fqdn().to_string();
        let available: Vec<&str> = PASSIVE_TOOLS
            .iter()
            .copied()
            .filter(|t| ctx.registry.locate(t).is_some())
            .collect();
        if available.is_empty() {
            return StageOutcome::Skipped(SkipReason::ToolMissing(
                PASSIVE_TOOLS.iter().map(|t| t.to_string()).collect(),
            ));
        }

        let budget = ctx.config.stage_budget;
        let runs = available.iter().map(|tool| {
            let domain = domain.clone();
            async move { (*tool, ctx.run_tool(tool, passive_args(tool, &domain), budget).await) }
        });
        let results = futures::future::join_all(runs).await;

        let mut subs: BTreeSet<String> = BTreeSet::new();
        let mut produced = 0usize;
        for (tool, result) in results {
            match result {
                Ok(res) if res.success() || !res.stdout.is_empty() => {
                    if !res.success() {
                        warn!(tool, exit = ?res.exit_code, "nonzero exit, keeping partial output");
                    }
                    let before = subs.len();
                    subs.extend(
                        res.stdout_utf8()
                            .lines()
                            .map(|l| l.trim().to_ascii_lowercase())
                            .filter(|l| ctx.target.owns(l)),
                    );
                    info!(tool, found = subs.len() - before, "passive enumeration finished");
                    produced += 1;
                }
                Ok(res) => {
                    warn!(
                        tool,
                        exit = ?res.exit_code,
                        stderr = %redact::redact(res.stderr_utf8().trim()),
                        "no output"
                    );
                }
                Err(EngineError::Cancelled) => {
                    return StageOutcome::Skipped(SkipReason::Cancelled)
                }
                Err(e) => warn!(tool, error = %e, "invocation failed"),
            }
        }
        if produced == 0 {
            return StageOutcome::Skipped(SkipReason::NoOutput(
                "every passive tool failed".into(),
            ));
        }

        match ctx
            .store
            .write_lines(self.name(), "subdomains/passive.txt", &subs)
        {
            Ok(artifact) => StageOutcome::Ok(vec![artifact]),
            Err(e) => outcome_for(e),
        }
    }
}

/// Brute-force enumeration: ffuf over a wordlist when both are present,
/// otherwise a built-in DNS sweep over common labels.
pub struct WordlistEnum;

#[async_trait]
impl Stage for WordlistEnum {
    fn name(&self) -> &'static str {
        "wordlist_enum"
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let domain = ctx.target.fqdn().to_string();
        let wordlist = resolve_wordlist(
            ctx.config.wordlist.as_deref(),
            SUBDOMAIN_WORDLIST_LOCATIONS,
        );

        let mut found: BTreeSet<String> = BTreeSet::new();
        if ctx.registry.locate("ffuf").is_some() && wordlist.is_some() {
            let wordlist = wordlist.expect("checked above");
            let out_path = match ctx.store.tool_output_path("subdomains/ffuf_brute.json") {
                Ok(p) => p,
                Err(e) => return outcome_for(e),
            };
            let args = vec![
                "-u".into(),
                format!("http://FUZZ.{domain}"),
                "-w".into(),
                wordlist.display().to_string(),
                "-o".into(),
                out_path.display().to_string(),
                "-of".into(),
                "json".into(),
                "-s".into(),
            ];
            match ctx
                .run_tool("ffuf", args, ctx.config.long_stage_budget)
                .await
            {
                Ok(res) => {
                    if !exit_means_ok_empty("ffuf", res.exit_code) && !res.timed_out {
                        warn!(exit = ?res.exit_code, "ffuf exited abnormally");
                    }
                    if let Ok(raw) = ctx.store.read_to_string("subdomains/ffuf_brute.json") {
                        found.extend(parse_ffuf_fuzz_labels(&raw, &domain));
                    }
                }
                Err(EngineError::Cancelled) => {
                    return StageOutcome::Skipped(SkipReason::Cancelled)
                }
                Err(e) => return outcome_for(e),
            }
        } else {
            // Built-in DNS brute over a label list; every lookup passes
            // through the governor so the global bound holds.
            let labels: Vec<String> = match &wordlist {
                Some(path) => std::fs::read_to_string(path)
                    .unwrap_or_default()
                    .lines()
                    .map(|l| l.trim().to_ascii_lowercase())
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .take(2048)
                    .collect(),
                None => BUILTIN_SUBDOMAIN_LABELS.iter().map(|l| l.to_string()).collect(),
            };
            info!(labels = labels.len(), "running built-in dns brute");
            let lookups = labels.iter().map(|label| {
                let host = format!("{label}.{domain}");
                async move {
                    let permit = ctx.governor.admit(&ctx.cancel).await.ok()?;
                    let probe = host.clone();
                    let resolved = tokio::task::spawn_blocking(move || {
                        (probe.as_str(), 80u16)
                            .to_socket_addrs()
                            .map(|mut addrs| addrs.next())
                            .ok()
                            .flatten()
                    })
                    .await
                    .ok()
                    .flatten();
                    drop(permit);
                    resolved.map(|_| host)
                }
            });
            for host in futures::future::join_all(lookups).await.into_iter().flatten() {
                found.insert(host);
            }
            if ctx.cancel.is_cancelled() {
                return StageOutcome::Skipped(SkipReason::Cancelled);
            }
        }

        match ctx
            .store
            .write_lines(self.name(), "subdomains/brute.txt", &found)
        {
            Ok(artifact) => StageOutcome::Ok(vec![artifact]),
            Err(e) => outcome_for(e),
        }
    }
}

/// Union of passive and brute-force results: lowercased, validated against
/// the target, scope-filtered, sorted. Pure post-processing.
pub struct MergeSubdomains;

#[async_trait]
impl Stage for MergeSubdomains {
    fn name(&self) -> &'static str {
        "merge_subdomains"
    }

    fn depends_on(&self) -> Vec<&'static str> {
        vec!["passive_enum", "wordlist_enum"]
    }

    // The brute list is a bonus; merging proceeds from the passive list
    // alone when wordlist_enum was skipped.
    fn requires_ok(&self, dep: &str) -> bool {
        dep != "wordlist_enum"
    }

    // Pure post-processing of files already on disk.
    fn passive(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let passive = match ctx.store.read_lines("subdomains/passive.txt") {
            Ok(lines) => lines,
            Err(e) => return StageOutcome::Failed(format!("missing passive list: {e}")),
        };
        let brute = ctx
            .store
            .read_lines("subdomains/brute.txt")
            .unwrap_or_default();

        let merged = merge_hosts(&ctx.target, &ctx.scope, [passive, brute]);
        info!(total = merged.len(), "merged subdomain inventory");
        match ctx
            .store
            .write_lines(self.name(), "subdomains/all.txt", &merged)
        {
            Ok(artifact) => StageOutcome::Ok(vec![artifact]),
            Err(e) => outcome_for(e),
        }
    }
}

/// Order-insensitive merge used by `merge_subdomains`.
pub fn merge_hosts<I>(target: &Target, scope: &Scope, sources: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut merged: BTreeSet<String> = BTreeSet::new();
    for source in sources {
        for line in source {
            let host = line.trim().to_ascii_lowercase();
            if !host.is_empty() && target.owns(&host) && scope.allows(&host) {
                merged.insert(host);
            }
        }
    }
    merged
}

/// Pull `FUZZ` labels out of ffuf's JSON report.
pub fn parse_ffuf_fuzz_labels(raw: &str, domain: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Vec::new();
    };
    value["results"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|r| r["input"]["FUZZ"].as_str())
        .map(|label| format!("{}.{domain}", label.trim().to_ascii_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target::parse("example.com").unwrap()
    }

    #[test]
    fn merge_is_commutative_and_idempotent() {
        let t = target();
        let scope = Scope::default();
        let a = vec!["foo.example.com".to_string(), "bar.example.com".to_string()];
        let b = vec!["bar.example.com".to_string(), "baz.example.com".to_string()];

        let ab = merge_hosts(&t, &scope, [a.clone(), b.clone()]);
        let ba = merge_hosts(&t, &scope, [b.clone(), a.clone()]);
        assert_eq!(ab, ba);

        let again = merge_hosts(&t, &scope, [ab.iter().cloned().collect::<Vec<_>>()]);
        assert_eq!(ab, again);
    }

    #[test]
    fn merge_drops_out_of_scope_and_foreign_hosts() {
        let t = target();
        let scope = Scope::new(None, Some(r"^internal\.")).unwrap();
        let merged = merge_hosts(
            &t,
            &scope,
            [vec![
                "api.example.com".to_string(),
                "internal.example.com".to_string(),
                "evil.attacker.com".to_string(),
                "API.EXAMPLE.COM".to_string(),
            ]],
        );
        assert!(merged.contains("api.example.com"));
        assert!(!merged.contains("internal.example.com"));
        assert!(!merged.iter().any(|h| h.contains("attacker")));
        assert_eq!(
            merged.iter().filter(|h| h.as_str() == "api.example.com").count(),
            1
        );
    }

    #[test]
    fn ffuf_labels_become_subdomains() {
        let raw = r#"{"results":[{"input":{"FUZZ":"dev"}},{"input":{"FUZZ":"STAGE"}}]}"#;
        let subs = parse_ffuf_fuzz_labels(raw, "example.com");
        assert_eq!(subs, vec!["dev.example.com", "stage.example.com"]);
        assert!(parse_ffuf_fuzz_labels("not json", "example.com").is_empty());
    }

    #[test]
    fn passive_tool_argv_shapes() {
        assert_eq!(passive_args("subfinder", "x.com"), vec!["-d", "x.com", "-silent"]);
        assert_eq!(passive_args("assetfinder", "x.com"), vec!["--subs-only", "x.com"]);
        assert_eq!(
            passive_args("amass", "x.com"),
            vec!["enum", "-passive", "-d", "x.com"]
        );
    }
}
