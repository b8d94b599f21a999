//! Change detection between two sealed run directories. Pure artifact
//! reader; nothing here touches the network or spawns tools.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use artifacts::ArtifactStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Change {
    pub kind: String,
    pub severity: String,
    pub description: String,
    pub details: Vec<String>,
}

/// Compare two runs of the same target: new/removed subdomains, newly live
/// hosts, and new takeover findings.
pub fn diff_runs(previous: &ArtifactStore, current: &ArtifactStore) -> Vec<Change> {
    let mut changes = Vec::new();

    let prev_subs = line_set(previous, "subdomains/all.txt");
    let curr_subs = line_set(current, "subdomains/all.txt");
    push_set_change(
        &mut changes,
        "new_subdomains",
        "medium",
        "new subdomain(s) discovered",
        curr_subs.difference(&prev_subs),
    );
    push_set_change(
        &mut changes,
        "removed_subdomains",
        "low",
        "subdomain(s) no longer present",
        prev_subs.difference(&curr_subs),
    );

    let prev_live = line_set(previous, "subdomains/live.txt");
    let curr_live = line_set(current, "subdomains/live.txt");
    push_set_change(
        &mut changes,
        "new_live_hosts",
        "medium",
        "host(s) newly responding",
        curr_live.difference(&prev_live),
    );

    let prev_takeovers = takeover_hosts(previous);
    let curr_takeovers = takeover_hosts(current);
    push_set_change(
        &mut changes,
        "new_takeovers",
        "high",
        "new takeover candidate(s)",
        curr_takeovers.difference(&prev_takeovers),
    );

    changes
}

fn line_set(store: &ArtifactStore, rel: &str) -> BTreeSet<String> {
    store.read_lines(rel).unwrap_or_default().into_iter().collect()
}

fn takeover_hosts(store: &ArtifactStore) -> BTreeSet<String> {
    store
        .read_json::<Vec<serde_json::Value>>("vulns/takeovers.json")
        .unwrap_or_default()
        .iter()
        .filter_map(|t| t["host"].as_str().map(String::from))
        .collect()
}

fn push_set_change<'a>(
    changes: &mut Vec<Change>,
    kind: &str,
    severity: &str,
    what: &str,
    items: impl Iterator<Item = &'a String>,
) {
    let details: Vec<String> = items.cloned().collect();
    if !details.is_empty() {
        changes.push(Change {
            kind: kind.to_string(),
            severity: severity.to_string(),
            description: format!("{} {}", details.len(), what),
            details,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_pair() -> (tempfile::TempDir, ArtifactStore, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let prev = ArtifactStore::open(&dir.path().join("example.com_prev")).unwrap();
        let curr = ArtifactStore::open(&dir.path().join("example.com_curr")).unwrap();
        (dir, prev, curr)
    }

    #[test]
    fn detects_new_and_removed_subdomains() {
        let (_dir, prev, curr) = run_pair();
        prev.write_lines("m", "subdomains/all.txt", ["a.example.com", "b.example.com"]).unwrap();
        curr.write_lines("m", "subdomains/all.txt", ["b.example.com", "c.example.com"]).unwrap();

        let changes = diff_runs(&prev, &curr);
        let new = changes.iter().find(|c| c.kind == "new_subdomains").unwrap();
        assert_eq!(new.details, vec!["c.example.com"]);
        assert_eq!(new.severity, "medium");
        let removed = changes.iter().find(|c| c.kind == "removed_subdomains").unwrap();
        assert_eq!(removed.details, vec!["a.example.com"]);
    }

    #[test]
    fn new_takeovers_are_high_severity() {
        let (_dir, prev, curr) = run_pair();
        prev.write_json("t", "vulns/takeovers.json", &serde_json::json!([])).unwrap();
        curr.write_json(
            "t",
            "vulns/takeovers.json",
            &serde_json::json!([{"host": "gone.example.com", "service": "github"}]),
        )
        .unwrap();

        let changes = diff_runs(&prev, &curr);
        let takeover = changes.iter().find(|c| c.kind == "new_takeovers").unwrap();
        assert_eq!(takeover.severity, "high");
        assert_eq!(takeover.details, vec!["gone.example.com"]);
    }

    #[test]
    fn identical_runs_produce_no_changes() {
        let (_dir, prev, curr) = run_pair();
        prev.write_lines("m", "subdomains/all.txt", ["a.example.com"]).unwrap();
        curr.write_lines("m", "subdomains/all.txt", ["a.example.com"]).unwrap();
        assert!(diff_runs(&prev, &curr).is_empty());
    }
}
