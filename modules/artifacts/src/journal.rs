//! State journal: the on-disk record of stage outcomes that makes a run
//! resumable. Rewritten atomically after every terminal stage transition.

use serde::{Deserialize, Serialize};

use recon_core::{redact, EngineError};

use crate::store::{now_rfc3339, ArtifactStore, ContentType};

pub const JOURNAL_FILE: &str = ".state.json";
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    /// "ok" | "skipped" | "failed"
    pub state: String,
    pub reason: Option<String>,
    pub duration_ms: u64,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journal {
    pub schema_version: u32,
    pub run_id: String,
    pub config_hash: String,
    pub updated_at: String,
    pub completed: Vec<StageRecord>,
}

impl Journal {
    pub fn new(run_id: &str, config_hash: &str) -> Self {
        Journal {
            schema_version: SCHEMA_VERSION,
            run_id: run_id.to_string(),
            config_hash: config_hash.to_string(),
            updated_at: now_rfc3339(),
            completed: Vec::new(),
        }
    }

    pub fn load(store: &ArtifactStore) -> Option<Journal> {
        store.read_json::<Journal>(JOURNAL_FILE).ok()
    }

    /// Record a terminal stage state, replacing any earlier record for the
    /// same stage. Reasons pass through the redactor before touching disk.
    pub fn record(&mut self, mut record: StageRecord) {
        record.reason = record.reason.map(|r| redact::redact(&r));
        self.completed.retain(|r| r.name != record.name);
        self.completed.push(record);
        self.updated_at = now_rfc3339();
    }

    pub fn save(&self, store: &ArtifactStore) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        store.write("journal", JOURNAL_FILE, ContentType::Json, &bytes)?;
        Ok(())
    }

    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.completed.iter().find(|r| r.name == name)
    }

    /// Stages safe to skip on resume: recorded OK and every declared output
    /// still present under the run root.
    pub fn resumable_ok_stages(&self, store: &ArtifactStore) -> Vec<String> {
        self.completed
            .iter()
            .filter(|r| r.state == "ok")
            .filter(|r| r.outputs.iter().all(|rel| store.exists(rel)))
            .map(|r| r.name.clone())
            .collect()
    }

    /// Refuse resume when the recorded config differs from the current one.
    pub fn validate_resume(&self, config_hash: &str) -> Result<(), EngineError> {
        if self.config_hash != config_hash {
            return Err(EngineError::ResumeMismatch(format!(
                "journal config hash {} does not match current {}",
                self.config_hash, config_hash
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::create(dir.path(), "example.com").unwrap();
        (dir, store)
    }

    fn ok_record(name: &str, outputs: &[&str]) -> StageRecord {
        StageRecord {
            name: name.into(),
            state: "ok".into(),
            reason: None,
            duration_ms: 10,
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let (_dir, s) = store();
        let mut j = Journal::new(s.run_id(), "abc123");
        j.record(ok_record("passive_enum", &[]));
        j.save(&s).unwrap();

        let loaded = Journal::load(&s).unwrap();
        assert_eq!(loaded.config_hash, "abc123");
        assert_eq!(loaded.completed.len(), 1);
        assert_eq!(loaded.completed[0].name, "passive_enum");
    }

    #[test]
    fn re_recording_replaces_the_stage() {
        let (_dir, s) = store();
        let mut j = Journal::new(s.run_id(), "h");
        j.record(ok_record("probe_http", &[]));
        let mut failed = ok_record("probe_http", &[]);
        failed.state = "failed".into();
        j.record(failed);
        assert_eq!(j.completed.len(), 1);
        assert_eq!(j.completed[0].state, "failed");
    }

    #[test]
    fn resume_requires_matching_hash() {
        let j = Journal::new("run", "aaa");
        assert!(j.validate_resume("aaa").is_ok());
        assert!(matches!(
            j.validate_resume("bbb"),
            Err(EngineError::ResumeMismatch(_))
        ));
    }

    #[test]
    fn ok_stage_with_missing_output_is_not_resumable() {
        let (_dir, s) = store();
        s.write_lines("merge_subdomains", "subdomains/all.txt", ["a.example.com"])
            .unwrap();
        let mut j = Journal::new(s.run_id(), "h");
        j.record(ok_record("merge_subdomains", &["subdomains/all.txt"]));
        j.record(ok_record("probe_http", &["subdomains/live.txt"]));
        assert_eq!(
            j.resumable_ok_stages(&s),
            vec!["merge_subdomains".to_string()]
        );
    }

    #[test]
    fn reasons_are_redacted_before_persisting() {
        let mut j = Journal::new("run", "h");
        let mut rec = ok_record("vuln_scan", &[]);
        rec.reason = Some("tool said api_key=verysecret123".into());
        j.record(rec);
        assert!(j.completed[0].reason.as_ref().unwrap().contains("[REDACTED:credential]"));
    }
}
