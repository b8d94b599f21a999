//! Per-run artifact directory: fixed layout, atomic writes, digests.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description;
use time::OffsetDateTime;
use tracing::debug;

use recon_core::pathguard::PathGuard;
use recon_core::EngineError;

/// Fixed subdirectories created at run start.
const SUBDIRS: &[&str] = &[
    "subdomains",
    "http",
    "screenshots",
    "endpoints",
    "endpoints/dirs",
    "js",
    "vulns",
    "params",
    "nmap",
    "reports",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    TextLines,
    Json,
    Binary,
}

/// A file produced by a stage under the run root. Written once, never
/// rewritten within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub rel_path: String,
    pub content_type: ContentType,
    pub size: u64,
    pub sha256: String,
}

/// The run-owned directory all stages write into, mediated by `PathGuard`.
#[derive(Clone)]
pub struct ArtifactStore {
    guard: PathGuard,
    run_id: String,
}

impl ArtifactStore {
    /// Create `<parent>/<target>_<UTC-stamp>/` with the fixed layout.
    pub fn create(parent: &Path, target: &str) -> Result<Self, EngineError> {
        let stamp = run_stamp();
        let run_id = format!("{target}_{stamp}");
        let root = parent.join(&run_id);
        let guard = PathGuard::new(&root)?;
        for sub in SUBDIRS {
            fs::create_dir_all(guard.root().join(sub))?;
        }
        debug!(run_root = %guard.root().display(), "created artifact directory");
        Ok(ArtifactStore { guard, run_id })
    }

    /// Open an existing run directory (resume, diff, reporting).
    pub fn open(run_root: &Path) -> Result<Self, EngineError> {
        let run_id = run_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let guard = PathGuard::new(run_root)?;
        Ok(ArtifactStore { guard, run_id })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_root(&self) -> &Path {
        self.guard.root()
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Atomically write bytes at `rel` (tmp + rename) and record the
    /// artifact. The temp file carries a random suffix so a crashed run
    /// never leaves a half-written file under the final name.
    pub fn write(
        &self,
        stage: &str,
        rel: &str,
        content_type: ContentType,
        bytes: &[u8],
    ) -> Result<Artifact, EngineError> {
        let path = self.guard.resolve_for_write(rel)?;
        let tmp = tmp_sibling(&path);
        let mut hasher = Sha256::new();
        {
            let mut f = File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
            hasher.update(bytes);
        }
        fs::rename(&tmp, &path)?;
        Ok(Artifact {
            id: format!("{stage}:{rel}"),
            rel_path: rel.to_string(),
            content_type,
            size: bytes.len() as u64,
            sha256: hex::encode(hasher.finalize()),
        })
    }

    /// Write sorted unique lines, one per line with a trailing newline.
    pub fn write_lines<I, S>(&self, stage: &str, rel: &str, lines: I) -> Result<Artifact, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: BTreeSet<String> = lines
            .into_iter()
            .map(|l| l.as_ref().trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        let mut out = String::new();
        for line in &set {
            out.push_str(line);
            out.push('\n');
        }
        self.write(stage, rel, ContentType::TextLines, out.as_bytes())
    }

    pub fn write_json<T: Serialize>(
        &self,
        stage: &str,
        rel: &str,
        value: &T,
    ) -> Result<Artifact, EngineError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write(stage, rel, ContentType::Json, &bytes)
    }

    /// Record a file an external tool already wrote into the run root
    /// (screenshots, nmap output). Hashes it in place; guard-checked.
    pub fn register_existing(&self, stage: &str, rel: &str) -> Result<Artifact, EngineError> {
        let path = self.guard.resolve(rel)?;
        let mut f = File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        let mut size = 0u64;
        loop {
            let n = f.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        Ok(Artifact {
            id: format!("{stage}:{rel}"),
            rel_path: rel.to_string(),
            content_type: ContentType::Binary,
            size,
            sha256: hex::encode(hasher.finalize()),
        })
    }

    /// Guarded absolute path handed to tools that insist on writing their
    /// own output file. Parent directories are created.
    pub fn tool_output_path(&self, rel: &str) -> Result<PathBuf, EngineError> {
        self.guard.resolve_for_write(rel)
    }

    /// Guarded absolute path of an existing artifact, for handing to tools
    /// that take input files.
    pub fn artifact_path(&self, rel: &str) -> Result<PathBuf, EngineError> {
        self.guard.resolve(rel)
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.guard.resolve(rel).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn read_to_string(&self, rel: &str) -> Result<String, EngineError> {
        let path = self.guard.resolve(rel)?;
        Ok(fs::read_to_string(path)?)
    }

    /// Non-empty trimmed lines of a text artifact.
    pub fn read_lines(&self, rel: &str) -> Result<Vec<String>, EngineError> {
        let path = self.guard.resolve(rel)?;
        let reader = BufReader::new(File::open(path)?);
        let mut lines = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        Ok(lines)
    }

    pub fn read_json<T: for<'de> Deserialize<'de>>(&self, rel: &str) -> Result<T, EngineError> {
        let text = self.read_to_string(rel)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Line count without loading the file; 0 when absent.
    pub fn line_count(&self, rel: &str) -> usize {
        self.read_lines(rel).map(|l| l.len()).unwrap_or(0)
    }

    /// Relative paths (sorted) of files under `rel_dir` matching `ext`.
    pub fn list_dir(&self, rel_dir: &str, ext: &str) -> Result<Vec<String>, EngineError> {
        let dir = self.guard.resolve(rel_dir)?;
        let mut out = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.path().is_file() && name.ends_with(ext) {
                    out.push(format!("{rel_dir}/{name}"));
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Drop any temp files a cancelled run left behind.
    pub fn sweep_tmp(&self) {
        sweep_dir(self.guard.root());
    }
}

fn sweep_dir(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            sweep_dir(&path);
        } else if path
            .file_name()
            .map(|n| n.to_string_lossy().contains(".tmp-"))
            .unwrap_or(false)
        {
            let _ = fs::remove_file(&path);
        }
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let nonce: u32 = rand::random();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".into());
    path.with_file_name(format!("{name}.tmp-{nonce:08x}"))
}

/// `YYYYMMDD_HHMMSS` in UTC, the run directory stamp.
pub fn run_stamp() -> String {
    let fmt = format_description::parse("[year][month][day]_[hour][minute][second]")
        .expect("run stamp format");
    OffsetDateTime::now_utc()
        .format(&fmt)
        .unwrap_or_else(|_| "00000000_000000".into())
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
