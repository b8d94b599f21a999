//! External binary lookup: config override, repo-local bin/, then PATH.
//! Lookup is metadata only; nothing is executed here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

pub struct ToolRegistry {
    overrides: HashMap<String, PathBuf>,
    local_bin: Option<PathBuf>,
    cache: Mutex<HashMap<String, Option<PathBuf>>>,
}

impl ToolRegistry {
    pub fn new(overrides: HashMap<String, PathBuf>, local_bin: Option<PathBuf>) -> Self {
        ToolRegistry {
            overrides,
            local_bin,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `name` to an absolute binary path, or `None` when the tool is
    /// not installed. Results are cached for the run, so the answer is
    /// stable even if PATH changes underneath us.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        let mut cache = self.cache.lock().expect("registry cache lock");
        if let Some(hit) = cache.get(name) {
            return hit.clone();
        }
        let found = self.search(name);
        if found.is_none() {
            warn!(tool = name, "tool not found, dependent stages will be skipped");
        }
        cache.insert(name.to_string(), found.clone());
        found
    }

    /// Tools from `required` that `locate` cannot resolve.
    pub fn missing(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|t| self.locate(t).is_none())
            .map(|t| t.to_string())
            .collect()
    }

    fn search(&self, name: &str) -> Option<PathBuf> {
        if let Some(path) = self.overrides.get(name) {
            if is_executable(path) {
                return Some(path.clone());
            }
            warn!(tool = name, path = %path.display(), "configured override is not executable");
        }
        if let Some(bin) = &self.local_bin {
            let candidate = bin.join(name);
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
        let path_var = std::env::var_os("PATH")?;
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(name);
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn fake_tool(dir: &Path, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn missing_tool_is_none_and_cached() {
        let reg = ToolRegistry::new(HashMap::new(), None);
        assert!(reg.locate("definitely-not-a-real-tool-9301").is_none());
        assert!(reg.locate("definitely-not-a-real-tool-9301").is_none());
        assert_eq!(reg.missing(&["definitely-not-a-real-tool-9301"]).len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn override_beats_local_bin() {
        let over_dir = tempfile::tempdir().unwrap();
        let bin_dir = tempfile::tempdir().unwrap();
        let override_path = fake_tool(over_dir.path(), "subfinder");
        fake_tool(bin_dir.path(), "subfinder");

        let mut overrides = HashMap::new();
        overrides.insert("subfinder".to_string(), override_path.clone());
        let reg = ToolRegistry::new(overrides, Some(bin_dir.path().to_path_buf()));
        assert_eq!(reg.locate("subfinder").unwrap(), override_path);
    }

    #[cfg(unix)]
    #[test]
    fn local_bin_beats_path() {
        let bin_dir = tempfile::tempdir().unwrap();
        let local = fake_tool(bin_dir.path(), "sh");
        let reg = ToolRegistry::new(HashMap::new(), Some(bin_dir.path().to_path_buf()));
        assert_eq!(reg.locate("sh").unwrap(), local);
    }

    #[cfg(unix)]
    #[test]
    fn falls_back_to_system_path() {
        let reg = ToolRegistry::new(HashMap::new(), None);
        let sh = reg.locate("sh").expect("sh should exist on PATH");
        assert!(sh.is_absolute());
    }
}
