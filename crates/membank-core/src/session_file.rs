//! The saved session identifier: one trimmed line in
//! `<home>/.memory-bank/session_id`.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::state_dir;
use crate::error::{MemoryError, MemoryResult};

const SESSION_FILE: &str = "session_id";

/// Fresh identifier of the form `sess-<unix nanos>`.
pub fn new_session_id() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| chrono::Utc::now().timestamp_micros() * 1000);
    format!("sess-{nanos}")
}

#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file under the user's home directory.
    pub fn default_location() -> MemoryResult<Self> {
        state_dir()
            .map(|dir| Self::at(dir.join(SESSION_FILE)))
            .ok_or_else(|| MemoryError::NotFound("home directory".to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the file is absent or blank.
    pub fn load(&self) -> MemoryResult<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let id = raw.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `id` as one line, creating the directory if needed.
    pub fn save(&self, id: &str) -> MemoryResult<()> {
        let id = id.trim();
        if id.is_empty() {
            return Err(MemoryError::missing("session_id"));
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, format!("{id}\n"))?;
        debug!(path = %self.path.display(), "session id saved");
        Ok(())
    }

    /// The saved id, or a new one that is saved first. The flag is `true`
    /// when the id was just created.
    pub fn get_or_create(&self) -> MemoryResult<(String, bool)> {
        if let Some(id) = self.load()? {
            return Ok((id, false));
        }
        let id = new_session_id();
        self.save(&id)?;
        Ok((id, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_file_is_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let file = SessionFile::at(dir.path().join("nested/session_id"));
        assert_eq!(file.load().unwrap(), None);
    }

    #[test]
    fn save_creates_directory_and_load_trims() {
        let dir = tempfile::tempdir().unwrap();
        let file = SessionFile::at(dir.path().join("nested/session_id"));
        file.save("  sess-42 ").unwrap();
        assert_eq!(
            std::fs::read_to_string(file.path()).unwrap(),
            "sess-42\n"
        );
        assert_eq!(file.load().unwrap().as_deref(), Some("sess-42"));
    }

    #[test]
    fn blank_file_counts_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_id");
        std::fs::write(&path, "\n  \n").unwrap();
        assert_eq!(SessionFile::at(path).load().unwrap(), None);
    }

    #[test]
    fn get_or_create_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let file = SessionFile::at(dir.path().join("session_id"));
        let (first, created) = file.get_or_create().unwrap();
        assert!(created);
        assert!(first.starts_with("sess-"));
        let (second, created) = file.get_or_create().unwrap();
        assert!(!created);
        assert_eq!(first, second);
    }
}
