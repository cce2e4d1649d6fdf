// ── Session file ──
//
// `auth.json` holding the last good `OAuthData`. Read once at start,
// rewritten after every successful login or refresh.

use std::path::{Path, PathBuf};

use goveelink_core::{CoreError, OAuthData, TokenStore};
use tracing::debug;

use crate::ConfigError;

#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform data directory.
    pub fn default_location() -> Self {
        Self::new(crate::token_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Option<OAuthData>, ConfigError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Write through a sibling temp file so a crash never leaves half a file.
    pub fn write(&self, data: &OAuthData) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(data)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "session saved");
        Ok(())
    }

    /// Forget the stored session.
    pub fn clear(&self) -> Result<(), ConfigError> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<OAuthData>, CoreError> {
        self.read().map_err(|e| CoreError::TokenStore {
            message: e.to_string(),
        })
    }

    fn save(&self, data: &OAuthData) -> Result<(), CoreError> {
        self.write(data).map_err(|e| CoreError::TokenStore {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    fn session() -> OAuthData {
        OAuthData {
            token: "tok".into(),
            refresh_token: "ref".into(),
            token_expiration: 1_700_000_000_000,
            account_topic: "GA/account".into(),
        }
    }

    #[test]
    fn absent_file_is_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("auth.json"));

        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn saved_session_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("data").join("auth.json"));

        store.save(&session()).unwrap();

        assert_eq!(store.load().unwrap(), Some(session()));
        assert!(!dir.path().join("data").join("auth.json.tmp").exists());
    }

    #[test]
    fn file_uses_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("auth.json"));

        store.save(&session()).unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();

        assert!(raw.contains("\"refreshToken\""));
        assert!(raw.contains("\"tokenExpiration\""));
        assert!(raw.contains("\"accountTopic\""));
    }

    #[test]
    fn corrupt_file_is_a_token_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = FileTokenStore::new(path).load().unwrap_err();

        assert!(matches!(err, CoreError::TokenStore { .. }));
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("auth.json"));
        store.save(&session()).unwrap();

        store.clear().unwrap();
        store.clear().unwrap();

        assert_eq!(store.load().unwrap(), None);
    }
}
