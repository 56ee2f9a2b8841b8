use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::debug;

/// Key under which the bearer token is persisted.
pub const TOKEN_KEY: &str = "token";

/// Persistent client-side storage for the session token.
///
/// Presence of a token means "authenticated"; expiry is only discovered when
/// the server answers 401.
pub trait TokenStore: Send + Sync {
    fn token(&self) -> Result<Option<String>>;
    fn set_token(&self, token: &str) -> Result<()>;
    fn clear_token(&self) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Result<Option<String>> {
        Ok(self.token.read().clone())
    }

    fn set_token(&self, token: &str) -> Result<()> {
        *self.token.write() = Some(token.to_string());
        Ok(())
    }

    fn clear_token(&self) -> Result<()> {
        *self.token.write() = None;
        Ok(())
    }
}

/// Token store backed by a small JSON key/value file.
pub struct FileTokenStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("read token file {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("parse token file {}", self.path.display()))
    }

    fn save(&self, values: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(values)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("write token file {}", self.path.display()))?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn token(&self) -> Result<Option<String>> {
        let _guard = self.lock.read();
        let values = self.load()?;
        Ok(values
            .get(TOKEN_KEY)
            .filter(|token| !token.is_empty())
            .cloned())
    }

    fn set_token(&self, token: &str) -> Result<()> {
        let _guard = self.lock.write();
        let mut values = self.load()?;
        values.insert(TOKEN_KEY.to_string(), token.to_string());
        self.save(&values)?;
        debug!("token stored in {}", self.path.display());
        Ok(())
    }

    fn clear_token(&self) -> Result<()> {
        let _guard = self.lock.write();
        let mut values = self.load()?;
        if values.remove(TOKEN_KEY).is_some() {
            self.save(&values)?;
        }
        Ok(())
    }
}
