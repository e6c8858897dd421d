use std::{fs, path::PathBuf};

use tracing::{debug, warn};

/// Source of the access token attached to collaboration sockets.
pub trait TokenStore: Send + Sync {
    /// The current token; `None` connects unauthenticated.
    fn load(&self) -> Option<String>;
}

/// Reads the token persisted by the console login on every connect, so a
/// refreshed token is picked up without restarting.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let token = content.trim();
                if token.is_empty() {
                    debug!(path = %self.path.display(), "token file is empty");
                    None
                } else {
                    Some(token.to_string())
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %self.path.display(), "could not read token: {}", err);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticTokenStore(pub Option<String>);

impl TokenStore for StaticTokenStore {
    fn load(&self) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_token_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("console_token");
        let store = FileTokenStore::new(&path);
        assert_eq!(store.load(), None);

        fs::write(&path, "  \n").unwrap();
        assert_eq!(store.load(), None);

        fs::write(&path, "tok-123\n").unwrap();
        assert_eq!(store.load().as_deref(), Some("tok-123"));
    }
}
