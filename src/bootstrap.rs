//! Bootstrap helpers for the session client.
//!
//! The client keeps its durable state under `~/.defi-optimizer/`:
//! `credentials.json` (the persisted session) and an optional `.env` with
//! API endpoint overrides (standard dotenvy format).

use std::path::{Path, PathBuf};

/// Directory holding client state: `~/.defi-optimizer`.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".defi-optimizer")
}

/// Path to the client-specific `.env` file: `~/.defi-optimizer/.env`.
pub fn client_env_path() -> PathBuf {
    data_dir().join(".env")
}

/// Load env vars from `./.env` and then `~/.defi-optimizer/.env`.
///
/// dotenvy never overwrites existing env vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.defi-optimizer/.env`
pub fn load_client_env() {
    let _ = dotenvy::dotenv();
    load_env_file(&client_env_path());
}

fn load_env_file(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = dotenvy::from_path(path) {
        tracing::warn!("Failed to load {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_data_dir_layout() {
        let dir = data_dir();
        assert!(dir.ends_with(".defi-optimizer"));
        assert_eq!(client_env_path(), dir.join(".env"));
    }

    #[test]
    fn test_env_file_is_dotenv_format() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "DEFI_API_URL=\"https://api.example.com\"\n").unwrap();

        let parsed: Vec<(String, String)> = dotenvy::from_path_iter(&env_path)
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, "DEFI_API_URL");
        assert_eq!(parsed[0].1, "https://api.example.com");
    }

    #[test]
    fn test_missing_env_file_is_ignored() {
        let dir = tempdir().unwrap();
        load_env_file(&dir.path().join("absent.env"));
    }
}
