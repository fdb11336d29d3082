//! # Runtime Directory
//!
//! Location of the `.discovery` directory that holds the database and the
//! persisted server configuration.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Environment variable overriding the runtime directory
pub const RUNTIME_PATH_ENV: &str = "DISCOVERY_RUNTIME_PATH";

/// Get the runtime directory path (`.discovery` under the working directory)
pub fn get_runtime_path() -> PathBuf {
    if let Ok(path) = std::env::var(RUNTIME_PATH_ENV) {
        return PathBuf::from(path);
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".discovery")
}

/// Ensure the runtime directory exists
pub async fn ensure_runtime_dir() -> Result<PathBuf> {
    let path = get_runtime_path();
    fs::create_dir_all(&path)
        .await
        .with_context(|| format!("Failed to create runtime directory: {:?}", path))?;
    Ok(path)
}

/// Write a file, creating parent directories as needed
pub async fn write_file(path: impl AsRef<Path>, content: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write file: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_runtime_path() {
        if std::env::var(RUNTIME_PATH_ENV).is_err() {
            assert!(get_runtime_path().ends_with(".discovery"));
        }
    }

    #[tokio::test]
    async fn test_write_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("config.json");

        write_file(&path, "{}").await.unwrap();
        assert_eq!(fs::read_to_string(&path).await.unwrap(), "{}");
    }
}
