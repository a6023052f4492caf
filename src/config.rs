use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Args)]
pub struct StoreConfig {
    /// Path to the SQLite database (defaults to the platform data directory)
    #[arg(long = "db", env = "JOBBOARD_DB", global = true)]
    pub db_path: Option<PathBuf>,

    /// Milliseconds a writer waits on a competing transaction before failing
    #[arg(long, env = "JOBBOARD_BUSY_TIMEOUT_MS", default_value_t = 5000, global = true)]
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    pub fn resolve_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobboard") {
            Ok(proj_dirs.data_dir().join("jobboard.db"))
        } else {
            Ok(PathBuf::from("jobboard.db"))
        }
    }

    pub fn ensure_parent_dir(&self) -> Result<PathBuf> {
        let path = self.resolve_path()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
        }
        Ok(path)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        store: StoreConfig,
    }

    #[test]
    fn test_explicit_db_path_wins() {
        let harness = Harness::parse_from(["test", "--db", "/tmp/board.db", "--busy-timeout-ms", "250"]);
        assert_eq!(harness.store.resolve_path().unwrap(), PathBuf::from("/tmp/board.db"));
        assert_eq!(harness.store.busy_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_default_path_ends_with_db_file() {
        let store = StoreConfig {
            db_path: None,
            busy_timeout_ms: 5000,
        };
        let path = store.resolve_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "jobboard.db");
    }

    #[test]
    fn test_ensure_parent_dir_creates_missing_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        let nested = tmp.path().join("a/b/board.db");
        let store = StoreConfig {
            db_path: Some(nested.clone()),
            busy_timeout_ms: 5000,
        };
        assert_eq!(store.ensure_parent_dir().unwrap(), nested);
        assert!(tmp.path().join("a/b").is_dir());
    }
}
