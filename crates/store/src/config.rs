use std::path::PathBuf;

/// Default directory for the filesystem fallback.
const DEFAULT_STATE_DIR: &str = ".dossier/state";

/// State store selection loaded from environment variables.
///
/// | Env Var        | Default          |
/// |----------------|------------------|
/// | `DATABASE_URL` | unset (fallback) |
/// | `STATE_DIR`    | `.dossier/state` |
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Postgres connection URL. `None` selects the filesystem fallback.
    pub database_url: Option<String>,
    /// Directory used by the filesystem fallback.
    pub state_dir: PathBuf,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let state_dir = std::env::var("STATE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_STATE_DIR.into());

        Self {
            database_url,
            state_dir: PathBuf::from(state_dir),
        }
    }

    /// Whether a durable backend is configured.
    pub fn is_durable(&self) -> bool {
        self.database_url.is_some()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }
}
