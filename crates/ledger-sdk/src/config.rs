use std::path::PathBuf;
use std::time::Duration;

/// Default floor for the sync cursor: the block the vault contract was
/// deployed at. Reads before any sync start here.
pub const DEFAULT_INITIAL_SYNC_BLOCK: &str = "30538369";

pub const DEFAULT_APP_PREFIX: &str = "veilnote";
pub const DEFAULT_ENV: &str = "mainnet";

/// Bounded retry: attempts per remote call, base delay doubled per attempt.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Every queued task, the auth challenge sequence included, must settle
/// within this window or the caller sees a timeout.
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 30_000;

#[derive(Clone, Debug)]
pub struct SdkConfig {
    /// Base URL of the trusted encryption service.
    pub tes_url: String,
    /// Local key-value store location.
    pub db_path: PathBuf,
    /// Namespace prefix for every persisted key.
    pub app_prefix: String,
    /// Environment discriminator appended to the source-tree name.
    pub env: String,
    /// Cursor floor returned before the first sync and after `clear()`.
    pub initial_sync_block: String,
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub task_timeout: Duration,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            tes_url: "https://tes.veilnote.io".to_string(),
            db_path: PathBuf::from("veilnote.db"),
            app_prefix: DEFAULT_APP_PREFIX.to_string(),
            env: DEFAULT_ENV.to_string(),
            initial_sync_block: DEFAULT_INITIAL_SYNC_BLOCK.to_string(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            task_timeout: Duration::from_millis(DEFAULT_TASK_TIMEOUT_MS),
        }
    }
}

impl SdkConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let tes_url = std::env::var("VEILNOTE_TES_URL").unwrap_or_else(|_| defaults.tes_url.clone());
        let db_path = std::env::var("VEILNOTE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| defaults.db_path.clone());
        let env = std::env::var("VEILNOTE_ENV").unwrap_or_else(|_| defaults.env.clone());

        let initial_sync_block = std::env::var("VEILNOTE_INITIAL_SYNC_BLOCK")
            .ok()
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or_else(|| defaults.initial_sync_block.clone());

        let retry_attempts = std::env::var("VEILNOTE_RETRY_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.retry_attempts);

        Self {
            tes_url,
            db_path,
            env,
            initial_sync_block,
            retry_attempts,
            ..defaults
        }
    }

    /// Name of the sled tree rooting all partitioned ledger state.
    pub fn source_tree_name(&self) -> String {
        format!("{}.source.{}", self.app_prefix, self.env)
    }

    pub fn with_tes_url(mut self, url: &str) -> Self {
        self.tes_url = url.to_string();
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_initial_sync_block(mut self, block: &str) -> Self {
        self.initial_sync_block = block.to_string();
        self
    }
}
