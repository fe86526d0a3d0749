use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Matrix homeserver base URL (e.g. `https://matrix.example.org`)
    pub matrix_homeserver_url: String,

    /// Access token of the bot account used to post notices
    pub matrix_access_token: String,

    /// Address the HTTP server listens on
    pub bind_addr: SocketAddr,

    /// JSON file holding known projects, message templates and room tracking
    pub store_path: PathBuf,

    /// User ids allowed to run admin commands
    pub admin_users: Vec<String>,

    /// HTTP timeout for a single Matrix request in seconds (default: 30)
    pub delivery_timeout_secs: u64,

    /// Delay before the first retry in seconds (default: 5)
    pub backoff_initial_secs: u64,

    /// Amount added to the retry delay after every consecutive failure (default: 5)
    pub backoff_step_secs: u64,

    /// Upper bound of the retry delay in seconds (default: 300)
    pub backoff_max_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            matrix_homeserver_url: std::env::var("MATRIX_HOMESERVER_URL").map_err(|_| {
                anyhow::anyhow!("MATRIX_HOMESERVER_URL environment variable is required")
            })?,
            matrix_access_token: std::env::var("MATRIX_ACCESS_TOKEN").map_err(|_| {
                anyhow::anyhow!("MATRIX_ACCESS_TOKEN environment variable is required")
            })?,
            bind_addr: std::env::var("BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("BIND_ADDR must be a valid socket address"))?,
            store_path: std::env::var("STORE_PATH")
                .unwrap_or_else(|_| "herald.json".to_string())
                .into(),
            admin_users: std::env::var("ADMIN_USERS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
            delivery_timeout_secs: std::env::var("DELIVERY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DELIVERY_TIMEOUT_SECS must be a valid u64"))?,
            backoff_initial_secs: std::env::var("BACKOFF_INITIAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("BACKOFF_INITIAL_SECS must be a valid u64"))?,
            backoff_step_secs: std::env::var("BACKOFF_STEP_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("BACKOFF_STEP_SECS must be a valid u64"))?,
            backoff_max_secs: std::env::var("BACKOFF_MAX_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("BACKOFF_MAX_SECS must be a valid u64"))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the delivery worker cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backoff_initial_secs == 0 {
            anyhow::bail!("BACKOFF_INITIAL_SECS must be greater than zero");
        }
        if self.backoff_max_secs < self.backoff_initial_secs {
            anyhow::bail!("BACKOFF_MAX_SECS must not be smaller than BACKOFF_INITIAL_SECS");
        }
        if self.delivery_timeout_secs == 0 {
            anyhow::bail!("DELIVERY_TIMEOUT_SECS must be greater than zero");
        }
        Ok(())
    }

    /// Whether `user_id` may run admin-only commands.
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_users.iter().any(|u| u == user_id)
    }
}

/// Split a comma-separated list, trimming whitespace and skipping empty items.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
