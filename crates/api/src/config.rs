//! Process configuration from environment variables.

use thiserror::Error;

use consult_infra::{ConfigError, WalletConfig};

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error)]
pub enum ApiConfigError {
    #[error(transparent)]
    Wallet(#[from] ConfigError),

    #[error("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")]
    MissingDatabaseUrl,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub wallet: WalletConfig,
}

impl ApiConfig {
    /// In-memory stores, default wallet settings.
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            jwt_secret: jwt_secret.into(),
            use_persistent_stores: false,
            database_url: None,
            wallet: WalletConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self, ApiConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiConfigError> {
        let jwt_secret = lookup("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let use_persistent_stores = lookup("USE_PERSISTENT_STORES")
            .and_then(|v| v.trim().parse::<bool>().ok())
            .unwrap_or(false);

        let database_url = lookup("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ApiConfigError::MissingDatabaseUrl);
        }

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            jwt_secret,
            use_persistent_stores,
            database_url,
            wallet: WalletConfig::from_lookup(&lookup)?,
        })
    }
}
