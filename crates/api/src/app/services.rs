//! Infrastructure wiring: stores, directory, processor and query service.

use std::sync::Arc;

use thiserror::Error;

use consult_infra::{
    BalanceQueryService, InMemoryUserDirectory, InMemoryWalletStore, StoreError,
    TransactionProcessor, UserDirectory, WalletConfig, WalletStore,
};

use crate::config::ApiConfig;

pub type SharedStore = Arc<dyn WalletStore>;
pub type SharedDirectory = Arc<dyn UserDirectory>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database connection failed: {0}")]
    Database(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct AppServices {
    pub processor: TransactionProcessor<SharedStore, SharedDirectory>,
    pub queries: BalanceQueryService<SharedStore>,
    pub directory: SharedDirectory,
    pub config: WalletConfig,
}

impl AppServices {
    pub fn new(store: SharedStore, directory: SharedDirectory, config: WalletConfig) -> Self {
        Self {
            processor: TransactionProcessor::new(store.clone(), directory.clone(), config),
            queries: BalanceQueryService::new(store, config),
            directory,
            config,
        }
    }
}

pub async fn build_services(config: &ApiConfig) -> Result<AppServices, ServiceError> {
    if config.use_persistent_stores {
        #[cfg(feature = "postgres")]
        {
            return build_persistent_services(config).await;
        }
        #[cfg(not(feature = "postgres"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but postgres feature not enabled, falling back to in-memory"
            );
        }
    }

    Ok(build_in_memory_services(config.wallet))
}

pub fn build_in_memory_services(config: WalletConfig) -> AppServices {
    let store: SharedStore = Arc::new(InMemoryWalletStore::new());
    let directory: SharedDirectory = Arc::new(InMemoryUserDirectory::new());
    AppServices::new(store, directory, config)
}

#[cfg(feature = "postgres")]
async fn build_persistent_services(config: &ApiConfig) -> Result<AppServices, ServiceError> {
    use consult_infra::{PostgresUserDirectory, PostgresWalletStore};

    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| ServiceError::Database("DATABASE_URL is not set".to_string()))?;

    let pool = sqlx::PgPool::connect(database_url)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    let store = PostgresWalletStore::new(pool.clone());
    store.migrate().await?;
    tracing::info!("postgres wallet store ready");

    let store: SharedStore = Arc::new(store);
    let directory: SharedDirectory = Arc::new(PostgresUserDirectory::new(pool));
    Ok(AppServices::new(store, directory, config.wallet))
}
