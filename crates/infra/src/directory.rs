//! Registry of known users.
//!
//! Wallets are created lazily, so "does this user exist?" cannot be answered
//! by the wallet store. Transfers consult the directory to reject unknown
//! recipients.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use consult_core::UserId;

use crate::error::StoreError;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn exists(&self, user: &UserId) -> Result<bool, StoreError>;

    /// Record a user as known. Idempotent.
    async fn register(&self, user: &UserId) -> Result<(), StoreError>;
}

#[async_trait]
impl<D> UserDirectory for Arc<D>
where
    D: UserDirectory + ?Sized,
{
    async fn exists(&self, user: &UserId) -> Result<bool, StoreError> {
        (**self).exists(user).await
    }

    async fn register(&self, user: &UserId) -> Result<(), StoreError> {
        (**self).register(user).await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashSet<UserId>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            users: RwLock::new(users.into_iter().collect()),
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn exists(&self, user: &UserId) -> Result<bool, StoreError> {
        let users = self.users.read().map_err(|_| StoreError::Poisoned)?;
        Ok(users.contains(user))
    }

    async fn register(&self, user: &UserId) -> Result<(), StoreError> {
        let mut users = self.users.write().map_err(|_| StoreError::Poisoned)?;
        users.insert(user.clone());
        Ok(())
    }
}

#[cfg(feature = "postgres")]
pub use self::postgres::PostgresUserDirectory;

#[cfg(feature = "postgres")]
mod postgres {
    use std::sync::Arc;

    use async_trait::async_trait;
    use sqlx::PgPool;

    use consult_core::UserId;

    use super::UserDirectory;
    use crate::error::StoreError;

    /// Users backed by the `wallet_users` table.
    #[derive(Debug, Clone)]
    pub struct PostgresUserDirectory {
        pool: Arc<PgPool>,
    }

    impl PostgresUserDirectory {
        pub fn new(pool: PgPool) -> Self {
            Self {
                pool: Arc::new(pool),
            }
        }
    }

    #[async_trait]
    impl UserDirectory for PostgresUserDirectory {
        async fn exists(&self, user: &UserId) -> Result<bool, StoreError> {
            let row: Option<(i32,)> =
                sqlx::query_as("SELECT 1 FROM wallet_users WHERE user_id = $1")
                    .bind(user.as_str())
                    .fetch_optional(&*self.pool)
                    .await
                    .map_err(|e| StoreError::backend("user_exists", e.to_string()))?;
            Ok(row.is_some())
        }

        async fn register(&self, user: &UserId) -> Result<(), StoreError> {
            sqlx::query("INSERT INTO wallet_users (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
                .bind(user.as_str())
                .execute(&*self.pool)
                .await
                .map_err(|e| StoreError::backend("register_user", e.to_string()))?;
            Ok(())
        }
    }
}
