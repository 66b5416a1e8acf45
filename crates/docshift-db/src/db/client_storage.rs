//! Client storage repository: persistence for the client_storages table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use docshift_core::models::ClientStorageAccount;
use docshift_core::AppError;

use super::store::AccountStore;

#[derive(Clone)]
pub struct ClientStorageRepository {
    pool: PgPool,
}

impl ClientStorageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for ClientStorageRepository {
    #[tracing::instrument(skip(self, client_id), fields(db.table = "client_storages", client_id = %client_id))]
    async fn get(&self, client_id: Uuid) -> Result<Option<ClientStorageAccount>, AppError> {
        let account = sqlx::query_as::<Postgres, ClientStorageAccount>(
            r#"
            SELECT client_id, size_bytes, created_at, expires_at, last_calculated_at
            FROM client_storages
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    #[tracing::instrument(skip(self, account), fields(db.table = "client_storages", client_id = %account.client_id))]
    async fn insert_if_absent(
        &self,
        account: &ClientStorageAccount,
    ) -> Result<ClientStorageAccount, AppError> {
        let inserted = sqlx::query_as::<Postgres, ClientStorageAccount>(
            r#"
            INSERT INTO client_storages (client_id, size_bytes, created_at, expires_at, last_calculated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (client_id) DO NOTHING
            RETURNING client_id, size_bytes, created_at, expires_at, last_calculated_at
            "#,
        )
        .bind(account.client_id)
        .bind(account.size_bytes)
        .bind(account.created_at)
        .bind(account.expires_at)
        .bind(account.last_calculated_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(account) = inserted {
            tracing::info!(client_id = %account.client_id, "Client storage account created");
            return Ok(account);
        }

        // Lost the insert race; the other writer's row wins.
        self.get(account.client_id).await?.ok_or_else(|| {
            AppError::NotFound(format!(
                "client storage account {} vanished after insert conflict",
                account.client_id
            ))
        })
    }

    #[tracing::instrument(skip(self, client_id), fields(db.table = "client_storages", client_id = %client_id))]
    async fn update_usage(
        &self,
        client_id: Uuid,
        size_bytes: i64,
        calculated_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE client_storages
            SET size_bytes = $2, last_calculated_at = $3
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .bind(size_bytes)
        .bind(calculated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "client_storages"))]
    async fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClientStorageAccount>, AppError> {
        let accounts = sqlx::query_as::<Postgres, ClientStorageAccount>(
            r#"
            SELECT client_id, size_bytes, created_at, expires_at, last_calculated_at
            FROM client_storages
            WHERE expires_at < $1
            ORDER BY expires_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }

    #[tracing::instrument(skip(self, client_id), fields(db.table = "client_storages", client_id = %client_id))]
    async fn delete(&self, client_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM client_storages WHERE client_id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
