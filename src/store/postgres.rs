use async_trait::async_trait;
use sqlx::PgPool;

use super::{ConfigStore, ConnectionRow};
use crate::connections::ProviderKind;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for PgStore {
    async fn load(&self, provider: ProviderKind) -> anyhow::Result<Vec<ConnectionRow>> {
        let rows = sqlx::query_as::<_, ConnectionRow>(
            r#"SELECT id, idx, url, config, secret_plaintext, secret_ciphertext, secret_fingerprint, updated_at
               FROM provider_connections
               WHERE provider = $1
               ORDER BY idx ASC"#,
        )
        .bind(provider.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn replace(&self, provider: ProviderKind, rows: &[ConnectionRow]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM provider_connections WHERE provider = $1")
            .bind(provider.as_str())
            .execute(&mut *tx)
            .await?;

        for row in rows {
            sqlx::query(
                r#"INSERT INTO provider_connections
                   (provider, idx, id, url, config, secret_plaintext, secret_ciphertext, secret_fingerprint, updated_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
            )
            .bind(provider.as_str())
            .bind(row.idx)
            .bind(row.id)
            .bind(&row.url)
            .bind(&row.config)
            .bind(&row.secret_plaintext)
            .bind(&row.secret_ciphertext)
            .bind(&row.secret_fingerprint)
            .bind(row.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
