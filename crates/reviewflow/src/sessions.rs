//! Per-(store, platform) authentication artifacts and credentials.
//!
//! Secret material is encrypted with [`SessionCipher`] before it reaches the
//! database; metadata columns stay plaintext for lookups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::crypto::SessionCipher;
use crate::platform::Platform;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// What a successful link produced. `None` metadata leaves stored values alone.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub session: Value,
    pub external_shop_id: Option<String>,
    pub shop_owner_number: Option<String>,
    pub shop_category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub store_id: Uuid,
    pub platform: Platform,
    pub session: Option<Value>,
    pub credentials: Option<Credentials>,
    pub external_shop_id: Option<String>,
    pub shop_owner_number: Option<String>,
    pub shop_category: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    store_id: Uuid,
    session_encrypted: Option<String>,
    credentials_encrypted: Option<String>,
    external_shop_id: Option<String>,
    shop_owner_number: Option<String>,
    shop_category: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionsRepo {
    pool: PgPool,
    cipher: SessionCipher,
}

impl SessionsRepo {
    pub fn new(pool: PgPool, cipher: SessionCipher) -> Self {
        Self { pool, cipher }
    }

    pub async fn upsert_session(
        &self,
        conn: &mut PgConnection,
        store_id: Uuid,
        platform: Platform,
        update: &SessionUpdate,
    ) -> anyhow::Result<()> {
        let encrypted = self.cipher.encrypt_json(&update.session)?;

        sqlx::query(
            r#"
            INSERT INTO platform_sessions (
              store_id, platform, session_encrypted,
              external_shop_id, shop_owner_number, shop_category
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (store_id, platform) DO UPDATE
            SET session_encrypted = EXCLUDED.session_encrypted,
                external_shop_id = COALESCE(EXCLUDED.external_shop_id, platform_sessions.external_shop_id),
                shop_owner_number = COALESCE(EXCLUDED.shop_owner_number, platform_sessions.shop_owner_number),
                shop_category = COALESCE(EXCLUDED.shop_category, platform_sessions.shop_category),
                updated_at = now()
            "#,
        )
        .bind(store_id)
        .bind(platform.as_str())
        .bind(encrypted)
        .bind(update.external_shop_id.as_deref())
        .bind(update.shop_owner_number.as_deref())
        .bind(update.shop_category.as_deref())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn store_credentials(
        &self,
        store_id: Uuid,
        platform: Platform,
        credentials: &Credentials,
    ) -> anyhow::Result<()> {
        let encrypted = self.cipher.encrypt_json(credentials)?;

        sqlx::query(
            r#"
            INSERT INTO platform_sessions (store_id, platform, credentials_encrypted)
            VALUES ($1, $2, $3)
            ON CONFLICT (store_id, platform) DO UPDATE
            SET credentials_encrypted = EXCLUDED.credentials_encrypted,
                updated_at = now()
            "#,
        )
        .bind(store_id)
        .bind(platform.as_str())
        .bind(encrypted)
        .execute(&self.pool)
        .await?;

        tracing::info!(%store_id, %platform, "platform credentials stored");
        Ok(())
    }

    pub async fn get(
        &self,
        store_id: Uuid,
        platform: Platform,
    ) -> anyhow::Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT store_id, session_encrypted, credentials_encrypted,
                   external_shop_id, shop_owner_number, shop_category, updated_at
            FROM platform_sessions
            WHERE store_id = $1 AND platform = $2
            "#,
        )
        .bind(store_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let session = row
            .session_encrypted
            .as_deref()
            .map(|s| self.cipher.decrypt_json::<Value>(s))
            .transpose()?;
        let credentials = row
            .credentials_encrypted
            .as_deref()
            .map(|s| self.cipher.decrypt_json::<Credentials>(s))
            .transpose()?;

        Ok(Some(SessionRecord {
            store_id: row.store_id,
            platform,
            session,
            credentials,
            external_shop_id: row.external_shop_id,
            shop_owner_number: row.shop_owner_number,
            shop_category: row.shop_category,
            updated_at: row.updated_at,
        }))
    }

    /// Returns false when no record exists for the pair.
    pub async fn update_category(
        &self,
        conn: &mut PgConnection,
        store_id: Uuid,
        platform: Platform,
        category: &str,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE platform_sessions
            SET shop_category = $3,
                updated_at = now()
            WHERE store_id = $1 AND platform = $2
            "#,
        )
        .bind(store_id)
        .bind(platform.as_str())
        .bind(category)
        .execute(&mut *conn)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}
