use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewImage {
    pub url: String,
}

/// One review in platform-neutral form, keyed by its platform id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CanonicalReview {
    pub external_id: String,
    pub rating: Option<i32>,
    pub content: Option<String>,
    pub author_name: Option<String>,
    pub menus: Vec<String>,
    pub images: Vec<ReviewImage>,
    pub written_at: Option<DateTime<Utc>>,
    pub platform_reply_content: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Review {
    pub id: Uuid,
    pub store_id: Uuid,
    pub platform: String,
    pub external_id: String,
    pub rating: Option<i32>,
    pub content: Option<String>,
    pub author_name: Option<String>,
    pub menus: Json<Vec<String>>,
    pub images: Json<Vec<ReviewImage>>,
    pub written_at: Option<DateTime<Utc>>,
    pub platform_reply_content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MirrorOutcome {
    pub upserted: u64,
    pub deleted: u64,
}

/// Which row a reply lands on.
#[derive(Debug, Clone, Copy)]
pub enum ReviewKey<'a> {
    Id(&'a str),
    ExternalId(&'a str),
}

#[derive(Clone)]
pub struct ReviewsRepo {
    pool: PgPool,
}

impl ReviewsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, store_id: Uuid, platform: Platform) -> anyhow::Result<Vec<Review>> {
        let rows = sqlx::query_as::<_, Review>(
            r#"
            SELECT *
            FROM reviews
            WHERE store_id = $1 AND platform = $2
            ORDER BY written_at DESC NULLS LAST, external_id ASC
            "#,
        )
        .bind(store_id)
        .bind(platform.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Makes the stored set for (store, platform) equal `rows`: one batched
    /// upsert by external id, then delete whatever the fetch no longer contains.
    /// `rows` must already be unique by external id, or the upsert would touch
    /// the same row twice.
    pub async fn mirror_replace(
        conn: &mut PgConnection,
        store_id: Uuid,
        platform: Platform,
        rows: &[CanonicalReview],
    ) -> anyhow::Result<MirrorOutcome> {
        let keep: Vec<String> = rows.iter().map(|r| r.external_id.clone()).collect();

        if !rows.is_empty() {
            let mut ratings = Vec::with_capacity(rows.len());
            let mut contents = Vec::with_capacity(rows.len());
            let mut authors = Vec::with_capacity(rows.len());
            let mut menus = Vec::with_capacity(rows.len());
            let mut images = Vec::with_capacity(rows.len());
            let mut written = Vec::with_capacity(rows.len());
            let mut replies = Vec::with_capacity(rows.len());
            for row in rows {
                ratings.push(row.rating);
                contents.push(row.content.clone());
                authors.push(row.author_name.clone());
                menus.push(serde_json::to_string(&row.menus)?);
                images.push(serde_json::to_string(&row.images)?);
                written.push(row.written_at);
                replies.push(row.platform_reply_content.clone());
            }

            sqlx::query(
                r#"
                INSERT INTO reviews (
                  store_id, platform, external_id,
                  rating, content, author_name, menus, images,
                  written_at, platform_reply_content
                )
                SELECT $1, $2, t.external_id,
                       t.rating, t.content, t.author_name, t.menus::jsonb, t.images::jsonb,
                       t.written_at, t.reply
                FROM UNNEST(
                  $3::text[], $4::int4[], $5::text[], $6::text[],
                  $7::text[], $8::text[], $9::timestamptz[], $10::text[]
                ) AS t(external_id, rating, content, author_name, menus, images, written_at, reply)
                ON CONFLICT (store_id, platform, external_id) DO UPDATE
                SET rating = EXCLUDED.rating,
                    content = EXCLUDED.content,
                    author_name = EXCLUDED.author_name,
                    menus = EXCLUDED.menus,
                    images = EXCLUDED.images,
                    written_at = EXCLUDED.written_at,
                    platform_reply_content = COALESCE(EXCLUDED.platform_reply_content, reviews.platform_reply_content),
                    updated_at = now()
                WHERE (reviews.rating, reviews.content, reviews.author_name,
                       reviews.menus, reviews.images, reviews.written_at,
                       reviews.platform_reply_content)
                  IS DISTINCT FROM
                      (EXCLUDED.rating, EXCLUDED.content, EXCLUDED.author_name,
                       EXCLUDED.menus, EXCLUDED.images, EXCLUDED.written_at,
                       COALESCE(EXCLUDED.platform_reply_content, reviews.platform_reply_content))
                "#,
            )
            .bind(store_id)
            .bind(platform.as_str())
            .bind(&keep)
            .bind(&ratings)
            .bind(&contents)
            .bind(&authors)
            .bind(&menus)
            .bind(&images)
            .bind(&written)
            .bind(&replies)
            .execute(&mut *conn)
            .await?;
        }

        // With an empty `keep`, `= ANY('{}')` is false for every row: all go.
        let deleted = sqlx::query(
            r#"
            DELETE FROM reviews
            WHERE store_id = $1
              AND platform = $2
              AND NOT (external_id = ANY($3))
            "#,
        )
        .bind(store_id)
        .bind(platform.as_str())
        .bind(&keep)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        Ok(MirrorOutcome {
            upserted: rows.len() as u64,
            deleted,
        })
    }

    /// Sets the reply text on one review scoped to (store, platform).
    /// Returns the number of rows touched (0 or 1).
    pub async fn set_platform_reply(
        conn: &mut PgConnection,
        store_id: Uuid,
        platform: Platform,
        key: ReviewKey<'_>,
        content: &str,
    ) -> anyhow::Result<u64> {
        let sql = match key {
            ReviewKey::Id(_) => {
                r#"
                UPDATE reviews
                SET platform_reply_content = $4, updated_at = now()
                WHERE store_id = $1 AND platform = $2 AND id::text = $3
                "#
            }
            ReviewKey::ExternalId(_) => {
                r#"
                UPDATE reviews
                SET platform_reply_content = $4, updated_at = now()
                WHERE store_id = $1 AND platform = $2 AND external_id = $3
                "#
            }
        };
        let value = match key {
            ReviewKey::Id(v) | ReviewKey::ExternalId(v) => v,
        };

        let res = sqlx::query(sql)
            .bind(store_id)
            .bind(platform.as_str())
            .bind(value)
            .bind(content)
            .execute(&mut *conn)
            .await?;

        Ok(res.rows_affected())
    }
}
