use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

#[derive(Clone)]
pub struct MaintenanceRepo {
    pool: PgPool,
}

impl MaintenanceRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Move up to `batch` reviews written before `cutoff` into reviews_archive
    /// (idempotent). Returns number archived.
    pub async fn archive_reviews_older_than(
        &self,
        cutoff: DateTime<Utc>,
        batch: i64,
    ) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;

        let candidate_ids: Vec<uuid::Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM reviews
            WHERE written_at < $1
            ORDER BY written_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(batch)
        .fetch_all(&mut *tx)
        .await?;

        if candidate_ids.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        // Insert into archive while avoiding duplicates by id.
        sqlx::query(
            r#"
            INSERT INTO reviews_archive (
              id, store_id, platform, external_id,
              rating, content, author_name, menus, images,
              written_at, platform_reply_content,
              created_at, updated_at
            )
            SELECT
              r.id, r.store_id, r.platform, r.external_id,
              r.rating, r.content, r.author_name, r.menus, r.images,
              r.written_at, r.platform_reply_content,
              r.created_at, r.updated_at
            FROM reviews r
            WHERE r.id = ANY($1)
              AND NOT EXISTS (
                SELECT 1
                FROM reviews_archive a
                WHERE a.id = r.id
              )
            "#,
        )
        .bind(&candidate_ids)
        .execute(&mut *tx)
        .await?;

        // Only delete rows that made it into the archive.
        let deleted = sqlx::query(
            r#"
            DELETE FROM reviews r
            USING reviews_archive a
            WHERE r.id = a.id
              AND r.id = ANY($1)
            "#,
        )
        .bind(&candidate_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(deleted)
    }

    /// Archives in batches until nothing older than `cutoff` remains.
    pub async fn archive_all_reviews_older_than(
        &self,
        cutoff: DateTime<Utc>,
        batch: i64,
    ) -> anyhow::Result<u64> {
        let mut total = 0;
        loop {
            let moved = self.archive_reviews_older_than(cutoff, batch).await?;
            total += moved;
            if moved < batch.max(1) as u64 {
                return Ok(total);
            }
        }
    }
}

/// `now - days`.
pub fn cutoff_days(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}
