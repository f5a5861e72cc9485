use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct StoresRepo {
    pool: PgPool,
}

impl StoresRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, user_id: Uuid, name: &str) -> anyhow::Result<Uuid> {
        let id: Uuid =
            sqlx::query_scalar("INSERT INTO stores (user_id, name) VALUES ($1, $2) RETURNING id")
                .bind(user_id)
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(id)
    }

    pub async fn is_owner(&self, store_id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let owned: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM stores WHERE id = $1 AND user_id = $2)",
        )
        .bind(store_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(owned)
    }
}
