//! Read-only access to the `users` table.

use sqlx::PgPool;
use vframe_models::User;

use crate::error::DbResult;
use crate::models::UserRow;

#[derive(Debug, Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a user by ID. `None` when no row exists.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }
}
