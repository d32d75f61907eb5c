//! User accounts. The auth layer owns `refresh_token`; this store only
//! persists it.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use atelier_core::{Error, Result, User, UserRepository};

/// Hex MD5 digest stored in place of the password.
pub fn password_digest(password: &str) -> String {
    format!("{:x}", md5::compute(password.as_bytes()))
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password_digest: row.try_get("password_digest")?,
        refresh_token: row.try_get("refresh_token")?,
    })
}

/// SQLite user repository.
#[derive(Clone)]
pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn write_refresh_token(&self, id: i64, token: Option<&str>) -> Result<()> {
        let updated = sqlx::query("UPDATE app_user SET refresh_token = ? WHERE id = ?")
            .bind(token)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(Error::NotFound(format!("user {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, username: &str, password: &str) -> Result<i64> {
        self.create_with_digest(username, &password_digest(password))
            .await
    }

    async fn create_with_digest(&self, username: &str, digest: &str) -> Result<i64> {
        let inserted = sqlx::query("INSERT INTO app_user (username, password_digest) VALUES (?, ?)")
            .bind(username)
            .bind(digest)
            .execute(&self.pool)
            .await;
        match inserted {
            Ok(result) => {
                let id = result.last_insert_rowid();
                info!(subsystem = "db", component = "users", op = "create", user_id = id, "User created");
                Ok(id)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                Error::InvalidInput(format!("username {username:?} already exists")),
            ),
            Err(e) => Err(Error::Database(e)),
        }
    }

    async fn find(&self, id: i64) -> Result<User> {
        let row = sqlx::query(
            "SELECT id, username, password_digest, refresh_token FROM app_user WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {id}")))?;
        user_from_row(&row)
    }

    async fn find_by_username(&self, username: &str) -> Result<User> {
        let row = sqlx::query(
            "SELECT id, username, password_digest, refresh_token FROM app_user WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {username:?}")))?;
        user_from_row(&row)
    }

    async fn exists(&self, username: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM app_user WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn set_refresh_token(&self, id: i64, token: &str) -> Result<()> {
        self.write_refresh_token(id, Some(token)).await
    }

    async fn clear_refresh_token(&self, id: i64) -> Result<()> {
        self.write_refresh_token(id, None).await
    }
}
