use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use super::repo_types::{NewUser, User};
use crate::auth::password;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username or email already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence for users and their single refresh-token slot.
///
/// Every mutation is one atomic operation on one record; callers never
/// read-then-write the slot themselves.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Case-insensitive lookup by username or email.
    async fn find_by_identifier(&self, identifier: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    /// Inserts a user; the store is the authority on uniqueness.
    async fn create(&self, new: NewUser) -> Result<User, StoreError>;

    /// Replaces the password hash only if it still equals `expected`.
    async fn compare_and_set_password_hash(
        &self,
        id: Uuid,
        expected: &str,
        new: &str,
    ) -> anyhow::Result<bool>;

    /// Unconditional overwrite of the slot. Only a fresh login may do this.
    async fn set_refresh_token(&self, id: Uuid, token: &str) -> anyhow::Result<()>;

    /// Replaces the slot with `new` only if it currently holds `expected`.
    async fn compare_and_set_refresh_token(
        &self,
        id: Uuid,
        expected: &str,
        new: &str,
    ) -> anyhow::Result<bool>;

    async fn clear_refresh_token(&self, id: Uuid) -> anyhow::Result<()>;

    /// Hashes `plaintext` and swaps it in for the hash the caller verified against.
    async fn rehash_password(&self, user: &User, plaintext: &str) -> anyhow::Result<bool> {
        let hash = password::hash_password_blocking(plaintext.to_string()).await?;
        self.compare_and_set_password_hash(user.id, &user.password_hash, &hash).await
    }

    async fn verify_password(&self, user: &User, plaintext: &str) -> anyhow::Result<bool> {
        password::verify_password_blocking(plaintext.to_string(), user.password_hash.clone()).await
    }
}

pub(crate) fn normalize(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_identifier(&self, identifier: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, fullname, password_hash, refresh_token,
                   avatar_url, cover_image_url, created_at, updated_at
            FROM users
            WHERE username = $1 OR email = $1
            "#,
        )
        .bind(normalize(identifier))
        .fetch_optional(&self.db)
        .await
        .context("find user by identifier")?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, fullname, password_hash, refresh_token,
                   avatar_url, cover_image_url, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(normalize(username))
        .fetch_optional(&self.db)
        .await
        .context("find user by username")?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, fullname, password_hash, refresh_token,
                   avatar_url, cover_image_url, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(normalize(email))
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, fullname, password_hash, refresh_token,
                   avatar_url, cover_image_url, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let res = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, email, fullname, password_hash, avatar_url, cover_image_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, username, email, fullname, password_hash, refresh_token,
                      avatar_url, cover_image_url, created_at, updated_at
            "#,
        )
        .bind(new.id)
        .bind(normalize(&new.username))
        .bind(normalize(&new.email))
        .bind(&new.fullname)
        .bind(&new.password_hash)
        .bind(&new.avatar_url)
        .bind(&new.cover_image_url)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(user) => Ok(user),
            Err(e)
                if e.as_database_error()
                    .map(|d| d.is_unique_violation())
                    .unwrap_or(false) =>
            {
                Err(StoreError::Conflict)
            }
            Err(e) => Err(StoreError::Other(anyhow::Error::new(e).context("insert user"))),
        }
    }

    async fn compare_and_set_password_hash(
        &self,
        id: Uuid,
        expected: &str,
        new: &str,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $3, updated_at = now()
             WHERE id = $1 AND password_hash = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(new)
        .execute(&self.db)
        .await
        .context("update password hash")?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_refresh_token(&self, id: Uuid, token: &str) -> anyhow::Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET refresh_token = $2, updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .execute(&self.db)
        .await
        .context("set refresh token")?;
        anyhow::ensure!(res.rows_affected() == 1, "user {} not found", id);
        Ok(())
    }

    async fn compare_and_set_refresh_token(
        &self,
        id: Uuid,
        expected: &str,
        new: &str,
    ) -> anyhow::Result<bool> {
        // NULL never equals $2, so a cleared slot can't be rotated.
        let res = sqlx::query(
            r#"
            UPDATE users
               SET refresh_token = $3, updated_at = now()
             WHERE id = $1 AND refresh_token = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(new)
        .execute(&self.db)
        .await
        .context("rotate refresh token")?;
        Ok(res.rows_affected() == 1)
    }

    async fn clear_refresh_token(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET refresh_token = NULL, updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await
        .context("clear refresh token")?;
        Ok(())
    }
}
