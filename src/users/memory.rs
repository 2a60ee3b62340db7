use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    repo::{normalize, StoreError, UserStore},
    repo_types::{NewUser, User},
};

/// Process-local store for `USER_STORE=memory` and tests.
/// Each mutation runs under the write lock, so CAS is atomic.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: Uuid, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut User) + Send,
    {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("user {} not found", id))?;
        f(user);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn find<P>(&self, pred: P) -> Option<User>
    where
        P: Fn(&User) -> bool + Send,
    {
        self.users.read().await.values().find(|u| pred(*u)).cloned()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_identifier(&self, identifier: &str) -> anyhow::Result<Option<User>> {
        let key = normalize(identifier);
        Ok(self.find(|u| u.username == key || u.email == key).await)
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let key = normalize(username);
        Ok(self.find(|u| u.username == key).await)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let key = normalize(email);
        Ok(self.find(|u| u.email == key).await)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let username = normalize(&new.username);
        let email = normalize(&new.email);

        let mut users = self.users.write().await;
        if users.contains_key(&new.id)
            || users.values().any(|u| u.username == username || u.email == email)
        {
            return Err(StoreError::Conflict);
        }

        let now = OffsetDateTime::now_utc();
        let user = User {
            id: new.id,
            username,
            email,
            fullname: new.fullname,
            password_hash: new.password_hash,
            refresh_token: None,
            avatar_url: new.avatar_url,
            cover_image_url: new.cover_image_url,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn compare_and_set_password_hash(
        &self,
        id: Uuid,
        expected: &str,
        new: &str,
    ) -> anyhow::Result<bool> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(false);
        };
        if user.password_hash != expected {
            return Ok(false);
        }
        user.password_hash = new.to_string();
        user.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn set_refresh_token(&self, id: Uuid, token: &str) -> anyhow::Result<()> {
        let token = token.to_string();
        self.update(id, move |u| u.refresh_token = Some(token)).await
    }

    async fn compare_and_set_refresh_token(
        &self,
        id: Uuid,
        expected: &str,
        new: &str,
    ) -> anyhow::Result<bool> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(false);
        };
        if user.refresh_token.as_deref() != Some(expected) {
            return Ok(false);
        }
        user.refresh_token = Some(new.to_string());
        user.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn clear_refresh_token(&self, id: Uuid) -> anyhow::Result<()> {
        // logout of a vanished user is still a successful logout
        let mut users = self.users.write().await;
        if let Some(user) = users.get_mut(&id) {
            user.refresh_token = None;
            user.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }
}
