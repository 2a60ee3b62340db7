use std::sync::Arc;

use anyhow::Context;

use crate::config::{AppConfig, UserStoreKind};
use crate::storage::{Storage, StorageClient};
use crate::users::{memory::MemoryUserStore, repo::PgUserStore, repo::UserStore};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let users: Arc<dyn UserStore> = match config.user_store {
            UserStoreKind::Postgres => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(&config.database_url)
                    .await
                    .context("connect to database")?;
                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                Arc::new(PgUserStore::new(db))
            }
            UserStoreKind::Memory => {
                tracing::warn!("using in-memory user store; data is lost on restart");
                Arc::new(MemoryUserStore::new())
            }
        };

        let storage = Arc::new(Storage::new(&config.storage).await?) as Arc<dyn StorageClient>;

        Ok(Self::from_parts(users, config, storage))
    }

    pub fn from_parts(
        users: Arc<dyn UserStore>,
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            users,
            config,
            storage,
        }
    }
}

#[cfg(test)]
pub mod fake {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use bytes::Bytes;
    use uuid::Uuid;

    use super::AppState;
    use crate::config::{AppConfig, JwtConfig, StorageConfig, UserStoreKind};
    use crate::storage::StorageClient;
    use crate::users::{
        memory::MemoryUserStore,
        repo_types::{NewUser, User},
    };

    #[derive(Default)]
    pub struct FakeStorage {
        objects: Mutex<HashSet<String>>,
        pub fail_uploads: AtomicBool,
    }

    impl FakeStorage {
        pub fn contains(&self, key: &str) -> bool {
            self.objects.lock().unwrap().contains(key)
        }

        pub fn len(&self) -> usize {
            self.objects.lock().unwrap().len()
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail_uploads.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StorageClient for FakeStorage {
        async fn put_object(&self, k: &str, _b: Bytes, _ct: &str) -> anyhow::Result<()> {
            if self.fail_uploads.load(Ordering::SeqCst) {
                anyhow::bail!("storage unavailable");
            }
            self.objects.lock().unwrap().insert(k.to_string());
            Ok(())
        }

        async fn delete_object(&self, k: &str) -> anyhow::Result<()> {
            self.objects.lock().unwrap().remove(k);
            Ok(())
        }

        fn public_url(&self, k: &str) -> String {
            format!("https://fake.local/{}", k)
        }
    }

    pub fn test_config() -> AppConfig {
        AppConfig {
            database_url: String::new(),
            user_store: UserStoreKind::Memory,
            jwt: JwtConfig {
                access_secret: "test-access".into(),
                refresh_secret: "test-refresh".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                access_ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            storage: StorageConfig {
                endpoint: "fake".into(),
                bucket: "fake".into(),
                access_key: "fake".into(),
                secret_key: "fake".into(),
                region: "us-east-1".into(),
                public_url: "https://fake.local".into(),
            },
            cookie_secure: true,
        }
    }

    impl AppState {
        pub fn fake() -> Self {
            Self::fake_with_storage(Arc::new(FakeStorage::default()))
        }

        pub fn fake_with_storage(storage: Arc<FakeStorage>) -> Self {
            AppState::from_parts(
                Arc::new(MemoryUserStore::new()),
                Arc::new(test_config()),
                storage,
            )
        }

        /// Inserts a user directly, bypassing registration.
        pub async fn seed_user(&self, username: &str, email: &str, password: &str) -> User {
            self.users
                .create(NewUser {
                    id: Uuid::new_v4(),
                    username: username.into(),
                    email: email.into(),
                    fullname: format!("{} test", username),
                    password_hash: crate::auth::password::hash_password(password).unwrap(),
                    avatar_url: format!("https://fake.local/users/{}/avatar.png", username),
                    cover_image_url: String::new(),
                })
                .await
                .expect("seed user")
        }
    }
}
