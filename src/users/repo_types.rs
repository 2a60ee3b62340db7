use std::fmt;

use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record as stored. Holds secrets, so it is never serialized.
#[derive(Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,      // lower-cased, unique
    pub email: String,         // lower-cased, unique
    pub fullname: String,
    pub password_hash: String, // Argon2 PHC string
    pub refresh_token: Option<String>,
    pub avatar_url: String,
    pub cover_image_url: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("has_session", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Fields required to insert a user. The id is chosen by the caller so media
/// can be uploaded under it before the row exists.
#[derive(Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub password_hash: String,
    pub avatar_url: String,
    pub cover_image_url: String,
}

/// Profile returned to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub avatar: String,
    pub cover_image: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            fullname: u.fullname.clone(),
            avatar: u.avatar_url.clone(),
            cover_image: u.cover_image_url.clone(),
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

#[cfg(test)]
impl User {
    pub fn sample(username: &str, email: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            fullname: username.into(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".into(),
            refresh_token: Some("some.refresh.token".into()),
            avatar_url: format!("https://cdn.local/{}.png", username),
            cover_image_url: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_user_hides_secrets() {
        let user = User::sample("alice", "alice@x.com");
        let json = serde_json::to_value(PublicUser::from(&user)).unwrap();
        assert_eq!(json["username"], "alice");
        assert_eq!(json["email"], "alice@x.com");
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("password_hash").is_none());
        assert!(json.get("refreshToken").is_none());
        let text = json.to_string();
        assert!(!text.contains("argon2"));
        assert!(!text.contains("some.refresh.token"));
    }

    #[test]
    fn debug_output_omits_secrets() {
        let user = User::sample("alice", "alice@x.com");
        let dbg = format!("{:?}", user);
        assert!(dbg.contains("alice"));
        assert!(!dbg.contains("argon2"));
        assert!(!dbg.contains("some.refresh.token"));
    }
}
