use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use super::{
    claims::TokenKind,
    cookie::extract_token,
    jwt::{JwtKeys, TokenError},
};
use crate::{error::AppError, state::AppState, users::repo_types::User};

/// Identity of the caller, resolved from a valid access token.
///
/// Handlers take this as an argument; it carries nothing secret.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

impl From<&User> for CurrentUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers, TokenKind::Access)
            .ok_or_else(|| AppError::unauthorized("Unauthorized request"))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify(&token, TokenKind::Access).map_err(|e| {
            warn!(reason = %e, "access token rejected");
            match e {
                TokenError::Expired => AppError::unauthorized("Access token expired"),
                TokenError::Invalid => AppError::unauthorized("Invalid access token"),
            }
        })?;

        let user = state
            .users
            .find_by_id(claims.sub)
            .await
            .map_err(AppError::Internal)?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "access token for unknown user");
                AppError::unauthorized("Invalid access token")
            })?;

        Ok(CurrentUser::from(&user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue, Request};

    async fn guard(state: &AppState, header: Option<(header::HeaderName, String)>) -> Result<CurrentUser, AppError> {
        let mut req = Request::builder().uri("/");
        if let Some((name, value)) = header {
            req = req.header(name, HeaderValue::from_str(&value).unwrap());
        }
        let (mut parts, _) = req.body(()).unwrap().into_parts();
        CurrentUser::from_request_parts(&mut parts, state).await
    }

    #[tokio::test]
    async fn resolves_user_from_cookie_or_bearer() {
        let state = AppState::fake();
        let user = state.seed_user("alice", "alice@x.com", "pw123").await;
        let token = JwtKeys::from_ref(&state).sign_access(&user).unwrap();

        let from_cookie = guard(&state, Some((header::COOKIE, format!("accessToken={}", token))))
            .await
            .unwrap();
        assert_eq!(from_cookie, CurrentUser::from(&user));

        let from_bearer = guard(&state, Some((header::AUTHORIZATION, format!("Bearer {}", token))))
            .await
            .unwrap();
        assert_eq!(from_bearer.username, "alice");
    }

    #[tokio::test]
    async fn rejects_missing_token() {
        let state = AppState::fake();
        let err = guard(&state, None).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn rejects_refresh_token_as_access() {
        let state = AppState::fake();
        let user = state.seed_user("bob", "bob@x.com", "pw").await;
        let token = JwtKeys::from_ref(&state).sign_refresh(user.id).unwrap();
        let err = guard(&state, Some((header::AUTHORIZATION, format!("Bearer {}", token))))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(m) if m == "Invalid access token"));
    }

    #[tokio::test]
    async fn expired_access_token_has_its_own_message() {
        let state = AppState::fake();
        let user = state.seed_user("carol", "carol@x.com", "pw").await;
        let token = JwtKeys::from_ref(&state).sign_expired(user.id, TokenKind::Access);
        let err = guard(&state, Some((header::COOKIE, format!("accessToken={}", token))))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(m) if m == "Access token expired"));
    }

    #[tokio::test]
    async fn rejects_token_of_vanished_user() {
        let state = AppState::fake();
        let ghost = User::sample("ghost", "ghost@x.com");
        let token = JwtKeys::from_ref(&state).sign_access(&ghost).unwrap();
        let err = guard(&state, Some((header::COOKIE, format!("accessToken={}", token))))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
