//! Session lifecycle: register, login, refresh, logout, change password.
//!
//! Session state lives only in the user store's refresh-token slot. Login
//! overwrites it, refresh rotates it with compare-and-set, logout clears it.

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{ChangePasswordRequest, LoginData, LoginRequest, RegisterForm, TokenPair},
    repo::StoreError,
    repo_types::{NewUser, PublicUser},
};
use crate::{
    auth::{password, CurrentUser, JwtKeys, TokenError, TokenKind},
    error::{AppError, AppResult},
    media::{self, StoredObject},
    state::AppState,
};

const INVALID_CREDENTIALS: &str = "Invalid user credentials";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[instrument(skip(state, form), fields(username = %form.username.trim()))]
pub async fn register(state: &AppState, form: RegisterForm) -> AppResult<PublicUser> {
    let fullname = form.fullname.trim().to_string();
    let email = form.email.trim().to_lowercase();
    let username = form.username.trim().to_lowercase();

    if fullname.is_empty() || email.is_empty() || username.is_empty() || form.password.trim().is_empty() {
        return Err(AppError::validation("All fields are required"));
    }
    if !is_valid_email(&email) {
        return Err(AppError::validation("Invalid email"));
    }

    if state.users.find_by_username(&username).await?.is_some()
        || state.users.find_by_email(&email).await?.is_some()
    {
        warn!("username or email already registered");
        return Err(AppError::conflict("User with email or username already exists"));
    }

    let avatar = form
        .avatar
        .ok_or_else(|| AppError::validation("Avatar file is required"))?;

    let user_id = Uuid::new_v4();
    let avatar = media::upload_user_image(state.storage.as_ref(), user_id, "avatar", avatar)
        .await
        .map_err(|e| {
            warn!(error = %e, "avatar upload failed");
            AppError::validation("Avatar file is required")
        })?;
    let mut uploaded: Vec<StoredObject> = vec![avatar.clone()];

    let cover_image_url = match form.cover_image {
        Some(item) => {
            match media::upload_user_image(state.storage.as_ref(), user_id, "cover", item).await {
                Ok(obj) => {
                    uploaded.push(obj.clone());
                    obj.url
                }
                Err(e) => {
                    warn!(error = %e, "cover image upload failed; continuing without it");
                    String::new()
                }
            }
        }
        None => String::new(),
    };

    let password_hash = match password::hash_password_blocking(form.password).await {
        Ok(h) => h,
        Err(e) => {
            media::discard(state.storage.as_ref(), &uploaded).await;
            return Err(e.into());
        }
    };

    let created = state
        .users
        .create(NewUser {
            id: user_id,
            username,
            email,
            fullname,
            password_hash,
            avatar_url: avatar.url,
            cover_image_url,
        })
        .await;

    match created {
        Ok(user) => {
            info!(user_id = %user.id, "user registered");
            Ok(PublicUser::from(&user))
        }
        Err(e) => {
            media::discard(state.storage.as_ref(), &uploaded).await;
            match e {
                StoreError::Conflict => {
                    warn!("registration lost a uniqueness race");
                    Err(AppError::conflict("User with email or username already exists"))
                }
                StoreError::Other(e) => Err(AppError::Internal(e)),
            }
        }
    }
}

#[instrument(skip(state, req))]
pub async fn login(state: &AppState, req: LoginRequest) -> AppResult<LoginData> {
    let identifier = req
        .identifier()
        .ok_or_else(|| AppError::validation("username or email is required"))?
        .to_string();
    if req.password.is_empty() {
        return Err(AppError::validation("Password is required"));
    }

    let Some(user) = state.users.find_by_identifier(&identifier).await? else {
        warn!("login with unknown identifier");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    };

    if !state.users.verify_password(&user, &req.password).await? {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    }

    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign_access(&user)?;
    let refresh_token = keys.sign_refresh(user.id)?;

    // one slot per user: login replaces any previous session
    state.users.set_refresh_token(user.id, &refresh_token).await?;

    info!(user_id = %user.id, "user logged in");
    Ok(LoginData {
        user: PublicUser::from(&user),
        access_token,
        refresh_token,
    })
}

#[instrument(skip(state, presented))]
pub async fn refresh(state: &AppState, presented: Option<String>) -> AppResult<TokenPair> {
    let presented = presented
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::unauthorized("Unauthorized request"))?;

    let keys = JwtKeys::from_ref(state);
    let claims = keys.verify(&presented, TokenKind::Refresh).map_err(|e| {
        warn!(reason = %e, "refresh token rejected");
        match e {
            TokenError::Expired => AppError::unauthorized("Refresh token expired"),
            TokenError::Invalid => AppError::unauthorized("Invalid refresh token"),
        }
    })?;

    let user = state.users.find_by_id(claims.sub).await?.ok_or_else(|| {
        warn!(user_id = %claims.sub, "refresh token for unknown user");
        AppError::unauthorized("Invalid refresh token")
    })?;

    // sign first; the slot only rotates to a token the caller will receive
    let access_token = keys.sign_access(&user)?;
    let refresh_token = keys.sign_refresh(user.id)?;

    let rotated = state
        .users
        .compare_and_set_refresh_token(user.id, &presented, &refresh_token)
        .await?;
    if !rotated {
        warn!(user_id = %user.id, "refresh token reused or already rotated");
        return Err(AppError::unauthorized("Refresh token is expired or used"));
    }

    info!(user_id = %user.id, "session rotated");
    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn logout(state: &AppState, user: &CurrentUser) -> AppResult<()> {
    state.users.clear_refresh_token(user.id).await?;
    info!("user logged out");
    Ok(())
}

#[instrument(skip(state, user, req), fields(user_id = %user.id))]
pub async fn change_password(
    state: &AppState,
    user: &CurrentUser,
    req: ChangePasswordRequest,
) -> AppResult<()> {
    if req.old_password.is_empty() || req.new_password.trim().is_empty() {
        return Err(AppError::validation("Old and new password are required"));
    }

    let record = state
        .users
        .find_by_id(user.id)
        .await?
        .ok_or_else(|| AppError::unauthorized("Invalid access token"))?;

    if !state.users.verify_password(&record, &req.old_password).await? {
        warn!("change password with wrong old password");
        return Err(AppError::unauthorized("Invalid old password"));
    }

    // a concurrent change since the check above leaves the stored hash different
    if !state.users.rehash_password(&record, &req.new_password).await? {
        warn!("password changed concurrently");
        return Err(AppError::unauthorized("Invalid old password"));
    }
    info!("password changed");
    Ok(())
}

pub async fn current_user(state: &AppState, user: &CurrentUser) -> AppResult<PublicUser> {
    let record = state
        .users
        .find_by_id(user.id)
        .await?
        .ok_or_else(|| AppError::unauthorized("Invalid access token"))?;
    Ok(PublicUser::from(&record))
}
