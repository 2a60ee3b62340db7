use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRef, Multipart, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{AppendHeaders, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{instrument, warn};

use super::{
    dto::{ApiResponse, ChangePasswordRequest, LoginRequest, RefreshRequest, RegisterForm},
    repo_types::PublicUser,
    services,
};
use crate::{
    auth::{cookie, CurrentUser, JwtKeys, TokenKind},
    error::{AppError, AppResult},
    media::UploadItem,
    state::AppState,
};

const REGISTER_BODY_LIMIT: usize = 10 * 1024 * 1024;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/users/register",
            post(register).layer(DefaultBodyLimit::max(REGISTER_BODY_LIMIT)),
        )
        .route("/users/login", post(login))
        .route("/users/refresh-token", post(refresh_token))
}

pub fn secured_routes() -> Router<AppState> {
    Router::new()
        .route("/users/logout", post(logout))
        .route("/users/change-password", post(change_password))
        .route("/users/current-user", get(current_user))
}

fn session_cookies(
    state: &AppState,
    access_token: &str,
    refresh_token: &str,
) -> AppResult<AppendHeaders<[(HeaderName, HeaderValue); 2]>> {
    let keys = JwtKeys::from_ref(state);
    let secure = state.config.cookie_secure;
    Ok(AppendHeaders([
        (
            SET_COOKIE,
            cookie::set_cookie(TokenKind::Access, access_token, keys.ttl(TokenKind::Access), secure)?,
        ),
        (
            SET_COOKIE,
            cookie::set_cookie(TokenKind::Refresh, refresh_token, keys.ttl(TokenKind::Refresh), secure)?,
        ),
    ]))
}

async fn read_file(field: axum::extract::multipart::Field<'_>) -> AppResult<Option<UploadItem>> {
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    let body: Bytes = field
        .bytes()
        .await
        .map_err(|e| AppError::validation(format!("Invalid upload: {}", e.body_text())))?;
    if body.is_empty() {
        return Ok(None);
    }
    Ok(Some(UploadItem { body, content_type }))
}

/// POST /users/register (multipart)
#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    mut mp: Multipart,
) -> AppResult<(StatusCode, Json<ApiResponse<PublicUser>>)> {
    let mut form = RegisterForm::default();
    loop {
        let field = match mp.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => return Err(AppError::validation(format!("Invalid form data: {}", e.body_text()))),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "avatar" => form.avatar = read_file(field).await?,
            "coverImage" => form.cover_image = read_file(field).await?,
            "fullname" | "email" | "username" | "password" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::validation(format!("Invalid form data: {}", e.body_text())))?;
                match name.as_str() {
                    "fullname" => form.fullname = text,
                    "email" => form.email = text,
                    "username" => form.username = text,
                    _ => form.password = text,
                }
            }
            other => warn!(field = %other, "ignoring unknown register field"),
        }
    }

    let user = services::register(&state, form).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(StatusCode::CREATED, user, "User registered successfully")),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let data = services::login(&state, payload).await?;
    let cookies = session_cookies(&state, &data.access_token, &data.refresh_token)?;
    Ok((
        cookies,
        Json(ApiResponse::new(StatusCode::OK, data, "User logged in successfully")),
    ))
}

/// Reads the refresh token from its cookie, falling back to the JSON body.
#[instrument(skip(state, headers, body))]
pub async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> AppResult<impl IntoResponse> {
    let presented = cookie::get_cookie(&headers, cookie::REFRESH_COOKIE_NAME)
        .or_else(|| body.and_then(|Json(b)| b.refresh_token));

    let pair = services::refresh(&state, presented).await?;
    let cookies = session_cookies(&state, &pair.access_token, &pair.refresh_token)?;
    Ok((
        cookies,
        Json(ApiResponse::new(StatusCode::OK, pair, "Access token refreshed")),
    ))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn logout(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<impl IntoResponse> {
    services::logout(&state, &user).await?;
    let secure = state.config.cookie_secure;
    Ok((
        AppendHeaders([
            (SET_COOKIE, cookie::clear_cookie(TokenKind::Access, secure)?),
            (SET_COOKIE, cookie::clear_cookie(TokenKind::Refresh, secure)?),
        ]),
        Json(ApiResponse::new(StatusCode::OK, json!({}), "User logged out")),
    ))
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn change_password(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<Json<ApiResponse<Value>>> {
    services::change_password(&state, &user, payload).await?;
    Ok(Json(ApiResponse::new(
        StatusCode::OK,
        json!({}),
        "Password changed successfully",
    )))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn current_user(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<ApiResponse<PublicUser>>> {
    let profile = services::current_user(&state, &user).await?;
    Ok(Json(ApiResponse::new(
        StatusCode::OK,
        profile,
        "Current user fetched successfully",
    )))
}
