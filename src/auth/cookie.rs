use std::time::Duration;

use anyhow::Context;
use axum::http::{header, HeaderMap, HeaderValue};

use super::claims::TokenKind;

pub const ACCESS_COOKIE_NAME: &str = "accessToken";
pub const REFRESH_COOKIE_NAME: &str = "refreshToken";

pub fn cookie_name(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Access => ACCESS_COOKIE_NAME,
        TokenKind::Refresh => REFRESH_COOKIE_NAME,
    }
}

/// Value of the named cookie across all `Cookie` headers, if present and non-empty.
pub fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Token of the given kind from its cookie, falling back to a bearer header.
pub fn extract_token(headers: &HeaderMap, kind: TokenKind) -> Option<String> {
    get_cookie(headers, cookie_name(kind)).or_else(|| bearer(headers))
}

fn build(name: &str, value: &str, max_age: u64, secure: bool) -> anyhow::Result<HeaderValue> {
    let mut cookie = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        name, value, max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).with_context(|| format!("invalid {} cookie value", name))
}

pub fn set_cookie(
    kind: TokenKind,
    token: &str,
    ttl: Duration,
    secure: bool,
) -> anyhow::Result<HeaderValue> {
    build(cookie_name(kind), token, ttl.as_secs(), secure)
}

pub fn clear_cookie(kind: TokenKind, secure: bool) -> anyhow::Result<HeaderValue> {
    build(cookie_name(kind), "", 0, secure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; accessToken=abc.def; refreshToken=xyz"),
        );
        assert_eq!(get_cookie(&headers, ACCESS_COOKIE_NAME).as_deref(), Some("abc.def"));
        assert_eq!(get_cookie(&headers, REFRESH_COOKIE_NAME).as_deref(), Some("xyz"));
        assert_eq!(get_cookie(&headers, "missing"), None);
    }

    #[test]
    fn empty_cookie_counts_as_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("accessToken="));
        assert_eq!(extract_token(&headers, TokenKind::Access), None);
    }

    #[test]
    fn falls_back_to_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(extract_token(&headers, TokenKind::Access).as_deref(), Some("tok"));

        headers.insert(header::COOKIE, HeaderValue::from_static("accessToken=from-cookie"));
        assert_eq!(
            extract_token(&headers, TokenKind::Access).as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn set_and_clear_attributes() {
        let set = set_cookie(TokenKind::Refresh, "r.t.v", Duration::from_secs(60), true).unwrap();
        let set = set.to_str().unwrap();
        assert!(set.starts_with("refreshToken=r.t.v;"));
        assert!(set.contains("HttpOnly"));
        assert!(set.contains("Secure"));
        assert!(set.contains("Max-Age=60"));

        let cleared = clear_cookie(TokenKind::Access, false).unwrap();
        let cleared = cleared.to_str().unwrap();
        assert!(cleared.starts_with("accessToken=;"));
        assert!(cleared.contains("Max-Age=0"));
        assert!(!cleared.contains("Secure"));
    }

    #[test]
    fn unencodable_token_is_an_error() {
        let err = set_cookie(TokenKind::Access, "bad\nvalue", Duration::from_secs(60), false)
            .unwrap_err();
        assert!(err.to_string().contains("accessToken"));
    }
}
