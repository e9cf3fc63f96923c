use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crisismap_common::User;

use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "cm_session";
const SESSION_DURATION_SECS: i64 = 7 * 24 * 3600;

/// The signed-in user, or the anonymous user when the session cookie is
/// missing, expired or forged. Never rejects.
pub struct CurrentUser(pub User);

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = session_value(&parts.headers)
            .and_then(|value| verify_session(value, &state.config.session_secret))
            .unwrap_or_else(User::anonymous);
        Ok(CurrentUser(user))
    }
}

/// Signed cookie value: `uid|email|expiry|hex(hmac_sha256)`.
pub fn create_session(user: &User, secret: &str) -> Option<String> {
    let expiry = chrono::Utc::now().timestamp() + SESSION_DURATION_SECS;
    let payload = format!("{}|{}|{expiry}", user.id, user.email);
    let signature = hex::encode(mac(&payload, secret)?.finalize().into_bytes());
    Some(format!("{payload}|{signature}"))
}

fn verify_session(value: &str, secret: &str) -> Option<User> {
    let (payload, signature) = value.rsplit_once('|')?;
    let signature = hex::decode(signature).ok()?;
    if mac(payload, secret)?.verify_slice(&signature).is_err() {
        debug!("Rejected session cookie with bad signature");
        return None;
    }

    let mut fields = payload.splitn(3, '|');
    let (uid, email, expiry) = (fields.next()?, fields.next()?, fields.next()?);
    let expiry: i64 = expiry.parse().ok()?;
    if uid.is_empty() || chrono::Utc::now().timestamp() > expiry {
        return None;
    }
    Some(User::new(uid, email))
}

fn mac(payload: &str, secret: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload.as_bytes());
    Some(mac)
}

/// The session cookie's value, searched across every `Cookie` header.
fn session_value(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find_map(|(name, value)| (name == COOKIE_NAME).then_some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret";

    #[test]
    fn session_roundtrip() {
        let user = User::new("alice", "alice@xyz.com");
        let value = create_session(&user, SECRET).unwrap();
        assert_eq!(verify_session(&value, SECRET), Some(user));
    }

    #[test]
    fn forged_sessions_are_rejected() {
        let value = create_session(&User::new("alice", "alice@xyz.com"), SECRET).unwrap();
        assert_eq!(verify_session(&value, "other-secret"), None);

        let forged = value.replacen("alice|", "mallory|", 1);
        assert_eq!(verify_session(&forged, SECRET), None);
        assert_eq!(verify_session("garbage", SECRET), None);
        assert_eq!(verify_session("alice|a@b.c|99999999999|not-hex", SECRET), None);
    }

    #[test]
    fn expired_sessions_are_rejected() {
        let payload = "alice|alice@xyz.com|1000";
        let signature = hex::encode(mac(payload, SECRET).unwrap().finalize().into_bytes());
        assert_eq!(verify_session(&format!("{payload}|{signature}"), SECRET), None);
    }

    #[test]
    fn finds_session_cookie_in_any_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(
            header::COOKIE,
            HeaderValue::from_static("cm_sessionx=no; cm_session=abc|def; other=1"),
        );
        assert_eq!(session_value(&headers), Some("abc|def"));

        headers.remove(header::COOKIE);
        assert_eq!(session_value(&headers), None);
    }
}
