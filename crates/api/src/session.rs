//! Anonymous session cookie.
//!
//! Every request carries a [`SessionId`] extension. A browser without a valid
//! `session_id` cookie gets a fresh one issued on the response.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use parcelhub_core::SessionId;

pub const COOKIE_NAME: &str = "session_id";

/// 30 days.
pub const COOKIE_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

pub async fn session_middleware(mut req: Request, next: Next) -> Response {
    let (session_id, issued) = match session_from_headers(req.headers()) {
        Some(id) => (id, false),
        None => (SessionId::generate(), true),
    };

    req.extensions_mut().insert(session_id.clone());
    let mut response = next.run(req).await;

    if issued {
        debug!(session_id = %session_id, "issuing new session");
        match HeaderValue::from_str(&set_cookie_value(&session_id)) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "session cookie is not a valid header value"),
        }
    }

    response
}

/// The session named by the `session_id` cookie, if any.
pub fn session_from_headers(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .and_then(|(_, value)| value.parse().ok())
}

pub fn set_cookie_value(session_id: &SessionId) -> String {
    format!("{COOKIE_NAME}={session_id}; Max-Age={COOKIE_MAX_AGE_SECS}; Path=/; HttpOnly; SameSite=Lax")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn reads_the_session_among_other_cookies() {
        let found = session_from_headers(&headers("theme=dark; session_id=abc-123; lang=ru"));
        assert_eq!(found.unwrap().as_str(), "abc-123");
    }

    #[test]
    fn missing_or_blank_cookie_yields_none() {
        assert!(session_from_headers(&HeaderMap::new()).is_none());
        assert!(session_from_headers(&headers("theme=dark")).is_none());
        assert!(session_from_headers(&headers("session_id=")).is_none());
    }

    #[test]
    fn issued_cookie_is_http_only_and_lax() {
        let value = set_cookie_value(&"abc".parse().unwrap());
        assert_eq!(value, "session_id=abc; Max-Age=2592000; Path=/; HttpOnly; SameSite=Lax");
    }
}
