//! HTTP Basic auth for the REST and connection surface.

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::state::AppState;

/// Reject requests without the configured `username:password`. Empty
/// credentials disable auth entirely.
pub async fn basic_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let config = &state.config;
    if config.username.is_empty() && config.password.is_empty() {
        return next.run(request).await;
    }

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if credentials_match(header_value, &config.username, &config.password) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, r#"Basic realm="pipeline""#)],
        )
            .into_response()
    }
}

fn credentials_match(header: Option<&str>, username: &str, password: &str) -> bool {
    let Some(encoded) = header.and_then(|value| value.strip_prefix("Basic ")) else {
        return false;
    };
    let Ok(decoded) = BASE64.decode(encoded) else {
        return false;
    };
    String::from_utf8_lossy(&decoded) == format!("{username}:{password}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_for(user: &str, pass: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{user}:{pass}")))
    }

    #[test]
    fn accepts_matching_credentials() {
        let header = header_for("admin", "secret");
        assert!(credentials_match(Some(&header), "admin", "secret"));
    }

    #[test]
    fn rejects_wrong_or_missing_credentials() {
        let header = header_for("admin", "wrong");
        assert!(!credentials_match(Some(&header), "admin", "secret"));
        assert!(!credentials_match(None, "admin", "secret"));
        assert!(!credentials_match(Some("Bearer token"), "admin", "secret"));
        assert!(!credentials_match(Some("Basic !!!"), "admin", "secret"));
    }
}
