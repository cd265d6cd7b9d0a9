//! services/api/src/web/middleware.rs
//!
//! Identity middleware for routes that act on behalf of a learner.

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::warn;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Reads the learner id from the `x-user-id` header, falling back to a
/// `user_id` query parameter (browsers cannot set headers on WebSocket upgrades).
fn user_id_from(headers: &HeaderMap, query: Option<&str>) -> Option<Uuid> {
    let from_header = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let from_query = || {
        query?.split('&').find_map(|pair| {
            pair.strip_prefix("user_id=").map(str::to_string)
        })
    };
    from_header
        .or_else(from_query)
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
}

/// Middleware that identifies the learner and inserts the user_id into request extensions.
///
/// A missing or malformed id is rejected with 400 Bad Request.
pub async fn require_user(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let user_id = user_id_from(req.headers(), req.uri().query()).ok_or_else(|| {
        warn!(path = %req.uri().path(), "Request without a valid {} header", USER_ID_HEADER);
        StatusCode::BAD_REQUEST
    })?;

    req.extensions_mut().insert(user_id);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_the_header_first() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        let other = Uuid::new_v4();
        let query = format!("user_id={}", other);
        assert_eq!(user_id_from(&headers, Some(&query)), Some(id));
    }

    #[test]
    fn falls_back_to_the_query_string() {
        let id = Uuid::new_v4();
        let query = format!("token=abc&user_id={}", id);
        assert_eq!(user_id_from(&HeaderMap::new(), Some(&query)), Some(id));
    }

    #[test]
    fn rejects_malformed_ids() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert_eq!(user_id_from(&headers, None), None);
        assert_eq!(user_id_from(&HeaderMap::new(), None), None);
    }
}
