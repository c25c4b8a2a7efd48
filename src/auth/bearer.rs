//! Bearer token parsing for the Authorization header.

use axum::http::{HeaderMap, header};

/// Extract the token from `Authorization: Bearer <token>`.
/// The scheme is matched case-insensitively; anything else yields None.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_bearer_token_simple() {
        assert_eq!(bearer_token(&headers_with("Bearer abc.def.ghi")), Some("abc.def.ghi"));
    }

    #[test]
    fn test_bearer_scheme_case_insensitive() {
        assert_eq!(bearer_token(&headers_with("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("BEARER abc")), Some("abc"));
    }

    #[test]
    fn test_bearer_with_spaces() {
        assert_eq!(bearer_token(&headers_with("  Bearer   abc  ")), Some("abc"));
    }

    #[test]
    fn test_other_scheme_rejected() {
        assert_eq!(bearer_token(&headers_with("Basic dXNlcjpwYXNz")), None);
    }

    #[test]
    fn test_empty_token_rejected() {
        assert_eq!(bearer_token(&headers_with("Bearer ")), None);
        assert_eq!(bearer_token(&headers_with("Bearer")), None);
    }

    #[test]
    fn test_no_header() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
