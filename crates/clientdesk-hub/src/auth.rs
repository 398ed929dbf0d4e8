use axum::http::{header::AUTHORIZATION, HeaderMap};
use clientdesk_core::{DeskError, Session, SessionTable};

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

pub fn authenticate(sessions: &SessionTable, headers: &HeaderMap) -> Result<Session, DeskError> {
    sessions.authenticate(bearer_token(headers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).expect("header"));
        headers
    }

    #[test]
    fn parses_bearer_scheme_only() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("bearer   abc ")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn unknown_token_is_unauthorized() {
        let mut sessions = SessionTable::default();
        sessions.insert("t1", Session::new("maria@desk.example", false));
        assert!(authenticate(&sessions, &headers("Bearer t1")).is_ok());
        assert_eq!(
            authenticate(&sessions, &headers("Bearer t2")),
            Err(DeskError::Unauthorized)
        );
    }
}
