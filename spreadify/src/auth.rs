// Caller identity
//
// Authentication happens in the fronting proxy, which forwards the verified
// user as request headers.

use axum::{extract::FromRequestParts, http::request::Parts};

use spreadify_core::models::ChatUser;

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USERNAME_HEADER: &str = "x-username";
pub const ROLE_HEADER: &str = "x-user-role";

/// User forwarded by the proxy
#[derive(Debug, Clone)]
pub struct ProxyUser {
    pub user_id: String,
    pub username: String,
    pub is_moderator: bool,
}

impl ProxyUser {
    #[must_use]
    pub fn chat_user(&self) -> ChatUser {
        ChatUser {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            is_moderator: self.is_moderator,
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl<S> FromRequestParts<S> for ProxyUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized(format!("Missing {USER_ID_HEADER} header")))?
            .to_string();
        let username = header(parts, USERNAME_HEADER).unwrap_or(&user_id).to_string();
        let is_moderator = header(parts, ROLE_HEADER)
            .is_some_and(|role| role.eq_ignore_ascii_case("moderator"));

        Ok(Self {
            user_id,
            username,
            is_moderator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<ProxyUser, AppError> {
        let (mut parts, ()) = request.into_parts();
        ProxyUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_moderator_from_headers() {
        let request = Request::builder()
            .header(USER_ID_HEADER, "u1")
            .header(USERNAME_HEADER, "alice")
            .header(ROLE_HEADER, "Moderator")
            .body(())
            .unwrap();
        let user = extract(request).await.unwrap();
        assert_eq!(user.user_id, "u1");
        assert_eq!(user.username, "alice");
        assert!(user.chat_user().is_moderator);
    }

    #[tokio::test]
    async fn test_username_defaults_to_id() {
        let request = Request::builder()
            .header(USER_ID_HEADER, "u2")
            .body(())
            .unwrap();
        let user = extract(request).await.unwrap();
        assert_eq!(user.username, "u2");
        assert!(!user.is_moderator);
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let request = Request::builder()
            .header(USER_ID_HEADER, "  ")
            .body(())
            .unwrap();
        let err = extract(request).await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
    }
}
