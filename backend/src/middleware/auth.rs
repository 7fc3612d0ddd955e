//! Authentication middleware
//!
//! Resolves a bearer token into the acting user. Token issuance lives in the
//! identity service; this side only verifies and decodes.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use shared::{Actor, Role};

use crate::error::{ErrorDetail, ErrorResponse};
use crate::AppState;

/// Authenticated user information extracted from JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: i64,
    pub roles: Vec<Role>,
    pub shop_id: Option<i64>,
}

impl AuthUser {
    /// The actor threaded into service calls
    pub fn actor(&self) -> Actor {
        Actor::new(self.user_id, self.roles.clone(), self.shop_id)
    }
}

/// Authentication middleware that validates JWT tokens
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    // Extract Authorization header
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header.and_then(|header| header.strip_prefix("Bearer ")) {
        Some(token) => token,
        None => return unauthorized_response("Missing or invalid Authorization header"),
    };

    let claims = match decode_jwt(token, &state.config.jwt.secret) {
        Ok(claims) => claims,
        Err(msg) => return unauthorized_response(&msg),
    };

    let auth_user = match claims.into_auth_user() {
        Ok(user) => user,
        Err(msg) => return unauthorized_response(msg),
    };

    request.extensions_mut().insert(auth_user);

    next.run(request).await
}

/// JWT claims structure
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: String,
    pub roles: Vec<String>,
    #[serde(default)]
    pub shop_id: Option<i64>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    fn into_auth_user(self) -> Result<AuthUser, &'static str> {
        let user_id = self
            .sub
            .parse::<i64>()
            .map_err(|_| "Invalid user ID in token")?;

        // Unknown role names are dropped rather than rejected
        let roles: Vec<Role> = self.roles.iter().filter_map(|r| r.parse().ok()).collect();
        if roles.is_empty() {
            return Err("Token carries no recognised role");
        }

        Ok(AuthUser {
            user_id,
            roles,
            shop_id: self.shop_id,
        })
    }
}

/// Decode and validate JWT token
fn decode_jwt(token: &str, secret: &str) -> Result<Claims, String> {
    use jsonwebtoken::{decode, DecodingKey, Validation};

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| format!("Invalid token: {}", e))
}

/// Create unauthorized response
fn unauthorized_response(message: &str) -> Response {
    let error = ErrorResponse {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message_en: message.to_string(),
            message_th: "ไม่ได้รับอนุญาต".to_string(),
            field: None,
            fields: None,
        },
    };

    (StatusCode::UNAUTHORIZED, Json(error)).into_response()
}

/// Extractor for authenticated user
/// Use this in handlers to get the current user
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| {
                let error = ErrorResponse {
                    error: ErrorDetail {
                        code: "UNAUTHORIZED".to_string(),
                        message_en: "Authentication required".to_string(),
                        message_th: "ต้องเข้าสู่ระบบก่อน".to_string(),
                        field: None,
                        fields: None,
                    },
                };
                (StatusCode::UNAUTHORIZED, Json(error))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, roles: &[&str]) -> Claims {
        Claims {
            sub: sub.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            shop_id: Some(4),
            exp: 0,
            iat: 0,
        }
    }

    #[test]
    fn test_claims_resolve_to_actor() {
        let user = claims("17", &["manager", "delivery"]).into_auth_user().unwrap();
        let actor = user.actor();
        assert_eq!(actor.user_id, 17);
        assert_eq!(actor.shop_id, Some(4));
        assert!(actor.has_role(Role::Manager));
        assert!(!actor.is_delivery_only());
    }

    #[test]
    fn test_claims_reject_bad_subject_or_roles() {
        assert!(claims("abc", &["admin"]).into_auth_user().is_err());
        assert!(claims("1", &["owner"]).into_auth_user().is_err());
    }

    #[test]
    fn test_decode_round_trip() {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let now = chrono::Utc::now().timestamp();
        let token = encode(
            &Header::default(),
            &Claims {
                exp: now + 600,
                iat: now,
                ..claims("9", &["finance"])
            },
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        let decoded = decode_jwt(&token, "test-secret").unwrap();
        assert_eq!(decoded.sub, "9");
        assert!(decode_jwt(&token, "other-secret").is_err());
    }
}
