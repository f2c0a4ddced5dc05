// src/utils/jwt.rs

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::{
    config::Config,
    error::AppError,
    models::user::{ROLE_ADMIN, ROLE_INSTRUCTOR},
    utils::cookies::ACCESS_COOKIE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT Claims structure.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Claims {
    /// Subject - Stores the User ID (as string).
    pub sub: String,
    /// User's role ('student', 'instructor', 'admin').
    pub role: String,
    /// Expiration time as Unix timestamp.
    pub exp: usize,
    /// Issued-at as Unix timestamp.
    pub iat: usize,
    /// Unique token id; makes every refresh token distinct.
    pub jti: String,
    pub typ: TokenType,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AppError> {
        self.sub
            .parse::<i64>()
            .map_err(|_| AppError::AuthError("Invalid token subject".to_string()))
    }

    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    pub fn can_teach(&self) -> bool {
        self.role == ROLE_INSTRUCTOR || self.role == ROLE_ADMIN
    }
}

fn now_secs() -> Result<usize, AppError> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .as_secs() as usize)
}

fn sign(
    id: i64,
    role: &str,
    typ: TokenType,
    secret: &str,
    expiration_seconds: u64,
) -> Result<String, AppError> {
    let now = now_secs()?;

    let claims = Claims {
        sub: id.to_string(),
        role: role.to_owned(),
        exp: now + expiration_seconds as usize,
        iat: now,
        jti: uuid::Uuid::new_v4().to_string(),
        typ,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Signs a short-lived access token.
pub fn sign_access_token(id: i64, role: &str, config: &Config) -> Result<String, AppError> {
    sign(
        id,
        role,
        TokenType::Access,
        &config.jwt_access_secret,
        config.jwt_access_expiration,
    )
}

/// Signs a long-lived refresh token. Its hash must be stored to be usable.
pub fn sign_refresh_token(id: i64, role: &str, config: &Config) -> Result<String, AppError> {
    sign(
        id,
        role,
        TokenType::Refresh,
        &config.jwt_refresh_secret,
        config.jwt_refresh_expiration,
    )
}

/// Verifies and decodes a JWT string of the expected type.
pub fn verify_jwt(token: &str, secret: &str, expected: TokenType) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::AuthError("Invalid token".to_string()))?;

    if token_data.claims.typ != expected {
        return Err(AppError::AuthError("Invalid token".to_string()));
    }

    Ok(token_data.claims)
}

/// Pulls the access token from `Authorization: Bearer` or the access cookie.
fn extract_token(req: &Request<Body>, cookies: &Cookies) -> Option<String> {
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_owned);

    bearer.or_else(|| cookies.get(ACCESS_COOKIE).map(|c| c.value().to_owned()))
}

/// Axum Middleware: Authentication.
///
/// Validates the access token from the bearer header or the `access_token`
/// cookie and injects `Claims` into the request extensions.
pub async fn auth_middleware(
    State(config): State<Config>,
    cookies: Cookies,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(&req, &cookies)
        .ok_or_else(|| AppError::AuthError("Authentication required".to_string()))?;

    let claims = verify_jwt(&token, &config.jwt_access_secret, TokenType::Access)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Claims of the caller when a valid access token was presented.
#[derive(Debug, Clone, Default)]
pub struct OptionalClaims(pub Option<Claims>);

/// Like [`auth_middleware`] but lets anonymous requests through. An invalid
/// or expired token is treated as no token at all.
pub async fn optional_auth_middleware(
    State(config): State<Config>,
    cookies: Cookies,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let claims = extract_token(&req, &cookies)
        .and_then(|token| verify_jwt(&token, &config.jwt_access_secret, TokenType::Access).ok());

    req.extensions_mut().insert(OptionalClaims(claims));
    next.run(req).await
}

/// Axum Middleware: Admin Authorization.
///
/// Must be used AFTER `auth_middleware`.
pub async fn admin_middleware(req: Request<Body>, next: Next) -> Result<Response, AppError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or_else(|| AppError::AuthError("Authentication required".to_string()))?;

    if !claims.is_admin() {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }

    Ok(next.run(req).await)
}

/// Axum Middleware: instructors and admins only.
///
/// Must be used AFTER `auth_middleware`.
pub async fn instructor_middleware(req: Request<Body>, next: Next) -> Result<Response, AppError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or_else(|| AppError::AuthError("Authentication required".to_string()))?;

    if !claims.can_teach() {
        return Err(AppError::Forbidden("Instructor access required".to_string()));
    }

    Ok(next.run(req).await)
}
