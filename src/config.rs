// src/config.rs

use std::env;
use std::str::FromStr;

use dotenvy::dotenv;

/// Experience needed per level. Level = floor(xp / XP_PER_LEVEL) + 1.
pub const XP_PER_LEVEL: i64 = 1000;

/// Default passing percentage for quizzes created without one.
pub const DEFAULT_PASSING_SCORE: i32 = 70;

/// Capacity of each chat room broadcast channel.
pub const CHAT_CHANNEL_CAPACITY: usize = 128;

/// Maximum length of a chat message body, in characters.
pub const CHAT_MESSAGE_MAX_LEN: usize = 2000;

/// Tolerance for Stripe webhook timestamps, in seconds.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_access_secret: String,
    pub jwt_refresh_secret: String,
    /// Access token lifetime in seconds.
    pub jwt_access_expiration: u64,
    /// Refresh token lifetime in seconds.
    pub jwt_refresh_expiration: u64,
    pub rust_log: String,
    pub bind_addr: String,
    pub frontend_url: String,
    pub cookie_secure: bool,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_api_base: String,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_requests: u32,
    pub auth_rate_limit_window_secs: u64,
    pub auth_rate_limit_max_requests: u32,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let jwt_access_secret =
            env::var("JWT_ACCESS_SECRET").expect("JWT_ACCESS_SECRET must be set");

        let jwt_refresh_secret =
            env::var("JWT_REFRESH_SECRET").expect("JWT_REFRESH_SECRET must be set");

        if jwt_access_secret == jwt_refresh_secret {
            tracing::warn!("JWT_ACCESS_SECRET and JWT_REFRESH_SECRET are identical");
        }

        Self {
            database_url,
            jwt_access_secret,
            jwt_refresh_secret,
            jwt_access_expiration: parse_or("JWT_ACCESS_EXPIRATION", 900),
            jwt_refresh_expiration: parse_or("JWT_REFRESH_EXPIRATION", 7 * 24 * 3600),
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            cookie_secure: parse_or("COOKIE_SECURE", false),
            admin_email: non_empty("ADMIN_EMAIL"),
            admin_password: non_empty("ADMIN_PASSWORD"),
            stripe_secret_key: non_empty("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: non_empty("STRIPE_WEBHOOK_SECRET"),
            stripe_api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string()),
            rate_limit_window_secs: parse_or("RATE_LIMIT_WINDOW_SECS", 60),
            rate_limit_max_requests: parse_or("RATE_LIMIT_MAX_REQUESTS", 100),
            auth_rate_limit_window_secs: parse_or("AUTH_RATE_LIMIT_WINDOW_SECS", 900),
            auth_rate_limit_max_requests: parse_or("AUTH_RATE_LIMIT_MAX_REQUESTS", 20),
        }
    }

    /// Configuration suitable for tests: no Stripe, generous rate limits.
    pub fn for_tests(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            jwt_access_secret: "test_access_secret".to_string(),
            jwt_refresh_secret: "test_refresh_secret".to_string(),
            jwt_access_expiration: 600,
            jwt_refresh_expiration: 3600,
            rust_log: "error".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            cookie_secure: false,
            admin_email: None,
            admin_password: None,
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: "http://127.0.0.1:9/v1".to_string(),
            rate_limit_window_secs: 60,
            rate_limit_max_requests: 10_000,
            auth_rate_limit_window_secs: 60,
            auth_rate_limit_max_requests: 10_000,
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {}, falling back to default", key);
            default
        }),
        Err(_) => default,
    }
}
