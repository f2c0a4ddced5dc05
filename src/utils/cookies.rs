// src/utils/cookies.rs

use tower_cookies::{
    Cookie, Cookies,
    cookie::{SameSite, time::Duration},
};

use crate::config::Config;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// The refresh cookie is only ever sent to the auth endpoints.
const REFRESH_PATH: &str = "/api/auth";

fn build(
    name: &'static str,
    value: String,
    path: &'static str,
    max_age: i64,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .path(path)
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(Duration::seconds(max_age))
        .build()
}

/// Sets both the access and refresh cookies.
pub fn set_auth_cookies(cookies: &Cookies, config: &Config, access: String, refresh: String) {
    cookies.add(build(
        ACCESS_COOKIE,
        access,
        "/",
        config.jwt_access_expiration as i64,
        config.cookie_secure,
    ));
    cookies.add(build(
        REFRESH_COOKIE,
        refresh,
        REFRESH_PATH,
        config.jwt_refresh_expiration as i64,
        config.cookie_secure,
    ));
}

/// Expires both cookies on the client.
pub fn clear_auth_cookies(cookies: &Cookies, config: &Config) {
    cookies.add(build(
        ACCESS_COOKIE,
        String::new(),
        "/",
        0,
        config.cookie_secure,
    ));
    cookies.add(build(
        REFRESH_COOKIE,
        String::new(),
        REFRESH_PATH,
        0,
        config.cookie_secure,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_attributes() {
        let cookie = build(REFRESH_COOKIE, "abc".to_string(), REFRESH_PATH, 60, true);
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.path(), Some("/api/auth"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(60)));
    }
}
