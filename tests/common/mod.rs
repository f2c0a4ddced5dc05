// tests/common/mod.rs

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use learnhub::{
    config::Config,
    routes,
    services::stripe::PaymentGateway,
    state::AppState,
};
use serde_json::{Value, json};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub const PASSWORD: &str = "password123";

pub struct TestApp {
    pub address: String,
    pub pool: PgPool,
    pub config: Config,
}

/// Spawns the app on a random port against `DATABASE_URL`.
///
/// Returns `None` when no database is configured so the suite can run
/// without Postgres; the calling test then returns early.
pub async fn spawn_app() -> Option<TestApp> {
    spawn_app_with(|config| config, None).await
}

pub async fn spawn_app_with(
    configure: impl FnOnce(Config) -> Config,
    gateway: Option<Arc<dyn PaymentGateway>>,
) -> Option<TestApp> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = configure(Config::for_tests(&database_url));

    let mut state = AppState::new(pool.clone(), config.clone());
    if let Some(gateway) = gateway {
        state = state.with_payments(gateway);
    }

    let app = routes::create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Some(TestApp {
        address: format!("http://127.0.0.1:{}", port),
        pool,
        config,
    })
}

/// A client that keeps the session cookies between requests.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .unwrap()
}

/// Short unique suffix; usernames are capped at 30 characters.
pub fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..10])
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Registers a fresh user with `client` and returns the user JSON.
    pub async fn register(&self, client: &reqwest::Client, prefix: &str) -> Value {
        let username = unique(prefix);
        let response = client
            .post(self.url("/api/auth/register"))
            .json(&json!({
                "email": format!("{}@example.com", username),
                "username": username,
                "password": PASSWORD,
            }))
            .send()
            .await
            .expect("Failed to execute request");

        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.unwrap();
        body["user"].clone()
    }

    /// Changes a user's role directly and refreshes the session so the new
    /// role is in the access token.
    pub async fn promote(&self, client: &reqwest::Client, user_id: i64, role: &str) {
        sqlx::query("UPDATE users SET role = $1 WHERE id = $2")
            .bind(role)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .unwrap();

        let response = client
            .post(self.url("/api/auth/refresh"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    /// Registers an instructor who owns a fresh, published course.
    /// Returns the course JSON.
    pub async fn published_course(&self, instructor: &reqwest::Client, price_cents: i64) -> Value {
        let user = self.register(instructor, "inst").await;
        self.promote(instructor, user["id"].as_i64().unwrap(), "instructor")
            .await;

        let response = instructor
            .post(self.url("/api/courses"))
            .json(&json!({
                "title": "Rust for Backend Developers",
                "description": "<p>Ownership, async and <script>alert(1)</script>axum.</p>",
                "category": "programming",
                "level": "intermediate",
                "price_cents": price_cents,
                "currency": "usd",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 201);
        let course: Value = response.json::<Value>().await.unwrap()["course"].clone();

        let response = instructor
            .put(self.url(&format!("/api/courses/{}", course["id"])))
            .json(&json!({ "is_published": true }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);

        response.json::<Value>().await.unwrap()["course"].clone()
    }
}
