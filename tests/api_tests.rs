// tests/api_tests.rs

mod common;

use common::{PASSWORD, spawn_app, unique};
use reqwest::header::{COOKIE, SET_COOKIE};
use serde_json::{Value, json};

/// Value of a cookie set by the response, if any.
fn set_cookie(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

#[tokio::test]
async fn register_sets_cookies_and_rejects_duplicates() {
    let Some(app) = spawn_app().await else { return };
    // Cookies are handled by hand here
    let client = reqwest::Client::new();
    let username = unique("reg");
    let email = format!("{}@Example.com", username);

    let response = client
        .post(app.url("/api/auth/register"))
        .json(&json!({ "email": email, "username": username, "password": PASSWORD }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 201);
    let access = set_cookie(&response, "access_token").expect("access cookie");
    assert!(set_cookie(&response, "refresh_token").is_some());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["role"], "student");
    assert_eq!(body["user"]["email"], email.to_lowercase());
    assert!(body["user"].get("password").is_none());

    let response = client
        .get(app.url("/api/auth/me"))
        .header(COOKIE, format!("access_token={}", access))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let me: Value = response.json().await.unwrap();
    assert_eq!(me["user"]["username"], username);

    // Same email, different case
    let response = client
        .post(app.url("/api/auth/register"))
        .json(&json!({
            "email": email.to_uppercase(),
            "username": unique("other"),
            "password": PASSWORD,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    let response = client
        .post(app.url("/api/auth/register"))
        .json(&json!({
            "email": format!("{}@example.com", unique("other")),
            "username": username,
            "password": PASSWORD,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn login_checks_credentials_and_account_status() {
    let Some(app) = spawn_app().await else { return };
    let client = common::client();
    let user = app.register(&client, "login").await;
    let email = user["email"].as_str().unwrap().to_string();

    let response = client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": email, "password": "wrong-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Invalid email or password");

    let response = client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": "nobody@example.com", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": email.to_uppercase(), "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1")
        .bind(user["id"].as_i64().unwrap())
        .execute(&app.pool)
        .await
        .unwrap();

    let response = client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": email, "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn refresh_rotates_and_detects_reuse() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let username = unique("rot");

    let response = client
        .post(app.url("/api/auth/register"))
        .json(&json!({
            "email": format!("{}@example.com", username),
            "username": username,
            "password": PASSWORD,
        }))
        .send()
        .await
        .unwrap();
    let first = set_cookie(&response, "refresh_token").unwrap();

    let refresh = |token: String| {
        client
            .post(app.url("/api/auth/refresh"))
            .header(COOKIE, format!("refresh_token={}", token))
            .send()
    };

    let response = refresh(first.clone()).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let second = set_cookie(&response, "refresh_token").unwrap();
    assert_ne!(first, second);
    assert!(set_cookie(&response, "access_token").is_some());

    // Replaying a rotated token revokes the whole family
    let response = refresh(first).await.unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = refresh(second).await.unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = client.post(app.url("/api/auth/refresh")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn logout_revokes_the_refresh_token() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let username = unique("out");

    let response = client
        .post(app.url("/api/auth/register"))
        .json(&json!({
            "email": format!("{}@example.com", username),
            "username": username,
            "password": PASSWORD,
        }))
        .send()
        .await
        .unwrap();
    let refresh_token = set_cookie(&response, "refresh_token").unwrap();

    let response = client
        .post(app.url("/api/auth/logout"))
        .header(COOKIE, format!("refresh_token={}", refresh_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    // Cleared cookies come back empty
    assert_eq!(set_cookie(&response, "access_token").as_deref(), Some(""));

    let response = client
        .post(app.url("/api/auth/refresh"))
        .header(COOKIE, format!("refresh_token={}", refresh_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn profile_update_and_password_change() {
    let Some(app) = spawn_app().await else { return };
    let client = common::client();
    let user = app.register(&client, "prof").await;
    let id = user["id"].as_i64().unwrap();
    let new_name = unique("renamed");

    let response = client
        .put(app.url("/api/users/me"))
        .json(&json!({ "username": new_name, "bio": "<b>Hello</b> there" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user"]["username"], new_name);
    assert_eq!(body["user"]["bio"], "Hello there");

    // Public profile needs no session
    let response = reqwest::Client::new()
        .get(app.url(&format!("/api/users/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user"]["username"], new_name);
    assert!(body["user"].get("email").is_none());
    assert!(body["achievements"].is_array());

    let response = client
        .put(app.url("/api/users/me/password"))
        .json(&json!({ "current_password": "not-it", "new_password": "new-password-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = client
        .put(app.url("/api/users/me/password"))
        .json(&json!({ "current_password": PASSWORD, "new_password": "new-password-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": user["email"], "password": "new-password-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client
        .get(app.url("/api/users/999999999"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn admin_manages_users() {
    let Some(app) = spawn_app().await else { return };
    let admin = common::client();
    let admin_user = app.register(&admin, "adm").await;
    app.promote(&admin, admin_user["id"].as_i64().unwrap(), "admin")
        .await;

    let student = common::client();
    let student_user = app.register(&student, "stud").await;
    let student_id = student_user["id"].as_i64().unwrap();

    let response = admin
        .get(app.url(&format!(
            "/api/admin/users?q={}",
            student_user["username"].as_str().unwrap()
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["users"][0]["id"], student_id);

    // A bare % matches literally, not everyone
    let response = admin
        .get(app.url("/api/admin/users?q=%25"))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["total"], 0);

    let response = admin
        .put(app.url(&format!("/api/admin/users/{}/role", student_id)))
        .json(&json!({ "role": "wizard" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let response = admin
        .put(app.url(&format!("/api/admin/users/{}/role", student_id)))
        .json(&json!({ "role": "instructor" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // New role shows up after the student's next refresh
    let response = student.post(app.url("/api/auth/refresh")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let response = student.get(app.url("/api/courses/mine")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = admin
        .put(app.url(&format!("/api/admin/users/{}/status", student_id)))
        .json(&json!({ "is_active": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // Deactivation ends the student's sessions
    let response = student.post(app.url("/api/auth/refresh")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = admin
        .delete(app.url(&format!("/api/admin/users/{}", admin_user["id"])))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let response = admin.get(app.url("/api/admin/stats")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert!(body["stats"]["users"].as_i64().unwrap() >= 2);

    let response = admin
        .delete(app.url(&format!("/api/admin/users/{}", student_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);
}

#[tokio::test]
async fn instructors_with_sales_cannot_be_deleted() {
    let Some(app) = spawn_app().await else { return };
    let admin = common::client();
    let admin_user = app.register(&admin, "adm").await;
    app.promote(&admin, admin_user["id"].as_i64().unwrap(), "admin")
        .await;

    let instructor = common::client();
    let course = app.published_course(&instructor, 1500).await;
    let course_id = course["id"].as_i64().unwrap();
    let instructor_id = course["instructor_id"].as_i64().unwrap();

    let buyer = common::client();
    let buyer_id = app.register(&buyer, "buyer").await["id"].as_i64().unwrap();

    // An abandoned checkout alone does not block deletion
    let pending = common::unique("cs_pending");
    sqlx::query(
        "INSERT INTO payments (user_id, course_id, amount_cents, currency, status, stripe_session_id) \
         VALUES ($1, $2, 1500, 'usd', 'pending', $3)",
    )
    .bind(buyer_id)
    .bind(course_id)
    .bind(&pending)
    .execute(&app.pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO payments (user_id, course_id, amount_cents, currency, status, stripe_session_id) \
         VALUES ($1, $2, 1500, 'usd', 'completed', $3)",
    )
    .bind(buyer_id)
    .bind(course_id)
    .bind(common::unique("cs_paid"))
    .execute(&app.pool)
    .await
    .unwrap();

    let response = admin
        .delete(app.url(&format!("/api/admin/users/{}", instructor_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);

    let response = instructor
        .delete(app.url(&format!("/api/courses/{}", course_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    // Nothing was removed
    let response = buyer.get(app.url("/api/payments")).send().await.unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["payments"].as_array().unwrap().len(), 2);

    sqlx::query("DELETE FROM payments WHERE course_id = $1 AND status = 'completed'")
        .bind(course_id)
        .execute(&app.pool)
        .await
        .unwrap();

    let response = admin
        .delete(app.url(&format!("/api/admin/users/{}", instructor_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE stripe_session_id = $1")
        .bind(&pending)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(left, 0);
}

#[tokio::test]
async fn lapsed_streaks_read_as_zero() {
    let Some(app) = spawn_app().await else { return };
    let client = common::client();
    let user = app.register(&client, "lapsed").await;
    let user_id = user["id"].as_i64().unwrap();

    let today = chrono::Utc::now().date_naive();
    sqlx::query(
        "UPDATE users SET current_streak = 6, longest_streak = 6, last_active_date = $2 WHERE id = $1",
    )
    .bind(user_id)
    .bind(today - chrono::Duration::days(3))
    .execute(&app.pool)
    .await
    .unwrap();

    let response = client.get(app.url("/api/activities/stats")).send().await.unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["stats"]["current_streak"], 0);
    assert_eq!(body["stats"]["longest_streak"], 6);

    let response = client
        .get(app.url(&format!("/api/users/{}", user_id)))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user"]["current_streak"], 0);
    assert!(body["user"].get("last_active_date").is_none());

    // Active yesterday: the streak still counts
    sqlx::query("UPDATE users SET last_active_date = $2 WHERE id = $1")
        .bind(user_id)
        .bind(today - chrono::Duration::days(1))
        .execute(&app.pool)
        .await
        .unwrap();
    let response = client.get(app.url("/api/activities/stats")).send().await.unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["stats"]["current_streak"], 6);
}
