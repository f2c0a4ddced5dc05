// src/routes.rs

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower_cookies::CookieManagerLayer;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    error::AppError,
    handlers::{
        activities, admin, auth, chat, courses, curriculum, discussions, exams, feedback, health,
        payments, users,
    },
    state::AppState,
    utils::{
        jwt::{admin_middleware, auth_middleware, instructor_middleware, optional_auth_middleware},
        rate_limit::{FixedWindowLimiter, rate_limit_middleware},
    },
};

async fn not_found() -> AppError {
    AppError::NotFound("Route not found".to_string())
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let origins: Vec<HeaderValue> = frontend_url
        .split(',')
        .map(|origin| origin.trim().trim_end_matches('/'))
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Assembles the main application router.
///
/// * Every feature lives under `/api/<feature>`.
/// * `/api/auth` has its own, stricter rate limiter on top of the global one.
/// * Protected routes use `route_layer` so unknown paths still answer 404.
pub fn create_router(state: AppState) -> Router {
    let config = &state.config;

    let global_limiter = Arc::new(FixedWindowLimiter::new(
        "global",
        config.rate_limit_window_secs,
        config.rate_limit_max_requests,
    ));
    let auth_limiter = Arc::new(FixedWindowLimiter::new(
        "auth",
        config.auth_rate_limit_window_secs,
        config.auth_rate_limit_max_requests,
    ));

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .merge(
            Router::new()
                .route("/me", get(auth::me))
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        .layer(middleware::from_fn_with_state(
            auth_limiter,
            rate_limit_middleware,
        ));

    let user_routes = Router::new()
        .route("/{id}", get(users::get_profile))
        .merge(
            Router::new()
                .route("/me", put(users::update_me))
                .route("/me/courses", get(users::my_courses))
                .route("/me/password", put(users::change_password))
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        );

    let course_routes = Router::new()
        .route("/", get(courses::list_courses))
        .route("/{id}", get(courses::get_course))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            optional_auth_middleware,
        ))
        // Instructor and admin only
        .merge(
            Router::new()
                .route("/", post(courses::create_course))
                .route("/mine", get(courses::my_teaching))
                .route_layer(middleware::from_fn(instructor_middleware))
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        // Authenticated; ownership is checked per course in the handlers
        .merge(
            Router::new()
                .route(
                    "/{id}",
                    put(courses::update_course).delete(courses::delete_course),
                )
                .route("/{id}/enroll", post(courses::enroll))
                .route("/{id}/units", post(curriculum::create_unit))
                .route(
                    "/units/{id}",
                    put(curriculum::update_unit).delete(curriculum::delete_unit),
                )
                .route("/units/{id}/lessons", post(curriculum::create_lesson))
                .route("/units/{id}/quizzes", post(exams::create_quiz))
                .route(
                    "/lessons/{id}",
                    get(curriculum::get_lesson)
                        .put(curriculum::update_lesson)
                        .delete(curriculum::delete_lesson),
                )
                .route("/lessons/{id}/complete", post(curriculum::complete_lesson))
                .route(
                    "/quizzes/{id}",
                    put(exams::update_quiz).delete(exams::delete_quiz),
                )
                .route(
                    "/quizzes/{id}/questions",
                    get(exams::list_questions).post(exams::create_question),
                )
                .route(
                    "/questions/{id}",
                    put(exams::update_question).delete(exams::delete_question),
                )
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        );

    let exam_routes = Router::new()
        .route("/quizzes/{id}", get(exams::get_quiz))
        .route("/quizzes/{id}/submit", post(exams::submit_exam))
        .route("/quizzes/{id}/results", get(exams::quiz_results))
        .route("/results", get(exams::my_results))
        .route("/results/{id}", get(exams::get_result))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let discussion_routes = Router::new()
        .route(
            "/course/{course_id}",
            get(discussions::list_discussions).post(discussions::create_discussion),
        )
        .route(
            "/{id}",
            get(discussions::get_discussion)
                .put(discussions::update_discussion)
                .delete(discussions::delete_discussion),
        )
        .route("/{id}/replies", post(discussions::create_reply))
        .route("/{id}/pin", post(discussions::toggle_pin))
        .route("/replies/{id}", delete(discussions::delete_reply))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let chat_routes = Router::new()
        .route("/{course_id}/messages", get(chat::history))
        .route("/{course_id}/ws", get(chat::chat_socket))
        .route("/{course_id}/online", get(chat::online))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let feedback_routes = Router::new()
        .route("/course/{course_id}", get(feedback::list_feedback))
        .merge(
            Router::new()
                .route(
                    "/course/{course_id}",
                    post(feedback::submit_feedback).delete(feedback::delete_feedback),
                )
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        );

    let activity_routes = Router::new()
        .route("/leaderboard", get(activities::leaderboard))
        .merge(
            Router::new()
                .route("/", get(activities::my_activities))
                .route("/stats", get(activities::my_stats))
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        );

    let payment_routes = Router::new()
        // Authenticated by signature, not by cookie
        .route("/webhook", post(payments::webhook))
        .merge(
            Router::new()
                .route("/", get(payments::my_payments))
                .route("/checkout/{course_id}", post(payments::create_checkout))
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        );

    let admin_routes = Router::new()
        .route("/users", get(admin::list_users))
        .route("/users/{id}", delete(admin::delete_user))
        .route("/users/{id}/role", put(admin::update_role))
        .route("/users/{id}/status", put(admin::update_status))
        .route("/stats", get(admin::stats))
        .route("/payments", get(admin::list_payments))
        .route("/courses/{id}/publish", put(admin::set_published))
        .route("/discussions/{id}", delete(admin::delete_discussion))
        // Double middleware protection: Auth first, then Admin check
        .route_layer(middleware::from_fn(admin_middleware))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let api = Router::new()
        .route("/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/users", user_routes)
        .nest("/courses", course_routes)
        .nest("/exams", exam_routes)
        .nest("/discussions", discussion_routes)
        .nest("/chat", chat_routes)
        .nest("/feedback", feedback_routes)
        .nest("/activities", activity_routes)
        .nest("/payments", payment_routes)
        .nest("/admin", admin_routes)
        .layer(middleware::from_fn_with_state(
            global_limiter,
            rate_limit_middleware,
        ));

    Router::new()
        .nest("/api", api)
        .fallback(not_found)
        // Global Middleware (applied from outside in)
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.frontend_url))
        .with_state(state)
}
