// src/handlers/payments.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgConnection, PgPool};

use crate::{
    error::AppError,
    handlers::{auth::find_user, courses::find_course},
    models::payment::{
        CheckoutResponse, PAYMENT_COLUMNS, Payment, STATUS_COMPLETED, STATUS_FAILED,
        STATUS_PENDING, STATUS_REFUNDED,
    },
    services::stripe::{
        CheckoutRequest, SessionObject, WebhookAction, parse_webhook_event,
        verify_webhook_signature,
    },
    state::AppState,
    utils::{access::is_enrolled, jwt::Claims},
};

/// Opens a Stripe Checkout session for a paid course and records a pending
/// payment.
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let gateway = state
        .payments
        .clone()
        .ok_or_else(|| AppError::ServiceUnavailable("Payments are not configured".to_string()))?;

    let user = find_user(&state.pool, claims.user_id()?).await?;
    let course = find_course(&state.pool, course_id).await?;

    if !course.is_published {
        return Err(AppError::NotFound("Course not found".to_string()));
    }
    if course.is_free() {
        return Err(AppError::BadRequest(
            "This course is free, enroll directly".to_string(),
        ));
    }
    if is_enrolled(&state.pool, user.id, course_id).await? {
        return Err(AppError::Conflict(
            "You are already enrolled in this course".to_string(),
        ));
    }

    let frontend = state.config.frontend_url.trim_end_matches('/');
    let request = CheckoutRequest {
        user_id: user.id,
        user_email: user.email.clone(),
        course_id,
        course_title: course.title.clone(),
        amount_cents: course.price_cents,
        currency: course.currency.clone(),
        success_url: format!(
            "{}/courses/{}?checkout=success&session_id={{CHECKOUT_SESSION_ID}}",
            frontend, course_id
        ),
        cancel_url: format!("{}/courses/{}?checkout=cancelled", frontend, course_id),
    };

    let session = gateway.create_checkout_session(&request).await?;
    let url = session.url.clone().ok_or_else(|| {
        AppError::InternalServerError("Checkout session has no URL".to_string())
    })?;

    sqlx::query(
        r#"
        INSERT INTO payments (user_id, course_id, amount_cents, currency, status, stripe_session_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (stripe_session_id) DO NOTHING
        "#,
    )
    .bind(user.id)
    .bind(course_id)
    .bind(course.price_cents)
    .bind(&course.currency)
    .bind(STATUS_PENDING)
    .bind(&session.id)
    .execute(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to record payment: {:?}", e);
        AppError::from(e)
    })?;

    tracing::info!(user_id = user.id, course_id, session_id = %session.id, "Checkout session created");

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            success: true,
            session_id: session.id,
            url,
        }),
    ))
}

/// The caller's payments, newest first.
pub async fn my_payments(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let payments = sqlx::query_as::<_, Payment>(&format!(
        "SELECT {} FROM payments WHERE user_id = $1 ORDER BY created_at DESC",
        PAYMENT_COLUMNS
    ))
    .bind(claims.user_id()?)
    .fetch_all(&pool)
    .await?;

    Ok(Json(json!({ "success": true, "payments": payments })))
}

/// Stripe webhook endpoint. The body must be the raw, unparsed payload for
/// the signature to verify.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    let secret = state
        .config
        .stripe_webhook_secret
        .as_deref()
        .ok_or_else(|| AppError::ServiceUnavailable("Webhooks are not configured".to_string()))?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing Stripe-Signature header".to_string()))?;

    let event = verify_webhook_signature(&body, signature, secret, chrono::Utc::now().timestamp())
        .inspect_err(|e| tracing::warn!("Rejected webhook: {:?}", e))?;

    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Stripe webhook received");

    apply_webhook(&state.pool, parse_webhook_event(&event)?).await?;

    Ok(Json(json!({ "received": true })))
}

#[derive(sqlx::FromRow)]
struct PaidCourse {
    user_id: i64,
    course_id: i64,
}

/// Clears open checkouts for courses about to be deleted. Settled payments
/// are kept as history, so their courses cannot be deleted.
pub(crate) async fn release_course_payments(
    conn: &mut PgConnection,
    course_ids: &[i64],
) -> Result<(), AppError> {
    let settled: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM payments WHERE course_id = ANY($1) AND status IN ($2, $3))",
    )
    .bind(course_ids)
    .bind(STATUS_COMPLETED)
    .bind(STATUS_REFUNDED)
    .fetch_one(&mut *conn)
    .await?;

    if settled {
        return Err(AppError::Conflict(
            "Courses with completed payments cannot be deleted, unpublish them instead".to_string(),
        ));
    }

    sqlx::query("DELETE FROM payments WHERE course_id = ANY($1)")
        .bind(course_ids)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Applies a verified webhook event. Every branch is safe to replay.
async fn apply_webhook(pool: &PgPool, action: WebhookAction) -> Result<(), AppError> {
    match action {
        WebhookAction::CheckoutCompleted(session) => {
            let mut tx = pool.begin().await?;

            let paid = sqlx::query_as::<_, PaidCourse>(
                r#"
                UPDATE payments
                SET status = $1, stripe_payment_intent = COALESCE($2, stripe_payment_intent),
                    updated_at = NOW()
                WHERE stripe_session_id = $3 AND status IN ($4, $5)
                RETURNING user_id, course_id
                "#,
            )
            .bind(STATUS_COMPLETED)
            .bind(&session.payment_intent)
            .bind(&session.id)
            .bind(STATUS_PENDING)
            .bind(STATUS_FAILED)
            .fetch_optional(&mut *tx)
            .await?;

            let paid = match paid {
                Some(paid) => Some(paid),
                None => record_unknown_session(&mut *tx, &session).await?,
            };

            if let Some(paid) = paid {
                sqlx::query(
                    "INSERT INTO enrollments (user_id, course_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                )
                .bind(paid.user_id)
                .bind(paid.course_id)
                .execute(&mut *tx)
                .await?;
                tracing::info!(
                    user_id = paid.user_id,
                    course_id = paid.course_id,
                    "Payment completed, user enrolled"
                );
            }

            tx.commit().await?;
        }
        WebhookAction::CheckoutExpired(session) => {
            sqlx::query(
                "UPDATE payments SET status = $1, updated_at = NOW() WHERE stripe_session_id = $2 AND status = $3",
            )
            .bind(STATUS_FAILED)
            .bind(&session.id)
            .bind(STATUS_PENDING)
            .execute(pool)
            .await?;
        }
        WebhookAction::ChargeRefunded(charge) => {
            let Some(intent) = charge.payment_intent else {
                tracing::warn!("Refund without payment intent ignored");
                return Ok(());
            };

            let mut tx = pool.begin().await?;

            let refunded = sqlx::query_as::<_, PaidCourse>(
                r#"
                UPDATE payments SET status = $1, updated_at = NOW()
                WHERE stripe_payment_intent = $2 AND status = $3
                RETURNING user_id, course_id
                "#,
            )
            .bind(STATUS_REFUNDED)
            .bind(&intent)
            .bind(STATUS_COMPLETED)
            .fetch_all(&mut *tx)
            .await?;

            for paid in &refunded {
                sqlx::query("DELETE FROM enrollments WHERE user_id = $1 AND course_id = $2")
                    .bind(paid.user_id)
                    .bind(paid.course_id)
                    .execute(&mut *tx)
                    .await?;
                tracing::info!(
                    user_id = paid.user_id,
                    course_id = paid.course_id,
                    "Payment refunded, enrollment removed"
                );
            }

            tx.commit().await?;
        }
        WebhookAction::Ignored(event_type) => {
            tracing::debug!(%event_type, "Ignoring webhook event");
        }
    }

    Ok(())
}

/// Fulfils a completed session that has no open payment row, using the
/// purchase stamped on the session. Replays of settled sessions are no-ops.
async fn record_unknown_session(
    conn: &mut PgConnection,
    session: &SessionObject,
) -> Result<Option<PaidCourse>, AppError> {
    let seen: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM payments WHERE stripe_session_id = $1)")
            .bind(&session.id)
            .fetch_one(&mut *conn)
            .await?;
    if seen {
        tracing::debug!(session_id = %session.id, "Checkout already processed");
        return Ok(None);
    }

    let Some((user_id, course_id)) = session.purchase() else {
        tracing::warn!(session_id = %session.id, "Completed checkout for an unknown session without purchase metadata");
        return Ok(None);
    };

    tracing::warn!(
        session_id = %session.id,
        user_id,
        course_id,
        "Completed checkout had no pending payment, recording it from session metadata"
    );

    let paid = sqlx::query_as::<_, PaidCourse>(
        r#"
        INSERT INTO payments
            (user_id, course_id, amount_cents, currency, status, stripe_session_id, stripe_payment_intent)
        SELECT u.id, c.id, COALESCE($3, c.price_cents), COALESCE($4, c.currency), $5, $6, $7
        FROM users u, courses c
        WHERE u.id = $1 AND c.id = $2
        ON CONFLICT (stripe_session_id) DO NOTHING
        RETURNING user_id, course_id
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .bind(session.amount_total)
    .bind(&session.currency)
    .bind(STATUS_COMPLETED)
    .bind(&session.id)
    .bind(&session.payment_intent)
    .fetch_optional(&mut *conn)
    .await?;

    if paid.is_none() {
        tracing::warn!(session_id = %session.id, user_id, course_id, "Session metadata names a missing user or course");
    }

    Ok(paid)
}
