// src/models/payment.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_REFUNDED: &str = "refunded";

pub const PAYMENT_COLUMNS: &str = "id, user_id, course_id, amount_cents, currency, status, \
     stripe_session_id, stripe_payment_intent, created_at, updated_at";

/// Represents the 'payments' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub amount_cents: i64,
    pub currency: String,
    /// 'pending', 'completed', 'failed' or 'refunded'.
    pub status: String,
    pub stripe_session_id: String,
    pub stripe_payment_intent: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentListParams {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub success: bool,
    pub session_id: String,
    pub url: String,
}
