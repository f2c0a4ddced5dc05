// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::{
    config::Config,
    services::{
        chat::ChatRooms,
        stripe::{PaymentGateway, StripeClient},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub chat: ChatRooms,
    /// `None` when Stripe is not configured; checkout then answers 503.
    pub payments: Option<Arc<dyn PaymentGateway>>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let payments = config.stripe_secret_key.clone().map(|key| {
            Arc::new(StripeClient::new(key, config.stripe_api_base.clone()))
                as Arc<dyn PaymentGateway>
        });

        Self {
            pool,
            config,
            chat: ChatRooms::new(),
            payments,
        }
    }

    /// Replaces the payment provider (used by tests).
    pub fn with_payments(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.payments = Some(gateway);
        self
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for ChatRooms {
    fn from_ref(state: &AppState) -> Self {
        state.chat.clone()
    }
}
