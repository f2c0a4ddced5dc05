// src/services/mod.rs

pub mod chat;
pub mod gamification;
pub mod stripe;
