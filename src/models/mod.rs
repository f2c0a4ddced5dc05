// src/models/mod.rs

pub mod activity;
pub mod chat;
pub mod course;
pub mod discussion;
pub mod exam_result;
pub mod feedback;
pub mod pagination;
pub mod payment;
pub mod quiz;
pub mod user;
