// src/handlers/mod.rs

pub mod activities;
pub mod admin;
pub mod auth;
pub mod chat;
pub mod courses;
pub mod curriculum;
pub mod discussions;
pub mod exams;
pub mod feedback;
pub mod health;
pub mod payments;
pub mod users;
