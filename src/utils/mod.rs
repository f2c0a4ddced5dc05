// src/utils/mod.rs

pub mod access;
pub mod cookies;
pub mod hash;
pub mod html;
pub mod jwt;
pub mod rate_limit;
