//! Rule-driven notifications: generation, scheduling and the read API.

pub mod generator;
pub mod handlers;
pub mod rules;
pub mod scheduler;
