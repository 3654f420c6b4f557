mod connection;
mod error;
mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use error::StoreError;
pub use models::*;
pub use repositories::{UserSnapshot, WeeklyStats};
