mod bottles;
mod collection;
mod friends;
mod insights;
mod notifications;
mod pours;
mod users;

pub use insights::{UserSnapshot, WeeklyStats};
