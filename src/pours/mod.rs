//! Pour logging and the session windowing that groups pours in time.

pub mod handlers;
pub mod window;
