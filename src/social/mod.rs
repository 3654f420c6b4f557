//! Profiles, public collections and friendships.

pub mod handlers;
