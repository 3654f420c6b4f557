//! Catalogue and collection routes. Storage lives in `db::repositories`.

pub mod handlers;
