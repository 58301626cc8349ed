//! The browser UI.
//!
//! This is a single self-contained page, compiled into the binary.

use axum::response::Html;

/// The page itself.
const INDEX_HTML: &str = include_str!("../../static/index.html");

/// Handler for `GET /`.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}
