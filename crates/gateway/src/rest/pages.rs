//! Embedded chat page.

use axum::response::Html;

/// Serve the bundled single-page chat client.
pub async fn index() -> Html<&'static str> {
    Html(include_str!("../../assets/index.html"))
}
