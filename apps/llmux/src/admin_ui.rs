use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets"]
#[include = "management.html"]
struct ManagementUi;

/// Serve the single-page management app. `MANAGEMENT_STATIC_PATH` overrides
/// the embedded copy with a file on disk for local UI development.
pub async fn management_page() -> Response {
    if let Ok(path) = std::env::var("MANAGEMENT_STATIC_PATH")
        && let Ok(bytes) = tokio::fs::read(&path).await
    {
        return html_response(bytes);
    }
    match ManagementUi::get("management.html") {
        Some(content) => html_response(content.data.into_owned()),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

fn html_response(bytes: Vec<u8>) -> Response {
    let mime = mime_guess::from_path("management.html").first_or_octet_stream();
    let mut response = Response::new(axum::body::Body::from(bytes));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("text/html")),
    );
    response
}
