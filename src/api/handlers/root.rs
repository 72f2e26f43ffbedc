use axum::response::IntoResponse;

/// Undocumented landing route so probes of `/` get a cheap 200.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
