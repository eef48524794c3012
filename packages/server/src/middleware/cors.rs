use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};

pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
        .allow_origin(
            std::env::var("CORS_ORIGIN")
                .ok()
                .and_then(|origin| origin.parse::<HeaderValue>().ok())
                .map(tower_http::cors::AllowOrigin::exact)
                .unwrap_or_else(tower_http::cors::AllowOrigin::any),
        )
}
