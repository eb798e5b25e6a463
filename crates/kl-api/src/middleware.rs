//! klutch/crates/kl-api/src/middleware.rs Middleware
//!
//! Access logging and CORS for the KLUTCH API.

use actix_cors::Cors;
use actix_web::http::header;
use actix_web::middleware::Logger;

// Access log through the `log` facade:
// remote-ip "request-line" status-code response-size "referrer" "user-agent" time
pub fn standard_middleware() -> Logger {
    Logger::default()
}

// No configured origins means same-origin only.
pub fn cors_policy(origins: &[String]) -> Cors {
    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allowed_methods(vec!["GET", "POST"])
        .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .max_age(3600)
}
