//! # kl-api
//!
//! The web routing and orchestration layer for KLUTCH.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;

use actix_web::error::{JsonPayloadError, PathError, QueryPayloadError};
use actix_web::{web, HttpRequest};

use crate::error::ApiError;

/// Configures the routes for the marketplace API.
///
/// # Developer Note
/// Static media is not mounted here; the binary serves it with actix-files
/// because only it knows where the local store writes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .app_data(web::PathConfig::default().error_handler(path_error))
        .app_data(web::QueryConfig::default().error_handler(query_error))
        .route("/health", web::get().to(handlers::health))
        .service(
            web::scope("/api")
                .route("/postings", web::post().to(handlers::create_posting))
                .route("/postings", web::get().to(handlers::list_open))
                .route("/me/postings", web::get().to(handlers::list_mine))
                .route("/postings/{id}", web::get().to(handlers::get_posting))
                .route("/postings/{id}/cancel", web::post().to(handlers::cancel_posting))
                .route("/postings/{id}/complete", web::post().to(handlers::complete_posting))
                .route("/postings/{id}/media", web::post().to(handlers::attach_media))
                .route("/postings/{id}/bids", web::get().to(handlers::list_bids))
                .route("/postings/{id}/bids", web::post().to(handlers::submit_bid))
                .route("/postings/{id}/bids/{bid_id}/accept", web::post().to(handlers::accept_bid))
                .route("/bids/{bid_id}/withdraw", web::post().to(handlers::withdraw_bid))
                .route("/tags/resolve", web::post().to(handlers::resolve_tags))
                .route("/location", web::get().to(handlers::capture_location)),
        );
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::validation(format!("invalid JSON body: {err}")).into()
}

fn path_error(err: PathError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::validation(format!("invalid path parameter: {err}")).into()
}

fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::validation(format!("invalid query string: {err}")).into()
}
