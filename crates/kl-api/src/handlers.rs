//! # kl-api Handlers
//!
//! This module coordinates the flow between HTTP requests and the marketplace services.

use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use kl_core::error::AppError;
use kl_core::traits::AuthProvider;
use kl_core::Marketplace;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::extract::{read_media_only, read_new_posting, Actor};

/// State shared across all Actix-web workers.
pub struct AppState {
    pub marketplace: Marketplace,
    pub auth: Arc<dyn AuthProvider>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BidRequest {
    pub charge: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ResolveTagsRequest {
    pub names: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolveTagsResponse {
    pub tag_ids: Vec<Uuid>,
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

pub async fn create_posting(
    data: web::Data<AppState>,
    actor: Actor,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    let max_bytes = data.marketplace.media.max_bytes();
    let new = read_new_posting(payload, max_bytes).await?;
    let created = data.marketplace.postings.create_posting(actor.0, new).await?;
    Ok(HttpResponse::Created()
        .insert_header(("Location", format!("/api/postings/{}", created.posting.id)))
        .json(created))
}

pub async fn list_open(data: web::Data<AppState>, query: web::Query<PageQuery>) -> ApiResult<HttpResponse> {
    let postings = data.marketplace.postings.list_open(query.limit, query.offset).await?;
    Ok(HttpResponse::Ok().json(postings))
}

pub async fn list_mine(data: web::Data<AppState>, actor: Actor) -> ApiResult<HttpResponse> {
    let postings = data.marketplace.postings.list_by_author(actor.0).await?;
    Ok(HttpResponse::Ok().json(postings))
}

pub async fn get_posting(data: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult<HttpResponse> {
    let detail = data.marketplace.postings.get_posting(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(detail))
}

pub async fn cancel_posting(
    data: web::Data<AppState>,
    actor: Actor,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let posting_id = path.into_inner();
    data.marketplace.postings.cancel_posting(posting_id, actor.0).await?;
    let detail = data.marketplace.postings.get_posting(posting_id).await?;
    Ok(HttpResponse::Ok().json(detail))
}

pub async fn complete_posting(
    data: web::Data<AppState>,
    actor: Actor,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let posting_id = path.into_inner();
    data.marketplace.postings.complete_posting(posting_id, actor.0).await?;
    let detail = data.marketplace.postings.get_posting(posting_id).await?;
    Ok(HttpResponse::Ok().json(detail))
}

/// Author-only: adds another file to an existing posting.
pub async fn attach_media(
    data: web::Data<AppState>,
    actor: Actor,
    path: web::Path<Uuid>,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    let posting_id = path.into_inner();
    let detail = data.marketplace.postings.get_posting(posting_id).await?;
    if detail.posting.author_id != actor.0 {
        return Err(AppError::Forbidden(format!("only the author may add media to posting {posting_id}")).into());
    }

    let upload = read_media_only(payload, data.marketplace.media.max_bytes()).await?;
    let media = data.marketplace.media.attach_media(posting_id, upload).await?;
    Ok(HttpResponse::Created().json(media))
}

pub async fn list_bids(
    data: web::Data<AppState>,
    actor: Actor,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let bids = data.marketplace.bids.list_bids(path.into_inner(), actor.0).await?;
    Ok(HttpResponse::Ok().json(bids))
}

pub async fn submit_bid(
    data: web::Data<AppState>,
    actor: Actor,
    path: web::Path<Uuid>,
    body: web::Json<BidRequest>,
) -> ApiResult<HttpResponse> {
    let bid = data
        .marketplace
        .bids
        .submit_bid(path.into_inner(), actor.0, body.charge)
        .await?;
    Ok(HttpResponse::Created().json(bid))
}

pub async fn accept_bid(
    data: web::Data<AppState>,
    actor: Actor,
    path: web::Path<(Uuid, Uuid)>,
) -> ApiResult<HttpResponse> {
    let (posting_id, bid_id) = path.into_inner();
    let posting = data.marketplace.selection.accept_bid(posting_id, bid_id, actor.0).await?;
    Ok(HttpResponse::Ok().json(posting))
}

pub async fn withdraw_bid(
    data: web::Data<AppState>,
    actor: Actor,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let bid = data.marketplace.bids.withdraw_bid(path.into_inner(), actor.0).await?;
    Ok(HttpResponse::Ok().json(bid))
}

pub async fn resolve_tags(
    data: web::Data<AppState>,
    _actor: Actor,
    body: web::Json<ResolveTagsRequest>,
) -> ApiResult<HttpResponse> {
    let tag_ids = data.marketplace.tags.resolve_tags(&body.names).await?;
    Ok(HttpResponse::Ok().json(ResolveTagsResponse { tag_ids }))
}

pub async fn capture_location(data: web::Data<AppState>, _actor: Actor) -> ApiResult<HttpResponse> {
    let location = data.marketplace.location.capture_location().await?;
    Ok(HttpResponse::Ok().json(location))
}
