//! Request extractors: the authenticated actor and multipart posting forms.

use std::str::FromStr;

use actix_multipart::{Field, Multipart};
use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{web, FromRequest, HttpRequest};
use bytes::{Bytes, BytesMut};
use futures_util::future::{ready, Ready};
use futures_util::TryStreamExt;
use kl_core::error::AppError;
use kl_core::models::{MediaUpload, NewPosting, UserLocation};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::ApiError;
use crate::handlers::AppState;

/// Upper bound for a single text field of a multipart form.
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;

/// User resolved from the `Authorization: Bearer <token>` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub Uuid);

impl FromRequest for Actor {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

fn authenticate(req: &HttpRequest) -> Result<Actor, ApiError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError(AppError::Internal("application state is not configured".into())))?;

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("expected: Bearer <token>"))?;

    state
        .auth
        .authenticate(token)
        .map(Actor)
        .ok_or_else(|| ApiError::unauthorized("invalid bearer token"))
}

/// Splits a comma-separated tag field. Normalization happens in the core.
pub fn split_tags(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Reads one field fully, failing once it grows past `limit` bytes.
async fn read_field(field: &mut Field, limit: usize) -> Result<Bytes, ApiError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = field
        .try_next()
        .await
        .map_err(|e| ApiError::validation(format!("malformed multipart body: {e}")))?
    {
        if buf.len() + chunk.len() > limit {
            return Err(ApiError::validation(format!("field exceeds {limit} bytes")));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

async fn read_text(field: &mut Field, name: &str) -> Result<String, ApiError> {
    let bytes = read_field(field, MAX_TEXT_FIELD_BYTES).await?;
    String::from_utf8(bytes.to_vec()).map_err(|_| ApiError::validation(format!("{name} is not valid UTF-8")))
}

async fn read_upload(field: &mut Field, max_bytes: usize) -> Result<MediaUpload, ApiError> {
    let file_name = field
        .content_disposition()
        .get_filename()
        .unwrap_or("upload")
        .to_string();
    let content_type = field
        .content_type()
        .cloned()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM);
    // One byte over the limit is enough for the core to report the size.
    let data = read_field(field, max_bytes.saturating_add(1)).await?;
    Ok(MediaUpload { file_name, content_type, data })
}

fn parse<T: FromStr>(name: &str, raw: &str) -> Result<T, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::validation(format!("{name} is not a valid number: {raw:?}")))
}

/// Parses the create-posting form:
/// `title`, `description`, `budget`, `latitude`, `longitude`, `address?`,
/// `tags?` (comma separated, may repeat) and `media?` (file).
pub async fn read_new_posting(mut payload: Multipart, max_media_bytes: usize) -> Result<NewPosting, ApiError> {
    let mut title = String::new();
    let mut description = String::new();
    let mut budget: Option<Decimal> = None;
    let mut latitude: Option<f64> = None;
    let mut longitude: Option<f64> = None;
    let mut address: Option<String> = None;
    let mut tags = Vec::new();
    let mut media = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.content_disposition().get_name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => title = read_text(&mut field, "title").await?,
            "description" => description = read_text(&mut field, "description").await?,
            "budget" => budget = Some(parse("budget", &read_text(&mut field, "budget").await?)?),
            "latitude" => latitude = Some(parse("latitude", &read_text(&mut field, "latitude").await?)?),
            "longitude" => longitude = Some(parse("longitude", &read_text(&mut field, "longitude").await?)?),
            "address" => {
                let text = read_text(&mut field, "address").await?;
                address = Some(text.trim().to_string()).filter(|a| !a.is_empty());
            }
            "tags" => tags.extend(split_tags(&read_text(&mut field, "tags").await?)),
            "media" => media = Some(read_upload(&mut field, max_media_bytes).await?),
            other => {
                tracing::debug!(field = other, "ignoring unknown form field");
                read_field(&mut field, MAX_TEXT_FIELD_BYTES).await?;
            }
        }
    }

    let location = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(UserLocation { latitude, longitude, address }),
        (None, None) => None,
        _ => return Err(ApiError::validation("latitude and longitude must be sent together")),
    };

    Ok(NewPosting {
        title,
        description,
        budget: budget.ok_or_else(|| ApiError::validation("budget is required"))?,
        location,
        tags,
        media,
    })
}

/// Reads the single `media` file of an attach-media form.
pub async fn read_media_only(mut payload: Multipart, max_media_bytes: usize) -> Result<MediaUpload, ApiError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::validation(format!("malformed multipart body: {e}")))?
    {
        if field.content_disposition().get_name() == Some("media") {
            return read_upload(&mut field, max_media_bytes).await;
        }
        read_field(&mut field, MAX_TEXT_FIELD_BYTES).await?;
    }
    Err(ApiError::validation("media file is required"))
}
