//! # Domain Models
//!
//! These structs represent the core entities of the KLUTCH marketplace.
//! Identifiers are random UUIDs; money is an exact decimal.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Lifecycle of a job request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostingStatus {
    WaitingForBids,
    InProgress,
    Completed,
    Cancelled,
}

impl PostingStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WaitingForBids => "WAITING_FOR_BIDS",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// The selection state machine. COMPLETED and CANCELLED are terminal.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::WaitingForBids, Self::InProgress)
                | (Self::WaitingForBids, Self::Cancelled)
                | (Self::InProgress, Self::Completed)
        )
    }

    /// Whether a posting in this status must reference an accepted bid.
    pub fn holds_accepted_bid(self) -> bool {
        matches!(self, Self::InProgress | Self::Completed)
    }
}

impl fmt::Display for PostingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING_FOR_BIDS" => Ok(Self::WaitingForBids),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(AppError::Internal(format!("unknown posting status {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BidStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

impl BidStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Withdrawn => "WITHDRAWN",
        }
    }
}

impl fmt::Display for BidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BidStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "ACCEPTED" => Ok(Self::Accepted),
            "REJECTED" => Ok(Self::Rejected),
            "WITHDRAWN" => Ok(Self::Withdrawn),
            other => Err(AppError::Internal(format!("unknown bid status {other:?}"))),
        }
    }
}

/// A customer's job request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub description: String,
    pub budget: Decimal,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
    pub status: PostingStatus,
    pub accepted_bid_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Posting {
    /// `accepted_bid_id` is set iff the status holds an accepted bid.
    pub fn is_consistent(&self) -> bool {
        self.accepted_bid_id.is_some() == self.status.holds_accepted_bid()
    }
}

/// A partner's priced offer against a posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: Uuid,
    pub posting_id: Uuid,
    pub partner_id: Uuid,
    pub charge: Decimal,
    pub status: BidStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagKind {
    Service,
    Skill,
}

impl TagKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Service => "SERVICE",
            Self::Skill => "SKILL",
        }
    }
}

impl FromStr for TagKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SERVICE" => Ok(Self::Service),
            "SKILL" => Ok(Self::Skill),
            other => Err(AppError::Internal(format!("unknown tag kind {other:?}"))),
        }
    }
}

/// Canonical skill/service label. `name` is always normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub kind: TagKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "IMAGE",
            Self::Video => "VIDEO",
        }
    }

    /// Only `image/*` and `video/*` content types are attachable.
    pub fn from_mime(content_type: &mime::Mime) -> Option<Self> {
        match content_type.type_() {
            mime::IMAGE => Some(Self::Image),
            mime::VIDEO => Some(Self::Video),
            _ => None,
        }
    }
}

impl FromStr for MediaType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IMAGE" => Ok(Self::Image),
            "VIDEO" => Ok(Self::Video),
            other => Err(AppError::Internal(format!("unknown media type {other:?}"))),
        }
    }
}

/// An attachment owned by exactly one posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub id: Uuid,
    pub posting_id: Uuid,
    pub url: String,
    pub media_type: MediaType,
    /// 1-based display order within the posting
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

/// A media row before storage assigns its `sort_order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMedia {
    pub id: Uuid,
    pub posting_id: Uuid,
    pub url: String,
    pub media_type: MediaType,
    pub created_at: DateTime<Utc>,
}

/// Where an upload landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub key: String,
    /// `false` when identical content was already stored under `key`.
    pub created: bool,
}

/// Raw upload as received from the client.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub file_name: String,
    pub content_type: mime::Mime,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Captured position, embedded into a posting at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
}

impl UserLocation {
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(AppError::ValidationError(format!(
                "latitude {} is out of range",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(AppError::ValidationError(format!(
                "longitude {} is out of range",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// Options handed to a position source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionRequest {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest acceptable cached reading; zero means always take a fresh one.
    pub maximum_age: Duration,
}

impl Default for PositionRequest {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::ZERO,
        }
    }
}

/// Input to `PostingService::create_posting`.
#[derive(Debug, Clone)]
pub struct NewPosting {
    pub title: String,
    pub description: String,
    pub budget: Decimal,
    pub location: Option<UserLocation>,
    pub tags: Vec<String>,
    pub media: Option<MediaUpload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrichmentStage {
    Media,
    Tags,
}

/// A non-fatal failure while attaching media or tags to a fresh posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentWarning {
    pub stage: EnrichmentStage,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedPosting {
    pub posting: Posting,
    pub tag_ids: Vec<Uuid>,
    pub media: Option<Media>,
    pub warnings: Vec<EnrichmentWarning>,
}

/// A posting with its tags and media, for detail views.
#[derive(Debug, Clone, Serialize)]
pub struct PostingDetail {
    pub posting: Posting,
    pub tags: Vec<Tag>,
    pub media: Vec<Media>,
}
