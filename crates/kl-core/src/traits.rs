//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.
//! Conditional writes (`accept_bid`, `cancel_posting`, ...) report a lost
//! race as `None`/`false`; services turn that into the caller-facing error.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{PositionError, Result};
use crate::models::{Bid, Coordinates, Media, NewMedia, Posting, PositionRequest, StoredUpload, Tag};

#[cfg(test)]
use mockall::automock;

/// Persistence contract for postings and their status transitions.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PostingRepo: Send + Sync {
    async fn insert_posting(&self, posting: &Posting) -> Result<()>;
    async fn get_posting(&self, id: Uuid) -> Result<Option<Posting>>;
    /// Newest first.
    async fn list_by_author(&self, author_id: Uuid) -> Result<Vec<Posting>>;
    /// WAITING_FOR_BIDS postings, newest first.
    async fn list_open(&self, limit: i64, offset: i64) -> Result<Vec<Posting>>;

    /// WAITING_FOR_BIDS -> CANCELLED, withdrawing every pending bid in the
    /// same transaction. `false` when the posting was not waiting.
    async fn cancel_posting(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;
    /// IN_PROGRESS -> COMPLETED. `false` when the posting was not in progress.
    async fn complete_posting(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Atomic acceptance: compare-and-swap the posting out of WAITING_FOR_BIDS,
    /// accept `bid_id` (which must still be pending) and reject the other
    /// pending bids. `None` when either guard did not hold.
    async fn accept_bid(
        &self,
        posting_id: Uuid,
        bid_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Posting>>;

    /// Links tags in the given order. Already-linked tags are ignored.
    async fn link_tags(&self, posting_id: Uuid, tag_ids: &[Uuid]) -> Result<()>;
}

/// Persistence contract for bids.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BidRepo: Send + Sync {
    async fn get_bid(&self, id: Uuid) -> Result<Option<Bid>>;
    /// Oldest first.
    async fn list_for_posting(&self, posting_id: Uuid) -> Result<Vec<Bid>>;

    /// Updates the partner's pending bid or inserts a new one, but only while
    /// the posting is WAITING_FOR_BIDS. `None` when the posting had closed.
    async fn upsert_pending_bid(
        &self,
        posting_id: Uuid,
        partner_id: Uuid,
        charge: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Option<Bid>>;

    /// PENDING -> WITHDRAWN. `false` when the bid was no longer pending.
    async fn withdraw_bid(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;
}

/// Persistence contract for canonical tags.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TagRepo: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<Tag>>;
    /// Must surface a name uniqueness violation as `AppError::Conflict`.
    async fn insert_tag(&self, tag: &Tag) -> Result<()>;
    /// In link order.
    async fn tags_for_posting(&self, posting_id: Uuid) -> Result<Vec<Tag>>;
}

/// Persistence contract for media rows.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MediaRepo: Send + Sync {
    /// Inserts the row with the next 1-based `sort_order` of its posting,
    /// assigned by the same statement so concurrent appends never collide.
    async fn append_media(&self, media: &NewMedia) -> Result<Media>;
    /// Ordered by `sort_order`.
    async fn media_for_posting(&self, posting_id: Uuid) -> Result<Vec<Media>>;
}

/// Media storage contract for handling uploads.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Saves raw bytes under `scope`.
    async fn save_upload(
        &self,
        scope: &str,
        file_name: &str,
        data: Bytes,
        content_type: &mime::Mime,
    ) -> Result<StoredUpload>;
    /// Deletes a stored object. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
    /// Returns the public URL for a storage key.
    fn public_url(&self, key: &str) -> String;
}

/// Where device coordinates come from.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn current_position(
        &self,
        request: &PositionRequest,
    ) -> std::result::Result<Coordinates, PositionError>;
}

/// Reverse geocoding: coordinates to a human-readable address.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` when the service knows no address for the point.
    async fn reverse(&self, coordinates: Coordinates) -> Result<Option<String>>;
}

/// Actor identity contract.
#[cfg_attr(test, automock)]
pub trait AuthProvider: Send + Sync {
    /// Resolves a bearer token to the user it was issued for.
    fn authenticate(&self, token: &str) -> Option<Uuid>;
    /// Issues a bearer token for a user.
    fn issue_token(&self, user_id: Uuid) -> String;
}
