//! # kl-db-sqlite Implementation
//!
//! This module implements the data mapping between the SQLite relational model
//! and the `kl-core` domain models.
//!
//! Every lifecycle write is a guarded `UPDATE`: the `WHERE` clause carries the
//! expected current status, so a concurrent transition shows up as zero
//! affected rows instead of a lost update. The partial unique indexes in the
//! migration back this up at the storage level.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kl_core::error::{AppError, Result};
use kl_core::models::{Bid, Media, NewMedia, Posting, Tag};
use kl_core::traits::{BidRepo, MediaRepo, PostingRepo, TagRepo};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, error, info};
use uuid::Uuid;

const POSTING_COLUMNS: &str = "id, author_id, title, description, budget, latitude, longitude, \
     address, status, accepted_bid_id, created_at, updated_at";

const BID_COLUMNS: &str = "id, posting_id, partner_id, charge, status, created_at, updated_at";

/// One pool backing all four repository ports.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `url` and applies migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        Self::migrated(pool).await
    }

    /// Private in-memory database. A single connection that never expires,
    /// since the data lives only as long as that connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(db_err)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::Internal(format!("migration failed: {e}")))?;
        info!("sqlite schema is up to date");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn db_err(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(db.message().to_string())
        }
        _ => {
            error!(error = %err, "database operation failed");
            AppError::Internal(format!("database error: {err}"))
        }
    }
}

fn decimal(field: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| AppError::Internal(format!("corrupt {field} {raw:?}: {e}")))
}

#[derive(sqlx::FromRow)]
struct PostingRow {
    id: Uuid,
    author_id: Uuid,
    title: String,
    description: String,
    budget: String,
    latitude: f64,
    longitude: f64,
    address: Option<String>,
    status: String,
    accepted_bid_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PostingRow> for Posting {
    type Error = AppError;

    fn try_from(row: PostingRow) -> Result<Self> {
        let posting = Posting {
            id: row.id,
            author_id: row.author_id,
            title: row.title,
            description: row.description,
            budget: decimal("budget", &row.budget)?,
            latitude: row.latitude,
            longitude: row.longitude,
            address: row.address,
            status: row.status.parse()?,
            accepted_bid_id: row.accepted_bid_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        };
        if !posting.is_consistent() {
            return Err(AppError::Internal(format!(
                "posting {} is {} with accepted bid {:?}",
                posting.id, posting.status, posting.accepted_bid_id
            )));
        }
        Ok(posting)
    }
}

#[derive(sqlx::FromRow)]
struct BidRow {
    id: Uuid,
    posting_id: Uuid,
    partner_id: Uuid,
    charge: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BidRow> for Bid {
    type Error = AppError;

    fn try_from(row: BidRow) -> Result<Self> {
        Ok(Bid {
            id: row.id,
            posting_id: row.posting_id,
            partner_id: row.partner_id,
            charge: decimal("charge", &row.charge)?,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TagRow {
    id: Uuid,
    name: String,
    kind: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TagRow> for Tag {
    type Error = AppError;

    fn try_from(row: TagRow) -> Result<Self> {
        Ok(Tag {
            id: row.id,
            name: row.name,
            kind: row.kind.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MediaRow {
    id: Uuid,
    posting_id: Uuid,
    url: String,
    media_type: String,
    sort_order: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<MediaRow> for Media {
    type Error = AppError;

    fn try_from(row: MediaRow) -> Result<Self> {
        Ok(Media {
            id: row.id,
            posting_id: row.posting_id,
            url: row.url,
            media_type: row.media_type.parse()?,
            sort_order: row.sort_order,
            created_at: row.created_at,
        })
    }
}

fn convert<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl PostingRepo for SqliteStore {
    async fn insert_posting(&self, posting: &Posting) -> Result<()> {
        sqlx::query(
            "INSERT INTO postings (id, author_id, title, description, budget, latitude, longitude, \
             address, status, accepted_bid_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(posting.id)
        .bind(posting.author_id)
        .bind(&posting.title)
        .bind(&posting.description)
        .bind(posting.budget.to_string())
        .bind(posting.latitude)
        .bind(posting.longitude)
        .bind(&posting.address)
        .bind(posting.status.as_str())
        .bind(posting.accepted_bid_id)
        .bind(posting.created_at)
        .bind(posting.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_posting(&self, id: Uuid) -> Result<Option<Posting>> {
        sqlx::query_as::<_, PostingRow>(&format!("SELECT {POSTING_COLUMNS} FROM postings WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Posting::try_from)
            .transpose()
    }

    async fn list_by_author(&self, author_id: Uuid) -> Result<Vec<Posting>> {
        let rows = sqlx::query_as::<_, PostingRow>(&format!(
            "SELECT {POSTING_COLUMNS} FROM postings WHERE author_id = ? ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(author_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        convert(rows)
    }

    async fn list_open(&self, limit: i64, offset: i64) -> Result<Vec<Posting>> {
        let rows = sqlx::query_as::<_, PostingRow>(&format!(
            "SELECT {POSTING_COLUMNS} FROM postings WHERE status = 'WAITING_FOR_BIDS' \
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        convert(rows)
    }

    async fn cancel_posting(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let cancelled = sqlx::query(
            "UPDATE postings SET status = 'CANCELLED', updated_at = ? \
             WHERE id = ? AND status = 'WAITING_FOR_BIDS'",
        )
        .bind(at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if cancelled.rows_affected() == 0 {
            return Ok(false);
        }

        let withdrawn = sqlx::query(
            "UPDATE bids SET status = 'WITHDRAWN', updated_at = ? \
             WHERE posting_id = ? AND status = 'PENDING'",
        )
        .bind(at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        debug!(posting_id = %id, withdrawn = withdrawn.rows_affected(), "posting cancelled in store");
        Ok(true)
    }

    async fn complete_posting(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE postings SET status = 'COMPLETED', updated_at = ? \
             WHERE id = ? AND status = 'IN_PROGRESS'",
        )
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(done.rows_affected() == 1)
    }

    /// Atomic operation: flip the posting, accept the winner, reject the rest.
    ///
    /// # Developer Note
    /// The posting `UPDATE` is the first statement of the transaction, so the
    /// write lock is taken before anything is read. Whoever gets it first wins;
    /// the loser's guard no longer matches and it gets `None`.
    async fn accept_bid(
        &self,
        posting_id: Uuid,
        bid_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Posting>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query_as::<_, PostingRow>(&format!(
            "UPDATE postings SET status = 'IN_PROGRESS', accepted_bid_id = ?1, updated_at = ?2 \
             WHERE id = ?3 AND status = 'WAITING_FOR_BIDS' \
               AND EXISTS (SELECT 1 FROM bids WHERE id = ?1 AND posting_id = ?3 AND status = 'PENDING') \
             RETURNING {POSTING_COLUMNS}"
        ))
        .bind(bid_id)
        .bind(at)
        .bind(posting_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let Some(row) = row else {
            return Ok(None);
        };

        sqlx::query("UPDATE bids SET status = 'ACCEPTED', updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(bid_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let rejected = sqlx::query(
            "UPDATE bids SET status = 'REJECTED', updated_at = ? \
             WHERE posting_id = ? AND status = 'PENDING'",
        )
        .bind(at)
        .bind(posting_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        debug!(%posting_id, %bid_id, rejected = rejected.rows_affected(), "bid accepted in store");
        Posting::try_from(row).map(Some)
    }

    async fn link_tags(&self, posting_id: Uuid, tag_ids: &[Uuid]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for tag_id in tag_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO posting_tags (posting_id, tag_id, position) \
                 SELECT ?1, ?2, COALESCE(MAX(position) + 1, 0) FROM posting_tags WHERE posting_id = ?1",
            )
            .bind(posting_id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl BidRepo for SqliteStore {
    async fn get_bid(&self, id: Uuid) -> Result<Option<Bid>> {
        sqlx::query_as::<_, BidRow>(&format!("SELECT {BID_COLUMNS} FROM bids WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Bid::try_from)
            .transpose()
    }

    async fn list_for_posting(&self, posting_id: Uuid) -> Result<Vec<Bid>> {
        let rows = sqlx::query_as::<_, BidRow>(&format!(
            "SELECT {BID_COLUMNS} FROM bids WHERE posting_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(posting_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        convert(rows)
    }

    async fn upsert_pending_bid(
        &self,
        posting_id: Uuid,
        partner_id: Uuid,
        charge: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Option<Bid>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let updated = sqlx::query_as::<_, BidRow>(&format!(
            "UPDATE bids SET charge = ?1, updated_at = ?2 \
             WHERE posting_id = ?3 AND partner_id = ?4 AND status = 'PENDING' \
               AND EXISTS (SELECT 1 FROM postings WHERE id = ?3 AND status = 'WAITING_FOR_BIDS') \
             RETURNING {BID_COLUMNS}"
        ))
        .bind(charge.to_string())
        .bind(at)
        .bind(posting_id)
        .bind(partner_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let row = match updated {
            Some(row) => Some(row),
            None => sqlx::query_as::<_, BidRow>(&format!(
                "INSERT INTO bids (id, posting_id, partner_id, charge, status, created_at, updated_at) \
                 SELECT ?1, ?2, ?3, ?4, 'PENDING', ?5, ?5 \
                 WHERE EXISTS (SELECT 1 FROM postings WHERE id = ?2 AND status = 'WAITING_FOR_BIDS') \
                 RETURNING {BID_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(posting_id)
            .bind(partner_id)
            .bind(charge.to_string())
            .bind(at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?,
        };

        tx.commit().await.map_err(db_err)?;
        row.map(Bid::try_from).transpose()
    }

    async fn withdraw_bid(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE bids SET status = 'WITHDRAWN', updated_at = ? WHERE id = ? AND status = 'PENDING'",
        )
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(done.rows_affected() == 1)
    }
}

#[async_trait]
impl TagRepo for SqliteStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<Tag>> {
        sqlx::query_as::<_, TagRow>("SELECT id, name, kind, created_at FROM tags WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Tag::try_from)
            .transpose()
    }

    async fn insert_tag(&self, tag: &Tag) -> Result<()> {
        sqlx::query("INSERT INTO tags (id, name, kind, created_at) VALUES (?, ?, ?, ?)")
            .bind(tag.id)
            .bind(&tag.name)
            .bind(tag.kind.as_str())
            .bind(tag.created_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn tags_for_posting(&self, posting_id: Uuid) -> Result<Vec<Tag>> {
        let rows = sqlx::query_as::<_, TagRow>(
            "SELECT t.id, t.name, t.kind, t.created_at FROM tags t \
             JOIN posting_tags pt ON pt.tag_id = t.id \
             WHERE pt.posting_id = ? ORDER BY pt.position",
        )
        .bind(posting_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        convert(rows)
    }
}

#[async_trait]
impl MediaRepo for SqliteStore {
    async fn append_media(&self, media: &NewMedia) -> Result<Media> {
        let row = sqlx::query_as::<_, MediaRow>(
            "INSERT INTO media (id, posting_id, url, media_type, sort_order, created_at) \
             SELECT ?1, ?2, ?3, ?4, COALESCE(MAX(sort_order), 0) + 1, ?5 FROM media WHERE posting_id = ?2 \
             RETURNING id, posting_id, url, media_type, sort_order, created_at",
        )
        .bind(media.id)
        .bind(media.posting_id)
        .bind(&media.url)
        .bind(media.media_type.as_str())
        .bind(media.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Media::try_from(row)
    }

    async fn media_for_posting(&self, posting_id: Uuid) -> Result<Vec<Media>> {
        let rows = sqlx::query_as::<_, MediaRow>(
            "SELECT id, posting_id, url, media_type, sort_order, created_at FROM media \
             WHERE posting_id = ? ORDER BY sort_order",
        )
        .bind(posting_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        convert(rows)
    }
}
