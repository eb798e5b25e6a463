//! Shared fixtures: a marketplace over SQLite (in memory, or a pooled file
//! database for concurrency tests) and a temp media dir.

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use kl_core::models::{Coordinates, MediaUpload, NewPosting, UserLocation};
use kl_core::traits::MediaStore;
use kl_core::{Marketplace, MarketplaceOptions, Ports};
use kl_db_sqlite::SqliteStore;
use kl_geo_mapbox::{FixedPositionSource, OfflineGeocoder};
use kl_storage_local::LocalMediaStore;
use rust_decimal::Decimal;
use tempfile::TempDir;

pub const MANILA: Coordinates = Coordinates { latitude: 14.5995, longitude: 120.9842 };

pub struct Harness {
    pub market: Marketplace,
    pub store: Arc<SqliteStore>,
    pub media_dir: TempDir,
    pub db_dir: Option<TempDir>,
}

pub async fn harness() -> Harness {
    let media_dir = tempfile::tempdir().unwrap();
    let media = Arc::new(LocalMediaStore::new(media_dir.path(), "/media"));
    harness_with_store(media, media_dir).await
}

pub async fn harness_with_store(media: Arc<dyn MediaStore>, media_dir: TempDir) -> Harness {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    assemble(store, media, media_dir, None)
}

/// A file database behind an 8-connection pool, so concurrent tasks really
/// contend on SQLite locks.
pub async fn harness_on_file() -> Harness {
    let db_dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", db_dir.path().join("klutch.db").display());
    let store = Arc::new(SqliteStore::connect(&url, 8).await.unwrap());
    let media_dir = tempfile::tempdir().unwrap();
    let media = Arc::new(LocalMediaStore::new(media_dir.path(), "/media"));
    assemble(store, media, media_dir, Some(db_dir))
}

fn assemble(store: Arc<SqliteStore>, media: Arc<dyn MediaStore>, media_dir: TempDir, db_dir: Option<TempDir>) -> Harness {
    let market = Marketplace::new(
        Ports {
            postings: store.clone(),
            bids: store.clone(),
            tags: store.clone(),
            media: store.clone(),
            store: media,
            position: Arc::new(FixedPositionSource::new(Some(MANILA))),
            geocoder: Arc::new(OfflineGeocoder),
        },
        MarketplaceOptions::default(),
    );
    Harness { market, store, media_dir, db_dir }
}

pub fn money(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap()
}

pub fn new_posting(title: &str, budget: &str) -> NewPosting {
    NewPosting {
        title: title.to_string(),
        description: format!("{title}, please come today"),
        budget: money(budget),
        location: Some(UserLocation {
            latitude: MANILA.latitude,
            longitude: MANILA.longitude,
            address: Some("Manila".into()),
        }),
        tags: Vec::new(),
        media: None,
    }
}

pub fn png(bytes: &'static [u8]) -> MediaUpload {
    MediaUpload {
        file_name: "sink.png".into(),
        content_type: mime::IMAGE_PNG,
        data: Bytes::from_static(bytes),
    }
}
