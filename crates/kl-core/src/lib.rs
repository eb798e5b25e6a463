//! klutch/crates/kl-core/src/lib.rs
//!
//! Domain model, ports and services for the KLUTCH job-posting marketplace.

pub mod bids;
pub mod error;
pub mod events;
pub mod location;
pub mod marketplace;
pub mod media;
pub mod models;
pub mod postings;
pub mod selection;
pub mod tags;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use events::{EventBus, PostingEvent};
pub use marketplace::{Marketplace, MarketplaceOptions, Ports};
pub use models::*;
pub use traits::*;

pub use bids::BidLedger;
pub use location::LocationCapture;
pub use media::MediaAttachmentService;
pub use postings::PostingService;
pub use selection::SelectionWorkflow;
pub use tags::{normalize_tag_name, TagNormalizer};
