//! Wires the ports into the six services the outer layers talk to.

use std::sync::Arc;
use std::time::Duration;

use crate::bids::BidLedger;
use crate::events::EventBus;
use crate::location::{LocationCapture, DEFAULT_GEOCODE_TIMEOUT};
use crate::media::{MediaAttachmentService, DEFAULT_MAX_MEDIA_BYTES};
use crate::postings::PostingService;
use crate::selection::SelectionWorkflow;
use crate::tags::TagNormalizer;
use crate::traits::{BidRepo, Geocoder, MediaRepo, MediaStore, PositionSource, PostingRepo, TagRepo};

/// Every adapter the marketplace needs, supplied by the binary.
#[derive(Clone)]
pub struct Ports {
    pub postings: Arc<dyn PostingRepo>,
    pub bids: Arc<dyn BidRepo>,
    pub tags: Arc<dyn TagRepo>,
    pub media: Arc<dyn MediaRepo>,
    pub store: Arc<dyn MediaStore>,
    pub position: Arc<dyn PositionSource>,
    pub geocoder: Arc<dyn Geocoder>,
}

#[derive(Debug, Clone, Copy)]
pub struct MarketplaceOptions {
    pub max_upload_bytes: usize,
    pub geocode_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for MarketplaceOptions {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_MEDIA_BYTES,
            geocode_timeout: DEFAULT_GEOCODE_TIMEOUT,
            event_capacity: 256,
        }
    }
}

#[derive(Clone)]
pub struct Marketplace {
    pub postings: PostingService,
    pub bids: BidLedger,
    pub selection: SelectionWorkflow,
    pub tags: TagNormalizer,
    pub media: MediaAttachmentService,
    pub location: LocationCapture,
    events: EventBus,
}

impl Marketplace {
    pub fn new(ports: Ports, options: MarketplaceOptions) -> Self {
        let events = EventBus::new(options.event_capacity);
        let tags = TagNormalizer::new(ports.tags.clone());
        let media = MediaAttachmentService::new(ports.postings.clone(), ports.media.clone(), ports.store)
            .with_max_bytes(options.max_upload_bytes);
        let location = LocationCapture::new(ports.position, ports.geocoder)
            .with_geocode_timeout(options.geocode_timeout);

        Self {
            postings: PostingService::new(
                ports.postings.clone(),
                ports.tags,
                ports.media,
                tags.clone(),
                media.clone(),
                events.clone(),
            ),
            bids: BidLedger::new(ports.postings.clone(), ports.bids.clone(), events.clone()),
            selection: SelectionWorkflow::new(ports.postings, ports.bids, events.clone()),
            tags,
            media,
            location,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{
        MockBidRepo, MockGeocoder, MockMediaRepo, MockMediaStore, MockPositionSource, MockPostingRepo,
        MockTagRepo,
    };

    #[test]
    fn options_flow_into_services() {
        let ports = Ports {
            postings: Arc::new(MockPostingRepo::new()),
            bids: Arc::new(MockBidRepo::new()),
            tags: Arc::new(MockTagRepo::new()),
            media: Arc::new(MockMediaRepo::new()),
            store: Arc::new(MockMediaStore::new()),
            position: Arc::new(MockPositionSource::new()),
            geocoder: Arc::new(MockGeocoder::new()),
        };
        let market = Marketplace::new(
            ports,
            MarketplaceOptions {
                max_upload_bytes: 1024,
                ..Default::default()
            },
        );

        assert_eq!(market.media.max_bytes(), 1024);
        assert_eq!(market.events().subscribe().len(), 0);
    }
}
