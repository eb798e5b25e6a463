//! Bid Ledger: partners' offers against open postings.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::events::{EventBus, PostingEvent};
use crate::models::{Bid, BidStatus, PostingStatus};
use crate::postings::{ensure_positive, invalid_transition};
use crate::traits::{BidRepo, PostingRepo};

#[derive(Clone)]
pub struct BidLedger {
    postings: Arc<dyn PostingRepo>,
    bids: Arc<dyn BidRepo>,
    events: EventBus,
}

impl BidLedger {
    pub fn new(postings: Arc<dyn PostingRepo>, bids: Arc<dyn BidRepo>, events: EventBus) -> Self {
        Self { postings, bids, events }
    }

    /// Places a bid, or re-prices the partner's pending bid on the posting.
    pub async fn submit_bid(&self, posting_id: Uuid, partner_id: Uuid, charge: Decimal) -> Result<Bid> {
        ensure_positive("charge", charge)?;

        let posting = self
            .postings
            .get_posting(posting_id)
            .await?
            .ok_or_else(|| AppError::not_found("posting", posting_id))?;
        if posting.author_id == partner_id {
            return Err(AppError::Forbidden("authors cannot bid on their own posting".into()));
        }
        if posting.status != PostingStatus::WaitingForBids {
            return Err(invalid_transition(&posting, "bid on"));
        }

        let now = Utc::now();
        let bid = match self.bids.upsert_pending_bid(posting_id, partner_id, charge, now).await? {
            Some(bid) => bid,
            None => {
                // Closed between our read and the conditional write.
                let current = self
                    .postings
                    .get_posting(posting_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("posting", posting_id))?;
                return Err(invalid_transition(&current, "bid on"));
            }
        };

        self.events.publish(PostingEvent::BidSubmitted {
            posting_id,
            bid_id: bid.id,
            partner_id,
            charge,
            at: now,
        });
        info!(%posting_id, bid_id = %bid.id, %partner_id, %charge, "bid submitted");
        Ok(bid)
    }

    pub async fn withdraw_bid(&self, bid_id: Uuid, partner_id: Uuid) -> Result<Bid> {
        let bid = self.load(bid_id).await?;
        if bid.partner_id != partner_id {
            return Err(AppError::Forbidden(format!("bid {bid_id} belongs to another partner")));
        }
        if bid.status != BidStatus::Pending {
            return Err(bid_not_pending(&bid, "withdraw"));
        }

        let now = Utc::now();
        if !self.bids.withdraw_bid(bid_id, now).await? {
            let current = self.load(bid_id).await?;
            return Err(bid_not_pending(&current, "withdraw"));
        }

        self.events.publish(PostingEvent::BidWithdrawn {
            posting_id: bid.posting_id,
            bid_id,
            partner_id,
            at: now,
        });
        info!(posting_id = %bid.posting_id, %bid_id, %partner_id, "bid withdrawn");
        Ok(Bid {
            status: BidStatus::Withdrawn,
            updated_at: now,
            ..bid
        })
    }

    /// The author sees every bid; anyone else only their own.
    pub async fn list_bids(&self, posting_id: Uuid, actor: Uuid) -> Result<Vec<Bid>> {
        let posting = self
            .postings
            .get_posting(posting_id)
            .await?
            .ok_or_else(|| AppError::not_found("posting", posting_id))?;
        let bids = self.bids.list_for_posting(posting_id).await?;
        if posting.author_id == actor {
            return Ok(bids);
        }
        Ok(bids.into_iter().filter(|b| b.partner_id == actor).collect())
    }

    async fn load(&self, bid_id: Uuid) -> Result<Bid> {
        self.bids
            .get_bid(bid_id)
            .await?
            .ok_or_else(|| AppError::not_found("bid", bid_id))
    }
}

pub(crate) fn bid_not_pending(bid: &Bid, action: &'static str) -> AppError {
    AppError::InvalidTransition {
        entity: "bid",
        from: bid.status.to_string(),
        action,
    }
}
