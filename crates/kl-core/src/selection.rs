//! Selection Workflow: the one-time acceptance of a single bid.
//!
//! The decision itself is a compare-and-swap in the repository; this layer
//! checks the preconditions and turns a lost swap into `Conflict`. No retry
//! happens here, the caller re-reads and decides again.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bids::bid_not_pending;
use crate::error::{AppError, Result};
use crate::events::{EventBus, PostingEvent};
use crate::models::{BidStatus, Posting, PostingStatus};
use crate::postings::invalid_transition;
use crate::traits::{BidRepo, PostingRepo};

#[derive(Clone)]
pub struct SelectionWorkflow {
    postings: Arc<dyn PostingRepo>,
    bids: Arc<dyn BidRepo>,
    events: EventBus,
}

impl SelectionWorkflow {
    pub fn new(postings: Arc<dyn PostingRepo>, bids: Arc<dyn BidRepo>, events: EventBus) -> Self {
        Self { postings, bids, events }
    }

    pub async fn accept_bid(&self, posting_id: Uuid, bid_id: Uuid, actor: Uuid) -> Result<Posting> {
        let posting = self.load_posting(posting_id).await?;
        if posting.author_id != actor {
            return Err(AppError::Forbidden(format!(
                "only the author may accept bids on posting {posting_id}"
            )));
        }
        check_still_open(&posting)?;

        let bid = self
            .bids
            .get_bid(bid_id)
            .await?
            .ok_or_else(|| AppError::not_found("bid", bid_id))?;
        if bid.posting_id != posting_id {
            return Err(AppError::ValidationError(format!(
                "bid {bid_id} does not belong to posting {posting_id}"
            )));
        }
        if bid.status != BidStatus::Pending {
            // A winning acceptance rejects every other pending bid.
            check_still_open(&self.load_posting(posting_id).await?)?;
            return Err(bid_not_pending(&bid, "accept"));
        }

        let now = Utc::now();
        let Some(accepted) = self.postings.accept_bid(posting_id, bid_id, now).await? else {
            let current = self.load_posting(posting_id).await?;
            warn!(%posting_id, %bid_id, status = %current.status, "bid acceptance lost a race");
            check_still_open(&current)?;
            return Err(AppError::Conflict(format!(
                "bid {bid_id} is no longer pending"
            )));
        };

        self.events.publish(PostingEvent::BidAccepted {
            posting_id,
            bid_id,
            partner_id: bid.partner_id,
            at: now,
        });
        info!(%posting_id, %bid_id, partner_id = %bid.partner_id, "bid accepted");
        Ok(accepted)
    }

    async fn load_posting(&self, posting_id: Uuid) -> Result<Posting> {
        self.postings
            .get_posting(posting_id)
            .await?
            .ok_or_else(|| AppError::not_found("posting", posting_id))
    }
}

/// A decided posting is a conflict; a cancelled one can never be decided.
fn check_still_open(posting: &Posting) -> Result<()> {
    match posting.status {
        PostingStatus::WaitingForBids => Ok(()),
        PostingStatus::InProgress | PostingStatus::Completed => Err(AppError::Conflict(format!(
            "posting {} already decided",
            posting.id
        ))),
        PostingStatus::Cancelled => Err(invalid_transition(posting, "accept a bid on")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bid;
    use crate::traits::{MockBidRepo, MockPostingRepo};
    use rust_decimal::Decimal;

    fn posting(author_id: Uuid, status: PostingStatus) -> Posting {
        let now = Utc::now();
        Posting {
            id: Uuid::new_v4(),
            author_id,
            title: "Fix sink".into(),
            description: "Leaky faucet".into(),
            budget: Decimal::new(500, 0),
            latitude: 14.5995,
            longitude: 120.9842,
            address: None,
            status,
            accepted_bid_id: status.holds_accepted_bid().then(Uuid::new_v4),
            created_at: now,
            updated_at: now,
        }
    }

    fn bid(posting_id: Uuid, status: BidStatus) -> Bid {
        let now = Utc::now();
        Bid {
            id: Uuid::new_v4(),
            posting_id,
            partner_id: Uuid::new_v4(),
            charge: Decimal::new(450, 0),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    fn workflow(postings: MockPostingRepo, bids: MockBidRepo) -> SelectionWorkflow {
        SelectionWorkflow::new(Arc::new(postings), Arc::new(bids), EventBus::default())
    }

    #[tokio::test]
    async fn accepts_pending_bid_and_publishes() {
        let author = Uuid::new_v4();
        let open = posting(author, PostingStatus::WaitingForBids);
        let posting_id = open.id;
        let pending = bid(posting_id, BidStatus::Pending);
        let bid_id = pending.id;

        let mut decided = open.clone();
        decided.status = PostingStatus::InProgress;
        decided.accepted_bid_id = Some(bid_id);

        let mut postings = MockPostingRepo::new();
        postings.expect_get_posting().returning(move |_| Ok(Some(open.clone())));
        postings
            .expect_accept_bid()
            .withf(move |p, b, _| *p == posting_id && *b == bid_id)
            .times(1)
            .returning(move |_, _, _| Ok(Some(decided.clone())));
        let mut bids = MockBidRepo::new();
        bids.expect_get_bid().returning(move |_| Ok(Some(pending.clone())));

        let svc = workflow(postings, bids);
        let mut events = svc.events.subscribe();
        let accepted = svc.accept_bid(posting_id, bid_id, author).await.unwrap();

        assert_eq!(accepted.status, PostingStatus::InProgress);
        assert_eq!(accepted.accepted_bid_id, Some(bid_id));
        assert!(accepted.is_consistent());
        assert_eq!(events.recv().await.unwrap().name(), "bid.accepted");
    }

    #[tokio::test]
    async fn decided_posting_is_conflict() {
        let author = Uuid::new_v4();
        let decided = posting(author, PostingStatus::InProgress);
        let posting_id = decided.id;
        let mut postings = MockPostingRepo::new();
        postings.expect_get_posting().returning(move |_| Ok(Some(decided.clone())));
        postings.expect_accept_bid().never();
        let mut bids = MockBidRepo::new();
        bids.expect_get_bid().never();

        let err = workflow(postings, bids)
            .accept_bid(posting_id, Uuid::new_v4(), author)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn cancelled_posting_is_invalid_transition() {
        let author = Uuid::new_v4();
        let cancelled = posting(author, PostingStatus::Cancelled);
        let posting_id = cancelled.id;
        let mut postings = MockPostingRepo::new();
        postings.expect_get_posting().returning(move |_| Ok(Some(cancelled.clone())));

        let err = workflow(postings, MockBidRepo::new())
            .accept_bid(posting_id, Uuid::new_v4(), author)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn lost_swap_is_conflict() {
        let author = Uuid::new_v4();
        let open = posting(author, PostingStatus::WaitingForBids);
        let posting_id = open.id;
        let mut decided = open.clone();
        decided.status = PostingStatus::InProgress;
        decided.accepted_bid_id = Some(Uuid::new_v4());
        let pending = bid(posting_id, BidStatus::Pending);
        let bid_id = pending.id;

        let mut postings = MockPostingRepo::new();
        let mut reads = vec![decided, open];
        postings.expect_get_posting().returning(move |_| Ok(reads.pop()));
        postings.expect_accept_bid().returning(|_, _, _| Ok(None));
        let mut bids = MockBidRepo::new();
        bids.expect_get_bid().returning(move |_| Ok(Some(pending.clone())));

        let err = workflow(postings, bids)
            .accept_bid(posting_id, bid_id, author)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn rejects_foreign_actor_and_foreign_bid() {
        let author = Uuid::new_v4();
        let open = posting(author, PostingStatus::WaitingForBids);
        let posting_id = open.id;
        let elsewhere = bid(Uuid::new_v4(), BidStatus::Pending);
        let bid_id = elsewhere.id;

        let mut postings = MockPostingRepo::new();
        postings.expect_get_posting().returning(move |_| Ok(Some(open.clone())));
        postings.expect_accept_bid().never();
        let mut bids = MockBidRepo::new();
        bids.expect_get_bid().returning(move |_| Ok(Some(elsewhere.clone())));
        let svc = workflow(postings, bids);

        let err = svc.accept_bid(posting_id, bid_id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        let err = svc.accept_bid(posting_id, bid_id, author).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn rejected_bid_cannot_be_accepted() {
        let author = Uuid::new_v4();
        let open = posting(author, PostingStatus::WaitingForBids);
        let posting_id = open.id;
        let withdrawn = bid(posting_id, BidStatus::Withdrawn);
        let bid_id = withdrawn.id;

        let mut postings = MockPostingRepo::new();
        postings.expect_get_posting().returning(move |_| Ok(Some(open.clone())));
        postings.expect_accept_bid().never();
        let mut bids = MockBidRepo::new();
        bids.expect_get_bid().returning(move |_| Ok(Some(withdrawn.clone())));

        let err = workflow(postings, bids)
            .accept_bid(posting_id, bid_id, author)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { entity: "bid", .. }));
    }
}
