//! Posting Store: creates postings and drives their cancel/complete transitions.
//!
//! Creation is a partial-success composite: once the posting row is written
//! it stays written, and media or tag failures come back as warnings.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::events::{EventBus, PostingEvent};
use crate::media::MediaAttachmentService;
use crate::models::{
    CreatedPosting, EnrichmentStage, EnrichmentWarning, NewPosting, Posting, PostingDetail,
    PostingStatus,
};
use crate::tags::TagNormalizer;
use crate::traits::{MediaRepo, PostingRepo, TagRepo};

/// Default page size for open postings.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Maximum page size for open postings.
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Clone)]
pub struct PostingService {
    postings: Arc<dyn PostingRepo>,
    tag_repo: Arc<dyn TagRepo>,
    media_repo: Arc<dyn MediaRepo>,
    tags: TagNormalizer,
    media: MediaAttachmentService,
    events: EventBus,
}

impl PostingService {
    pub fn new(
        postings: Arc<dyn PostingRepo>,
        tag_repo: Arc<dyn TagRepo>,
        media_repo: Arc<dyn MediaRepo>,
        tags: TagNormalizer,
        media: MediaAttachmentService,
        events: EventBus,
    ) -> Self {
        Self {
            postings,
            tag_repo,
            media_repo,
            tags,
            media,
            events,
        }
    }

    pub async fn create_posting(&self, author_id: Uuid, new: NewPosting) -> Result<CreatedPosting> {
        let title = required_text("title", &new.title)?;
        let description = required_text("description", &new.description)?;
        ensure_positive("budget", new.budget)?;
        let location = new.location.ok_or_else(|| {
            AppError::ValidationError("location must be captured before posting".into())
        })?;
        location.validate()?;
        // A bad file is bad input, not an enrichment failure.
        let media_type = new.media.as_ref().map(|m| self.media.validate(m)).transpose()?;

        let now = Utc::now();
        let posting = Posting {
            id: Uuid::new_v4(),
            author_id,
            title,
            description,
            budget: new.budget,
            latitude: location.latitude,
            longitude: location.longitude,
            address: location.address,
            status: PostingStatus::WaitingForBids,
            accepted_bid_id: None,
            created_at: now,
            updated_at: now,
        };
        self.postings.insert_posting(&posting).await?;

        let mut warnings = Vec::new();

        let media = match (new.media, media_type) {
            (Some(upload), Some(media_type)) => {
                match self.media.store_and_record(posting.id, media_type, upload).await {
                    Ok(media) => Some(media),
                    Err(err) => {
                        warn!(posting_id = %posting.id, error = %err, "posting created without its media");
                        warnings.push(EnrichmentWarning {
                            stage: EnrichmentStage::Media,
                            message: err.to_string(),
                        });
                        None
                    }
                }
            }
            _ => None,
        };

        let mut tag_ids = Vec::new();
        if !new.tags.is_empty() {
            match self.link_tags(posting.id, &new.tags).await {
                Ok(ids) => tag_ids = ids,
                Err(err) => {
                    warn!(posting_id = %posting.id, error = %err, "posting created without its tags");
                    warnings.push(EnrichmentWarning {
                        stage: EnrichmentStage::Tags,
                        message: err.to_string(),
                    });
                }
            }
        }

        self.events.publish(PostingEvent::PostingCreated {
            posting_id: posting.id,
            author_id,
            at: now,
        });
        info!(
            posting_id = %posting.id,
            %author_id,
            tags = tag_ids.len(),
            warnings = warnings.len(),
            "posting created"
        );

        Ok(CreatedPosting {
            posting,
            tag_ids,
            media,
            warnings,
        })
    }

    async fn link_tags(&self, posting_id: Uuid, names: &[String]) -> Result<Vec<Uuid>> {
        let ids = self.tags.resolve_tags(names).await?;
        if !ids.is_empty() {
            self.postings.link_tags(posting_id, &ids).await?;
        }
        Ok(ids)
    }

    pub async fn cancel_posting(&self, posting_id: Uuid, actor: Uuid) -> Result<()> {
        let posting = self.authored_posting(posting_id, actor).await?;
        ensure_transition(&posting, PostingStatus::Cancelled, "cancel")?;

        let now = Utc::now();
        if !self.postings.cancel_posting(posting_id, now).await? {
            // Lost to a concurrent transition; report the state that won.
            let current = self.load(posting_id).await?;
            return Err(invalid_transition(&current, "cancel"));
        }

        self.events.publish(PostingEvent::PostingCancelled { posting_id, at: now });
        info!(%posting_id, %actor, "posting cancelled");
        Ok(())
    }

    pub async fn complete_posting(&self, posting_id: Uuid, actor: Uuid) -> Result<()> {
        let posting = self.authored_posting(posting_id, actor).await?;
        ensure_transition(&posting, PostingStatus::Completed, "complete")?;

        let now = Utc::now();
        if !self.postings.complete_posting(posting_id, now).await? {
            let current = self.load(posting_id).await?;
            return Err(invalid_transition(&current, "complete"));
        }

        self.events.publish(PostingEvent::PostingCompleted { posting_id, at: now });
        info!(%posting_id, %actor, "posting completed");
        Ok(())
    }

    pub async fn get_posting(&self, posting_id: Uuid) -> Result<PostingDetail> {
        let posting = self.load(posting_id).await?;
        let tags = self.tag_repo.tags_for_posting(posting_id).await?;
        let media = self.media_repo.media_for_posting(posting_id).await?;
        Ok(PostingDetail { posting, tags, media })
    }

    pub async fn list_by_author(&self, author_id: Uuid) -> Result<Vec<Posting>> {
        self.postings.list_by_author(author_id).await
    }

    pub async fn list_open(&self, limit: Option<i64>, offset: Option<i64>) -> Result<Vec<Posting>> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = offset.unwrap_or(0).max(0);
        self.postings.list_open(limit, offset).await
    }

    async fn load(&self, posting_id: Uuid) -> Result<Posting> {
        self.postings
            .get_posting(posting_id)
            .await?
            .ok_or_else(|| AppError::not_found("posting", posting_id))
    }

    async fn authored_posting(&self, posting_id: Uuid, actor: Uuid) -> Result<Posting> {
        let posting = self.load(posting_id).await?;
        if posting.author_id != actor {
            return Err(AppError::Forbidden(format!(
                "only the author may change posting {posting_id}"
            )));
        }
        Ok(posting)
    }
}

pub(crate) fn required_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::ValidationError(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn ensure_positive(field: &str, amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(AppError::ValidationError(format!(
            "{field} must be greater than zero, got {amount}"
        )));
    }
    Ok(())
}

pub(crate) fn invalid_transition(posting: &Posting, action: &'static str) -> AppError {
    AppError::InvalidTransition {
        entity: "posting",
        from: posting.status.to_string(),
        action,
    }
}

fn ensure_transition(posting: &Posting, next: PostingStatus, action: &'static str) -> Result<()> {
    if posting.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(invalid_transition(posting, action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaUpload, UserLocation};
    use crate::traits::{MockMediaRepo, MockMediaStore, MockPostingRepo, MockTagRepo};
    use bytes::Bytes;
    use std::str::FromStr;

    struct Mocks {
        postings: MockPostingRepo,
        tags: MockTagRepo,
        media: MockMediaRepo,
        store: MockMediaStore,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                postings: MockPostingRepo::new(),
                tags: MockTagRepo::new(),
                media: MockMediaRepo::new(),
                store: MockMediaStore::new(),
            }
        }

        fn build(self) -> PostingService {
            let postings: Arc<dyn PostingRepo> = Arc::new(self.postings);
            let tags: Arc<dyn TagRepo> = Arc::new(self.tags);
            let media: Arc<dyn MediaRepo> = Arc::new(self.media);
            let attach = MediaAttachmentService::new(postings.clone(), media.clone(), Arc::new(self.store));
            PostingService::new(
                postings,
                tags.clone(),
                media,
                TagNormalizer::new(tags),
                attach,
                EventBus::default(),
            )
        }
    }

    fn manila() -> Option<UserLocation> {
        Some(UserLocation {
            latitude: 14.5995,
            longitude: 120.9842,
            address: Some("Manila".into()),
        })
    }

    fn new_posting(budget: &str) -> NewPosting {
        NewPosting {
            title: "Fix sink".into(),
            description: "Leaky faucet".into(),
            budget: Decimal::from_str(budget).unwrap(),
            location: manila(),
            tags: vec![],
            media: None,
        }
    }

    fn stored(author_id: Uuid, status: PostingStatus) -> Posting {
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

    #[tokio::test]
    async fn rejects_non_positive_budget_before_writing() {
        let mut mocks = Mocks::new();
        mocks.postings.expect_insert_posting().never();
        let svc = mocks.build();

        for budget in ["0", "-5", "-0.01"] {
            let err = svc.create_posting(Uuid::new_v4(), new_posting(budget)).await.unwrap_err();
            assert!(matches!(err, AppError::ValidationError(_)), "budget {budget}");
        }
    }

    #[tokio::test]
    async fn smallest_budget_is_accepted() {
        let mut mocks = Mocks::new();
        mocks.postings.expect_insert_posting().times(1).returning(|_| Ok(()));
        let svc = mocks.build();

        let created = svc.create_posting(Uuid::new_v4(), new_posting("0.01")).await.unwrap();
        assert_eq!(created.posting.budget, Decimal::new(1, 2));
        assert_eq!(created.posting.status, PostingStatus::WaitingForBids);
        assert!(created.posting.accepted_bid_id.is_none());
        assert!(created.warnings.is_empty());
    }

    #[tokio::test]
    async fn requires_title_description_and_location() {
        let mut mocks = Mocks::new();
        mocks.postings.expect_insert_posting().never();
        let svc = mocks.build();
        let author = Uuid::new_v4();

        let mut blank_title = new_posting("500");
        blank_title.title = "   ".into();
        let mut blank_description = new_posting("500");
        blank_description.description = String::new();
        let mut no_location = new_posting("500");
        no_location.location = None;

        for input in [blank_title, blank_description, no_location] {
            let err = svc.create_posting(author, input).await.unwrap_err();
            assert!(matches!(err, AppError::ValidationError(_)));
        }
    }

    #[tokio::test]
    async fn disallowed_media_fails_before_insert() {
        let mut mocks = Mocks::new();
        mocks.postings.expect_insert_posting().never();
        let svc = mocks.build();

        let mut input = new_posting("500");
        input.media = Some(MediaUpload {
            file_name: "notes.pdf".into(),
            content_type: mime::APPLICATION_PDF,
            data: Bytes::from_static(b"%PDF"),
        });
        let err = svc.create_posting(Uuid::new_v4(), input).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn enrichment_failures_become_warnings() {
        let mut mocks = Mocks::new();
        mocks.postings.expect_insert_posting().times(1).returning(|_| Ok(()));
        mocks.postings.expect_link_tags().never();
        mocks
            .store
            .expect_save_upload()
            .returning(|_, _, _, _| Err(AppError::StorageError("bucket unavailable".into())));
        mocks.media.expect_append_media().never();
        mocks
            .tags
            .expect_find_by_name()
            .returning(|_| Err(AppError::Internal("tags table locked".into())));
        let svc = mocks.build();

        let mut input = new_posting("500");
        input.tags = vec!["Plumbing".into()];
        input.media = Some(MediaUpload {
            file_name: "sink.jpg".into(),
            content_type: mime::IMAGE_JPEG,
            data: Bytes::from_static(b"\xff\xd8\xff"),
        });

        let created = svc.create_posting(Uuid::new_v4(), input).await.unwrap();
        assert_eq!(created.posting.title, "Fix sink");
        assert!(created.media.is_none());
        assert!(created.tag_ids.is_empty());
        let stages: Vec<_> = created.warnings.iter().map(|w| w.stage).collect();
        assert_eq!(stages, vec![EnrichmentStage::Media, EnrichmentStage::Tags]);
    }

    #[tokio::test]
    async fn cancel_in_progress_is_invalid_transition() {
        let author = Uuid::new_v4();
        let posting = stored(author, PostingStatus::InProgress);
        let posting_id = posting.id;
        let mut mocks = Mocks::new();
        mocks
            .postings
            .expect_get_posting()
            .returning(move |_| Ok(Some(posting.clone())));
        mocks.postings.expect_cancel_posting().never();
        let svc = mocks.build();

        let err = svc.cancel_posting(posting_id, author).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { action: "cancel", .. }));
    }

    #[tokio::test]
    async fn only_the_author_may_cancel() {
        let posting = stored(Uuid::new_v4(), PostingStatus::WaitingForBids);
        let posting_id = posting.id;
        let mut mocks = Mocks::new();
        mocks
            .postings
            .expect_get_posting()
            .returning(move |_| Ok(Some(posting.clone())));
        mocks.postings.expect_cancel_posting().never();
        let svc = mocks.build();

        let err = svc.cancel_posting(posting_id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn complete_requires_in_progress() {
        let author = Uuid::new_v4();
        let posting = stored(author, PostingStatus::WaitingForBids);
        let posting_id = posting.id;
        let mut mocks = Mocks::new();
        mocks
            .postings
            .expect_get_posting()
            .returning(move |_| Ok(Some(posting.clone())));
        let svc = mocks.build();

        let err = svc.complete_posting(posting_id, author).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { action: "complete", .. }));
    }

    #[tokio::test]
    async fn list_open_clamps_paging() {
        let mut mocks = Mocks::new();
        mocks
            .postings
            .expect_list_open()
            .withf(|limit, offset| *limit == MAX_PAGE_SIZE && *offset == 0)
            .returning(|_, _| Ok(vec![]));
        let svc = mocks.build();

        assert!(svc.list_open(Some(10_000), Some(-3)).await.unwrap().is_empty());
    }
}
