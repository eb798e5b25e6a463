//! Media Attachment Service: one uploaded image or video linked to a posting.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Media, MediaType, MediaUpload, NewMedia};
use crate::traits::{MediaRepo, MediaStore, PostingRepo};

/// Upload size limit when none is configured (10 MiB).
pub const DEFAULT_MAX_MEDIA_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct MediaAttachmentService {
    postings: Arc<dyn PostingRepo>,
    media: Arc<dyn MediaRepo>,
    store: Arc<dyn MediaStore>,
    max_bytes: usize,
}

impl MediaAttachmentService {
    pub fn new(
        postings: Arc<dyn PostingRepo>,
        media: Arc<dyn MediaRepo>,
        store: Arc<dyn MediaStore>,
    ) -> Self {
        Self {
            postings,
            media,
            store,
            max_bytes: DEFAULT_MAX_MEDIA_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Checks content type and size without touching storage.
    pub fn validate(&self, upload: &MediaUpload) -> Result<MediaType> {
        let media_type = MediaType::from_mime(&upload.content_type).ok_or_else(|| {
            AppError::ValidationError(format!(
                "content type {} is not an image or video",
                upload.content_type
            ))
        })?;
        if upload.data.is_empty() {
            return Err(AppError::ValidationError("media file is empty".into()));
        }
        if upload.data.len() > self.max_bytes {
            return Err(AppError::ValidationError(format!(
                "media file is {} bytes, limit is {}",
                upload.data.len(),
                self.max_bytes
            )));
        }
        Ok(media_type)
    }

    pub async fn attach_media(&self, posting_id: Uuid, upload: MediaUpload) -> Result<Media> {
        let media_type = self.validate(&upload)?;
        if self.postings.get_posting(posting_id).await?.is_none() {
            return Err(AppError::not_found("posting", posting_id));
        }
        self.store_and_record(posting_id, media_type, upload).await
    }

    /// Upload + row insert for an already validated file. A fresh upload is
    /// removed again when its row cannot be written.
    pub(crate) async fn store_and_record(
        &self,
        posting_id: Uuid,
        media_type: MediaType,
        upload: MediaUpload,
    ) -> Result<Media> {
        let size = upload.data.len();
        let stored = self
            .store
            .save_upload(
                &posting_id.to_string(),
                &upload.file_name,
                upload.data,
                &upload.content_type,
            )
            .await
            .map_err(storage_error)
            .inspect_err(|err| warn!(%posting_id, error = %err, "media upload failed"))?;

        let new = NewMedia {
            id: Uuid::new_v4(),
            posting_id,
            url: self.store.public_url(&stored.key),
            media_type,
            created_at: Utc::now(),
        };
        let media = match self.media.append_media(&new).await {
            Ok(media) => media,
            Err(err) => {
                warn!(%posting_id, key = %stored.key, error = %err, "media row insert failed");
                if stored.created {
                    if let Err(cleanup) = self.store.remove(&stored.key).await {
                        warn!(key = %stored.key, error = %cleanup, "upload left orphaned in storage");
                    }
                }
                return Err(storage_error(err));
            }
        };

        info!(
            %posting_id,
            media_id = %media.id,
            sort_order = media.sort_order,
            bytes = size,
            kind = media_type.as_str(),
            "media attached"
        );
        Ok(media)
    }
}

fn storage_error(err: AppError) -> AppError {
    match err {
        AppError::StorageError(_) => err,
        other => AppError::StorageError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Posting, PostingStatus, StoredUpload};
    use crate::traits::{MockMediaRepo, MockMediaStore, MockPostingRepo};
    use bytes::Bytes;
    use rust_decimal::Decimal;

    fn upload(content_type: &str, len: usize) -> MediaUpload {
        MediaUpload {
            file_name: "sink.jpg".into(),
            content_type: content_type.parse().unwrap(),
            data: Bytes::from(vec![7u8; len]),
        }
    }

    fn posting(id: Uuid) -> Posting {
        let now = Utc::now();
        Posting {
            id,
            author_id: Uuid::new_v4(),
            title: "Fix sink".into(),
            description: "Leaky faucet".into(),
            budget: Decimal::new(500, 0),
            latitude: 14.5995,
            longitude: 120.9842,
            address: None,
            status: PostingStatus::WaitingForBids,
            accepted_bid_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn service(postings: MockPostingRepo, media: MockMediaRepo, store: MockMediaStore) -> MediaAttachmentService {
        MediaAttachmentService::new(Arc::new(postings), Arc::new(media), Arc::new(store))
    }

    #[test]
    fn rejects_non_media_and_oversized_files() {
        let svc = service(MockPostingRepo::new(), MockMediaRepo::new(), MockMediaStore::new())
            .with_max_bytes(16);

        assert_eq!(svc.validate(&upload("image/png", 16)).unwrap(), MediaType::Image);
        assert_eq!(svc.validate(&upload("video/mp4", 1)).unwrap(), MediaType::Video);
        for bad in [upload("application/pdf", 4), upload("image/png", 17), upload("image/png", 0)] {
            assert!(matches!(svc.validate(&bad), Err(AppError::ValidationError(_))));
        }
    }

    fn stored(scope: &str, created: bool) -> StoredUpload {
        StoredUpload {
            key: format!("postings/{scope}/abc.jpg"),
            created,
        }
    }

    fn open_postings() -> MockPostingRepo {
        let mut postings = MockPostingRepo::new();
        postings
            .expect_get_posting()
            .returning(move |id| Ok(Some(posting(id))));
        postings
    }

    #[tokio::test]
    async fn attaches_with_order_from_the_repo() {
        let posting_id = Uuid::new_v4();

        let mut store = MockMediaStore::new();
        store
            .expect_save_upload()
            .withf(move |scope, _, _, _| scope.to_string() == posting_id.to_string())
            .returning(|scope, _, _, _| Ok(stored(scope, true)));
        store
            .expect_public_url()
            .returning(|key| format!("/media/{key}"));
        store.expect_remove().never();

        let mut media = MockMediaRepo::new();
        media.expect_append_media().times(1).returning(|new| {
            Ok(Media {
                id: new.id,
                posting_id: new.posting_id,
                url: new.url.clone(),
                media_type: new.media_type,
                sort_order: 2,
                created_at: new.created_at,
            })
        });

        let svc = service(open_postings(), media, store);
        let attached = svc.attach_media(posting_id, upload("image/jpeg", 8)).await.unwrap();

        assert_eq!(attached.sort_order, 2);
        assert_eq!(attached.media_type, MediaType::Image);
        assert_eq!(attached.url, format!("/media/postings/{posting_id}/abc.jpg"));
    }

    #[tokio::test]
    async fn failed_row_insert_removes_fresh_upload() {
        let posting_id = Uuid::new_v4();
        let key = format!("postings/{posting_id}/abc.jpg");

        let mut store = MockMediaStore::new();
        store
            .expect_save_upload()
            .returning(|scope, _, _, _| Ok(stored(scope, true)));
        store.expect_public_url().returning(|key| key.to_string());
        store
            .expect_remove()
            .withf(move |k| k.to_string() == key)
            .times(1)
            .returning(|_| Ok(()));
        let mut media = MockMediaRepo::new();
        media
            .expect_append_media()
            .returning(|_| Err(AppError::Internal("database is locked".into())));

        let svc = service(open_postings(), media, store);
        let err = svc.attach_media(posting_id, upload("image/png", 4)).await.unwrap_err();
        assert!(matches!(err, AppError::StorageError(_)));
    }

    #[tokio::test]
    async fn failed_row_insert_keeps_shared_upload() {
        let mut store = MockMediaStore::new();
        store
            .expect_save_upload()
            .returning(|scope, _, _, _| Ok(stored(scope, false)));
        store.expect_public_url().returning(|key| key.to_string());
        store.expect_remove().never();
        let mut media = MockMediaRepo::new();
        media
            .expect_append_media()
            .returning(|_| Err(AppError::Internal("database is locked".into())));

        let svc = service(open_postings(), media, store);
        let err = svc.attach_media(Uuid::new_v4(), upload("image/png", 4)).await.unwrap_err();
        assert!(matches!(err, AppError::StorageError(_)));
    }

    #[tokio::test]
    async fn unknown_posting_is_not_found() {
        let mut postings = MockPostingRepo::new();
        postings.expect_get_posting().returning(|_| Ok(None));
        let svc = service(postings, MockMediaRepo::new(), MockMediaStore::new());

        let err = svc.attach_media(Uuid::new_v4(), upload("image/png", 4)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(..)));
    }

    #[tokio::test]
    async fn store_failures_surface_as_storage_errors() {
        let mut postings = MockPostingRepo::new();
        postings
            .expect_get_posting()
            .returning(move |id| Ok(Some(posting(id))));
        let mut store = MockMediaStore::new();
        store
            .expect_save_upload()
            .returning(|_, _, _, _| Err(AppError::Internal("connection reset".into())));
        let mut media = MockMediaRepo::new();
        media.expect_append_media().never();

        let svc = service(postings, media, store);
        let err = svc.attach_media(Uuid::new_v4(), upload("image/png", 4)).await.unwrap_err();
        assert!(matches!(err, AppError::StorageError(_)));
    }
}
