//! Tag Normalizer: free-text labels to canonical tag ids.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Tag, TagKind};
use crate::traits::TagRepo;

/// Trims, collapses inner whitespace and lowercases. `None` for blank input.
pub fn normalize_tag_name(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.to_lowercase())
    }
}

/// Tags created on first use are `SERVICE` tags.
#[derive(Clone)]
pub struct TagNormalizer {
    repo: Arc<dyn TagRepo>,
}

impl TagNormalizer {
    pub fn new(repo: Arc<dyn TagRepo>) -> Self {
        Self { repo }
    }

    /// Resolves names to tag ids, creating missing tags. Output keeps the
    /// first-seen input order with duplicates removed.
    pub async fn resolve_tags<I, S>(&self, names: I) -> Result<Vec<Uuid>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        for raw in names {
            let Some(name) = normalize_tag_name(raw.as_ref()) else {
                continue;
            };
            if !seen.insert(name.clone()) {
                continue;
            }
            let tag = self.find_or_create(&name).await?;
            if !ids.contains(&tag.id) {
                ids.push(tag.id);
            }
        }

        Ok(ids)
    }

    async fn find_or_create(&self, name: &str) -> Result<Tag> {
        if let Some(tag) = self.repo.find_by_name(name).await? {
            return Ok(tag);
        }

        let tag = Tag {
            id: Uuid::new_v4(),
            name: name.to_string(),
            kind: TagKind::Service,
            created_at: Utc::now(),
        };

        match self.repo.insert_tag(&tag).await {
            Ok(()) => {
                debug!(tag = %tag.name, tag_id = %tag.id, "created tag");
                Ok(tag)
            }
            // Someone else created it between our lookup and insert.
            Err(AppError::Conflict(_)) => {
                debug!(tag = %name, "tag insert raced, re-reading");
                self.repo
                    .find_by_name(name)
                    .await?
                    .ok_or_else(|| AppError::Internal(format!("tag {name:?} vanished after conflict")))
            }
            Err(err) => Err(err),
        }
    }
}
