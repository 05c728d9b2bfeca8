use crate::{conversation, folder_views, EmailError, PatchBuilder, RawEvent, StoreResolver};
use cove_core::{DbPatch, FolderView, PatchMode, RootConversationNode};
use cove_storage::EntityStoreAccessor;
use std::sync::Arc;

/// Turns provider event batches into store patches and renders the stored
/// entities as folder trees.
#[derive(Clone)]
pub struct EmailService {
    store: Arc<dyn EntityStoreAccessor>,
    builder: PatchBuilder,
    mode: PatchMode,
}

impl EmailService {
    pub fn new(store: Arc<dyn EntityStoreAccessor>, mode: PatchMode) -> Self {
        let builder = match mode {
            PatchMode::OneShot => PatchBuilder::new(),
            PatchMode::Incremental => {
                PatchBuilder::with_resolver(Arc::new(StoreResolver::new(store.clone())))
            }
        };

        Self {
            store,
            builder,
            mode,
        }
    }

    /// Builds one patch from `events` and applies it. Returns the patch and
    /// the store revision it produced, or `None` when there was nothing to
    /// apply.
    pub async fn ingest(&self, events: &[RawEvent]) -> Result<Option<(DbPatch, u64)>, EmailError> {
        let Some(patch) = self.builder.build(events, self.mode).await else {
            tracing::debug!(events = events.len(), "batch produced no changes");
            return Ok(None);
        };

        for (kind, upserts, removes) in patch.counts() {
            if upserts > 0 || removes > 0 {
                tracing::info!(%kind, upserts, removes, "applying entity patch");
            }
        }

        let revision = self.store.apply_patch(&patch).await?;
        Ok(Some((patch, revision)))
    }

    pub async fn folder_views(&self) -> Result<Vec<FolderView>, EmailError> {
        Ok(folder_views(&self.store.snapshot().await?))
    }

    pub async fn conversation(
        &self,
        entry_pk: &str,
    ) -> Result<Option<RootConversationNode>, EmailError> {
        let scoped = self.store.conversation_snapshot(entry_pk).await?;
        Ok(conversation(&scoped, entry_pk))
    }
}
