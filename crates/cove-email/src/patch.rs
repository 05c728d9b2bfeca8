use crate::{EmailError, RawEvent, RecordChange};
use async_trait::async_trait;
use cove_core::{
    Contact, ConversationEntry, DbPatch, Entity, EntityKind, EntityPatch, Folder, Mail, PatchMode,
};
use cove_storage::EntityStoreAccessor;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Source of already-stored records, used to complete partial updates.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    async fn resolve(&self, kind: EntityKind, pk: &str) -> Result<Option<Value>, EmailError>;
}

/// Resolves against the current snapshot of an entity store.
#[derive(Clone)]
pub struct StoreResolver {
    store: Arc<dyn EntityStoreAccessor>,
}

impl StoreResolver {
    pub fn new(store: Arc<dyn EntityStoreAccessor>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EntityResolver for StoreResolver {
    async fn resolve(&self, kind: EntityKind, pk: &str) -> Result<Option<Value>, EmailError> {
        Ok(self.store.lookup(kind, pk).await?)
    }
}

/// Ordered map of pending upserts plus the removed set for one kind.
/// Slots keep first-insertion order; a removed pk keeps its slot as `None`
/// so a later re-upsert lands back in its original position. Every record
/// in a slot has already been checked against the entity type.
#[derive(Default)]
struct PatchAccumulator {
    slots: Vec<Option<Value>>,
    index: HashMap<String, usize>,
    removed: BTreeSet<String>,
}

impl PatchAccumulator {
    fn upsert(&mut self, pk: String, record: Value) {
        self.removed.remove(&pk);
        match self.index.get(&pk) {
            Some(&slot) => self.slots[slot] = Some(record),
            None => {
                self.index.insert(pk, self.slots.len());
                self.slots.push(Some(record));
            }
        }
    }

    fn pending(&self, pk: &str) -> Option<&Value> {
        let slot = *self.index.get(pk)?;
        self.slots[slot].as_ref()
    }

    fn remove(&mut self, pk: String) {
        if let Some(&slot) = self.index.get(&pk) {
            self.slots[slot] = None;
        }
        self.removed.insert(pk);
    }

    fn is_removed(&self, pk: &str) -> bool {
        self.removed.contains(pk)
    }

    fn finish<T: Entity>(self) -> EntityPatch<T> {
        let upsert = self
            .slots
            .into_iter()
            .flatten()
            .filter_map(|record| match serde_json::from_value::<T>(record) {
                Ok(entity) => Some(entity),
                Err(err) => {
                    tracing::warn!(kind = %T::KIND, "skipping unparseable record: {err}");
                    None
                }
            })
            .collect();

        EntityPatch {
            upsert,
            remove: self.removed,
        }
    }
}

/// Checks that `record` reads as the entity type of `kind`.
fn check_record(kind: EntityKind, record: &Value) -> Result<(), serde_json::Error> {
    match kind {
        EntityKind::Mail => Mail::deserialize(record).map(drop),
        EntityKind::Folder => Folder::deserialize(record).map(drop),
        EntityKind::ConversationEntry => ConversationEntry::deserialize(record).map(drop),
        EntityKind::Contact => Contact::deserialize(record).map(drop),
    }
}

/// Overlays the fields of `update` onto `base` when both are objects.
fn merge_record(base: &mut Value, update: Value) {
    match (base, update) {
        (Value::Object(base), Value::Object(update)) => {
            for (key, value) in update {
                base.insert(key, value);
            }
        }
        (base, update) => *base = update,
    }
}

/// Folds a batch of raw events into one [`DbPatch`], last event per pk wins.
#[derive(Clone, Default)]
pub struct PatchBuilder {
    resolver: Option<Arc<dyn EntityResolver>>,
}

impl PatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(resolver: Arc<dyn EntityResolver>) -> Self {
        Self {
            resolver: Some(resolver),
        }
    }

    /// Returns `None` when no kind ends up with an upsert or a removal.
    /// Unreadable events are logged and skipped; they never abort the batch.
    pub async fn build(&self, events: &[RawEvent], mode: PatchMode) -> Option<DbPatch> {
        let mut accumulators: BTreeMap<EntityKind, PatchAccumulator> = BTreeMap::new();

        for (position, event) in events.iter().enumerate() {
            let changes = match event.changes() {
                Ok(changes) => changes,
                Err(err) => {
                    tracing::warn!(position, "skipping provider event: {err}");
                    continue;
                }
            };

            for (kind, kind_changes) in changes {
                let accumulator = accumulators.entry(kind).or_default();
                for change in kind_changes {
                    self.fold(kind, accumulator, change, mode).await;
                }
            }
        }

        let mut take = |kind: EntityKind| accumulators.remove(&kind).unwrap_or_default();
        let patch = DbPatch {
            mails: take(EntityKind::Mail).finish(),
            folders: take(EntityKind::Folder).finish(),
            conversation_entries: take(EntityKind::ConversationEntry).finish(),
            contacts: take(EntityKind::Contact).finish(),
        };

        (!patch.is_empty()).then_some(patch)
    }

    async fn fold(
        &self,
        kind: EntityKind,
        accumulator: &mut PatchAccumulator,
        change: RecordChange,
        mode: PatchMode,
    ) {
        let (pk, candidate) = match change {
            RecordChange::Deleted { pk } => {
                accumulator.remove(pk);
                return;
            }
            RecordChange::Created { pk, record } => (pk, record),
            RecordChange::Updated { pk, record } => {
                let base = match accumulator.pending(&pk) {
                    Some(pending) => Some(pending.clone()),
                    None if mode == PatchMode::Incremental && !accumulator.is_removed(&pk) => {
                        self.resolve(kind, &pk).await
                    }
                    None => None,
                };
                match base {
                    Some(mut merged) => {
                        merge_record(&mut merged, record);
                        (pk, merged)
                    }
                    None => (pk, record),
                }
            }
        };

        // A record that cannot be read leaves the earlier state of its pk alone.
        match check_record(kind, &candidate) {
            Ok(()) => accumulator.upsert(pk, candidate),
            Err(err) => tracing::warn!(%kind, %pk, "skipping unreadable record: {err}"),
        }
    }

    async fn resolve(&self, kind: EntityKind, pk: &str) -> Option<Value> {
        let resolver = self.resolver.as_ref()?;
        match resolver.resolve(kind, pk).await {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(%kind, pk, "using update as-is: {err}");
                None
            }
        }
    }
}
