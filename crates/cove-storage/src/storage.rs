use crate::{EntitySnapshot, StorageError};
use async_trait::async_trait;
use cove_core::{DbPatch, Entity, EntityKind, EntityPatch};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// Read/apply contract the sync pipeline and the views depend on.
#[async_trait]
pub trait EntityStoreAccessor: Send + Sync {
    async fn revision(&self) -> Result<u64, StorageError>;

    /// Stored record of any kind as untyped JSON.
    async fn lookup(&self, kind: EntityKind, pk: &str) -> Result<Option<Value>, StorageError>;

    /// Every stored entity, read in one transaction.
    async fn snapshot(&self) -> Result<EntitySnapshot, StorageError>;

    /// The conversation holding `entry_pk` with the mails of its entries and
    /// all folders. Holds no entries when `entry_pk` is unknown.
    async fn conversation_snapshot(&self, entry_pk: &str) -> Result<EntitySnapshot, StorageError>;

    /// Applies the whole patch or nothing; returns the revision afterwards.
    async fn apply_patch(&self, patch: &DbPatch) -> Result<u64, StorageError>;
}

/// SQLite-backed entity store: one table per kind holding the record JSON,
/// and a single `store_meta` row with the revision.
#[derive(Clone)]
pub struct EntityStore {
    pool: SqlitePool,
}

impl EntityStore {
    pub async fn open(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Self::migrate(pool).await?;
        let revision = store.revision().await?;
        tracing::info!(path = %db_path.display(), revision, "entity store opened");
        Ok(store)
    }

    /// Private in-memory database, dropped with the store.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // Each connection to `:memory:` opens its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl EntityStoreAccessor for EntityStore {
    async fn revision(&self) -> Result<u64, StorageError> {
        let mut conn = self.pool.acquire().await?;
        read_revision(&mut conn).await
    }

    async fn lookup(&self, kind: EntityKind, pk: &str) -> Result<Option<Value>, StorageError> {
        let sql = format!("SELECT record_json FROM {} WHERE pk = ?1", table(kind));
        let raw: Option<String> = sqlx::query_scalar(&sql)
            .bind(pk)
            .fetch_optional(&self.pool)
            .await?;

        raw.map(|raw| parse_json(&raw, table(kind))).transpose()
    }

    async fn snapshot(&self) -> Result<EntitySnapshot, StorageError> {
        let mut tx = self.pool.begin().await?;
        let snapshot = EntitySnapshot {
            revision: read_revision(&mut tx).await?,
            mails: load_all(&mut tx).await?,
            folders: load_all(&mut tx).await?,
            conversation_entries: load_all(&mut tx).await?,
            contacts: load_all(&mut tx).await?,
        };
        tx.commit().await?;
        Ok(snapshot)
    }

    async fn conversation_snapshot(&self, entry_pk: &str) -> Result<EntitySnapshot, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut snapshot = EntitySnapshot {
            revision: read_revision(&mut tx).await?,
            ..EntitySnapshot::default()
        };

        let conversation_id: Option<Option<String>> =
            sqlx::query_scalar("SELECT conversation_id FROM conversation_entries WHERE pk = ?1")
                .bind(entry_pk)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(conversation_id) = conversation_id.flatten() else {
            return Ok(snapshot);
        };

        let entries = sqlx::query(
            r#"
            SELECT pk, record_json
            FROM conversation_entries
            WHERE conversation_id = ?1
            "#,
        )
        .bind(&conversation_id)
        .fetch_all(&mut *tx)
        .await?;
        snapshot.conversation_entries = rows_to_map(entries)?;

        let mails = sqlx::query(
            r#"
            SELECT m.pk, m.record_json
            FROM mails m
            JOIN conversation_entries e ON e.mail_pk = m.pk
            WHERE e.conversation_id = ?1
            "#,
        )
        .bind(&conversation_id)
        .fetch_all(&mut *tx)
        .await?;
        snapshot.mails = rows_to_map(mails)?;
        snapshot.folders = load_all(&mut tx).await?;

        tx.commit().await?;
        Ok(snapshot)
    }

    async fn apply_patch(&self, patch: &DbPatch) -> Result<u64, StorageError> {
        if patch.is_empty() {
            return self.revision().await;
        }

        let mut tx = self.pool.begin().await?;
        apply_kind(&mut tx, &patch.mails).await?;
        apply_kind(&mut tx, &patch.folders).await?;
        apply_kind(&mut tx, &patch.conversation_entries).await?;
        apply_kind(&mut tx, &patch.contacts).await?;

        sqlx::query("UPDATE store_meta SET revision = revision + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;
        let revision = read_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::debug!(revision, "entity patch applied");
        Ok(revision)
    }
}

fn table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Mail => "mails",
        EntityKind::Folder => "folders",
        EntityKind::ConversationEntry => "conversation_entries",
        EntityKind::Contact => "contacts",
    }
}

async fn read_revision(conn: &mut SqliteConnection) -> Result<u64, StorageError> {
    let revision: i64 = sqlx::query_scalar("SELECT revision FROM store_meta WHERE id = 1")
        .fetch_one(&mut *conn)
        .await?;
    u64::try_from(revision)
        .map_err(|err| StorageError::Data(format!("invalid revision {revision}: {err}")))
}

async fn load_all<T: Entity>(conn: &mut SqliteConnection) -> Result<BTreeMap<String, T>, StorageError> {
    let sql = format!("SELECT pk, record_json FROM {}", table(T::KIND));
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    rows_to_map(rows)
}

async fn apply_kind<T: Entity>(
    conn: &mut SqliteConnection,
    patch: &EntityPatch<T>,
) -> Result<(), StorageError> {
    let table = table(T::KIND);

    let delete = format!("DELETE FROM {table} WHERE pk = ?1");
    for pk in &patch.remove {
        sqlx::query(&delete).bind(pk).execute(&mut *conn).await?;
    }

    let upsert = format!(
        "INSERT INTO {table} (pk, record_json) VALUES (?1, ?2)
         ON CONFLICT(pk) DO UPDATE SET record_json = excluded.record_json"
    );
    for entity in &patch.upsert {
        sqlx::query(&upsert)
            .bind(entity.pk())
            .bind(serde_json::to_string(entity)?)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

fn rows_to_map<T: Entity>(rows: Vec<SqliteRow>) -> Result<BTreeMap<String, T>, StorageError> {
    rows.into_iter()
        .map(|row| {
            let pk: String = row.try_get("pk")?;
            let raw: String = row.try_get("record_json")?;
            Ok((pk, parse_json(&raw, table(T::KIND))?))
        })
        .collect()
}

fn parse_json<T>(raw: &str, field: &str) -> Result<T, StorageError>
where
    T: DeserializeOwned,
{
    serde_json::from_str(raw)
        .map_err(|err| StorageError::Data(format!("invalid json for {field}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cove_core::{ConversationEntry, Folder, FolderType, Mail};
    use std::collections::BTreeSet;

    fn mail(pk: &str) -> Mail {
        Mail {
            pk: pk.to_string(),
            id: format!("remote-{pk}"),
            conversation_entry_pk: format!("entry-{pk}"),
            mail_folder_ids: BTreeSet::from(["inbox".to_string()]),
            sent_date: 1_000,
            subject: "hello".to_string(),
            from: vec![],
            unread: true,
            raw: None,
            body: None,
            attachments: vec![],
        }
    }

    fn entry(pk: &str, conversation: &str, mail_pk: &str) -> ConversationEntry {
        ConversationEntry {
            pk: pk.to_string(),
            conversation_id: conversation.to_string(),
            mail_pk: Some(mail_pk.to_string()),
            previous_pk: None,
        }
    }

    fn upsert_mails(pks: &[&str]) -> DbPatch {
        DbPatch {
            mails: EntityPatch {
                upsert: pks.iter().map(|pk| mail(pk)).collect(),
                remove: BTreeSet::new(),
            },
            ..DbPatch::default()
        }
    }

    async fn store() -> EntityStore {
        EntityStore::in_memory().await.expect("in-memory store")
    }

    #[tokio::test]
    async fn empty_patch_leaves_store_untouched() {
        let store = store().await;

        let revision = store.apply_patch(&DbPatch::default()).await.expect("apply");

        assert_eq!(revision, 0);
        assert_eq!(store.snapshot().await.expect("snapshot"), EntitySnapshot::default());
    }

    #[tokio::test]
    async fn patch_removes_and_upserts_in_one_revision() {
        let store = store().await;
        store.apply_patch(&upsert_mails(&["1"])).await.expect("first");
        let before = store.snapshot().await.expect("before");

        let mut patch = upsert_mails(&["2"]);
        patch.mails.remove.insert("1".to_string());
        patch.conversation_entries.upsert.push(entry("entry-2", "c", "2"));
        let revision = store.apply_patch(&patch).await.expect("second");

        assert_eq!(revision, 2);
        assert!(before.mails.contains_key("1"));
        assert!(before.conversation_entries.is_empty());

        let after = store.snapshot().await.expect("after");
        assert_eq!(after.revision, 2);
        assert!(!after.mails.contains_key("1"));
        assert_eq!(after.mails["2"], mail("2"));
        assert_eq!(after.conversation_entries.len(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_the_stored_record() {
        let store = store().await;
        store.apply_patch(&upsert_mails(&["1"])).await.expect("first");

        let mut patch = upsert_mails(&["1"]);
        patch.mails.upsert[0].subject = "edited".to_string();
        store.apply_patch(&patch).await.expect("second");

        let snapshot = store.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.mails.len(), 1);
        assert_eq!(snapshot.mails["1"].subject, "edited");
    }

    #[tokio::test]
    async fn database_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store").join("entities.db");

        let store = EntityStore::open(&path).await.expect("open");
        store.apply_patch(&upsert_mails(&["1", "2"])).await.expect("apply");
        drop(store);

        let reopened = EntityStore::open(&path).await.expect("reopen");
        let snapshot = reopened.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.mails.len(), 2);
    }

    #[tokio::test]
    async fn lookup_returns_stored_json() {
        let store = store().await;
        store.apply_patch(&upsert_mails(&["1"])).await.expect("apply");

        let value = store
            .lookup(EntityKind::Mail, "1")
            .await
            .expect("lookup")
            .expect("stored");
        assert_eq!(value["subject"], "hello");
        assert!(store.lookup(EntityKind::Folder, "1").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn conversation_snapshot_is_scoped_to_one_conversation() {
        let store = store().await;
        let mut patch = upsert_mails(&["1", "2", "3"]);
        patch.conversation_entries.upsert = vec![
            entry("e1", "c1", "1"),
            entry("e2", "c1", "2"),
            entry("e3", "c2", "3"),
        ];
        patch.folders.upsert.push(Folder {
            pk: "inbox".to_string(),
            id: "inbox".to_string(),
            name: "Inbox".to_string(),
            folder_type: FolderType::System,
        });
        store.apply_patch(&patch).await.expect("apply");

        let scoped = store.conversation_snapshot("e2").await.expect("scoped");
        let entries: Vec<&str> = scoped.conversation_entries.keys().map(String::as_str).collect();
        let mails: Vec<&str> = scoped.mails.keys().map(String::as_str).collect();
        assert_eq!(entries, ["e1", "e2"]);
        assert_eq!(mails, ["1", "2"]);
        assert_eq!(scoped.folders.len(), 1);
        assert_eq!(scoped.revision, 1);

        let unknown = store.conversation_snapshot("missing").await.expect("unknown");
        assert!(unknown.conversation_entries.is_empty());
    }
}
