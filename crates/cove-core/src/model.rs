use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use url::Url;

// ---- Entities ----

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Mail,
    Folder,
    ConversationEntry,
    Contact,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Mail,
        EntityKind::Folder,
        EntityKind::ConversationEntry,
        EntityKind::Contact,
    ];

    /// Key under which the provider payload carries records of this kind.
    pub fn payload_key(self) -> &'static str {
        match self {
            EntityKind::Mail => "mails",
            EntityKind::Folder => "folders",
            EntityKind::ConversationEntry => "conversationEntries",
            EntityKind::Contact => "contacts",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.payload_key())
    }
}

/// Anything stored in the local entity store, addressed by its primary key.
pub trait Entity: Clone + fmt::Debug + Serialize + serde::de::DeserializeOwned + Send + Sync {
    const KIND: EntityKind;

    fn pk(&self) -> &str;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MailAddress {
    #[serde(default)]
    pub name: Option<String>,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MailAttachment {
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Mail {
    pub pk: String,
    pub id: String,
    pub conversation_entry_pk: String,
    #[serde(default)]
    pub mail_folder_ids: BTreeSet<String>,
    /// Milliseconds since the unix epoch, as reported by the provider.
    pub sent_date: i64,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from: Vec<MailAddress>,
    #[serde(default)]
    pub unread: bool,
    #[serde(default)]
    pub raw: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<MailAttachment>,
}

impl Entity for Mail {
    const KIND: EntityKind = EntityKind::Mail;

    fn pk(&self) -> &str {
        &self.pk
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub pk: String,
    pub conversation_id: String,
    #[serde(default)]
    pub mail_pk: Option<String>,
    /// Thread reference: the entry this one replies to, if any.
    #[serde(default)]
    pub previous_pk: Option<String>,
}

impl Entity for ConversationEntry {
    const KIND: EntityKind = EntityKind::ConversationEntry;

    fn pk(&self) -> &str {
        &self.pk
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FolderType {
    System,
    #[default]
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub pk: String,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub folder_type: FolderType,
}

impl Entity for Folder {
    const KIND: EntityKind = EntityKind::Folder;

    fn pk(&self) -> &str {
        &self.pk
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub pk: String,
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub emails: Vec<String>,
}

impl Entity for Contact {
    const KIND: EntityKind = EntityKind::Contact;

    fn pk(&self) -> &str {
        &self.pk
    }
}

// ---- Patches ----

/// Per-kind delta. A pk never appears in both `upsert` and `remove`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityPatch<T> {
    pub upsert: Vec<T>,
    pub remove: BTreeSet<String>,
}

impl<T> Default for EntityPatch<T> {
    fn default() -> Self {
        Self {
            upsert: Vec::new(),
            remove: BTreeSet::new(),
        }
    }
}

impl<T> EntityPatch<T> {
    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.remove.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DbPatch {
    pub mails: EntityPatch<Mail>,
    pub folders: EntityPatch<Folder>,
    pub conversation_entries: EntityPatch<ConversationEntry>,
    pub contacts: EntityPatch<Contact>,
}

impl DbPatch {
    pub fn is_empty(&self) -> bool {
        self.mails.is_empty()
            && self.folders.is_empty()
            && self.conversation_entries.is_empty()
            && self.contacts.is_empty()
    }

    /// `(kind, upserts, removes)` for every kind, in [`EntityKind::ALL`] order.
    pub fn counts(&self) -> Vec<(EntityKind, usize, usize)> {
        EntityKind::ALL
            .into_iter()
            .map(|kind| {
                let (upsert, remove) = match kind {
                    EntityKind::Mail => (self.mails.upsert.len(), self.mails.remove.len()),
                    EntityKind::Folder => (self.folders.upsert.len(), self.folders.remove.len()),
                    EntityKind::ConversationEntry => (
                        self.conversation_entries.upsert.len(),
                        self.conversation_entries.remove.len(),
                    ),
                    EntityKind::Contact => {
                        (self.contacts.upsert.len(), self.contacts.remove.len())
                    }
                };
                (kind, upsert, remove)
            })
            .collect()
    }
}

// ---- Views ----

/// Mail as rendered in folder trees: raw source, body and attachments are
/// stripped and the folder ids are resolved to the stored folders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MailView {
    pub pk: String,
    pub id: String,
    pub conversation_entry_pk: String,
    pub mail_folder_ids: BTreeSet<String>,
    pub sent_date: i64,
    pub subject: String,
    pub from: Vec<MailAddress>,
    pub unread: bool,
    pub attachments_count: usize,
    pub folders: Vec<Folder>,
}

impl MailView {
    pub fn new(mail: &Mail, folders: Vec<Folder>) -> Self {
        Self {
            pk: mail.pk.clone(),
            id: mail.id.clone(),
            conversation_entry_pk: mail.conversation_entry_pk.clone(),
            mail_folder_ids: mail.mail_folder_ids.clone(),
            sent_date: mail.sent_date,
            subject: mail.subject.clone(),
            from: mail.from.clone(),
            unread: mail.unread,
            attachments_count: mail.attachments.len(),
            folders,
        }
    }
}

/// Reply chains can nest arbitrarily deep, so `Clone` and `Drop` walk the
/// tree with an explicit stack.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationNode {
    pub entry_pk: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mail: Option<MailView>,
    pub children: Vec<ConversationNode>,
}

impl ConversationNode {
    fn shallow_clone(&self, children: Vec<ConversationNode>) -> Self {
        Self {
            entry_pk: self.entry_pk.clone(),
            mail: self.mail.clone(),
            children,
        }
    }
}

impl Clone for ConversationNode {
    fn clone(&self) -> Self {
        // Post-order: a node is assembled once all of its children are done.
        let mut pending: Vec<(&ConversationNode, usize)> = vec![(self, 0)];
        let mut done: Vec<ConversationNode> = Vec::new();

        while let Some((node, next_child)) = pending.pop() {
            match node.children.get(next_child) {
                Some(child) => {
                    pending.push((node, next_child + 1));
                    pending.push((child, 0));
                }
                None => {
                    let children = done.split_off(done.len() - node.children.len());
                    done.push(node.shallow_clone(children));
                }
            }
        }

        match done.pop() {
            Some(node) => node,
            None => self.shallow_clone(Vec::new()),
        }
    }
}

impl Drop for ConversationNode {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub size: usize,
    pub unread: usize,
    pub max_date: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RootConversationNode {
    #[serde(flatten)]
    pub node: ConversationNode,
    pub summary: ConversationSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderView {
    #[serde(flatten)]
    pub folder: Folder,
    pub size: usize,
    pub unread: usize,
    pub root_conversation_nodes: Vec<RootConversationNode>,
}

// ---- Notifications ----

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageTypeKind {
    #[default]
    Unknown,
    Login,
    #[serde(rename = "login2fa")]
    Login2fa,
    Unlock,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageType {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: PageTypeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_login_delay_logic: Option<bool>,
}

/// One emission of the notification stream; every field is optional and
/// consumers apply only the ones present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logged_in: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_type: Option<PageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_entity_updates_counter: Option<u64>,
}

impl NotificationOutput {
    pub fn logged_in(value: bool) -> Self {
        Self {
            logged_in: Some(value),
            ..Self::default()
        }
    }

    pub fn page_type(value: PageType) -> Self {
        Self {
            page_type: Some(value),
            ..Self::default()
        }
    }

    pub fn unread(value: u64) -> Self {
        Self {
            unread: Some(value),
            ..Self::default()
        }
    }

    pub fn batch_entity_updates_counter(value: u64) -> Self {
        Self {
            batch_entity_updates_counter: Some(value),
            ..Self::default()
        }
    }
}

// ---- Sessions ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub login: String,
    pub api_endpoint_origin: Url,
}

impl SessionKey {
    pub fn as_username(&self) -> String {
        format!(
            "session:{}@{}",
            self.login,
            self.api_endpoint_origin.origin().ascii_serialization()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub expiration_date: Option<f64>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientSession {
    pub session_storage: BTreeMap<String, String>,
    pub window_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SavedWindow {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedSession {
    pub login: String,
    pub api_endpoint_origin: Url,
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub session_storage: BTreeMap<String, String>,
    #[serde(default)]
    pub window: SavedWindow,
}

// ---- Sync ----

/// How a batch of provider events is reconciled into a [`DbPatch`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PatchMode {
    /// Payloads alone decide the patch.
    OneShot,
    /// Partial updates of entities not seen earlier in the batch are merged
    /// over the stored version.
    #[default]
    Incremental,
}
