use cove_core::{Contact, ConversationEntry, Folder, Mail};
use std::collections::BTreeMap;

/// Read model of the store at one revision. `revision` counts applied
/// non-empty patches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitySnapshot {
    pub revision: u64,
    pub mails: BTreeMap<String, Mail>,
    pub folders: BTreeMap<String, Folder>,
    pub conversation_entries: BTreeMap<String, ConversationEntry>,
    pub contacts: BTreeMap<String, Contact>,
}

impl EntitySnapshot {
    pub fn mail_for_entry(&self, entry: &ConversationEntry) -> Option<&Mail> {
        entry.mail_pk.as_deref().and_then(|pk| self.mails.get(pk))
    }
}
