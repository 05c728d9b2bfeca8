//! Conversation trees and folder views assembled from an entity snapshot.

use cove_core::{
    ConversationEntry, ConversationNode, ConversationSummary, FolderView, Mail, MailView,
    RootConversationNode,
};
use cove_storage::EntitySnapshot;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Builds the rooted trees for the given scope of entries.
///
/// An entry is a root when it has no parent, or when its parent is outside
/// the scope or belongs to another conversation. Entries reachable only
/// through a reference cycle are promoted to roots. Roots come out most
/// recently active first.
pub fn conversation_roots<'a>(
    snapshot: &EntitySnapshot,
    entries: impl IntoIterator<Item = &'a ConversationEntry>,
) -> Vec<RootConversationNode> {
    let mut groups: BTreeMap<&str, Vec<&ConversationEntry>> = BTreeMap::new();
    for entry in entries {
        groups.entry(entry.conversation_id.as_str()).or_default().push(entry);
    }

    let mut roots = Vec::new();
    for group in groups.values() {
        roots.extend(build_group(snapshot, group));
    }
    sort_roots(&mut roots);
    roots
}

/// The tree containing `entry_pk`, walking up to its root first.
pub fn conversation(snapshot: &EntitySnapshot, entry_pk: &str) -> Option<RootConversationNode> {
    let entry = snapshot.conversation_entries.get(entry_pk)?;
    let siblings = snapshot
        .conversation_entries
        .values()
        .filter(|candidate| candidate.conversation_id == entry.conversation_id);

    conversation_roots(snapshot, siblings)
        .into_iter()
        .find(|root| contains_entry(&root.node, entry_pk))
}

/// One view per stored folder. A conversation is listed in every folder that
/// holds at least one of its mails.
pub fn folder_views(snapshot: &EntitySnapshot) -> Vec<FolderView> {
    let roots = conversation_roots(snapshot, snapshot.conversation_entries.values());
    let root_folders: Vec<BTreeSet<String>> = roots
        .iter()
        .map(|root| {
            let mut folders = BTreeSet::new();
            collect_folders(&root.node, &mut folders);
            folders
        })
        .collect();

    snapshot
        .folders
        .values()
        .map(|folder| {
            let root_conversation_nodes: Vec<RootConversationNode> = roots
                .iter()
                .zip(&root_folders)
                .filter(|(_, folders)| folders.contains(&folder.id))
                .map(|(root, _)| root.clone())
                .collect();

            FolderView {
                folder: folder.clone(),
                size: root_conversation_nodes.iter().map(|r| r.summary.size).sum(),
                unread: root_conversation_nodes.iter().map(|r| r.summary.unread).sum(),
                root_conversation_nodes,
            }
        })
        .collect()
}

fn build_group(snapshot: &EntitySnapshot, group: &[&ConversationEntry]) -> Vec<RootConversationNode> {
    let in_group: HashSet<&str> = group.iter().map(|entry| entry.pk.as_str()).collect();

    let mut children: HashMap<&str, Vec<&ConversationEntry>> = HashMap::new();
    let mut root_candidates: Vec<&ConversationEntry> = Vec::new();
    for entry in group {
        match entry.previous_pk.as_deref() {
            Some(parent) if parent != entry.pk && in_group.contains(parent) => {
                children.entry(parent).or_default().push(entry)
            }
            _ => root_candidates.push(entry),
        }
    }
    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| compare_entries(snapshot, a, b));
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut roots = Vec::new();
    for entry in root_candidates {
        roots.extend(build_tree(snapshot, entry, &children, &mut visited));
    }

    // Whatever is left hangs off a reference cycle.
    let mut orphans: Vec<&ConversationEntry> = group
        .iter()
        .copied()
        .filter(|entry| !visited.contains(entry.pk.as_str()))
        .collect();
    orphans.sort_by(|a, b| a.pk.cmp(&b.pk));
    for entry in orphans {
        if visited.contains(entry.pk.as_str()) {
            continue;
        }
        roots.extend(build_tree(snapshot, entry, &children, &mut visited));
    }

    roots
}

/// Claims `root` and everything reachable below it, then assembles the nodes
/// bottom-up. Returns `None` only if `root` was already claimed.
fn build_tree<'a>(
    snapshot: &EntitySnapshot,
    root: &'a ConversationEntry,
    children: &HashMap<&str, Vec<&'a ConversationEntry>>,
    visited: &mut HashSet<&'a str>,
) -> Option<RootConversationNode> {
    if !visited.insert(root.pk.as_str()) {
        return None;
    }

    // Pre-order walk; a parent always sits before its children in `order`.
    let mut order: Vec<(&ConversationEntry, Vec<usize>)> = Vec::new();
    let mut stack: Vec<(&ConversationEntry, Option<usize>)> = vec![(root, None)];
    while let Some((entry, parent)) = stack.pop() {
        let index = order.len();
        order.push((entry, Vec::new()));
        if let Some(parent) = parent {
            order[parent].1.push(index);
        }
        let below = children.get(entry.pk.as_str()).into_iter().flatten().copied();
        for child in below.rev() {
            if visited.insert(child.pk.as_str()) {
                stack.push((child, Some(index)));
            }
        }
    }

    let mut built: Vec<Option<(ConversationNode, ConversationSummary)>> =
        (0..order.len()).map(|_| None).collect();
    for index in (0..order.len()).rev() {
        let (entry, child_indexes) = &order[index];

        let mail = snapshot.mail_for_entry(entry).map(|mail| mail_view(snapshot, mail));
        let mut summary = ConversationSummary::default();
        if let Some(mail) = &mail {
            summary.size = 1;
            summary.unread = usize::from(mail.unread);
            summary.max_date = mail.sent_date;
        }

        let mut nodes = Vec::with_capacity(child_indexes.len());
        for &child in child_indexes {
            if let Some((node, child_summary)) = built[child].take() {
                summary.size += child_summary.size;
                summary.unread += child_summary.unread;
                summary.max_date = summary.max_date.max(child_summary.max_date);
                nodes.push(node);
            }
        }

        let node = ConversationNode {
            entry_pk: entry.pk.clone(),
            mail,
            children: nodes,
        };
        built[index] = Some((node, summary));
    }

    let (node, summary) = built.into_iter().next().flatten()?;
    Some(RootConversationNode { node, summary })
}

fn mail_view(snapshot: &EntitySnapshot, mail: &Mail) -> MailView {
    let folders = snapshot
        .folders
        .values()
        .filter(|folder| mail.mail_folder_ids.contains(&folder.id))
        .cloned()
        .collect();
    MailView::new(mail, folders)
}

fn compare_entries(snapshot: &EntitySnapshot, a: &ConversationEntry, b: &ConversationEntry) -> Ordering {
    let date = |entry: &ConversationEntry| snapshot.mail_for_entry(entry).map(|m| m.sent_date);
    date(a).cmp(&date(b)).then_with(|| a.pk.cmp(&b.pk))
}

fn sort_roots(roots: &mut [RootConversationNode]) {
    roots.sort_by(|a, b| {
        b.summary
            .max_date
            .cmp(&a.summary.max_date)
            .then_with(|| a.node.entry_pk.cmp(&b.node.entry_pk))
    });
}

fn collect_folders(root: &ConversationNode, folders: &mut BTreeSet<String>) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if let Some(mail) = &node.mail {
            folders.extend(mail.mail_folder_ids.iter().cloned());
        }
        stack.extend(&node.children);
    }
}

fn contains_entry(root: &ConversationNode, entry_pk: &str) -> bool {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.entry_pk == entry_pk {
            return true;
        }
        stack.extend(&node.children);
    }
    false
}
