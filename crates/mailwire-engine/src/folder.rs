//! Folder tree model.

use serde::{Deserialize, Serialize};

/// Well-known folder roles, classified from the folder name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FolderType {
    /// The primary inbox.
    Inbox,
    /// Sent mail.
    Sent,
    /// Draft messages.
    Drafts,
    /// Deleted mail.
    Trash,
    /// Junk mail.
    Spam,
    /// Archived mail.
    Archive,
    /// Anything else.
    Other,
}

impl FolderType {
    /// Classifies a folder by its decoded name (the last path segment).
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let lowered = name.to_lowercase();
        match lowered.as_str() {
            "inbox" => Self::Inbox,
            "sent" | "sent items" | "sent mail" | "sent messages" => Self::Sent,
            "drafts" | "draft" => Self::Drafts,
            "trash" | "deleted" | "deleted items" | "deleted messages" => Self::Trash,
            "spam" | "junk" | "junk mail" | "junk e-mail" => Self::Spam,
            "archive" | "archives" | "all mail" => Self::Archive,
            _ => Self::Other,
        }
    }
}

/// One node of an account's folder tree.
///
/// The parent owns its children; a node is located by its full decoded
/// path, so no back-reference to the parent is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderTreeItem {
    /// Display name (last path segment, decoded).
    pub name: String,
    /// Full decoded path.
    pub path: String,
    /// Hierarchy delimiter reported by the server.
    pub delimiter: Option<char>,
    /// Whether the folder can be selected (holds messages).
    pub selectable: bool,
    /// Classified role.
    pub folder_type: FolderType,
    /// Total message count from the last status refresh.
    pub message_count: u32,
    /// Unseen count from the last status refresh.
    pub unseen_count: u32,
    /// Child folders.
    pub children: Vec<FolderTreeItem>,
}

impl FolderTreeItem {
    /// Creates a node with zeroed counters and no children.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<String>, delimiter: Option<char>) -> Self {
        let name = name.into();
        let folder_type = FolderType::from_name(&name);
        Self {
            name,
            path: path.into(),
            delimiter,
            selectable: true,
            folder_type,
            message_count: 0,
            unseen_count: 0,
            children: Vec::new(),
        }
    }

    /// Finds a node by full path, depth-first.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&FolderTreeItem> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(path))
    }

    /// Finds a node by full path, mutably.
    pub fn find_mut(&mut self, path: &str) -> Option<&mut FolderTreeItem> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(path))
    }

    /// Iterates over this node and all descendants, depth-first.
    pub fn walk(&self, visit: &mut impl FnMut(&FolderTreeItem)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// Assembles a tree from flat folder listings.
///
/// Entries arrive in server order with full paths; intermediate nodes that
/// never appeared in the listing (a child listed without its parent) are
/// created as unselectable placeholders.
#[must_use]
pub fn build_tree(entries: &[(String, Option<char>, bool)]) -> Vec<FolderTreeItem> {
    let mut roots: Vec<FolderTreeItem> = Vec::new();

    for (path, delimiter, selectable) in entries {
        let segments: Vec<&str> = match delimiter {
            Some(d) => path.split(*d).collect(),
            None => vec![path.as_str()],
        };

        let mut current = &mut roots;
        let mut built = String::new();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0
                && let Some(d) = delimiter
            {
                built.push(*d);
            }
            built.push_str(segment);

            let pos = current.iter().position(|c| c.path == built);
            let idx = match pos {
                Some(idx) => idx,
                None => {
                    let mut node = FolderTreeItem::new(*segment, built.clone(), *delimiter);
                    // Placeholder until (unless) the listing names it.
                    node.selectable = false;
                    current.push(node);
                    current.len() - 1
                }
            };
            if i == segments.len() - 1 {
                current[idx].selectable = *selectable;
            }
            current = &mut current[idx].children;
        }
    }

    roots
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_names() {
        assert_eq!(FolderType::from_name("INBOX"), FolderType::Inbox);
        assert_eq!(FolderType::from_name("Sent Items"), FolderType::Sent);
        assert_eq!(FolderType::from_name("Junk"), FolderType::Spam);
        assert_eq!(FolderType::from_name("Projects"), FolderType::Other);
    }

    #[test]
    fn builds_nested_tree() {
        let entries = vec![
            ("INBOX".to_string(), Some('/'), true),
            ("Projects/2024/Q1".to_string(), Some('/'), true),
            ("Projects/2024".to_string(), Some('/'), true),
        ];
        let roots = build_tree(&entries);
        assert_eq!(roots.len(), 2);

        let projects = roots.iter().find(|r| r.name == "Projects").unwrap();
        // Listed only as an ancestor, never by itself.
        assert!(!projects.selectable);

        let q1 = projects.find("Projects/2024/Q1").unwrap();
        assert!(q1.selectable);
        assert_eq!(q1.name, "Q1");

        // Re-listed parent upgraded in place, not duplicated.
        let y2024 = projects.find("Projects/2024").unwrap();
        assert!(y2024.selectable);
        assert_eq!(projects.children.len(), 1);
    }

    #[test]
    fn walk_visits_all() {
        let entries = vec![
            ("A".to_string(), Some('.'), true),
            ("A.B".to_string(), Some('.'), true),
        ];
        let roots = build_tree(&entries);
        let mut seen = Vec::new();
        roots[0].walk(&mut |n| seen.push(n.path.clone()));
        assert_eq!(seen, vec!["A".to_string(), "A.B".to_string()]);
    }
}
