use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

/// The last few raw chat messages of a conversation. Older entries fall off
/// the front once `capacity` is reached.
#[derive(Clone, Debug)]
pub struct ConversationHistory {
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
}

impl ConversationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push("user", content.into());
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push("assistant", content.into());
    }

    fn push(&mut self, role: &str, content: String) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            role: role.to_string(),
            content,
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `role: content` lines, oldest first.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}: {}", e.role, e.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(3)
    }
}
