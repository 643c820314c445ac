use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

use sqlpilot_core::ids::ConversationId;
use sqlpilot_engine::ConversationHistory;

struct Slot {
    history: ConversationHistory,
    last_used: u64,
}

/// Chat history per conversation, capped at `max_conversations` entries.
///
/// When a new conversation would exceed the cap, the least recently used one
/// is dropped. A client coming back with an evicted id starts with an empty
/// history.
pub struct ConversationStore {
    slots: DashMap<ConversationId, Slot>,
    clock: AtomicU64,
    history_messages: usize,
    max_conversations: usize,
}

impl ConversationStore {
    pub fn new(history_messages: usize, max_conversations: usize) -> Self {
        Self {
            slots: DashMap::new(),
            clock: AtomicU64::new(0),
            history_messages,
            max_conversations: max_conversations.max(1),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Copy of the history for `id`, or an empty one sized for this store.
    pub fn history(&self, id: &ConversationId) -> ConversationHistory {
        match self.slots.get_mut(id) {
            Some(mut slot) => {
                slot.last_used = self.tick();
                slot.history.clone()
            }
            None => ConversationHistory::new(self.history_messages),
        }
    }

    /// Append one answered exchange, evicting older conversations if needed.
    pub fn record(&self, id: &ConversationId, question: &str, answer: &str) {
        let now = self.tick();
        {
            let mut slot = self.slots.entry(id.clone()).or_insert_with(|| Slot {
                history: ConversationHistory::new(self.history_messages),
                last_used: now,
            });
            slot.last_used = now;
            slot.history.push_user(question);
            slot.history.push_assistant(answer);
        }
        self.evict_over_cap(id);
    }

    fn evict_over_cap(&self, keep: &ConversationId) {
        while self.slots.len() > self.max_conversations {
            let oldest = self
                .slots
                .iter()
                .filter(|slot| slot.key() != keep)
                .min_by_key(|slot| slot.last_used)
                .map(|slot| slot.key().clone());
            let Some(oldest) = oldest else { break };
            self.slots.remove(&oldest);
            debug!(conversation_id = %oldest, "conversation evicted");
        }
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ConversationId {
        ConversationId::from_raw(raw)
    }

    #[test]
    fn keeps_exchanges_per_conversation() {
        let store = ConversationStore::new(3, 10);
        store.record(&id("conv_a"), "How many customers?", "59.");
        store.record(&id("conv_b"), "Hi", "Hello.");

        assert_eq!(store.len(), 2);
        assert_eq!(
            store.history(&id("conv_a")).render(),
            "user: How many customers?\nassistant: 59."
        );
        assert!(store.history(&id("conv_new")).is_empty());
        assert!(!store.contains(&id("conv_new")));
    }

    #[test]
    fn least_recently_used_is_evicted_at_cap() {
        let store = ConversationStore::new(3, 2);
        store.record(&id("conv_a"), "q", "a");
        store.record(&id("conv_b"), "q", "a");
        // Reading conv_a makes conv_b the oldest.
        let _ = store.history(&id("conv_a"));
        store.record(&id("conv_c"), "q", "a");

        assert_eq!(store.len(), 2);
        assert!(store.contains(&id("conv_a")));
        assert!(!store.contains(&id("conv_b")));
        assert!(store.contains(&id("conv_c")));
    }

    #[test]
    fn zero_cap_still_keeps_the_current_conversation() {
        let store = ConversationStore::new(3, 0);
        store.record(&id("conv_a"), "q", "a");
        store.record(&id("conv_b"), "q", "a");
        assert_eq!(store.len(), 1);
        assert!(store.contains(&id("conv_b")));
    }
}
