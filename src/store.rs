//! Thread-safe per-topic inbound message store
//!
//! Topics are keyed exactly as received (never as filters). A topic key is
//! present only while it holds at least one message, so an absent topic and
//! an empty one read the same. Every read-and-clear happens under the same
//! lock as appends, which makes draining linearizable with the dispatcher.

use crate::protocol::{topic_matches_filter, Message};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Per-topic capacity policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CapacityPolicy {
    /// Keep every message until drained
    #[default]
    Unbounded,
    /// Keep at most `n` messages per topic, evicting the oldest first
    DropOldest(usize),
}

impl CapacityPolicy {
    pub fn from_limit(limit: Option<usize>) -> Self {
        match limit {
            Some(max) => CapacityPolicy::DropOldest(max),
            None => CapacityPolicy::Unbounded,
        }
    }
}

/// Result of appending a message
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Stored { pending: usize },
    StoredWithEviction { pending: usize, evicted: Message },
}

#[derive(Debug, Default)]
pub struct MessageStore {
    topics: Mutex<HashMap<String, VecDeque<Message>>>,
    policy: CapacityPolicy,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: CapacityPolicy) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            policy,
        }
    }

    // A panic while holding the lock cannot leave a sequence half-written,
    // so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Message>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message under the given topic
    pub fn append(&self, topic: &str, message: Message) -> AppendOutcome {
        let mut topics = self.lock();
        let queue = topics.entry(topic.to_string()).or_default();
        queue.push_back(message);

        match self.policy {
            CapacityPolicy::DropOldest(max) if queue.len() > max.max(1) => {
                // Length exceeded the cap by one, so the front exists.
                let evicted = queue.pop_front();
                let pending = queue.len();
                match evicted {
                    Some(evicted) => AppendOutcome::StoredWithEviction { pending, evicted },
                    None => AppendOutcome::Stored { pending },
                }
            }
            _ => AppendOutcome::Stored {
                pending: queue.len(),
            },
        }
    }

    /// Return the messages stored under `topic` in arrival order.
    ///
    /// With `clear` the topic is emptied by the same locked operation.
    pub fn drain(&self, topic: &str, clear: bool) -> Vec<Message> {
        let mut topics = self.lock();
        if clear {
            topics
                .remove(topic)
                .map(Vec::from)
                .unwrap_or_default()
        } else {
            topics
                .get(topic)
                .map(|queue| queue.iter().cloned().collect())
                .unwrap_or_default()
        }
    }

    /// Return messages from every stored topic matching `filter`, grouped by
    /// topic in lexical order, each group in arrival order
    pub fn drain_matching(&self, filter: &str, clear: bool) -> Vec<Message> {
        let mut topics = self.lock();
        let mut matched: Vec<String> = topics
            .keys()
            .filter(|topic| topic_matches_filter(topic, filter))
            .cloned()
            .collect();
        matched.sort();

        let mut messages = Vec::new();
        for topic in matched {
            if clear {
                if let Some(queue) = topics.remove(&topic) {
                    messages.extend(queue);
                }
            } else if let Some(queue) = topics.get(&topic) {
                messages.extend(queue.iter().cloned());
            }
        }
        messages
    }

    /// Topics currently holding messages, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn len(&self, topic: &str) -> usize {
        self.lock().get(topic).map_or(0, VecDeque::len)
    }

    pub fn total_len(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
