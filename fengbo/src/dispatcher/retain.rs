// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Retained message index.
//!
//! A trie keyed by literal topic levels. Insertion takes a concrete topic
//! name; lookups take a topic filter and walk `+` and `#` wildcards. The
//! first level of a `#` or `+` walk skips `$`-prefixed topics, the same
//! rule the subscription index applies from the other direction.

use std::collections::HashMap;
use std::time::Instant;

use crate::types::PublishMessage;

/// One retained message with its expiry deadline.
#[derive(Debug, Clone)]
pub struct RetainedMessage {
    pub message: PublishMessage,

    /// When the message was stored, to decrement the expiry interval on
    /// delivery.
    pub stored_at: Instant,

    /// Deadline derived from the message expiry interval property.
    pub expire_at: Option<Instant>,
}

impl RetainedMessage {
    #[must_use]
    pub fn new(message: PublishMessage) -> Self {
        let stored_at = Instant::now();
        let expire_at = message
            .message_expiry_interval
            .map(|secs| stored_at + std::time::Duration::from_secs(u64::from(secs)));
        Self {
            message,
            stored_at,
            expire_at,
        }
    }

    /// True when the expiry deadline has passed.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expire_at.is_some_and(|deadline| deadline <= now)
    }

    /// Remaining message expiry interval in seconds at delivery time.
    #[must_use]
    pub fn remaining_expiry_interval(&self, now: Instant) -> Option<u32> {
        self.message.message_expiry_interval.map(|secs| {
            let elapsed = now.duration_since(self.stored_at).as_secs();
            u32::try_from(u64::from(secs).saturating_sub(elapsed)).unwrap_or(0)
        })
    }
}

#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,

    /// Number of retained topics passing through or ending here.
    count: usize,

    value: Option<RetainedMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainError {
    /// Wildcards are not allowed in a retained topic name.
    InvalidTopic,
}

/// `topic → retained message` map with wildcard queries.
#[derive(Debug, Clone, Default)]
pub struct RetainTrie {
    root: TrieNode,

    /// Number of retained messages.
    len: usize,
}

impl RetainTrie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of retained messages in the map.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store or replace the retained message at its literal topic.
    ///
    /// # Errors
    ///
    /// Returns error if the topic contains wildcard characters.
    pub fn insert_or_update(&mut self, message: RetainedMessage) -> Result<(), RetainError> {
        let topic = message.message.topic.clone();
        if topic.contains(['+', '#']) {
            return Err(RetainError::InvalidTopic);
        }

        let mut node = &mut self.root;
        for token in topic.split('/') {
            node = node.children.entry(token.to_string()).or_default();
            node.count += 1;
        }

        if node.value.replace(message).is_some() {
            // Replaced in place, roll the counts back.
            Self::decrement_path(&mut self.root, &topic);
        } else {
            self.len += 1;
        }
        Ok(())
    }

    /// Remove the retained message at `topic`. Returns false when no
    /// message was stored there.
    pub fn remove(&mut self, topic: &str) -> bool {
        let mut node = &mut self.root;
        for token in topic.split('/') {
            match node.children.get_mut(token) {
                Some(child) => node = child,
                None => return false,
            }
        }
        if node.value.take().is_none() {
            return false;
        }
        Self::decrement_path(&mut self.root, topic);
        self.len -= 1;
        true
    }

    fn decrement_path(root: &mut TrieNode, topic: &str) {
        fn walk(node: &mut TrieNode, mut tokens: std::str::Split<'_, char>) {
            let Some(token) = tokens.next() else {
                return;
            };
            let Some(child) = node.children.get_mut(token) else {
                return;
            };
            walk(child, tokens);
            child.count -= 1;
            if child.count == 0 {
                node.children.remove(token);
            }
        }
        walk(root, topic.split('/'));
    }

    /// Visit every retained message whose topic matches `filter`.
    pub fn find<F>(&self, filter: &str, mut callback: F)
    where
        F: FnMut(&RetainedMessage),
    {
        let mut entries: Vec<&TrieNode> = vec![&self.root];
        let mut new_entries: Vec<&TrieNode> = Vec::new();

        let mut at_root = true;
        for token in filter.split('/') {
            let hide_system = at_root;
            at_root = false;

            new_entries.clear();
            match token {
                "+" => {
                    for entry in &entries {
                        for (key, child) in &entry.children {
                            if hide_system && key.starts_with('$') {
                                continue;
                            }
                            new_entries.push(child);
                        }
                    }
                }
                "#" => {
                    // `#` includes the parent level itself [MQTT-4.7.1-2].
                    for entry in &entries {
                        if let Some(value) = &entry.value {
                            callback(value);
                        }
                        Self::match_hash_entries(entry, &mut callback, hide_system);
                    }
                    return;
                }
                _ => {
                    for entry in &entries {
                        if let Some(child) = entry.children.get(token) {
                            new_entries.push(child);
                        }
                    }
                }
            }

            std::mem::swap(&mut entries, &mut new_entries);
            if entries.is_empty() {
                return;
            }
        }

        for entry in entries {
            if let Some(value) = &entry.value {
                callback(value);
            }
        }
    }

    /// Breadth-first walk over every topic below `node` when a `#` level
    /// is reached. `$`-prefixed names are skipped on the first level only.
    fn match_hash_entries<F>(node: &TrieNode, callback: &mut F, mut ignore_system: bool)
    where
        F: FnMut(&RetainedMessage),
    {
        let mut entries: Vec<&TrieNode> = vec![node];
        let mut new_entries: Vec<&TrieNode> = Vec::new();

        while !entries.is_empty() {
            new_entries.clear();
            for entry in &entries {
                for (key, child) in &entry.children {
                    if ignore_system && key.starts_with('$') {
                        continue;
                    }
                    if let Some(value) = &child.value {
                        callback(value);
                    }
                    new_entries.push(child);
                }
            }
            ignore_system = false;
            std::mem::swap(&mut entries, &mut new_entries);
        }
    }

    /// Collect matches into a vector.
    #[must_use]
    pub fn matches(&self, filter: &str) -> Vec<RetainedMessage> {
        let mut result = Vec::new();
        self.find(filter, |value| result.push(value.clone()));
        result
    }

    /// Drop every expired retained message, returns number of removals.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let mut expired = Vec::new();
        Self::collect_expired(&self.root, now, &mut expired);
        let count = expired.len();
        for topic in expired {
            self.remove(&topic);
        }
        count
    }

    fn collect_expired(node: &TrieNode, now: Instant, expired: &mut Vec<String>) {
        if let Some(value) = &node.value {
            if value.is_expired(now) {
                expired.push(value.message.topic.clone());
            }
        }
        for child in node.children.values() {
            Self::collect_expired(child, now, expired);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use codec::v5::Properties;
    use codec::{PacketId, QoS};

    fn message(topic: &str, payload: &str) -> RetainedMessage {
        RetainedMessage::new(PublishMessage {
            topic: topic.to_string(),
            qos: QoS::AtMostOnce,
            retain: true,
            payload: Bytes::copy_from_slice(payload.as_bytes()),
            message_expiry_interval: None,
            properties: Properties::new(),
            packet_id: PacketId::new(0),
        })
    }

    fn topics(mut found: Vec<RetainedMessage>) -> Vec<String> {
        let mut topics: Vec<String> = found
            .drain(..)
            .map(|entry| entry.message.topic)
            .collect();
        topics.sort();
        topics
    }

    #[test]
    fn test_insert_find_remove() {
        let mut trie = RetainTrie::new();
        trie.insert_or_update(message("a/b", "m1")).unwrap();
        trie.insert_or_update(message("a/c", "m2")).unwrap();
        assert_eq!(trie.len(), 2);

        assert_eq!(topics(trie.matches("a/b")), vec!["a/b"]);
        assert_eq!(topics(trie.matches("a/+")), vec!["a/b", "a/c"]);
        assert_eq!(topics(trie.matches("#")), vec!["a/b", "a/c"]);
        assert_eq!(topics(trie.matches("a/#")), vec!["a/b", "a/c"]);

        assert!(trie.remove("a/b"));
        assert!(!trie.remove("a/b"));
        assert_eq!(trie.len(), 1);
        assert!(trie.matches("a/b").is_empty());
    }

    #[test]
    fn test_update_replaces() {
        let mut trie = RetainTrie::new();
        trie.insert_or_update(message("a", "old")).unwrap();
        trie.insert_or_update(message("a", "new")).unwrap();
        assert_eq!(trie.len(), 1);
        let found = trie.matches("a");
        assert_eq!(found[0].message.payload, Bytes::from_static(b"new"));
    }

    #[test]
    fn test_wildcard_insert_rejected() {
        let mut trie = RetainTrie::new();
        assert_eq!(
            trie.insert_or_update(message("a/+", "m")),
            Err(RetainError::InvalidTopic)
        );
    }

    #[test]
    fn test_hash_skips_system_topics() {
        let mut trie = RetainTrie::new();
        trie.insert_or_update(message("$SYS/uptime", "1")).unwrap();
        trie.insert_or_update(message("a", "2")).unwrap();

        assert_eq!(topics(trie.matches("#")), vec!["a"]);
        assert_eq!(topics(trie.matches("+")), vec!["a"]);
        assert_eq!(topics(trie.matches("$SYS/#")), vec!["$SYS/uptime"]);
        assert_eq!(topics(trie.matches("$SYS/uptime")), vec!["$SYS/uptime"]);
    }

    #[test]
    fn test_hash_matches_parent_level() {
        let mut trie = RetainTrie::new();
        trie.insert_or_update(message("a", "m1")).unwrap();
        trie.insert_or_update(message("a/b", "m2")).unwrap();

        // "a/#" matches "a" itself plus everything below it.
        assert_eq!(topics(trie.matches("a/#")), vec!["a", "a/b"]);
    }
}
