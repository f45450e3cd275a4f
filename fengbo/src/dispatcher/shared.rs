// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Shared subscription groups, `$share/<group>/<filter>`.
//!
//! A publication matching the group's filter is delivered to exactly one
//! member, chosen round-robin.

use codec::topic::topic_match;
use codec::v5::SubscribeOptions;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Group {
    members: Vec<(String, SubscribeOptions)>,
    next: usize,
}

/// `(group name, topic filter) → ordered member list` index.
#[derive(Debug, Clone, Default)]
pub struct SharedGroups {
    groups: BTreeMap<(String, String), Group>,
}

impl SharedGroups {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Add `client_id` to the group, replacing its options when already a
    /// member. Returns true for a new membership.
    pub fn insert(
        &mut self,
        group: &str,
        filter: &str,
        client_id: &str,
        options: SubscribeOptions,
    ) -> bool {
        let group = self
            .groups
            .entry((group.to_string(), filter.to_string()))
            .or_insert_with(|| Group {
                members: Vec::new(),
                next: 0,
            });
        if let Some(member) = group
            .members
            .iter_mut()
            .find(|(member, _)| member == client_id)
        {
            member.1 = options;
            false
        } else {
            group.members.push((client_id.to_string(), options));
            true
        }
    }

    /// Remove `client_id` from the group. Empty groups are dropped.
    pub fn remove(&mut self, group: &str, filter: &str, client_id: &str) -> bool {
        let key = (group.to_string(), filter.to_string());
        let Some(entry) = self.groups.get_mut(&key) else {
            return false;
        };
        let old_len = entry.members.len();
        entry.members.retain(|(member, _)| member != client_id);
        let removed = entry.members.len() != old_len;
        if removed && entry.next >= entry.members.len() {
            entry.next = 0;
        }
        if entry.members.is_empty() {
            self.groups.remove(&key);
        }
        removed
    }

    /// Remove `client_id` from every group.
    pub fn remove_client(&mut self, client_id: &str) {
        let keys: Vec<_> = self.groups.keys().cloned().collect();
        for (group, filter) in keys {
            self.remove(&group, &filter, client_id);
        }
    }

    /// For every group whose filter matches `topic`, pick the next member
    /// in round-robin order.
    pub fn pick(&mut self, topic: &str) -> Vec<(String, SubscribeOptions)> {
        let mut picked = Vec::new();
        for ((_, filter), group) in &mut self.groups {
            if group.members.is_empty() || !topic_match(filter, topic) {
                continue;
            }
            let index = group.next % group.members.len();
            group.next = (index + 1) % group.members.len();
            picked.push(group.members[index].clone());
        }
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_is_fair() {
        let mut groups = SharedGroups::new();
        let options = SubscribeOptions::default();
        assert!(groups.insert("g", "t", "c1", options));
        assert!(groups.insert("g", "t", "c2", options));
        assert!(!groups.insert("g", "t", "c2", options));

        let mut counts = std::collections::HashMap::new();
        for _ in 0..4 {
            let picked = groups.pick("t");
            assert_eq!(picked.len(), 1);
            *counts.entry(picked[0].0.clone()).or_insert(0) += 1;
        }
        assert_eq!(counts.get("c1"), Some(&2));
        assert_eq!(counts.get("c2"), Some(&2));
    }

    #[test]
    fn test_wildcard_group_filter() {
        let mut groups = SharedGroups::new();
        groups.insert("g", "t/+", "c1", SubscribeOptions::default());

        assert_eq!(groups.pick("t/1").len(), 1);
        assert!(groups.pick("other").is_empty());
    }

    #[test]
    fn test_remove_member() {
        let mut groups = SharedGroups::new();
        groups.insert("g", "t", "c1", SubscribeOptions::default());
        groups.insert("g", "t", "c2", SubscribeOptions::default());

        assert!(groups.remove("g", "t", "c1"));
        assert!(!groups.remove("g", "t", "c1"));
        let picked = groups.pick("t");
        assert_eq!(picked[0].0, "c2");

        groups.remove("g", "t", "c2");
        assert!(groups.is_empty());
    }
}
