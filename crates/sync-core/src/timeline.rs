use std::{
    collections::HashSet,
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::{debug, trace, warn};

use crate::types::{InboundEvent, Origin, TimelineEntry};

/// What a reconciler operation did to the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineChange {
    /// Nothing visible changed.
    Unchanged,
    /// The whole collection was replaced from history.
    Seeded { len: usize },
    /// A new entry was inserted.
    Inserted { id: String },
    /// A provisional entry was confirmed in place.
    Confirmed { id: String },
    /// Every entry was removed.
    Cleared,
}

impl TimelineChange {
    pub fn is_visible(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Ordered, duplicate-free conversation timeline.
///
/// Merges the history seed, optimistic local writes and live inbound events.
/// Entries stay sorted by `created_at_ms`; ties keep insertion order. IDs are
/// unique. The collection is only mutated through the methods below; readers
/// get a slice or a cloned snapshot.
#[derive(Debug, Clone, Default)]
pub struct TimelineReconciler {
    entries: Vec<TimelineEntry>,
    next_local_seq: u64,
}

impl TimelineReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entries in display order.
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn snapshot(&self) -> Vec<TimelineEntry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn provisional_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.provisional).count()
    }

    /// Replace the collection wholesale with fetched history.
    ///
    /// Duplicate IDs keep their first occurrence. The sort is stable, so
    /// seeding twice with the same payload yields the same order.
    pub fn seed(&mut self, entries: Vec<TimelineEntry>) -> TimelineChange {
        let mut seen = HashSet::with_capacity(entries.len());
        let mut seeded = Vec::with_capacity(entries.len());
        for entry in entries {
            if !seen.insert(entry.id.clone()) {
                warn!(entry_id = %entry.id, "dropping duplicate history entry");
                continue;
            }
            seeded.push(entry);
        }
        seeded.sort_by_key(|entry| entry.created_at_ms);

        self.entries = seeded;
        debug!(len = self.entries.len(), "timeline seeded from history");
        TimelineChange::Seeded {
            len: self.entries.len(),
        }
    }

    /// Insert a provisional user entry stamped with the local clock.
    ///
    /// Returns the temporary ID of the new entry.
    pub fn append_optimistic(&mut self, text: impl Into<String>) -> String {
        self.append_optimistic_at(text, now_millis())
    }

    /// [`Self::append_optimistic`] with an explicit clock reading.
    pub fn append_optimistic_at(&mut self, text: impl Into<String>, now_ms: u64) -> String {
        let created_at_ms = self.live_timestamp(now_ms);
        let id = self.next_id(Origin::User, now_ms);
        self.insert_sorted(TimelineEntry {
            id: id.clone(),
            origin: Origin::User,
            text: text.into(),
            created_at_ms,
            provisional: true,
        });
        trace!(entry_id = %id, "optimistic entry appended");
        id
    }

    /// Apply one live event stamped with the local receipt time.
    pub fn apply_inbound(&mut self, event: &InboundEvent) -> TimelineChange {
        self.apply_inbound_at(event, now_millis())
    }

    /// [`Self::apply_inbound`] with an explicit clock reading.
    pub fn apply_inbound_at(&mut self, event: &InboundEvent, now_ms: u64) -> TimelineChange {
        match event {
            InboundEvent::PeerMessage { content } => {
                let created_at_ms = self.live_timestamp(now_ms);
                let id = self.next_id(Origin::Peer, now_ms);
                self.insert_sorted(TimelineEntry::confirmed(
                    id.clone(),
                    Origin::Peer,
                    content.clone(),
                    created_at_ms,
                ));
                TimelineChange::Inserted { id }
            }
            InboundEvent::Ack { .. } => self.confirm_oldest_provisional(),
            InboundEvent::Clear => self.clear(),
            // Typing state lives outside the timeline.
            InboundEvent::Typing { .. } => TimelineChange::Unchanged,
        }
    }

    /// Remove every entry.
    pub fn clear(&mut self) -> TimelineChange {
        let removed = self.entries.len();
        self.entries.clear();
        debug!(removed, "timeline cleared");
        TimelineChange::Cleared
    }

    // No correlation id travels with acks, so the oldest provisional user
    // entry is assumed to be the one confirmed.
    fn confirm_oldest_provisional(&mut self) -> TimelineChange {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.provisional && entry.origin == Origin::User)
        else {
            debug!("ack without a provisional user entry; ignoring");
            return TimelineChange::Unchanged;
        };

        entry.provisional = false;
        trace!(entry_id = %entry.id, "provisional entry confirmed");
        TimelineChange::Confirmed {
            id: entry.id.clone(),
        }
    }

    /// Live entries never sort before what is already shown.
    fn live_timestamp(&self, now_ms: u64) -> u64 {
        self.entries
            .last()
            .map_or(now_ms, |last| now_ms.max(last.created_at_ms))
    }

    fn next_id(&mut self, origin: Origin, now_ms: u64) -> String {
        loop {
            self.next_local_seq += 1;
            let id = format!("{}-{now_ms}-{}", origin.id_tag(), self.next_local_seq);
            if !self.entries.iter().any(|entry| entry.id == id) {
                return id;
            }
        }
    }

    fn insert_sorted(&mut self, entry: TimelineEntry) {
        let idx = self
            .entries
            .partition_point(|existing| existing.created_at_ms <= entry.created_at_ms);
        self.entries.insert(idx, entry);
    }
}

/// Wall clock in milliseconds since Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn history(id: &str, origin: Origin, text: &str, at: u64) -> TimelineEntry {
        TimelineEntry::confirmed(id, origin, text, at)
    }

    fn peer(content: &str) -> InboundEvent {
        InboundEvent::PeerMessage {
            content: content.to_owned(),
        }
    }

    fn ack() -> InboundEvent {
        InboundEvent::Ack { content: None }
    }

    fn assert_sorted_and_unique(timeline: &TimelineReconciler) {
        let entries = timeline.entries();
        assert!(
            entries
                .windows(2)
                .all(|pair| pair[0].created_at_ms <= pair[1].created_at_ms),
            "timeline must be sorted by created_at_ms"
        );
        let ids: HashSet<&str> = entries.iter().map(|entry| entry.id.as_str()).collect();
        assert_eq!(ids.len(), entries.len(), "timeline ids must be unique");
    }

    #[test]
    fn seed_sorts_by_timestamp_and_keeps_payload_order_for_ties() {
        let mut timeline = TimelineReconciler::new();
        timeline.seed(vec![
            history("m3", Origin::Peer, "third", 300),
            history("m1", Origin::User, "first", 100),
            history("m2a", Origin::User, "tie a", 200),
            history("m2b", Origin::Peer, "tie b", 200),
        ]);

        let ids: Vec<&str> = timeline.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2a", "m2b", "m3"]);
    }

    #[test]
    fn seeding_twice_with_same_payload_is_idempotent() {
        let payload = vec![
            history("b", Origin::Peer, "hey", 50),
            history("a", Origin::User, "hi", 10),
            history("c", Origin::User, "same time", 50),
        ];
        let mut timeline = TimelineReconciler::new();

        timeline.seed(payload.clone());
        let first = timeline.snapshot();
        timeline.seed(payload);

        assert_eq!(timeline.snapshot(), first);
    }

    #[test]
    fn seed_drops_duplicate_ids() {
        let mut timeline = TimelineReconciler::new();
        let change = timeline.seed(vec![
            history("dup", Origin::User, "original", 10),
            history("dup", Origin::User, "copy", 20),
        ]);

        assert_eq!(change, TimelineChange::Seeded { len: 1 });
        assert_eq!(timeline.entries()[0].text, "original");
    }

    #[test]
    fn seed_replaces_previous_entries() {
        let mut timeline = TimelineReconciler::new();
        timeline.append_optimistic_at("draft", 1_000);
        timeline.seed(vec![history("h1", Origin::Peer, "welcome", 500)]);

        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.entries()[0].id, "h1");
    }

    #[test]
    fn optimistic_entry_is_provisional_user_entry() {
        let mut timeline = TimelineReconciler::new();
        let id = timeline.append_optimistic_at("hi", 1_700_000_000_000);

        let entry = &timeline.entries()[0];
        assert_eq!(entry.id, id);
        assert!(id.starts_with("local-1700000000000-"));
        assert_eq!(entry.origin, Origin::User);
        assert_eq!(entry.text, "hi");
        assert_eq!(entry.created_at_ms, 1_700_000_000_000);
        assert!(entry.provisional);
    }

    #[test]
    fn optimistic_ids_are_unique_within_the_same_millisecond() {
        let mut timeline = TimelineReconciler::new();
        let a = timeline.append_optimistic_at("one", 42);
        let b = timeline.append_optimistic_at("two", 42);

        assert_ne!(a, b);
        assert_eq!(timeline.entries()[0].id, a);
        assert_eq!(timeline.entries()[1].id, b);
    }

    #[test]
    fn ack_confirms_in_place_without_adding_entries() {
        let mut timeline = TimelineReconciler::new();
        let id = timeline.append_optimistic_at("hi", 100);

        let change = timeline.apply_inbound_at(&ack(), 150);

        assert_eq!(change, TimelineChange::Confirmed { id: id.clone() });
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.entries()[0].id, id);
        assert_eq!(timeline.entries()[0].created_at_ms, 100);
        assert!(!timeline.entries()[0].provisional);
    }

    #[test]
    fn ack_matches_oldest_provisional_user_entry() {
        let mut timeline = TimelineReconciler::new();
        let first = timeline.append_optimistic_at("first", 100);
        let second = timeline.append_optimistic_at("second", 200);

        timeline.apply_inbound_at(&ack(), 300);

        assert!(!timeline.entries()[0].provisional);
        assert_eq!(timeline.entries()[0].id, first);
        assert!(timeline.entries()[1].provisional);
        assert_eq!(timeline.entries()[1].id, second);
        assert_eq!(timeline.provisional_count(), 1);
    }

    #[test]
    fn ack_without_provisional_entry_is_ignored() {
        let mut timeline = TimelineReconciler::new();
        timeline.seed(vec![history("h1", Origin::User, "old", 10)]);

        let change = timeline.apply_inbound_at(
            &InboundEvent::Ack {
                content: Some("old".into()),
            },
            20,
        );

        assert_eq!(change, TimelineChange::Unchanged);
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn peer_message_on_empty_timeline_appends_confirmed_peer_entry() {
        let mut timeline = TimelineReconciler::new();
        let change = timeline.apply_inbound_at(&peer("hello"), 500);

        assert!(matches!(change, TimelineChange::Inserted { .. }));
        assert_eq!(timeline.len(), 1);
        let entry = &timeline.entries()[0];
        assert_eq!(entry.origin, Origin::Peer);
        assert_eq!(entry.text, "hello");
        assert!(!entry.provisional);
        assert!(entry.id.starts_with("ws-500-"));
    }

    #[test]
    fn unacked_user_message_stays_provisional_before_reply() {
        let mut timeline = TimelineReconciler::new();
        let user_id = timeline.append_optimistic_at("Hello", 1_000);
        timeline.apply_inbound_at(&peer("Hi there!"), 1_200);

        let entries = timeline.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, user_id);
        assert!(entries[0].provisional);
        assert_eq!(entries[1].origin, Origin::Peer);
        assert_eq!(entries[1].text, "Hi there!");
    }

    #[test]
    fn same_timestamp_keeps_insertion_order() {
        let mut timeline = TimelineReconciler::new();
        let user_id = timeline.append_optimistic_at("question", 777);
        timeline.apply_inbound_at(&peer("answer"), 777);

        assert_eq!(timeline.entries()[0].id, user_id);
        assert_eq!(timeline.entries()[1].text, "answer");
    }

    #[test]
    fn live_entries_land_after_history_from_a_clock_ahead_of_ours() {
        let mut timeline = TimelineReconciler::new();
        timeline.seed(vec![history("h1", Origin::Peer, "from the future", 10_000)]);

        timeline.append_optimistic_at("typed now", 5_000);

        assert_eq!(timeline.entries()[1].text, "typed now");
        assert_eq!(timeline.entries()[1].created_at_ms, 10_000);
        assert_sorted_and_unique(&timeline);
    }

    #[test]
    fn clear_empties_populated_timeline() {
        let mut timeline = TimelineReconciler::new();
        for i in 0..5 {
            timeline.append_optimistic_at(format!("message {i}"), 100 + i);
        }
        assert_eq!(timeline.len(), 5);

        let change = timeline.apply_inbound_at(&InboundEvent::Clear, 200);

        assert_eq!(change, TimelineChange::Cleared);
        assert!(timeline.is_empty());
    }

    #[test]
    fn typing_events_do_not_touch_the_timeline() {
        let mut timeline = TimelineReconciler::new();
        let change = timeline.apply_inbound_at(&InboundEvent::Typing { is_typing: true }, 1);

        assert_eq!(change, TimelineChange::Unchanged);
        assert!(!change.is_visible());
        assert!(timeline.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Append,
        Peer,
        Ack,
        Typing(bool),
        Clear,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Append),
            3 => Just(Op::Peer),
            3 => Just(Op::Ack),
            1 => any::<bool>().prop_map(Op::Typing),
            1 => Just(Op::Clear),
        ]
    }

    // Ids come from a small pool so seeds regularly carry duplicates.
    fn seed_strategy() -> impl Strategy<Value = Vec<TimelineEntry>> {
        let origin = prop_oneof![Just(Origin::User), Just(Origin::Peer)];
        prop::collection::vec((0u8..6, origin, 0u64..1_000), 0..10).prop_map(|rows| {
            rows.into_iter()
                .map(|(id, origin, at)| history(&format!("h{id}"), origin, "seed", at))
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn mixed_operation_sequences_stay_sorted_and_unique(
            seed in seed_strategy(),
            ops in prop::collection::vec((op_strategy(), 0u64..2_000), 0..60),
        ) {
            let mut timeline = TimelineReconciler::new();
            timeline.seed(seed.clone());
            let seeded = timeline.snapshot();
            assert_sorted_and_unique(&timeline);

            let mut reseeded = TimelineReconciler::new();
            reseeded.seed(seed.clone());
            reseeded.seed(seed);
            prop_assert_eq!(reseeded.snapshot(), seeded);

            for (op, now_ms) in ops {
                let len_before = timeline.len();
                let provisional_before = timeline.provisional_count();
                match op {
                    Op::Append => {
                        timeline.append_optimistic_at("mine", now_ms);
                        prop_assert_eq!(timeline.len(), len_before + 1);
                    }
                    Op::Peer => {
                        timeline.apply_inbound_at(&peer("theirs"), now_ms);
                        prop_assert_eq!(timeline.len(), len_before + 1);
                    }
                    Op::Ack => {
                        timeline.apply_inbound_at(&ack(), now_ms);
                        prop_assert_eq!(timeline.len(), len_before);
                        prop_assert_eq!(
                            timeline.provisional_count(),
                            provisional_before.saturating_sub(1)
                        );
                    }
                    Op::Typing(is_typing) => {
                        let change = timeline
                            .apply_inbound_at(&InboundEvent::Typing { is_typing }, now_ms);
                        prop_assert_eq!(change, TimelineChange::Unchanged);
                        prop_assert_eq!(timeline.len(), len_before);
                    }
                    Op::Clear => {
                        timeline.apply_inbound_at(&InboundEvent::Clear, now_ms);
                        prop_assert!(timeline.is_empty());
                    }
                }
                assert_sorted_and_unique(&timeline);
            }
        }
    }
}
