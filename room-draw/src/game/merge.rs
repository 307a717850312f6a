//! Merge Engine
//!
//! Folds for every replicated mutation. Each function is idempotent, and
//! all delta folds except exclusion removal commute, so peers that observe
//! the same messages in different orders reach the same state.
//!
//! Snapshots fold field by field with the same rules as the deltas, so a
//! peer rejoining with an old cache cannot erase newer state.
//!
//! Every fold returns whether the store changed. Folds that touch the board
//! (custom pool or current draw) also mark the store as holding history;
//! exclusion toggles and renames do not.

use tracing::debug;

use crate::game::state::{
    CurrentDraw, CustomEntry, DirectoryEntry, ItemId, Ordinal, ParticipantId,
    ParticipantSets, Snapshot, StateStore,
};

/// Fold a settled draw.
///
/// Sets the current draw (last-writer-wins on `(stamp, participant)`),
/// and records the drawer in both the claim map and the exclusion set so
/// the drawer's own view and everyone else's agree.
pub fn apply_roll(
    state: &mut StateStore,
    ordinal: Ordinal,
    participant: &ParticipantId,
    stamp: u64,
) -> bool {
    let mut changed = state.claims
        .entry(ordinal)
        .or_default()
        .insert(participant.clone());
    changed |= state.exclusions
        .entry(ordinal)
        .or_default()
        .insert(participant.clone());

    changed |= merge_current_draw(state, CurrentDraw { ordinal, stamp, by: participant.clone() });

    state.mark_history();
    changed
}

/// Fold an exclusion toggle.
///
/// Adding unions the participant in; removing only filters that same
/// participant out, never anyone else.
pub fn apply_toggle_exclude(
    state: &mut StateStore,
    ordinal: Ordinal,
    participant: &ParticipantId,
    is_excluded: bool,
) -> bool {
    let changed = if is_excluded {
        state.exclusions
            .entry(ordinal)
            .or_default()
            .insert(participant.clone())
    } else {
        let removed = state.exclusions
            .get_mut(&ordinal)
            .map(|set| set.remove(participant))
            .unwrap_or(false);
        if state.exclusions.get(&ordinal).map(|s| s.is_empty()).unwrap_or(false) {
            state.exclusions.remove(&ordinal);
        }
        removed
    };

    changed
}

/// Fold an added custom item. Duplicate text is allowed; duplicate ids are not.
pub fn apply_add_custom_item(state: &mut StateStore, entry: CustomEntry) -> bool {
    let changed = state.custom.insert(entry);
    state.mark_history();
    changed
}

/// Fold a custom item removal.
///
/// No-op for fixed ordinals. Removes by item id when the sender supplied
/// one (a removal that overtakes its add still sticks), otherwise by
/// whichever entry occupies the ordinal here.
pub fn apply_remove_custom_item(
    state: &mut StateStore,
    ordinal: Ordinal,
    id: Option<&ItemId>,
) -> bool {
    if ordinal == 0 || state.is_fixed(ordinal) {
        debug!("Ignoring removal of fixed ordinal {}", ordinal);
        return false;
    }

    let target = match id {
        Some(id) => id.clone(),
        None => match state.custom.entry_at(ordinal, state.fixed_count()) {
            Some(entry) => entry.id.clone(),
            None => return false,
        },
    };

    let changed = state.custom.remove(&target);
    state.mark_history();
    changed
}

/// Fold a display name change.
pub fn apply_set_name(
    state: &mut StateStore,
    participant: &ParticipantId,
    name: &str,
    rev: u64,
) -> bool {
    let incoming = DirectoryEntry { name: name.to_string(), rev };
    merge_directory_entry(state, participant, incoming)
}

/// Record a name seen on another message, without overriding renames.
pub fn note_name(state: &mut StateStore, participant: &ParticipantId, name: &str) -> bool {
    if name.is_empty() || state.directory.contains_key(participant) {
        return false;
    }
    state.directory.insert(
        participant.clone(),
        DirectoryEntry { name: name.to_string(), rev: 0 },
    );
    true
}

/// Fold a wholesale reset.
///
/// Clears the current draw, exclusions and claims. The pool, directory and
/// draw clock are kept, so later draws still outrank anything before the reset.
pub fn apply_reset(state: &mut StateStore) -> bool {
    let changed = state.current_draw.is_some()
        || !state.exclusions.is_empty()
        || !state.claims.is_empty();

    state.current_draw = None;
    state.exclusions.clear();
    state.claims.clear();

    state.mark_history();
    changed
}

/// Fold a remote snapshot.
///
/// Each field folds with the same rule as its delta. The custom segment
/// unions entries and tombstones and the current draw is last-writer-wins.
/// Exclusions and claims are unioned per ordinal; the directory keeps the
/// higher revision per participant.
pub fn apply_snapshot(state: &mut StateStore, snapshot: Snapshot) -> bool {
    let mut changed = false;

    if let Some(board) = snapshot.board {
        changed |= state.custom.merge(board.custom);
        if let Some(draw) = board.current_draw {
            changed |= merge_current_draw(state, draw);
        }
        state.mark_history();
    }

    changed |= union_sets(&mut state.exclusions, snapshot.exclusions);
    changed |= union_sets(&mut state.claims, snapshot.claims);

    for (participant, entry) in snapshot.directory {
        changed |= merge_directory_entry(state, &participant, entry);
    }

    changed
}

fn merge_current_draw(state: &mut StateStore, draw: CurrentDraw) -> bool {
    state.draw_clock = state.draw_clock.max(draw.stamp);
    match &state.current_draw {
        Some(current) if !draw.supersedes(current) => false,
        _ => {
            state.current_draw = Some(draw);
            true
        }
    }
}

fn union_sets(local: &mut ParticipantSets, remote: ParticipantSets) -> bool {
    let mut changed = false;
    for (ordinal, participants) in remote {
        if participants.is_empty() {
            continue;
        }
        let set = local.entry(ordinal).or_default();
        for participant in participants {
            changed |= set.insert(participant);
        }
    }
    changed
}

fn merge_directory_entry(
    state: &mut StateStore,
    participant: &ParticipantId,
    incoming: DirectoryEntry,
) -> bool {
    match state.directory.get(participant) {
        Some(existing) if !incoming.supersedes(existing) => false,
        _ => {
            state.directory.insert(participant.clone(), incoming);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use proptest::prelude::*;
    use crate::game::catalog::{Catalog, Category};

    fn store() -> StateStore {
        let catalog = Catalog::new(vec![
            Category::new("One", &["a", "b", "c"]),
            Category::new("Two", &["d", "e"]),
        ]);
        StateStore::new(Arc::new(catalog))
    }

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s)
    }

    fn entry(id: &str, slot: Ordinal, text: &str) -> CustomEntry {
        CustomEntry { id: ItemId::new(id), slot, text: text.to_string() }
    }

    #[test]
    fn test_roll_sets_current_claim_and_exclusion() {
        let mut state = store();
        assert!(apply_roll(&mut state, 2, &pid("x"), 1));

        assert_eq!(state.current_ordinal(), Some(2));
        assert_eq!(state.claimants(2), vec![&pid("x")]);
        assert!(state.is_excluded_by(2, &pid("x")));
        assert_eq!(state.draw_clock, 1);
    }

    #[test]
    fn test_roll_is_idempotent() {
        let mut once = store();
        apply_roll(&mut once, 2, &pid("x"), 1);

        let mut twice = store();
        apply_roll(&mut twice, 2, &pid("x"), 1);
        assert!(!apply_roll(&mut twice, 2, &pid("x"), 1));

        assert_eq!(once.digest(), twice.digest());
    }

    #[test]
    fn test_concurrent_rolls_same_ordinal_both_claim() {
        let mut state = store();
        apply_roll(&mut state, 3, &pid("x"), 1);
        apply_roll(&mut state, 3, &pid("y"), 1);

        assert_eq!(state.claimants(3), vec![&pid("x"), &pid("y")]);
    }

    #[test]
    fn test_current_draw_last_writer_wins() {
        let mut a = store();
        apply_roll(&mut a, 1, &pid("x"), 1);
        apply_roll(&mut a, 4, &pid("y"), 2);

        let mut b = store();
        apply_roll(&mut b, 4, &pid("y"), 2);
        apply_roll(&mut b, 1, &pid("x"), 1);

        assert_eq!(a.current_ordinal(), Some(4));
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_toggle_exclude_is_idempotent() {
        let mut state = store();
        assert!(apply_toggle_exclude(&mut state, 5, &pid("x"), true));
        assert!(!apply_toggle_exclude(&mut state, 5, &pid("x"), true));
        assert_eq!(state.exclusions[&5].len(), 1);
    }

    #[test]
    fn test_toggle_off_only_removes_actor() {
        let mut state = store();
        apply_toggle_exclude(&mut state, 5, &pid("x"), true);
        apply_toggle_exclude(&mut state, 5, &pid("y"), true);

        assert!(apply_toggle_exclude(&mut state, 5, &pid("x"), false));
        assert!(!state.is_excluded_by(5, &pid("x")));
        assert!(state.is_excluded_by(5, &pid("y")));

        apply_toggle_exclude(&mut state, 5, &pid("y"), false);
        assert!(!state.exclusions.contains_key(&5));
    }

    #[test]
    fn test_concurrent_toggles_union() {
        let mut a = store();
        apply_toggle_exclude(&mut a, 5, &pid("x"), true);
        apply_toggle_exclude(&mut a, 5, &pid("y"), true);

        let mut b = store();
        apply_toggle_exclude(&mut b, 5, &pid("y"), true);
        apply_toggle_exclude(&mut b, 5, &pid("x"), true);

        assert_eq!(a.exclusions[&5].len(), 2);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_add_custom_item_assigns_next_ordinal() {
        let mut state = store();
        let slot = state.custom.next_slot(state.fixed_count());
        assert_eq!(slot, 6);

        assert!(apply_add_custom_item(&mut state, entry("q1", slot, "Q1")));
        assert_eq!(state.pool_len(), 6);
        assert_eq!(state.item(6).unwrap().text, "Q1");
    }

    #[test]
    fn test_duplicate_text_allowed() {
        let mut state = store();
        apply_add_custom_item(&mut state, entry("q1", 6, "same"));
        apply_add_custom_item(&mut state, entry("q2", 7, "same"));
        assert_eq!(state.pool_len(), 7);
    }

    #[test]
    fn test_remove_fixed_ordinal_is_noop() {
        let mut state = store();
        let before = state.pool();

        assert!(!apply_remove_custom_item(&mut state, 2, None));
        assert!(!apply_remove_custom_item(&mut state, 0, None));
        assert_eq!(state.pool(), before);
    }

    #[test]
    fn test_remove_by_ordinal_and_by_id() {
        let mut state = store();
        apply_add_custom_item(&mut state, entry("q1", 6, "Q1"));
        apply_add_custom_item(&mut state, entry("q2", 7, "Q2"));

        assert!(apply_remove_custom_item(&mut state, 6, None));
        assert!(state.item(6).is_none());
        assert_eq!(state.item(7).unwrap().text, "Q2");

        assert!(apply_remove_custom_item(&mut state, 7, Some(&ItemId::new("q2"))));
        assert_eq!(state.pool_len(), 5);
        assert!(!apply_remove_custom_item(&mut state, 7, Some(&ItemId::new("q2"))));
    }

    #[test]
    fn test_remove_before_add_sticks() {
        let mut state = store();
        apply_remove_custom_item(&mut state, 6, Some(&ItemId::new("q1")));
        apply_add_custom_item(&mut state, entry("q1", 6, "Q1"));

        assert!(state.item(6).is_none());
        assert_eq!(state.pool_len(), 5);
    }

    #[test]
    fn test_set_name_keeps_highest_revision() {
        let mut state = store();
        apply_set_name(&mut state, &pid("x"), "Ann", 2);
        assert!(!apply_set_name(&mut state, &pid("x"), "Old", 1));
        assert_eq!(state.display_name(&pid("x")), Some("Ann"));

        assert!(apply_set_name(&mut state, &pid("x"), "Anna", 3));
        assert_eq!(state.display_name(&pid("x")), Some("Anna"));
    }

    #[test]
    fn test_note_name_does_not_override() {
        let mut state = store();
        apply_set_name(&mut state, &pid("x"), "Ann", 1);
        assert!(!note_name(&mut state, &pid("x"), "Player"));
        assert!(note_name(&mut state, &pid("y"), "Bo"));
        assert_eq!(state.display_name(&pid("x")), Some("Ann"));
    }

    #[test]
    fn test_reset_keeps_pool_and_directory() {
        let mut state = store();
        apply_add_custom_item(&mut state, entry("q1", 6, "Q1"));
        apply_set_name(&mut state, &pid("x"), "Ann", 1);
        apply_roll(&mut state, 6, &pid("x"), 4);

        assert!(apply_reset(&mut state));
        assert!(state.current_draw.is_none());
        assert!(state.exclusions.is_empty());
        assert!(state.claims.is_empty());
        assert_eq!(state.pool_len(), 6);
        assert_eq!(state.display_name(&pid("x")), Some("Ann"));
        assert_eq!(state.next_draw_stamp(), 5);
    }

    #[test]
    fn test_snapshot_union_keeps_local_toggle() {
        let mut local = store();
        apply_toggle_exclude(&mut local, 2, &pid("x"), true);

        let mut remote = store();
        apply_toggle_exclude(&mut remote, 4, &pid("y"), true);
        apply_roll(&mut remote, 3, &pid("y"), 1);

        apply_snapshot(&mut local, remote.snapshot());

        assert!(local.is_excluded_by(2, &pid("x")));
        assert!(local.is_excluded_by(4, &pid("y")));
        assert_eq!(local.current_ordinal(), Some(3));
    }

    #[test]
    fn test_snapshot_merges_board() {
        let mut local = store();
        apply_add_custom_item(&mut local, entry("mine", 6, "mine"));
        apply_roll(&mut local, 1, &pid("x"), 7);

        let mut remote = store();
        apply_add_custom_item(&mut remote, entry("theirs", 6, "theirs"));
        apply_remove_custom_item(&mut remote, 9, Some(&ItemId::new("gone")));

        assert!(apply_snapshot(&mut local, remote.snapshot()));

        // Same slot, so the id breaks the tie
        assert_eq!(local.item(6).unwrap().text, "mine");
        assert_eq!(local.item(7).unwrap().text, "theirs");
        assert!(local.custom.is_removed(&ItemId::new("gone")));
        assert_eq!(local.current_ordinal(), Some(1));
        assert_eq!(local.claimants(1), vec![&pid("x")]);
        assert_eq!(local.next_draw_stamp(), 8);
    }

    #[test]
    fn test_stale_draw_in_snapshot_converges_either_order() {
        let mut stale = store();
        apply_roll(&mut stale, 4, &pid("y"), 3);
        let snapshot = stale.snapshot();

        let mut a = store();
        apply_roll(&mut a, 1, &pid("x"), 5);
        apply_snapshot(&mut a, snapshot.clone());

        let mut b = store();
        apply_snapshot(&mut b, snapshot);
        apply_roll(&mut b, 1, &pid("x"), 5);

        assert_eq!(a.current_ordinal(), Some(1));
        assert_eq!(b.current_ordinal(), Some(1));
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_stale_pool_in_snapshot_keeps_newer_items() {
        let mut stale = store();
        apply_roll(&mut stale, 2, &pid("y"), 1);
        let snapshot = stale.snapshot();
        assert!(snapshot.board.is_some());

        let mut a = store();
        apply_add_custom_item(&mut a, entry("q1", 6, "Q1"));
        apply_snapshot(&mut a, snapshot.clone());

        let mut b = store();
        apply_snapshot(&mut b, snapshot);
        apply_add_custom_item(&mut b, entry("q1", 6, "Q1"));

        assert_eq!(a.pool_len(), 6);
        assert_eq!(a.item(6).unwrap().text, "Q1");
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_snapshot_without_board_keeps_pool() {
        let mut local = store();
        apply_add_custom_item(&mut local, entry("mine", 6, "mine"));
        apply_roll(&mut local, 6, &pid("x"), 1);

        let fresh = store();
        assert!(fresh.snapshot().board.is_none());
        assert!(!apply_snapshot(&mut local, fresh.snapshot()));

        assert_eq!(local.pool_len(), 6);
        assert_eq!(local.current_ordinal(), Some(6));
    }

    #[test]
    fn test_toggles_and_renames_do_not_mark_history() {
        let mut state = store();
        apply_toggle_exclude(&mut state, 1, &pid("x"), true);
        apply_set_name(&mut state, &pid("x"), "Ann", 1);
        assert!(!state.has_history());
        assert!(state.snapshot().board.is_none());

        apply_add_custom_item(&mut state, entry("q1", 6, "Q1"));
        assert!(state.has_history());
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let mut remote = store();
        apply_roll(&mut remote, 2, &pid("y"), 1);
        apply_set_name(&mut remote, &pid("y"), "Yan", 1);

        let mut local = store();
        apply_snapshot(&mut local, remote.snapshot());
        let first = local.digest();
        assert!(!apply_snapshot(&mut local, remote.snapshot()));
        assert_eq!(local.digest(), first);
    }

    // =========================================================================
    // PROPERTIES
    // =========================================================================

    #[derive(Debug, Clone)]
    enum Op {
        Roll { ordinal: Ordinal, who: usize, stamp: u64 },
        Exclude { ordinal: Ordinal, who: usize },
        Add { id: usize },
        Remove { id: usize },
        Name { who: usize, rev: u64, name: usize },
        /// Snapshot of another peer that saw some other deltas.
        Snapshot(Snapshot),
    }

    const WHO: [&str; 3] = ["alice", "bob", "carol"];
    const NAMES: [&str; 3] = ["Ann", "Ben", "Cid"];

    fn apply_op(state: &mut StateStore, op: &Op) {
        match op {
            Op::Roll { ordinal, who, stamp } => {
                apply_roll(state, *ordinal, &pid(WHO[*who]), *stamp);
            }
            Op::Exclude { ordinal, who } => {
                apply_toggle_exclude(state, *ordinal, &pid(WHO[*who]), true);
            }
            Op::Add { id } => {
                // An id is only ever minted once, so its slot is fixed too;
                // pairs of ids share a slot to exercise the id tie-break.
                let slot = 6 + (*id as Ordinal / 2);
                let id = format!("item-{id}");
                apply_add_custom_item(state, entry(&id, slot, &id));
            }
            Op::Remove { id } => {
                let id = ItemId::new(format!("item-{id}"));
                apply_remove_custom_item(state, 99, Some(&id));
            }
            Op::Name { who, rev, name } => {
                apply_set_name(state, &pid(WHO[*who]), NAMES[*name], *rev);
            }
            Op::Snapshot(snapshot) => {
                apply_snapshot(state, snapshot.clone());
            }
        }
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => delta_strategy(),
            1 => prop::collection::vec(delta_strategy(), 0..8).prop_map(|ops| {
                let mut peer = store();
                for op in &ops {
                    apply_op(&mut peer, op);
                }
                Op::Snapshot(peer.snapshot())
            }),
        ]
    }

    fn delta_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u32..8, 0usize..3, 1u64..6)
                .prop_map(|(ordinal, who, stamp)| Op::Roll { ordinal, who, stamp }),
            (1u32..8, 0usize..3).prop_map(|(ordinal, who)| Op::Exclude { ordinal, who }),
            (0usize..4).prop_map(|id| Op::Add { id }),
            (0usize..4).prop_map(|id| Op::Remove { id }),
            (0usize..3, 0u64..3, 0usize..3)
                .prop_map(|(who, rev, name)| Op::Name { who, rev, name }),
        ]
    }

    fn ops_and_permutation() -> impl Strategy<Value = (Vec<Op>, Vec<Op>)> {
        prop::collection::vec(op_strategy(), 0..24).prop_flat_map(|ops| {
            let shuffled = Just(ops.clone()).prop_shuffle();
            (Just(ops), shuffled)
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn prop_delta_order_does_not_matter((ops, shuffled) in ops_and_permutation()) {
            let mut a = store();
            let mut b = store();
            for op in &ops {
                apply_op(&mut a, op);
            }
            for op in &shuffled {
                apply_op(&mut b, op);
            }

            prop_assert_eq!(a.digest(), b.digest());
            prop_assert_eq!(a.pool(), b.pool());
        }

        #[test]
        fn prop_redelivery_does_not_matter(ops in prop::collection::vec(op_strategy(), 0..24)) {
            let mut once = store();
            let mut twice = store();
            for op in &ops {
                apply_op(&mut once, op);
                apply_op(&mut twice, op);
                apply_op(&mut twice, op);
            }

            prop_assert_eq!(once.digest(), twice.digest());
        }

        #[test]
        fn prop_snapshot_merge_never_drops_union_fields(
            local_ops in prop::collection::vec(op_strategy(), 0..16),
            remote_ops in prop::collection::vec(op_strategy(), 0..16),
        ) {
            let mut local = store();
            let mut remote = store();
            for op in &local_ops {
                apply_op(&mut local, op);
            }
            for op in &remote_ops {
                apply_op(&mut remote, op);
            }
            let before = local.clone();

            apply_snapshot(&mut local, remote.snapshot());

            for (ordinal, set) in before.exclusions.iter().chain(remote.exclusions.iter()) {
                for participant in set {
                    prop_assert!(local.is_excluded_by(*ordinal, participant));
                }
            }
            for (ordinal, set) in before.claims.iter().chain(remote.claims.iter()) {
                for participant in set {
                    prop_assert!(local.claimants(*ordinal).contains(&participant));
                }
            }
        }
    }
}
