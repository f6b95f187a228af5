//! The Reconciler - diffs a fresh snapshot against the displayed state.
//!
//! One pass turns `(previous table, snapshot)` into the display operations
//! that make the sink match the snapshot, and into the table to carry into
//! the next pass:
//!
//! 1. Every snapshot vehicle is created (first sighting) or moved (already
//!    displayed). Moves are unconditional: a no-op move is cheap, a missed
//!    one is not.
//! 2. Every displayed vehicle missing from the snapshot is removed in the
//!    same pass it goes missing.
//! 3. The returned table holds exactly the snapshot's ids. Removed entries
//!    are pruned, so they are never re-removed on later passes and a
//!    vehicle that comes back is re-created rather than moved.

use crate::display::{DisplayOp, DisplaySink, DisplayTable, DisplayedEntity};
use crate::entity::{TrackedEntity, VehicleId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

// ============================================================================
// SUMMARY
// ============================================================================

/// Operation counts of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub created: usize,
    pub moved: usize,
    pub removed: usize,
}

impl ReconcileSummary {
    /// Counts the operations in `ops`.
    pub fn from_ops(ops: &[DisplayOp]) -> Self {
        ops.iter().fold(Self::default(), |mut acc, op| {
            match op {
                DisplayOp::Create { .. } => acc.created += 1,
                DisplayOp::Move { .. } => acc.moved += 1,
                DisplayOp::Remove { .. } => acc.removed += 1,
            }
            acc
        })
    }

    /// Total number of operations.
    pub fn total(&self) -> usize {
        self.created + self.moved + self.removed
    }
}

// ============================================================================
// DIFF
// ============================================================================

/// Computes the display operations for one pass without touching a sink.
///
/// Create/Move operations come first, in snapshot order; Removes follow in
/// id order. When an id appears more than once in the snapshot the last
/// occurrence wins: its position overwrites the operation already queued
/// for that id, which keeps the slot of the first occurrence.
pub fn plan(previous: &DisplayTable, snapshot: &[TrackedEntity]) -> Vec<DisplayOp> {
    let mut ops: Vec<DisplayOp> = Vec::with_capacity(snapshot.len() + previous.len());
    let mut slots: HashMap<&VehicleId, usize> = HashMap::with_capacity(snapshot.len());

    for entity in snapshot {
        if let Some(&slot) = slots.get(&entity.id) {
            warn!("Duplicate vehicle {} in snapshot, keeping last occurrence", entity.id);
            match &mut ops[slot] {
                DisplayOp::Create { position, .. } | DisplayOp::Move { position, .. } => {
                    *position = entity.position;
                }
                DisplayOp::Remove { .. } => {}
            }
            continue;
        }

        slots.insert(&entity.id, ops.len());
        let op = if previous.contains(&entity.id) {
            DisplayOp::Move {
                id: entity.id.clone(),
                position: entity.position,
            }
        } else {
            DisplayOp::Create {
                id: entity.id.clone(),
                position: entity.position,
            }
        };
        ops.push(op);
    }

    // Stale ids: displayed but absent from this snapshot
    for id in previous.ids() {
        if !slots.contains_key(id) {
            ops.push(DisplayOp::Remove { id: id.clone() });
        }
    }

    ops
}

// ============================================================================
// APPLY
// ============================================================================

/// Reconciles `previous` against `snapshot`, applying every operation to
/// `sink`.
///
/// Returns the pruned table for the next pass together with the operations
/// that were issued. Created entries take the handle returned by the sink,
/// moved entries keep their handle.
pub fn reconcile<S>(
    mut previous: DisplayTable,
    snapshot: &[TrackedEntity],
    sink: &mut S,
) -> (DisplayTable, Vec<DisplayOp>)
where
    S: DisplaySink + ?Sized,
{
    let ops = plan(&previous, snapshot);
    let mut next = DisplayTable::new();

    for op in &ops {
        match op {
            DisplayOp::Create { id, position } => {
                let handle = sink.create_marker(id, *position);
                next.insert(DisplayedEntity {
                    id: id.clone(),
                    handle,
                    position: *position,
                });
            }
            DisplayOp::Move { id, position } => {
                if let Some(mut entity) = previous.remove(id) {
                    sink.move_marker(entity.handle, *position);
                    entity.position = *position;
                    next.insert(entity);
                }
            }
            DisplayOp::Remove { id } => {
                if let Some(entity) = previous.remove(id) {
                    sink.remove_marker(entity.handle);
                }
            }
        }
    }

    debug_assert!(previous.is_empty(), "every previous entry is either moved or removed");

    let summary = ReconcileSummary::from_ops(&ops);
    debug!(
        "Reconciled {} vehicles: +{} ~{} -{}",
        next.len(),
        summary.created,
        summary.moved,
        summary.removed
    );

    (next, ops)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{MemorySink, SinkCall};
    use crate::entity::Position;
    use std::collections::BTreeSet;

    fn pos(lon: f64, lat: f64) -> Position {
        Position::new(lon, lat)
    }

    fn vid(id: &str) -> VehicleId {
        VehicleId::new(id)
    }

    /// Builds a displayed state by reconciling `snapshot` from scratch.
    fn displayed(snapshot: &[TrackedEntity], sink: &mut MemorySink) -> DisplayTable {
        let (table, _) = reconcile(DisplayTable::new(), snapshot, sink);
        sink.drain_calls();
        table
    }

    fn sorted(ops: Vec<DisplayOp>) -> Vec<String> {
        let mut out: Vec<String> = ops.into_iter().map(|op| op.to_string()).collect();
        out.sort();
        out
    }

    #[test]
    fn test_create_on_first_sight() {
        let mut sink = MemorySink::new();
        let snapshot = vec![TrackedEntity::new("A", pos(-71.0, 42.0))];

        let (state, ops) = reconcile(DisplayTable::new(), &snapshot, &mut sink);

        assert_eq!(ops, vec![DisplayOp::Create { id: vid("A"), position: pos(-71.0, 42.0) }]);
        assert!(state.contains(&vid("A")));
        assert_eq!(sink.marker_count(), 1);
    }

    #[test]
    fn test_move_and_create_example() {
        // previous = {A: posA}; snapshot = [A(A2), B(posB)]
        let mut sink = MemorySink::new();
        let previous = displayed(&[TrackedEntity::new("A", pos(1.0, 1.0))], &mut sink);
        let handle_a = previous.get(&vid("A")).unwrap().handle;

        let snapshot = vec![
            TrackedEntity::new("A", pos(2.0, 2.0)),
            TrackedEntity::new("B", pos(3.0, 3.0)),
        ];
        let (state, ops) = reconcile(previous, &snapshot, &mut sink);

        assert_eq!(
            sorted(ops),
            sorted(vec![
                DisplayOp::Move { id: vid("A"), position: pos(2.0, 2.0) },
                DisplayOp::Create { id: vid("B"), position: pos(3.0, 3.0) },
            ])
        );
        assert_eq!(state.len(), 2);
        assert_eq!(state.get(&vid("A")).unwrap().position, pos(2.0, 2.0));
        assert_eq!(state.get(&vid("A")).unwrap().handle, handle_a);
        assert_eq!(state.get(&vid("B")).unwrap().position, pos(3.0, 3.0));
    }

    #[test]
    fn test_empty_snapshot_removes_everything() {
        // previous = {A, B}; snapshot = []
        let mut sink = MemorySink::new();
        let previous = displayed(
            &[
                TrackedEntity::new("A", pos(1.0, 1.0)),
                TrackedEntity::new("B", pos(2.0, 2.0)),
            ],
            &mut sink,
        );

        let (state, ops) = reconcile(previous, &[], &mut sink);

        assert_eq!(
            ops,
            vec![DisplayOp::Remove { id: vid("A") }, DisplayOp::Remove { id: vid("B") }]
        );
        assert!(state.is_empty());
        assert_eq!(sink.marker_count(), 0);
    }

    #[test]
    fn test_removed_ids_are_pruned_and_not_removed_again() {
        let mut sink = MemorySink::new();
        let previous = displayed(
            &[
                TrackedEntity::new("A", pos(1.0, 1.0)),
                TrackedEntity::new("B", pos(2.0, 2.0)),
            ],
            &mut sink,
        );

        let snapshot = vec![TrackedEntity::new("A", pos(1.5, 1.5))];
        let (state, ops) = reconcile(previous, &snapshot, &mut sink);
        assert_eq!(ReconcileSummary::from_ops(&ops).removed, 1);
        assert!(!state.contains(&vid("B")));

        // Next cycles must not keep removing B
        let (state, ops) = reconcile(state, &snapshot, &mut sink);
        assert_eq!(ReconcileSummary::from_ops(&ops).removed, 0);
        let (_, ops) = reconcile(state, &snapshot, &mut sink);
        assert_eq!(ReconcileSummary::from_ops(&ops).removed, 0);

        assert_eq!(sink.unknown_handle_calls(), 0);
    }

    #[test]
    fn test_move_is_emitted_even_when_unchanged() {
        let mut sink = MemorySink::new();
        let snapshot = vec![
            TrackedEntity::new("A", pos(1.0, 1.0)),
            TrackedEntity::new("B", pos(2.0, 2.0)),
        ];
        let previous = displayed(&snapshot, &mut sink);

        let (state, ops) = reconcile(previous.clone(), &snapshot, &mut sink);

        let summary = ReconcileSummary::from_ops(&ops);
        assert_eq!(summary, ReconcileSummary { created: 0, moved: 2, removed: 0 });
        assert_eq!(state, previous);
        assert!(sink
            .calls()
            .iter()
            .all(|call| matches!(call, SinkCall::MoveMarker { .. })));
    }

    #[test]
    fn test_resurfacing_id_is_recreated() {
        let mut sink = MemorySink::new();
        let previous = displayed(&[TrackedEntity::new("A", pos(1.0, 1.0))], &mut sink);
        let old_handle = previous.get(&vid("A")).unwrap().handle;

        let (state, _) = reconcile(previous, &[], &mut sink);
        let (state, ops) = reconcile(state, &[TrackedEntity::new("A", pos(2.0, 2.0))], &mut sink);

        assert_eq!(ops, vec![DisplayOp::Create { id: vid("A"), position: pos(2.0, 2.0) }]);
        assert_ne!(state.get(&vid("A")).unwrap().handle, old_handle);
    }

    #[test]
    fn test_duplicate_id_last_occurrence_wins() {
        let previous = DisplayTable::new();
        let snapshot = vec![
            TrackedEntity::new("A", pos(1.0, 1.0)),
            TrackedEntity::new("B", pos(5.0, 5.0)),
            TrackedEntity::new("A", pos(9.0, 9.0)),
        ];

        let ops = plan(&previous, &snapshot);
        assert_eq!(
            ops,
            vec![
                DisplayOp::Create { id: vid("A"), position: pos(9.0, 9.0) },
                DisplayOp::Create { id: vid("B"), position: pos(5.0, 5.0) },
            ]
        );

        let mut sink = MemorySink::new();
        let (state, _) = reconcile(previous, &snapshot, &mut sink);
        assert_eq!(state.len(), 2);
        assert_eq!(sink.marker_count(), 2);
        assert_eq!(sink.marker_position(&vid("A")), Some(pos(9.0, 9.0)));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let mut sink = MemorySink::new();
        let previous = displayed(
            &[
                TrackedEntity::new("z", pos(0.0, 0.0)),
                TrackedEntity::new("m", pos(0.0, 0.0)),
                TrackedEntity::new("a", pos(0.0, 0.0)),
            ],
            &mut sink,
        );
        let snapshot = vec![TrackedEntity::new("q", pos(1.0, 1.0))];

        let first = plan(&previous, &snapshot);
        let second = plan(&previous, &snapshot);
        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|op| op.to_string()).collect::<Vec<_>>(),
            vec!["Create(q, 1.00000,1.00000)", "Remove(a)", "Remove(m)", "Remove(z)"]
        );
    }

    #[test]
    fn test_plan_does_not_need_a_sink() {
        let ops = plan(&DisplayTable::new(), &[TrackedEntity::new("A", pos(1.0, 1.0))]);
        assert_eq!(ReconcileSummary::from_ops(&ops).total(), 1);
    }

    // ------------------------------------------------------------------------
    // Property tests
    // ------------------------------------------------------------------------

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn snapshot_strategy() -> impl Strategy<Value = Vec<TrackedEntity>> {
            prop::collection::vec((0u8..12, -180.0f64..180.0, -90.0f64..90.0), 0..20).prop_map(
                |rows| {
                    rows.into_iter()
                        .map(|(id, lon, lat)| TrackedEntity::new(format!("v{}", id), Position::new(lon, lat)))
                        .collect()
                },
            )
        }

        fn ids(snapshot: &[TrackedEntity]) -> BTreeSet<VehicleId> {
            snapshot.iter().map(|e| e.id.clone()).collect()
        }

        proptest! {
            #[test]
            fn prop_state_matches_snapshot(first in snapshot_strategy(), second in snapshot_strategy()) {
                let mut sink = MemorySink::new();
                let previous = displayed(&first, &mut sink);
                let previous_ids: BTreeSet<VehicleId> = previous.ids().cloned().collect();

                let (state, ops) = reconcile(previous, &second, &mut sink);
                let state_ids: BTreeSet<VehicleId> = state.ids().cloned().collect();
                let snapshot_ids = ids(&second);

                // New state holds exactly the snapshot ids, and so does the display
                prop_assert_eq!(&state_ids, &snapshot_ids);
                prop_assert_eq!(&sink.marker_ids(), &snapshot_ids);
                prop_assert_eq!(sink.unknown_handle_calls(), 0);

                // One op per id, with the right kind
                let mut seen = BTreeSet::new();
                for op in &ops {
                    prop_assert!(seen.insert(op.id().clone()), "two ops for {}", op.id());
                    match op {
                        DisplayOp::Create { id, .. } => prop_assert!(!previous_ids.contains(id)),
                        DisplayOp::Move { id, .. } => prop_assert!(previous_ids.contains(id)),
                        DisplayOp::Remove { id } => {
                            prop_assert!(previous_ids.contains(id));
                            prop_assert!(!snapshot_ids.contains(id));
                        }
                    }
                }
                let expected_removed = previous_ids.difference(&snapshot_ids).count();
                prop_assert_eq!(ReconcileSummary::from_ops(&ops).removed, expected_removed);

                // Last occurrence wins for positions
                for entity in &second {
                    let last = second.iter().rev().find(|e| e.id == entity.id).unwrap();
                    prop_assert_eq!(state.get(&entity.id).unwrap().position, last.position);
                }
            }

            #[test]
            fn prop_reconcile_twice_is_stable(snapshot in snapshot_strategy()) {
                let mut sink = MemorySink::new();
                let state = displayed(&snapshot, &mut sink);
                let (again, ops) = reconcile(state.clone(), &snapshot, &mut sink);

                prop_assert_eq!(&again, &state);
                let summary = ReconcileSummary::from_ops(&ops);
                prop_assert_eq!(summary.created, 0);
                prop_assert_eq!(summary.removed, 0);
                prop_assert_eq!(summary.moved, ids(&snapshot).len());
            }
        }
    }
}
