//! Who-reads-whom tracking between cells.
//!
//! A formula cell points at the cells it reads (its precedents); each of
//! those cells points back at the formulas reading it (its dependents).
//! Cache invalidation walks the dependent direction outward from a changed
//! cell. The cycle guard walks the same direction: a proposed edge set
//! closes a loop exactly when the written cell can reach one of its
//! would-be sources through existing readers.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::position::Position;

/// Reference bookkeeping for formula cells.
///
/// Both directions are stored so either question is one map lookup:
/// `preds` answers "which cells does this formula read", `succs` answers
/// "which formulas read this cell". The two maps always mirror each other,
/// set storage keeps edges unique, and a key whose set empties out is
/// dropped rather than kept around. Every edge change for a cell goes
/// through [`replace_edges`](Self::replace_edges), so the mirror cannot
/// drift.
#[derive(Default, Debug, Clone)]
pub struct DepGraph {
    /// Reading cell -> the cells its formula mentions.
    preds: FxHashMap<Position, FxHashSet<Position>>,
    /// Mentioned cell -> the formulas that mention it.
    succs: FxHashMap<Position, FxHashSet<Position>>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cells the formula at `cell` reads.
    pub fn precedents(&self, cell: Position) -> impl Iterator<Item = Position> + '_ {
        self.preds
            .get(&cell)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// Formula cells that read `cell`.
    pub fn dependents(&self, cell: Position) -> impl Iterator<Item = Position> + '_ {
        self.succs
            .get(&cell)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// True when at least one formula reads this cell.
    pub fn has_dependents(&self, cell: Position) -> bool {
        self.succs.contains_key(&cell)
    }

    /// Swap the full precedent set of `cell` in one call, detaching every
    /// old reverse entry before attaching the new ones. An empty set takes
    /// the cell out of the graph entirely.
    pub fn replace_edges(&mut self, cell: Position, new_preds: FxHashSet<Position>) {
        if let Some(dropped) = self.preds.remove(&cell) {
            for source in dropped {
                let now_unread = match self.succs.get_mut(&source) {
                    Some(readers) => {
                        readers.remove(&cell);
                        readers.is_empty()
                    }
                    None => false,
                };
                if now_unread {
                    self.succs.remove(&source);
                }
            }
        }

        for source in &new_preds {
            self.succs.entry(*source).or_default().insert(cell);
        }
        if !new_preds.is_empty() {
            self.preds.insert(cell, new_preds);
        }
    }

    /// Drop every edge touching `cell`'s formula (cleared or deleted).
    pub fn clear_cell(&mut self, cell: Position) {
        self.replace_edges(cell, FxHashSet::default());
    }

    /// Would pointing `cell` at `new_preds` close a loop?
    ///
    /// Read-only. Starting from `cell`, a breadth-first walk over readers
    /// looks for any of the proposed sources; finding one means that source
    /// already depends on `cell`, so the new edge would complete a cycle.
    /// Sources absent from the graph cannot be reached and need not exist
    /// yet.
    pub fn would_create_cycle(&self, cell: Position, new_preds: &[Position]) -> bool {
        if new_preds.contains(&cell) {
            return true;
        }

        let sources: FxHashSet<Position> = new_preds.iter().copied().collect();
        let mut seen = FxHashSet::default();
        seen.insert(cell);
        let mut frontier = VecDeque::from([cell]);

        while let Some(current) = frontier.pop_front() {
            for reader in self.dependents(current) {
                if sources.contains(&reader) {
                    return true;
                }
                if seen.insert(reader) {
                    frontier.push_back(reader);
                }
            }
        }

        false
    }

    /// Panic unless the two maps mirror each other exactly and no empty
    /// sets are stored. Test builds only.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        for (reader, sources) in &self.preds {
            assert!(
                !sources.is_empty(),
                "empty precedent set stored for {:?}",
                reader
            );
            for source in sources {
                let mirrored = self
                    .succs
                    .get(source)
                    .map_or(false, |readers| readers.contains(reader));
                assert!(
                    mirrored,
                    "{:?} reads {:?} but is not listed among its dependents",
                    reader, source
                );
            }
        }
        for (source, readers) in &self.succs {
            assert!(
                !readers.is_empty(),
                "empty dependent set stored for {:?}",
                source
            );
            for reader in readers {
                let mirrored = self
                    .preds
                    .get(reader)
                    .map_or(false, |sources| sources.contains(source));
                assert!(
                    mirrored,
                    "{:?} is read by {:?} but missing from its precedents",
                    source, reader
                );
            }
        }
    }
}
