use std::collections::VecDeque;
use std::io::{self, Write};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell::{Cell, CellContent, Value};
use crate::dep_graph::DepGraph;
use crate::error::EngineError;
use crate::formula::CellLookup;
use crate::position::{Position, Size};

/// A single spreadsheet: sparse cell store, dependency graph, and
/// printable-extent bookkeeping.
///
/// Cells are keyed by `Position`; an absent key is a non-existent cell.
/// The store stays proportional to the number of live cells no matter
/// where they sit in the 16384x16384 space.
#[derive(Default, Debug)]
pub struct Sheet {
    cells: FxHashMap<Position, Cell>,
    graph: DepGraph,
    extent: Size,
    /// Extent-counted cells per row / per column. Lets the extent shrink
    /// in O(distance) instead of rescanning the store.
    row_pop: FxHashMap<i32, i32>,
    col_pop: FxHashMap<i32, i32>,
}

impl Sheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the text of the cell at `pos`, creating it if needed.
    ///
    /// The write is atomic: classification and the cycle check run before
    /// any state moves, so a rejected write leaves the sheet untouched.
    /// Setting a cell to the text it already holds is a no-op.
    pub fn set_cell(&mut self, pos: Position, text: &str) -> Result<(), EngineError> {
        if !pos.is_valid() {
            return Err(EngineError::InvalidPosition(pos));
        }
        let existed = match self.cells.get(&pos) {
            Some(cell) => {
                if cell.raw_text() == text {
                    return Ok(());
                }
                true
            }
            None => false,
        };

        let content = CellContent::classify(text)?;
        let new_refs: Vec<Position> = content.referenced_cells().to_vec();
        if content.is_formula() && self.graph.would_create_cycle(pos, &new_refs) {
            return Err(EngineError::CircularDependency(pos));
        }

        // Commit. Dependent caches go cold before the content swap.
        self.invalidate_dependents(pos);
        let old_refs: Vec<Position> = self.graph.precedents(pos).collect();
        if existed {
            self.recount(pos);
        } else {
            self.allocate(pos);
        }
        for &target in &new_refs {
            if self.cells.contains_key(&target) {
                // A cleared cell surviving as a reference target rejoins the
                // extent when a formula points at it again.
                self.recount(target);
            } else {
                self.allocate(target);
            }
        }
        self.cells
            .get_mut(&pos)
            .expect("cell allocated above")
            .replace_content(content);
        self.graph.replace_edges(pos, new_refs.iter().copied().collect());
        if !old_refs.is_empty() {
            self.prune_detached(&old_refs, pos);
        }
        Ok(())
    }

    /// Clear the cell at `pos`.
    ///
    /// A cell nothing depends on is removed outright. A cell with
    /// dependents is demoted to empty instead, so its dependents keep a
    /// valid target (reading as zero); it stops contributing to the
    /// printable extent immediately and is removed for good once its last
    /// dependent goes away.
    pub fn clear_cell(&mut self, pos: Position) -> Result<(), EngineError> {
        if !pos.is_valid() {
            return Err(EngineError::InvalidPosition(pos));
        }
        if self.extent == Size::default() || !self.cells.contains_key(&pos) {
            return Ok(());
        }

        self.invalidate_dependents(pos);
        let old_refs: Vec<Position> = self.graph.precedents(pos).collect();
        self.graph.clear_cell(pos);

        if self.graph.has_dependents(pos) {
            let mut released = false;
            if let Some(cell) = self.cells.get_mut(&pos) {
                cell.replace_content(CellContent::Empty);
                if cell.in_extent {
                    cell.in_extent = false;
                    released = true;
                }
            }
            if released {
                self.release(pos);
            }
        } else {
            self.remove_cell(pos);
        }

        if !old_refs.is_empty() {
            self.prune_detached(&old_refs, pos);
        }
        Ok(())
    }

    /// The cell at `pos`, if inside the printable extent and allocated.
    pub fn get_cell(&self, pos: Position) -> Result<Option<&Cell>, EngineError> {
        if !pos.is_valid() {
            return Err(EngineError::InvalidPosition(pos));
        }
        if pos.row >= self.extent.rows || pos.col >= self.extent.cols {
            return Ok(None);
        }
        Ok(self.cells.get(&pos))
    }

    /// Display value at `pos`; absent cells read as empty text.
    pub fn get_value(&self, pos: Position) -> Result<Value, EngineError> {
        Ok(match self.get_cell(pos)? {
            Some(cell) => cell.value(self),
            None => Value::Text(String::new()),
        })
    }

    /// Raw text at `pos` (formulas re-printed canonically).
    pub fn get_text(&self, pos: Position) -> Result<String, EngineError> {
        Ok(self.get_cell(pos)?.map(Cell::raw_text).unwrap_or_default())
    }

    /// Bounding rectangle, anchored at (0, 0), of every extent-counted cell.
    pub fn printable_size(&self) -> Size {
        self.extent
    }

    /// Write evaluated values, tab-separated, one line per row.
    pub fn print_values(&self, out: &mut impl Write) -> io::Result<()> {
        self.print_with(out, |cell| cell.value(self).to_string())
    }

    /// Write raw cell texts, tab-separated, one line per row.
    pub fn print_texts(&self, out: &mut impl Write) -> io::Result<()> {
        self.print_with(out, |cell| cell.raw_text())
    }

    fn print_with(
        &self,
        out: &mut impl Write,
        render: impl Fn(&Cell) -> String,
    ) -> io::Result<()> {
        for row in 0..self.extent.rows {
            for col in 0..self.extent.cols {
                if col > 0 {
                    out.write_all(b"\t")?;
                }
                if let Some(cell) = self.cells.get(&Position::new(row, col)) {
                    out.write_all(render(cell).as_bytes())?;
                }
            }
            out.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Clear memoized values on every cell downstream of `pos`. The walk
    /// prunes at cells whose cache is already empty: their dependents were
    /// emptied when they were.
    fn invalidate_dependents(&self, pos: Position) {
        let mut queue: VecDeque<Position> = self.graph.dependents(pos).collect();
        let mut visited: FxHashSet<Position> = queue.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            let had_cache = self
                .cells
                .get(&current)
                .map_or(false, |cell| cell.take_cache());
            if !had_cache {
                continue;
            }
            for dep in self.graph.dependents(current) {
                if visited.insert(dep) {
                    queue.push_back(dep);
                }
            }
        }
    }

    /// Put an empty cell at `pos` and grow the printable extent over it.
    fn allocate(&mut self, pos: Position) {
        self.cells.insert(pos, Cell::empty());
        self.count(pos);
    }

    /// Re-count an existing cell that a demotion released from the extent.
    fn recount(&mut self, pos: Position) {
        let rejoined = self.cells.get_mut(&pos).map_or(false, |cell| {
            if cell.in_extent {
                false
            } else {
                cell.in_extent = true;
                true
            }
        });
        if rejoined {
            self.count(pos);
        }
    }

    /// Add `pos` to the population counters and grow the extent over it.
    fn count(&mut self, pos: Position) {
        *self.row_pop.entry(pos.row).or_insert(0) += 1;
        *self.col_pop.entry(pos.col).or_insert(0) += 1;
        self.extent.rows = self.extent.rows.max(pos.row + 1);
        self.extent.cols = self.extent.cols.max(pos.col + 1);
    }

    /// Drop the cell at `pos`, releasing its extent contribution unless a
    /// demotion already did.
    fn remove_cell(&mut self, pos: Position) {
        if let Some(cell) = self.cells.remove(&pos) {
            if cell.in_extent {
                self.release(pos);
            }
        }
    }

    /// Release `pos` from the population counters; when the released cell
    /// sat on the boundary, walk inward to the next populated row/column.
    fn release(&mut self, pos: Position) {
        if let Some(count) = self.row_pop.get_mut(&pos.row) {
            *count -= 1;
        }
        if let Some(count) = self.col_pop.get_mut(&pos.col) {
            *count -= 1;
        }

        if pos.row + 1 == self.extent.rows && self.row_count(pos.row) == 0 {
            let mut rows = 0;
            for row in (0..pos.row).rev() {
                if self.row_count(row) > 0 {
                    rows = row + 1;
                    break;
                }
            }
            self.extent.rows = rows;
        }
        if pos.col + 1 == self.extent.cols && self.col_count(pos.col) == 0 {
            let mut cols = 0;
            for col in (0..pos.col).rev() {
                if self.col_count(col) > 0 {
                    cols = col + 1;
                    break;
                }
            }
            self.extent.cols = cols;
        }
    }

    fn row_count(&self, row: i32) -> i32 {
        self.row_pop.get(&row).copied().unwrap_or(0)
    }

    fn col_count(&self, col: i32) -> i32 {
        self.col_pop.get(&col).copied().unwrap_or(0)
    }

    /// Remove former reference targets that are now empty cells nothing
    /// depends on: placeholders whose last dependent just went away.
    fn prune_detached(&mut self, old_refs: &[Position], changed: Position) {
        for &target in old_refs {
            if target == changed {
                continue;
            }
            let removable = self
                .cells
                .get(&target)
                .map_or(false, |cell| cell.is_empty())
                && !self.graph.has_dependents(target);
            if removable {
                self.remove_cell(target);
            }
        }
    }
}

impl CellLookup for Sheet {
    fn value(&self, pos: Position) -> Value {
        // Unlike `get_cell`, this sees cells the extent no longer covers
        // (cleared cells kept alive as reference targets); they are empty
        // and read as zero.
        match self.cells.get(&pos) {
            Some(cell) => cell.value(self),
            None => Value::Text(String::new()),
        }
    }
}
