use std::cell::RefCell;
use std::fmt;

use crate::formula::{parse_formula, CellLookup, Formula, FormulaParseError};
use crate::position::Position;

/// First character of formula input.
pub const FORMULA_SIGN: char = '=';
/// Leading character that suppresses formula interpretation of text.
pub const ESCAPE_SIGN: char = '\'';

/// Evaluation failure, surfaced as a cell value rather than an API error.
/// Sticky: cached like any other result until an input changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalError {
    /// Reference to an address outside the sheet.
    Ref,
    /// Non-numeric text used in arithmetic.
    Value,
    /// Division by zero or any other non-finite result.
    Arithmetic,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EvalError::Ref => "#REF!",
            EvalError::Value => "#VALUE!",
            EvalError::Arithmetic => "#ARITHM!",
        })
    }
}

/// A cell's display value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Number(f64),
    Error(EvalError),
}

impl Value {
    /// Numeric coercion used by formula evaluation.
    pub fn to_number(&self) -> Result<f64, EvalError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Text(s) if s.is_empty() => Ok(0.0),
            Value::Text(s) => s.parse::<f64>().map_err(|_| EvalError::Value),
            Value::Error(e) => Err(*e),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Number(n) => f.write_str(&number_to_display(*n)),
            Value::Error(e) => write!(f, "{}", e),
        }
    }
}

/// Deterministic number rendering: integral magnitudes below 1e15 print as
/// integers, everything else falls back to the shortest round-trip form.
pub(crate) fn number_to_display(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// What a cell holds. The variants carry disjoint payloads; per-variant
/// behavior (display, raw text, references) is matched out here.
#[derive(Debug, Clone)]
pub enum CellContent {
    Empty,
    Text(String),
    Formula(Formula),
}

impl CellContent {
    /// Classify user input.
    ///
    /// Empty input produces `Empty` (a text cell never stores an empty
    /// string). `=expr` with a non-empty body parses as a formula; a lone
    /// `"="` and anything starting with the escape marker stay text.
    pub fn classify(text: &str) -> Result<CellContent, FormulaParseError> {
        if text.is_empty() {
            return Ok(CellContent::Empty);
        }
        if text.len() >= 2 && text.starts_with(FORMULA_SIGN) {
            let formula = parse_formula(&text[1..])?;
            return Ok(CellContent::Formula(formula));
        }
        Ok(CellContent::Text(text.to_string()))
    }

    /// The text a user would re-enter to reproduce this cell. Formulas
    /// re-print canonically.
    pub fn raw_text(&self) -> String {
        match self {
            CellContent::Empty => String::new(),
            CellContent::Text(s) => s.clone(),
            CellContent::Formula(f) => format!("{}{}", FORMULA_SIGN, f.expression()),
        }
    }

    /// Cells read by this content: sorted, deduplicated. Empty for
    /// non-formulas.
    pub fn referenced_cells(&self) -> &[Position] {
        match self {
            CellContent::Formula(f) => f.referenced_cells(),
            _ => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellContent::Empty)
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, CellContent::Formula(_))
    }
}

/// A single grid cell: content plus the memoized result of its last
/// evaluation. Adjacency lives in the sheet's dependency graph.
#[derive(Debug)]
pub struct Cell {
    content: CellContent,
    /// Last evaluated value for formula content, errors included. Interior
    /// mutability lets a read fill caches down the precedent chain; the
    /// engine is single-threaded throughout.
    cache: RefCell<Option<Value>>,
    /// Whether this cell currently contributes to the printable extent.
    /// Cleared cells kept alive as reference targets stop holding the
    /// extent open; their later removal must not release the population
    /// counters a second time.
    pub(crate) in_extent: bool,
}

impl Cell {
    pub(crate) fn empty() -> Self {
        Cell {
            content: CellContent::Empty,
            cache: RefCell::new(None),
            in_extent: true,
        }
    }

    pub fn content(&self) -> &CellContent {
        &self.content
    }

    /// Current display value.
    ///
    /// Formula results are memoized until invalidated; evaluating one cell
    /// fills the caches of every formula it reads along the way.
    pub fn value(&self, lookup: &impl CellLookup) -> Value {
        match &self.content {
            CellContent::Empty => Value::Text(String::new()),
            CellContent::Text(s) => {
                Value::Text(s.strip_prefix(ESCAPE_SIGN).unwrap_or(s).to_string())
            }
            CellContent::Formula(formula) => {
                if let Some(cached) = self.cache.borrow().as_ref() {
                    return cached.clone();
                }
                let value = match formula.evaluate(lookup) {
                    Ok(n) => Value::Number(n),
                    Err(e) => Value::Error(e),
                };
                *self.cache.borrow_mut() = Some(value.clone());
                value
            }
        }
    }

    pub fn raw_text(&self) -> String {
        self.content.raw_text()
    }

    pub fn referenced_cells(&self) -> &[Position] {
        self.content.referenced_cells()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn is_formula(&self) -> bool {
        self.content.is_formula()
    }

    pub fn has_cached_value(&self) -> bool {
        self.cache.borrow().is_some()
    }

    pub(crate) fn replace_content(&mut self, content: CellContent) {
        self.content = content;
        *self.cache.get_mut() = None;
    }

    /// Drop the memoized value. Returns whether one was present, so
    /// invalidation can prune subtrees that are already cold.
    pub(crate) fn take_cache(&self) -> bool {
        self.cache.borrow_mut().take().is_some()
    }
}
