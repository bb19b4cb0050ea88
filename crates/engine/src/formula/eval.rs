// Formula evaluator - walks the AST against a cell lookup.

use crate::cell::{EvalError, Value};
use crate::position::Position;

use super::parser::{BinOp, Expr, UnOp};

/// Read access to cell values during evaluation.
///
/// The sheet implements this; tests substitute fixed maps. Absent cells
/// read as empty text, which coerces to zero in arithmetic.
pub trait CellLookup {
    fn value(&self, pos: Position) -> Value;
}

pub(crate) fn evaluate(expr: &Expr, lookup: &impl CellLookup) -> Result<f64, EvalError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::CellRef(pos) => {
            if !pos.is_valid() {
                return Err(EvalError::Ref);
            }
            lookup.value(*pos).to_number()
        }
        Expr::Unary { op, operand } => {
            let v = evaluate(operand, lookup)?;
            Ok(match op {
                UnOp::Plus => v,
                UnOp::Minus => -v,
            })
        }
        Expr::Binary { op, left, right } => {
            let l = evaluate(left, lookup)?;
            let r = evaluate(right, lookup)?;
            let v = match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => l / r,
            };
            if !v.is_finite() {
                return Err(EvalError::Arithmetic);
            }
            Ok(v)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::formula::parse_formula;

    struct MapLookup(HashMap<Position, Value>);

    impl MapLookup {
        fn new(entries: &[(&str, Value)]) -> Self {
            Self(
                entries
                    .iter()
                    .map(|(label, value)| {
                        (Position::from_label(label).unwrap(), value.clone())
                    })
                    .collect(),
            )
        }
    }

    impl CellLookup for MapLookup {
        fn value(&self, pos: Position) -> Value {
            self.0
                .get(&pos)
                .cloned()
                .unwrap_or_else(|| Value::Text(String::new()))
        }
    }

    fn eval(src: &str, lookup: &MapLookup) -> Result<f64, EvalError> {
        parse_formula(src).unwrap().evaluate(lookup)
    }

    #[test]
    fn test_arithmetic() {
        let empty = MapLookup::new(&[]);
        assert_eq!(eval("1+2*3", &empty), Ok(7.0));
        assert_eq!(eval("(1+2)*3", &empty), Ok(9.0));
        assert_eq!(eval("-4/8", &empty), Ok(-0.5));
        assert_eq!(eval("2*-3", &empty), Ok(-6.0));
    }

    #[test]
    fn test_cell_values() {
        let lookup = MapLookup::new(&[
            ("A1", Value::Number(2.0)),
            ("A2", Value::Text("3".to_string())),
            ("A3", Value::Text("not a number".to_string())),
        ]);
        assert_eq!(eval("A1+A2", &lookup), Ok(5.0));
        // Absent and empty-text cells read as zero.
        assert_eq!(eval("A1+Z99", &lookup), Ok(2.0));
        assert_eq!(eval("A3+1", &lookup), Err(EvalError::Value));
    }

    #[test]
    fn test_error_propagation() {
        let lookup = MapLookup::new(&[("A1", Value::Error(EvalError::Arithmetic))]);
        assert_eq!(eval("A1+1", &lookup), Err(EvalError::Arithmetic));
    }

    #[test]
    fn test_division_by_zero() {
        let empty = MapLookup::new(&[]);
        assert_eq!(eval("1/0", &empty), Err(EvalError::Arithmetic));
        assert_eq!(eval("0/0", &empty), Err(EvalError::Arithmetic));
        // Dividing by an empty cell divides by zero.
        assert_eq!(eval("1/B1", &empty), Err(EvalError::Arithmetic));
    }

    #[test]
    fn test_overflow_is_arithmetic_error() {
        let empty = MapLookup::new(&[]);
        assert_eq!(eval("1e308*10", &empty), Err(EvalError::Arithmetic));
    }

    #[test]
    fn test_invalid_reference() {
        let empty = MapLookup::new(&[]);
        assert_eq!(eval("AAAA1", &empty), Err(EvalError::Ref));
        assert_eq!(eval("A99999", &empty), Err(EvalError::Ref));
    }
}
