// Formula parser - converts expression strings into an AST.
// Supports: numbers, cell refs (A1), unary +/-, basic math (+, -, *, /), parens.

use thiserror::Error;

use crate::cell::number_to_display;
use crate::position::Position;

use super::Formula;

/// Raised when an expression cannot be tokenized or parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot parse formula: {0}")]
pub struct FormulaParseError(pub String);

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum UnOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Number(f64),
    /// Holds `Position::NONE` for labels past the grid bounds; those lex
    /// fine and evaluate to the Ref error.
    CellRef(Position),
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Parse a formula body (the text after the leading `'='`).
pub fn parse_formula(expression: &str) -> Result<Formula, FormulaParseError> {
    let tokens = tokenize(expression)?;
    let (ast, consumed) = parse_add_sub(&tokens, 0)?;
    if consumed != tokens.len() {
        return Err(FormulaParseError("unexpected trailing tokens".to_string()));
    }
    let mut refs = Vec::new();
    collect_refs(&ast, &mut refs);
    refs.sort_unstable();
    refs.dedup();
    Ok(Formula::new(ast, refs))
}

#[derive(Debug, Clone)]
enum Token {
    Number(f64),
    CellRef(Position),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, FormulaParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                tokens.push(Token::Plus);
                chars.next();
            }
            '-' => {
                tokens.push(Token::Minus);
                chars.next();
            }
            '*' => {
                tokens.push(Token::Star);
                chars.next();
            }
            '/' => {
                tokens.push(Token::Slash);
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            'A'..='Z' => {
                // Cell label: uppercase letters then digits. Maximal munch
                // stops at the first letter after a digit, so "A1B2" lexes
                // as two adjacent refs (and fails in the parser).
                let mut label = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_uppercase() {
                        label.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let mut has_digits = false;
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_digit() {
                        has_digits = true;
                        label.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if !has_digits {
                    return Err(FormulaParseError(format!(
                        "unexpected identifier: {}",
                        label
                    )));
                }
                let pos = Position::from_label(&label).unwrap_or(Position::NONE);
                tokens.push(Token::CellRef(pos));
            }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num_str.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // Optional exponent; only consumed when a digit follows.
                if matches!(chars.peek(), Some(&'e') | Some(&'E')) {
                    let mut lookahead = chars.clone();
                    let marker = lookahead.next().unwrap_or('e');
                    let sign = match lookahead.peek().copied() {
                        Some(c @ ('+' | '-')) => {
                            lookahead.next();
                            Some(c)
                        }
                        _ => None,
                    };
                    if matches!(lookahead.peek(), Some(d) if d.is_ascii_digit()) {
                        num_str.push(marker);
                        if let Some(s) = sign {
                            num_str.push(s);
                        }
                        while let Some(&d) = lookahead.peek() {
                            if d.is_ascii_digit() {
                                num_str.push(d);
                                lookahead.next();
                            } else {
                                break;
                            }
                        }
                        chars = lookahead;
                    }
                }
                let num: f64 = num_str
                    .parse()
                    .map_err(|_| FormulaParseError(format!("invalid number: {}", num_str)))?;
                tokens.push(Token::Number(num));
            }
            _ => {
                return Err(FormulaParseError(format!("unexpected character: {}", c)));
            }
        }
    }

    Ok(tokens)
}

fn parse_add_sub(tokens: &[Token], pos: usize) -> Result<(Expr, usize), FormulaParseError> {
    let (mut left, mut pos) = parse_mul_div(tokens, pos)?;

    while pos < tokens.len() {
        let op = match tokens[pos] {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
            _ => break,
        };
        let (right, new_pos) = parse_mul_div(tokens, pos + 1)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_mul_div(tokens: &[Token], pos: usize) -> Result<(Expr, usize), FormulaParseError> {
    let (mut left, mut pos) = parse_unary(tokens, pos)?;

    while pos < tokens.len() {
        let op = match tokens[pos] {
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
            _ => break,
        };
        let (right, new_pos) = parse_unary(tokens, pos + 1)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_unary(tokens: &[Token], pos: usize) -> Result<(Expr, usize), FormulaParseError> {
    let op = match tokens.get(pos) {
        Some(Token::Plus) => UnOp::Plus,
        Some(Token::Minus) => UnOp::Minus,
        _ => return parse_primary(tokens, pos),
    };
    let (operand, new_pos) = parse_unary(tokens, pos + 1)?;
    Ok((
        Expr::Unary {
            op,
            operand: Box::new(operand),
        },
        new_pos,
    ))
}

fn parse_primary(tokens: &[Token], pos: usize) -> Result<(Expr, usize), FormulaParseError> {
    match tokens.get(pos) {
        Some(Token::Number(n)) => Ok((Expr::Number(*n), pos + 1)),
        Some(Token::CellRef(p)) => Ok((Expr::CellRef(*p), pos + 1)),
        Some(Token::LParen) => {
            let (inner, after) = parse_add_sub(tokens, pos + 1)?;
            match tokens.get(after) {
                Some(Token::RParen) => Ok((inner, after + 1)),
                _ => Err(FormulaParseError(
                    "expected closing parenthesis".to_string(),
                )),
            }
        }
        Some(_) => Err(FormulaParseError("unexpected token".to_string())),
        None => Err(FormulaParseError("unexpected end of formula".to_string())),
    }
}

fn collect_refs(expr: &Expr, refs: &mut Vec<Position>) {
    match expr {
        Expr::Number(_) => {}
        Expr::CellRef(pos) => {
            if pos.is_valid() {
                refs.push(*pos);
            }
        }
        Expr::Unary { operand, .. } => collect_refs(operand, refs),
        Expr::Binary { left, right, .. } => {
            collect_refs(left, refs);
            collect_refs(right, refs);
        }
    }
}

// =============================================================================
// Canonical printing
// =============================================================================

const ADD_PREC: u8 = 1;
const MUL_PREC: u8 = 2;
const UNARY_PREC: u8 = 3;
const ATOM_PREC: u8 = 4;

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Number(_) | Expr::CellRef(_) => ATOM_PREC,
        Expr::Unary { .. } => UNARY_PREC,
        Expr::Binary {
            op: BinOp::Mul | BinOp::Div,
            ..
        } => MUL_PREC,
        Expr::Binary {
            op: BinOp::Add | BinOp::Sub,
            ..
        } => ADD_PREC,
    }
}

pub(crate) fn print_expr(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr);
    out
}

fn write_expr(out: &mut String, expr: &Expr) {
    use std::fmt::Write as _;

    match expr {
        Expr::Number(n) => out.push_str(&number_to_display(*n)),
        Expr::CellRef(pos) => {
            let _ = write!(out, "{}", pos);
        }
        Expr::Unary { op, operand } => {
            out.push(match op {
                UnOp::Plus => '+',
                UnOp::Minus => '-',
            });
            write_operand(out, operand, precedence(operand) < UNARY_PREC);
        }
        Expr::Binary { op, left, right } => {
            let prec = precedence(expr);
            write_operand(out, left, precedence(left) < prec);
            out.push(match op {
                BinOp::Add => '+',
                BinOp::Sub => '-',
                BinOp::Mul => '*',
                BinOp::Div => '/',
            });
            // Subtraction and division are left-associative: an equal-
            // precedence right operand keeps its parentheses.
            let grouped = precedence(right) < prec
                || (precedence(right) == prec && matches!(op, BinOp::Sub | BinOp::Div));
            write_operand(out, right, grouped);
        }
    }
}

fn write_operand(out: &mut String, expr: &Expr, parenthesized: bool) {
    if parenthesized {
        out.push('(');
        write_expr(out, expr);
        out.push(')');
    } else {
        write_expr(out, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr_of(src: &str) -> String {
        parse_formula(src).unwrap().expression()
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(expr_of("42"), "42");
        assert_eq!(expr_of("3.5"), "3.5");
        assert_eq!(expr_of("  1 +  2 "), "1+2");
    }

    #[test]
    fn test_parse_exponent() {
        assert_eq!(expr_of("1e3"), "1000");
        assert_eq!(expr_of("2.5E-1"), "0.25");
        assert!(parse_formula("1e").is_err());
    }

    #[test]
    fn test_precedence_print_drops_redundant_parens() {
        assert_eq!(expr_of("(1+2)*3"), "(1+2)*3");
        assert_eq!(expr_of("1+(2*3)"), "1+2*3");
        assert_eq!(expr_of("((1))"), "1");
        assert_eq!(expr_of("(1-2)-3"), "1-2-3");
        assert_eq!(expr_of("1-(2-3)"), "1-(2-3)");
        assert_eq!(expr_of("8/(4/2)"), "8/(4/2)");
        assert_eq!(expr_of("(8/4)/2"), "8/4/2");
        assert_eq!(expr_of("1+(2-3)"), "1+2-3");
    }

    #[test]
    fn test_unary_print() {
        assert_eq!(expr_of("-3"), "-3");
        assert_eq!(expr_of("-(1+2)"), "-(1+2)");
        assert_eq!(expr_of("-(1*2)"), "-(1*2)");
        assert_eq!(expr_of("2*-3"), "2*-3");
        assert_eq!(expr_of("--3"), "--3");
        assert_eq!(expr_of("+A1"), "+A1");
    }

    #[test]
    fn test_cell_refs() {
        let formula = parse_formula("B2+A1+B2").unwrap();
        assert_eq!(formula.expression(), "B2+A1+B2");
        // Sorted and deduplicated.
        assert_eq!(
            formula.referenced_cells(),
            &[Position::new(0, 0), Position::new(1, 1)]
        );
    }

    #[test]
    fn test_out_of_range_label_lexes() {
        // Past-the-grid labels parse; they surface as the Ref error at
        // evaluation and never appear in the reference list.
        let formula = parse_formula("AAAA1+1").unwrap();
        assert!(formula.referenced_cells().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        for src in ["", "1+", "*2", "(1+2", "1+2)", "1 2", "A1B2", "a1", "SUM(A1)", "1..2", "@"] {
            assert!(parse_formula(src).is_err(), "src {:?}", src);
        }
    }

    #[test]
    fn test_round_trip_through_canonical_form() {
        for src in ["1+2*3", "(1+2)*3", "-A1/B2", "1-(2-3)", "2*-3"] {
            let canonical = expr_of(src);
            assert_eq!(expr_of(&canonical), canonical);
        }
    }
}
