//! Safe arithmetic evaluator.
//!
//! Computes `+ - * /` expressions with parentheses without handing the
//! input to any general-purpose interpreter. Input is checked against a
//! character allow-list first; anything else is rejected outright.
//!
//! Parenthesized groups are reduced innermost-first (the last `(` and the
//! first `)` after it), each group's value is spliced back into the text,
//! and the remaining flat expression is evaluated with `*`/`/` binding
//! tighter than `+`/`-`, left-to-right within each precedence level.

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, EvalResult};

/// Outcome of a successful evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Computed value, always finite.
    pub value: f64,
    /// Units label echoed from the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

/// Evaluate an arithmetic expression, tagging the result with optional units.
pub fn evaluate(expression: &str, units: Option<&str>) -> EvalResult<Evaluation> {
    if expression.trim().is_empty() {
        return Err(EvalError::Empty);
    }

    if let Some((position, ch)) = expression
        .chars()
        .enumerate()
        .find(|(_, c)| !is_allowed(*c))
    {
        return Err(EvalError::InvalidCharacter { ch, position });
    }

    let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
    let value = reduce_groups(compact)?;

    Ok(Evaluation {
        value,
        units: units.map(str::to_string),
    })
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '+' | '-' | '*' | '/' | '(' | ')' | '.') || c.is_whitespace()
}

/// Collapse parenthesized groups innermost-first, then evaluate the rest.
fn reduce_groups(mut expr: String) -> EvalResult<f64> {
    loop {
        let Some(open) = expr.rfind('(') else {
            if expr.contains(')') {
                return Err(EvalError::UnbalancedParens);
            }
            return evaluate_flat(&expr);
        };

        let close = expr[open..]
            .find(')')
            .map(|offset| open + offset)
            .ok_or(EvalError::UnbalancedParens)?;

        let before = expr[..open].chars().last();
        if matches!(before, Some(c) if c.is_ascii_digit() || c == '.' || c == ')') {
            return Err(EvalError::Malformed {
                message: format!("missing operator before '(' at position {}", open),
            });
        }
        let after = expr[close + 1..].chars().next();
        if matches!(after, Some(c) if c.is_ascii_digit() || c == '.' || c == '(') {
            return Err(EvalError::Malformed {
                message: format!("missing operator after ')' at position {}", close),
            });
        }

        let inner = evaluate_flat(&expr[open + 1..close])?;
        expr = format!("{}{}{}", &expr[..open], inner, &expr[close + 1..]);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Op(char),
}

fn tokenize(expr: &str) -> EvalResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut literal = String::new();

    for c in expr.chars() {
        if c.is_ascii_digit() || c == '.' {
            literal.push(c);
            continue;
        }
        if !literal.is_empty() {
            tokens.push(Token::Number(parse_number(&literal)?));
            literal.clear();
        }
        tokens.push(Token::Op(c));
    }
    if !literal.is_empty() {
        tokens.push(Token::Number(parse_number(&literal)?));
    }

    Ok(tokens)
}

fn parse_number(literal: &str) -> EvalResult<f64> {
    literal.parse::<f64>().map_err(|_| EvalError::Malformed {
        message: format!("invalid number '{}'", literal),
    })
}

/// Evaluate a parenthesis-free expression.
fn evaluate_flat(expr: &str) -> EvalResult<f64> {
    if expr.is_empty() {
        return Err(EvalError::Malformed {
            message: "empty expression or group".to_string(),
        });
    }

    let tokens = tokenize(expr)?;
    let mut pos = 0;

    let mut total = parse_term(&tokens, &mut pos)?;
    while pos < tokens.len() {
        let op = match tokens[pos] {
            Token::Op(op @ ('+' | '-')) => op,
            other => {
                return Err(EvalError::Malformed {
                    message: format!("unexpected token {:?}", other),
                })
            }
        };
        pos += 1;
        let rhs = parse_term(&tokens, &mut pos)?;
        total = if op == '+' { total + rhs } else { total - rhs };
    }

    finite(total)
}

/// A run of factors joined by `*` or `/`.
fn parse_term(tokens: &[Token], pos: &mut usize) -> EvalResult<f64> {
    let mut acc = parse_operand(tokens, pos)?;

    while let Some(Token::Op(op @ ('*' | '/'))) = tokens.get(*pos) {
        let op = *op;
        *pos += 1;
        let rhs = parse_operand(tokens, pos)?;
        if op == '*' {
            acc *= rhs;
        } else {
            if rhs == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            acc /= rhs;
        }
    }

    Ok(acc)
}

/// A number with any leading unary signs.
fn parse_operand(tokens: &[Token], pos: &mut usize) -> EvalResult<f64> {
    let mut sign = 1.0;
    loop {
        match tokens.get(*pos) {
            Some(Token::Op('-')) => {
                sign = -sign;
                *pos += 1;
            }
            Some(Token::Op('+')) => *pos += 1,
            Some(Token::Number(n)) => {
                *pos += 1;
                return Ok(sign * n);
            }
            Some(Token::Op(op)) => {
                return Err(EvalError::Malformed {
                    message: format!("expected a number, found '{}'", op),
                })
            }
            None => {
                return Err(EvalError::Malformed {
                    message: "expression ends with an operator".to_string(),
                })
            }
        }
    }
}

fn finite(value: f64) -> EvalResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvalError::InvalidResult { value })
    }
}
