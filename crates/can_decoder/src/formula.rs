//! OBD-II PID formulas
//!
//! Formulas like `(A*256 + B) / 4` are parsed once into a small expression
//! tree and evaluated over the response data bytes. Nothing outside the
//! grammar below is accepted:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := INTEGER | 'A' | 'B' | 'C' | 'D' | '(' expr ')'
//! ```

use crate::error::{DecoderError, Result};

/// Longest accepted formula source
pub const MAX_FORMULA_LEN: usize = 256;
/// Deepest accepted nesting of parentheses and unary minus
pub const MAX_FORMULA_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(f64),
    /// Data byte index, A = 0
    Byte(usize),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, data: &[u8]) -> Option<f64> {
        match self {
            Expr::Literal(v) => Some(*v),
            Expr::Byte(i) => data.get(*i).map(|b| f64::from(*b)),
            Expr::Neg(inner) => inner.eval(data).map(|v| -v),
            Expr::Binary(op, lhs, rhs) => {
                let l = lhs.eval(data)?;
                let r = rhs.eval(data)?;
                match op {
                    BinOp::Add => Some(l + r),
                    BinOp::Sub => Some(l - r),
                    BinOp::Mul => Some(l * r),
                    BinOp::Div => (r != 0.0).then(|| l / r),
                }
            }
        }
    }
}

/// A compiled formula
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    /// Parse a formula, rejecting anything outside the arithmetic grammar
    pub fn parse(source: &str) -> Result<Self> {
        if source.chars().count() > MAX_FORMULA_LEN {
            return Err(DecoderError::formula(
                source,
                MAX_FORMULA_LEN,
                format!("longer than {MAX_FORMULA_LEN} characters"),
            ));
        }
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens: &tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.expr()?;
        if let Some((col, tok)) = parser.peek() {
            return Err(DecoderError::formula(
                source,
                col,
                format!("unexpected {tok:?} after expression"),
            ));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Evaluate over data bytes A, B, C, D...
    ///
    /// `None` when a referenced byte is missing, on division by zero, or when
    /// the result is not finite.
    pub fn evaluate(&self, data: &[u8]) -> Option<f64> {
        self.expr.eval(data).filter(|v| v.is_finite())
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Byte(usize),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((col, c)) = chars.next() {
        let token = match c {
            ' ' | '\t' => continue,
            '+' => Token::Plus,
            '-' | '\u{2212}' => Token::Minus,
            '*' | '\u{00D7}' => Token::Star,
            '/' | '\u{00F7}' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            'A'..='D' => Token::Byte(usize::from(c as u8 - b'A')),
            '0'..='9' => {
                let mut value: u64 = u64::from(c as u8 - b'0');
                while let Some(&(_, d)) = chars.peek() {
                    let Some(digit) = d.to_digit(10) else { break };
                    value = value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(u64::from(digit)))
                        .ok_or_else(|| DecoderError::formula(source, col, "integer overflow"))?;
                    chars.next();
                }
                Token::Number(value as f64)
            }
            other => {
                return Err(DecoderError::formula(
                    source,
                    col,
                    format!("unexpected character {other:?}"),
                ))
            }
        };
        tokens.push((col, token));
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: &'a [(usize, Token)],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<(usize, Token)> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<(usize, Token)> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn end_col(&self) -> usize {
        self.source.len()
    }

    fn descend(&mut self, col: usize) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_FORMULA_DEPTH {
            return Err(DecoderError::formula(
                self.source,
                col,
                format!("nesting deeper than {MAX_FORMULA_DEPTH}"),
            ));
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        while let Some((_, tok @ (Token::Plus | Token::Minus))) = self.peek() {
            self.pos += 1;
            let op = if tok == Token::Plus { BinOp::Add } else { BinOp::Sub };
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while let Some((_, tok @ (Token::Star | Token::Slash))) = self.peek() {
            self.pos += 1;
            let op = if tok == Token::Star { BinOp::Mul } else { BinOp::Div };
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if let Some((col, Token::Minus)) = self.peek() {
            self.pos += 1;
            self.descend(col)?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Some((_, Token::Number(v))) => Ok(Expr::Literal(v)),
            Some((_, Token::Byte(i))) => Ok(Expr::Byte(i)),
            Some((col, Token::LParen)) => {
                self.descend(col)?;
                let inner = self.expr()?;
                self.depth -= 1;
                match self.bump() {
                    Some((_, Token::RParen)) => Ok(inner),
                    Some((col, tok)) => Err(DecoderError::formula(
                        self.source,
                        col,
                        format!("expected ')', found {tok:?}"),
                    )),
                    None => Err(DecoderError::formula(
                        self.source,
                        self.end_col(),
                        "unclosed '('",
                    )),
                }
            }
            Some((col, tok)) => Err(DecoderError::formula(
                self.source,
                col,
                format!("expected operand, found {tok:?}"),
            )),
            None => Err(DecoderError::formula(
                self.source,
                self.end_col(),
                "unexpected end of formula",
            )),
        }
    }
}
