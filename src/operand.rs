// Operand field parser: turns one operand string into an abstract addressing
// mode plus value. Bracket and paren forms are disambiguated by lookahead,
// everything else falls out of the numeric magnitude of the expression
// (DP <= $FF, ABS <= $FFFF, ABSL <= $FFFFFF, ABS32 above) unless `B+` or an
// index suffix pins the mode first.

use crate::expression::{parse_expression, EvalContext, ExprError};
use crate::fields::AddrMode;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OperandError {
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error("B+ offsets are limited to 16 bits (got ${0:x})")]
    BankOffsetTooLarge(u32),
    #[error("trailing characters in operand: '{0}'")]
    Trailing(String),
    #[error("malformed operand '{0}'")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    pub mode: AddrMode,
    pub value: u32,
    /// Block-move destination expression (`MVN src, dst`).
    pub mvp_dst: u32,
    /// Set by the `B+expr` syntax: the value is a 16-bit offset against B.
    pub b_relative: bool,
    /// The whole expression was a single bare hex literal; used for the
    /// exact-8-digit rule on 32-bit absolute addresses.
    pub is_hex_literal: bool,
    pub hex_digits: u8,
}

impl Operand {
    fn bare(mode: AddrMode) -> Self {
        Operand {
            mode,
            value: 0,
            mvp_dst: 0,
            b_relative: false,
            is_hex_literal: false,
            hex_digits: 0,
        }
    }
}

pub fn parse_operand(text: &str, ctx: &mut EvalContext) -> Result<Operand, OperandError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Operand::bare(AddrMode::Implied));
    }
    if text.eq_ignore_ascii_case("A") {
        return Ok(Operand::bare(AddrMode::Accumulator));
    }
    if let Some(rest) = text.strip_prefix('#') {
        let (value, next) = parse_expression(rest, ctx)?;
        expect_end(rest, next)?;
        let mut op = Operand::bare(AddrMode::Immediate);
        op.value = value;
        return Ok(op);
    }
    if text.starts_with('(') {
        return parse_paren(text, ctx);
    }
    if text.starts_with('[') {
        return parse_bracket(text, ctx);
    }

    // B+offset: a 16-bit absolute against the data-base register, the way
    // 32-bit code reaches 16-bit addresses.
    let (rest, b_relative) = match text.strip_prefix("B+").or_else(|| text.strip_prefix("b+")) {
        Some(rest) => (rest, true),
        None => (text, false),
    };

    let (value, next) = parse_expression(rest, ctx)?;
    if b_relative && value > 0xFFFF {
        return Err(OperandError::BankOffsetTooLarge(value));
    }
    let (hex, digits) = hex_literal_shape(rest[..next].trim());
    let tail = rest[next..].trim();

    let mode = if tail.is_empty() {
        if b_relative {
            AddrMode::Absolute
        } else {
            magnitude_mode(value, Index::None)
        }
    } else if let Some(index) = index_suffix(tail) {
        if b_relative {
            match index {
                Index::X => AddrMode::AbsoluteX,
                Index::Y => AddrMode::AbsoluteY,
                _ => return Err(OperandError::Malformed(text.to_string())),
            }
        } else if index == Index::S {
            AddrMode::StackRel
        } else {
            magnitude_mode(value, index)
        }
    } else if let Some(dst_text) = tail.strip_prefix(',') {
        // Two expressions: block move source, destination.
        let (dst, dnext) = parse_expression(dst_text, ctx)?;
        expect_end(dst_text, dnext)?;
        let mut op = Operand::bare(AddrMode::BlockMove);
        op.value = value;
        op.mvp_dst = dst;
        return Ok(op);
    } else {
        return Err(OperandError::Trailing(tail.to_string()));
    };

    Ok(Operand {
        mode,
        value,
        mvp_dst: 0,
        b_relative,
        is_hex_literal: hex,
        hex_digits: digits,
    })
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Index {
    None,
    X,
    Y,
    S,
}

fn index_suffix(tail: &str) -> Option<Index> {
    let rest = tail.strip_prefix(',')?.trim();
    if rest.eq_ignore_ascii_case("X") {
        Some(Index::X)
    } else if rest.eq_ignore_ascii_case("Y") {
        Some(Index::Y)
    } else if rest.eq_ignore_ascii_case("S") {
        Some(Index::S)
    } else {
        None
    }
}

fn magnitude_mode(value: u32, index: Index) -> AddrMode {
    match index {
        Index::None => match value {
            0..=0xFF => AddrMode::Direct,
            0x100..=0xFFFF => AddrMode::Absolute,
            0x1_0000..=0xFF_FFFF => AddrMode::Long,
            _ => AddrMode::Absolute32,
        },
        Index::X => match value {
            0..=0xFF => AddrMode::DirectX,
            0x100..=0xFFFF => AddrMode::AbsoluteX,
            0x1_0000..=0xFF_FFFF => AddrMode::LongX,
            _ => AddrMode::Absolute32X,
        },
        Index::Y => match value {
            0..=0xFF => AddrMode::DirectY,
            0x100..=0xFFFF => AddrMode::AbsoluteY,
            // No long,Y form exists; the extended encodings pick this up.
            _ => AddrMode::Absolute32Y,
        },
        Index::S => AddrMode::StackRel,
    }
}

fn parse_paren(text: &str, ctx: &mut EvalContext) -> Result<Operand, OperandError> {
    let inner = &text[1..];
    let (value, next) = parse_expression(inner, ctx)?;
    let tail = inner[next..].trim_start();
    let dp = value <= 0xFF;

    let mode = if let Some(rest) = strip_ci(tail, ",X)") {
        expect_empty(rest)?;
        if dp {
            AddrMode::IndirectX
        } else {
            AddrMode::AbsIndirectX
        }
    } else if let Some(rest) = strip_ci(tail, ",S),Y") {
        expect_empty(rest)?;
        AddrMode::StackRelY
    } else if let Some(rest) = strip_ci(tail, "),Y") {
        expect_empty(rest)?;
        AddrMode::IndirectY
    } else if let Some(rest) = tail.strip_prefix(')') {
        expect_empty(rest)?;
        if dp {
            AddrMode::Indirect
        } else {
            AddrMode::AbsIndirect
        }
    } else {
        return Err(OperandError::Malformed(text.to_string()));
    };

    let mut op = Operand::bare(mode);
    op.value = value;
    Ok(op)
}

fn parse_bracket(text: &str, ctx: &mut EvalContext) -> Result<Operand, OperandError> {
    let inner = &text[1..];
    let (value, next) = parse_expression(inner, ctx)?;
    let tail = inner[next..].trim_start();
    let dp = value <= 0xFF;

    let mode = if let Some(rest) = strip_ci(tail, "],Y") {
        expect_empty(rest)?;
        AddrMode::IndirectLongY
    } else if let Some(rest) = tail.strip_prefix(']') {
        expect_empty(rest)?;
        if dp {
            AddrMode::IndirectLong
        } else {
            AddrMode::AbsIndirectLong
        }
    } else {
        return Err(OperandError::Malformed(text.to_string()));
    };

    let mut op = Operand::bare(mode);
    op.value = value;
    Ok(op)
}

fn strip_ci<'a>(text: &'a str, pat: &str) -> Option<&'a str> {
    if text.len() >= pat.len() && text[..pat.len()].eq_ignore_ascii_case(pat) {
        Some(&text[pat.len()..])
    } else {
        None
    }
}

fn expect_empty(rest: &str) -> Result<(), OperandError> {
    if rest.trim().is_empty() {
        Ok(())
    } else {
        Err(OperandError::Trailing(rest.trim().to_string()))
    }
}

fn expect_end(text: &str, next: usize) -> Result<(), OperandError> {
    expect_empty(&text[next..])
}

/// Is the text one bare hex literal, and how many digits does it carry?
fn hex_literal_shape(text: &str) -> (bool, u8) {
    let digits = if let Some(rest) = text.strip_prefix('$') {
        rest
    } else if let Some(rest) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        rest
    } else {
        return (false, 0);
    };
    if !digits.is_empty() && digits.bytes().all(|c| c.is_ascii_hexdigit()) {
        (true, digits.len() as u8)
    } else {
        (false, 0)
    }
}
