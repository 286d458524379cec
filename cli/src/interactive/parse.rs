//! Expressions of the interactive mode: `0x80000000`, `sp`, `sp+16`,
//! `a0 - 8`, `pc`, and `[sp + 8]` as an assignment target

use std::num::ParseIntError;
use std::str::FromStr;

use nom::branch::alt;
use nom::bytes::complete::tag_no_case;
use nom::character::complete::{alphanumeric1, char, digit1, hex_digit1, multispace0};
use nom::combinator::{all_consuming, map, map_res, opt, value};
use nom::error::{convert_error, VerboseError};
use nom::multi::many0;
use nom::sequence::{delimited, pair, preceded};
use nom::{Finish, IResult};
use rivet_emulator::constants::Word;
use rivet_emulator::runtime::{Computer, Reg};
use thiserror::Error;

type Res<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Parse a decimal or `0x`-prefixed hexadecimal number
pub fn parse_number(input: &str) -> Result<Word, ParseIntError> {
    match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => Word::from_str_radix(hex, 16),
        None => input.parse(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sign {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Term {
    Literal(Word),
    Register(Reg),
    Pc,
}

impl Term {
    fn evaluate(self, computer: &Computer) -> Word {
        match self {
            Self::Literal(value) => value,
            Self::Register(reg) => computer.registers.get(reg),
            Self::Pc => computer.registers.pc,
        }
    }
}

/// Sum of numbers and registers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression(Vec<(Sign, Term)>);

impl Expression {
    /// Compute the value of the expression, wrapping on overflow
    pub fn evaluate(&self, computer: &Computer) -> Word {
        self.0
            .iter()
            .fold(0, |acc: Word, (sign, term)| match sign {
                Sign::Plus => acc.wrapping_add(term.evaluate(computer)),
                Sign::Minus => acc.wrapping_sub(term.evaluate(computer)),
            })
    }
}

/// Where `set` writes its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentTarget {
    /// A doubleword in memory, `[address]`
    Memory(Expression),
    Register(Reg),
    Pc,
}

#[derive(Debug, Error)]
#[error("could not parse expression: {0}")]
pub struct ParseExpressionError(String);

fn ws<'a, O>(inner: impl FnMut(&'a str) -> Res<'a, O>) -> impl FnMut(&'a str) -> Res<'a, O> {
    delimited(multispace0, inner, multispace0)
}

fn parse_literal(input: &str) -> Res<Word> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |hex| {
            Word::from_str_radix(hex, 16)
        }),
        map_res(digit1, |digits: &str| digits.parse::<Word>()),
    ))(input)
}

fn parse_term(input: &str) -> Res<Term> {
    alt((
        map(parse_literal, Term::Literal),
        map_res(alphanumeric1, |name: &str| {
            if name.eq_ignore_ascii_case("pc") {
                Ok(Term::Pc)
            } else {
                name.parse().map(Term::Register)
            }
        }),
    ))(input)
}

fn parse_sign(input: &str) -> Res<Sign> {
    alt((value(Sign::Plus, char('+')), value(Sign::Minus, char('-'))))(input)
}

fn parse_expression(input: &str) -> Res<Expression> {
    let (input, sign) = opt(ws(parse_sign))(input)?;
    let (input, first) = ws(parse_term)(input)?;
    let (input, rest) = many0(pair(ws(parse_sign), ws(parse_term)))(input)?;

    let mut terms = vec![(sign.unwrap_or(Sign::Plus), first)];
    terms.extend(rest);
    Ok((input, Expression(terms)))
}

fn parse_target(input: &str) -> Res<AssignmentTarget> {
    alt((
        map(
            delimited(ws(char('[')), parse_expression, ws(char(']'))),
            AssignmentTarget::Memory,
        ),
        map_res(ws(parse_term), |term| match term {
            Term::Register(reg) => Ok(AssignmentTarget::Register(reg)),
            Term::Pc => Ok(AssignmentTarget::Pc),
            Term::Literal(_) => Err("use [address] to write to memory"),
        }),
    ))(input)
}

fn parse_all<'a, O>(
    input: &'a str,
    parser: impl FnMut(&'a str) -> Res<'a, O>,
) -> Result<O, ParseExpressionError> {
    all_consuming(parser)(input)
        .finish()
        .map(|(_, output)| output)
        .map_err(|e| ParseExpressionError(convert_error(input, e)))
}

impl FromStr for Expression {
    type Err = ParseExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_all(s, parse_expression)
    }
}

impl FromStr for AssignmentTarget {
    type Err = ParseExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_all(s, parse_target)
    }
}
