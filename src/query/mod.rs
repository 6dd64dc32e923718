//! C7 — Query object.
//!
//! A mutable builder: a conjunction of conditions, an optional
//! ordering, a limit/skip pair, and a hint accumulator the planner
//! (§4.5) fills in as it works. Operator and order-type names parse
//! case-insensitively from strings per §6.5, with `~`/`!` prefixes
//! setting `NEGATE` and a trailing `+` setting `NOIDX`.

pub mod planner;
pub mod run;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Streq,
    Strinc,
    Strbw,
    Strew,
    Strand,
    Stror,
    Stroreq,
    Strrx,
    Numeq,
    Numgt,
    Numge,
    Numlt,
    Numle,
    Numbt,
    Numoreq,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            Operator::Streq => "STREQ",
            Operator::Strinc => "STRINC",
            Operator::Strbw => "STRBW",
            Operator::Strew => "STREW",
            Operator::Strand => "STRAND",
            Operator::Stror => "STROR",
            Operator::Stroreq => "STROREQ",
            Operator::Strrx => "STRRX",
            Operator::Numeq => "NUMEQ",
            Operator::Numgt => "NUMGT",
            Operator::Numge => "NUMGE",
            Operator::Numlt => "NUMLT",
            Operator::Numle => "NUMLE",
            Operator::Numbt => "NUMBT",
            Operator::Numoreq => "NUMOREQ",
        };
        f.write_str(token)
    }
}

impl Operator {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Operator::Numeq
                | Operator::Numgt
                | Operator::Numge
                | Operator::Numlt
                | Operator::Numle
                | Operator::Numbt
                | Operator::Numoreq
        )
    }
}

/// Parse an operator token, stripping and recording `NEGATE`/`NOIDX`
/// modifiers. `~foo` or `!foo` sets negate; an additional trailing `+`
/// sets no-index, e.g. `~STREQ+`.
pub fn parse_operator(token: &str) -> Result<(Operator, bool, bool)> {
    let mut s = token;
    let mut negate = false;
    let mut noidx = false;
    if let Some(rest) = s.strip_prefix('~').or_else(|| s.strip_prefix('!')) {
        negate = true;
        s = rest;
    }
    if let Some(rest) = s.strip_suffix('+') {
        noidx = true;
        s = rest;
    }
    let op = match s.to_ascii_uppercase().as_str() {
        "STREQ" => Operator::Streq,
        "STRINC" => Operator::Strinc,
        "STRBW" => Operator::Strbw,
        "STREW" => Operator::Strew,
        "STRAND" => Operator::Strand,
        "STROR" => Operator::Stror,
        "STROREQ" => Operator::Stroreq,
        "STRRX" => Operator::Strrx,
        "NUMEQ" => Operator::Numeq,
        "NUMGT" => Operator::Numgt,
        "NUMGE" => Operator::Numge,
        "NUMLT" => Operator::Numlt,
        "NUMLE" => Operator::Numle,
        "NUMBT" => Operator::Numbt,
        "NUMOREQ" => Operator::Numoreq,
        other => return Err(Error::InvalidArgument(format!("unknown operator {:?}", other))),
    };
    Ok((op, negate, noidx))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderType {
    StrAsc,
    StrDesc,
    NumAsc,
    NumDesc,
}

impl OrderType {
    pub fn parse(token: &str) -> Result<OrderType> {
        match token.to_ascii_uppercase().as_str() {
            "STRASC" => Ok(OrderType::StrAsc),
            "STRDESC" => Ok(OrderType::StrDesc),
            "NUMASC" => Ok(OrderType::NumAsc),
            "NUMDESC" => Ok(OrderType::NumDesc),
            other => Err(Error::InvalidArgument(format!("unknown order type {:?}", other))),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, OrderType::NumAsc | OrderType::NumDesc)
    }

    pub fn is_descending(&self) -> bool {
        matches!(self, OrderType::StrDesc | OrderType::NumDesc)
    }
}

#[derive(Clone, Debug)]
pub struct Condition {
    pub column: Vec<u8>,
    pub op: Operator,
    pub expr: Vec<u8>,
    pub negate: bool,
    pub noidx: bool,
    pub alive: bool,
}

#[derive(Clone, Debug)]
pub struct Order {
    pub column: Vec<u8>,
    pub otype: OrderType,
}

/// Flags a `qry_proc`/`qry_proc2` callback may return, combined with
/// bitwise OR, per §4.5's "Process callback."
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcFlags(pub u32);

impl ProcFlags {
    pub const NOP: ProcFlags = ProcFlags(0);
    pub const PUT: ProcFlags = ProcFlags(0x01);
    pub const OUT: ProcFlags = ProcFlags(0x02);
    pub const STOP: ProcFlags = ProcFlags(0x04);

    pub fn has(&self, flag: ProcFlags) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl std::ops::BitOr for ProcFlags {
    type Output = ProcFlags;
    fn bitor(self, rhs: ProcFlags) -> ProcFlags {
        ProcFlags(self.0 | rhs.0)
    }
}

pub struct Query {
    pub(crate) conditions: Vec<Condition>,
    pub(crate) order: Option<Order>,
    pub(crate) max: Option<usize>,
    pub(crate) skip: usize,
    pub(crate) hint: String,
}

impl Query {
    pub fn new() -> Query {
        Query { conditions: Vec::new(), order: None, max: None, skip: 0, hint: String::new() }
    }

    pub fn add_cond(&mut self, column: impl Into<Vec<u8>>, op_str: &str, expr: impl Into<Vec<u8>>) -> Result<&mut Self> {
        let (op, negate, noidx) = parse_operator(op_str)?;
        self.conditions.push(Condition {
            column: column.into(),
            op,
            expr: expr.into(),
            negate,
            noidx,
            alive: true,
        });
        Ok(self)
    }

    pub fn set_order(&mut self, column: impl Into<Vec<u8>>, otype_str: &str) -> Result<&mut Self> {
        let otype = OrderType::parse(otype_str)?;
        self.order = Some(Order { column: column.into(), otype });
        Ok(self)
    }

    /// `max < 0` means unbounded, matching the original's `int`
    /// sentinel convention (§9's "Unsigned vs signed sizes" note).
    pub fn set_limit(&mut self, max: i64, skip: u64) -> &mut Self {
        self.max = if max < 0 { None } else { Some(max as usize) };
        self.skip = skip as usize;
        self
    }

    pub fn hint(&self) -> &str {
        &self.hint
    }

    pub(crate) fn log_hint(&mut self, line: impl AsRef<str>) {
        if !self.hint.is_empty() {
            self.hint.push('\n');
        }
        self.hint.push_str(line.as_ref());
    }
}

impl Default for Query {
    fn default() -> Query {
        Query::new()
    }
}
