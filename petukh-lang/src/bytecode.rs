use core::fmt::Debug;
use std::fmt::{Display, Formatter, Write};

use serde::Serialize;
use string_interner::{symbol::SymbolU32, StringInterner, Symbol};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    PushInt(i64),
    PushDouble(f64),
    PushString(InternedString),
    Load(VariableName),
    Store(VariableName),
    NewArray,
    LoadIndex,
    StoreIndex(VariableName), // stack: value, index (top)
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    Not,
    Jmp(LabelName),
    Jz(LabelName),
    Call(LabelName),
    Ret,
    Pop,
    Label(LabelName),
}

impl Op {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::PushInt(_) => "PUSH_INT",
            Op::PushDouble(_) => "PUSH_DOUBLE",
            Op::PushString(_) => "PUSH_STRING",
            Op::Load(_) => "LOAD",
            Op::Store(_) => "STORE",
            Op::NewArray => "NEW_ARRAY",
            Op::LoadIndex => "LOAD_INDEX",
            Op::StoreIndex(_) => "STORE_INDEX",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Mod => "MOD",
            Op::Neg => "NEG",
            Op::Eq => "EQ",
            Op::Neq => "NEQ",
            Op::Lt => "LT",
            Op::Gt => "GT",
            Op::Le => "LE",
            Op::Ge => "GE",
            Op::Not => "NOT",
            Op::Jmp(_) => "JMP",
            Op::Jz(_) => "JZ",
            Op::Call(_) => "CALL",
            Op::Ret => "RET",
            Op::Pop => "POP",
            Op::Label(_) => "LABEL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Loc {
    pub line: u32,
    pub col: u32,
}

#[derive(Eq, Hash, PartialEq, Clone, Copy)]
pub struct InternedString(pub SymbolU32);
impl Debug for InternedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "s_{}", self.0.to_usize())
    }
}

#[derive(Eq, Hash, PartialEq, Clone, Copy)]
pub struct VariableName(pub SymbolU32);
impl Debug for VariableName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "v_{}", self.0.to_usize())
    }
}

#[derive(Eq, Hash, PartialEq, Clone, Copy)]
pub struct LabelName(pub SymbolU32);
impl Debug for LabelName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "l_{}", self.0.to_usize())
    }
}

/// Runtime datum. Arrays are held by value, so copying a variable copies
/// its elements too.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Int(i64),
    Double(f64),
    Str(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn zeroed_array(len: usize) -> Self {
        Value::Array(vec![Value::Int(0); len])
    }

    /// The falsy values are 0, 0.0, "", an empty array and `None`.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::None => true,
            Value::Int(i) => *i == 0,
            Value::Double(d) => *d == 0.0,
            Value::Str(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
        }
    }

    pub fn as_int(&self) -> i64 {
        match self {
            Value::Int(i) => *i,
            Value::Double(d) => *d as i64,
            Value::Str(s) => parse_int_prefix(s),
            Value::None | Value::Array(_) => 0,
        }
    }

    pub fn as_double(&self) -> f64 {
        match self {
            Value::Int(i) => *i as f64,
            Value::Double(d) => *d,
            Value::Str(s) => parse_double_prefix(s),
            Value::None | Value::Array(_) => 0.0,
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Double(d) => format_general(*d),
            Value::Str(s) => s.clone(),
            Value::None | Value::Array(_) => String::new(),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

/// Leading integer of `s` after optional whitespace and sign, or 0.
pub fn parse_int_prefix(s: &str) -> i64 {
    let s = s.trim_start();
    let digits_start = usize::from(s.starts_with(['+', '-']));
    let end = s[digits_start..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(s.len(), |i| i + digits_start);
    s[..end].parse().unwrap_or(0)
}

/// Longest leading float of `s` after optional whitespace, or 0.0.
pub fn parse_double_prefix(s: &str) -> f64 {
    let s = s.trim_start();
    let candidate = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')))
        .map_or(s, |end| &s[..end]);
    (1..=candidate.len())
        .rev()
        .filter(|&end| candidate.is_char_boundary(end))
        .find_map(|end| candidate[..end].parse().ok())
        .unwrap_or(0.0)
}

/// Format like C's `%g`: six significant digits, trailing zeros removed,
/// scientific notation for very large or very small magnitudes.
pub fn format_general(value: f64) -> String {
    const PRECISION: i32 = 6;

    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_owned();
    }

    let scientific = format!("{:.*e}", (PRECISION - 1) as usize, value);
    let Some((mantissa, exponent)) = scientific
        .split_once('e')
        .and_then(|(m, e)| e.parse::<i32>().ok().map(|e| (m, e)))
    else {
        return value.to_string();
    };

    if exponent < -4 || exponent >= PRECISION {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{}{:02}",
            trim_fraction(mantissa),
            sign,
            exponent.abs()
        )
    } else {
        let decimals = (PRECISION - 1 - exponent) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_owned()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// A flat instruction stream. Labels stay symbolic; the VM resolves them
/// when it loads the program.
#[derive(Debug, Default)]
pub struct Program {
    strings: StringInterner,
    pub code_locs: Vec<Loc>,
    pub code: Vec<Op>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Helpers for compiler to build programs

    pub fn intern_string(&mut self, s: &str) -> InternedString {
        InternedString(self.strings.get_or_intern(s))
    }

    pub fn intern_variable_name(&mut self, name: &str) -> VariableName {
        VariableName(self.strings.get_or_intern(name))
    }

    pub fn intern_label(&mut self, name: &str) -> LabelName {
        LabelName(self.strings.get_or_intern(name))
    }

    /// Helpers for vm to run programs

    pub fn string(&self, s: &InternedString) -> &str {
        self.strings.resolve(s.0).unwrap_or_default()
    }

    pub fn variable_name(&self, variable_name: &VariableName) -> &str {
        self.strings.resolve(variable_name.0).unwrap_or_default()
    }

    pub fn label(&self, label: &LabelName) -> &str {
        self.strings.resolve(label.0).unwrap_or_default()
    }

    pub fn find_label(&self, name: &str) -> Option<LabelName> {
        self.strings.get(name).map(LabelName)
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Textual operand of an instruction, if it has one.
    pub fn operand(&self, op: &Op) -> Option<String> {
        match op {
            Op::PushInt(i) => Some(i.to_string()),
            Op::PushDouble(d) => Some(d.to_string()),
            Op::PushString(s) => Some(self.string(s).to_owned()),
            Op::Load(name) | Op::Store(name) | Op::StoreIndex(name) => {
                Some(self.variable_name(name).to_owned())
            }
            Op::Jmp(label) | Op::Jz(label) | Op::Call(label) | Op::Label(label) => {
                Some(self.label(label).to_owned())
            }
            _ => None,
        }
    }

    /// One line per instruction: index, mnemonic and operand.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for (i, op) in self.code.iter().enumerate() {
            // writing to a String never fails
            let _ = match self.operand(op) {
                Some(arg) => writeln!(out, "{} {} {}", i, op.mnemonic(), arg),
                None => writeln!(out, "{} {}", i, op.mnemonic()),
            };
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_general() {
        assert_eq!(format_general(2.5), "2.5");
        assert_eq!(format_general(3.0), "3");
        assert_eq!(format_general(1.0 / 3.0), "0.333333");
        assert_eq!(format_general(123456.0), "123456");
        assert_eq!(format_general(1234567.0), "1.23457e+06");
        assert_eq!(format_general(0.0001), "0.0001");
        assert_eq!(format_general(0.00001234), "1.234e-05");
        assert_eq!(format_general(-42.125), "-42.125");
        assert_eq!(format_general(0.0), "0");
        assert_eq!(format_general(1e100), "1e+100");
        assert_eq!(format_general(f64::INFINITY), "inf");
    }

    #[test]
    fn test_lenient_parsing() {
        assert_eq!(parse_int_prefix("42"), 42);
        assert_eq!(parse_int_prefix("  -17abc"), -17);
        assert_eq!(parse_int_prefix("abc"), 0);
        assert_eq!(parse_int_prefix(""), 0);
        assert_eq!(parse_int_prefix("99999999999999999999"), 0);
        assert_eq!(parse_double_prefix("2.5xyz"), 2.5);
        assert_eq!(parse_double_prefix(" 1e3"), 1000.0);
        assert_eq!(parse_double_prefix("7"), 7.0);
        assert_eq!(parse_double_prefix("hello"), 0.0);
    }

    #[test]
    fn test_value_coercions() {
        assert_eq!(Value::Double(3.9).as_int(), 3);
        assert_eq!(Value::Int(4).as_double(), 4.0);
        assert_eq!(Value::Double(1.0).as_string(), Value::Int(1).as_string());
        assert_eq!(Value::Str("12".into()).as_int(), 12);
        assert_eq!(Value::zeroed_array(2).as_string(), "");
        assert!(Value::None.is_zero());
        assert!(Value::Str(String::new()).is_zero());
        assert!(!Value::Str("0".into()).is_zero());
        assert!(!Value::zeroed_array(1).is_zero());
    }

    #[test]
    fn test_listing() {
        let mut program = Program::new();
        let main = program.intern_label("main");
        let x = program.intern_variable_name("x");
        let hello = program.intern_string("hi there");
        program.code = vec![
            Op::Label(main),
            Op::PushInt(5),
            Op::Store(x),
            Op::PushString(hello),
            Op::Ret,
        ];
        program.code_locs = vec![Loc::default(); 5];

        assert_eq!(
            program.listing(),
            "0 LABEL main\n1 PUSH_INT 5\n2 STORE x\n3 PUSH_STRING hi there\n4 RET\n"
        );
        assert_eq!(program.find_label("main"), Some(main));
    }
}
