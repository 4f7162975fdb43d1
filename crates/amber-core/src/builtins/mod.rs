//! # Built-in Value Kinds
//!
//! Host-provided kinds that survive a save/reload with their identity:
//! dates, ordered maps, sets, typed numeric arrays, patterns, big integers,
//! number formats, errors and deferred schedulers.
//!
//! Each kind has a descriptor in [`descriptors`] and, where it makes sense,
//! native methods in [`natives`].

pub mod descriptors;
pub mod natives;

use crate::scheduler::DeferredScheduler;
use crate::types::AmberError;
use crate::value::Value;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// BUILTIN
// =============================================================================

/// A built-in value held inside an object cell.
#[derive(Debug)]
pub enum Builtin {
    Date(DateTime<Utc>),
    /// Insertion-ordered key/value pairs. Keys compare by identity.
    Map(Vec<(Value, Value)>),
    /// Insertion-ordered unique values. Members compare by identity.
    Set(Vec<Value>),
    TypedArray(TypedArray),
    RegExp(Pattern),
    BigInt(BigInt),
    NumberFormat(NumberFormat),
    Error(ErrorValue),
    Scheduler(DeferredScheduler),
}

impl Builtin {
    /// Type tag, also used as the descriptor name.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Date(_) => "Date",
            Self::Map(_) => "Map",
            Self::Set(_) => "Set",
            Self::TypedArray(array) => array.tag(),
            Self::RegExp(_) => "RegExp",
            Self::BigInt(_) => "BigInt",
            Self::NumberFormat(_) => "NumberFormat",
            Self::Error(_) => "Error",
            Self::Scheduler(_) => "Scheduler",
        }
    }

    /// Read-only properties exposed to member reads.
    pub(crate) fn property(&self, key: &str) -> Option<Value> {
        match (self, key) {
            (Self::Map(entries), "size") => Some(Value::Number(entries.len() as f64)),
            (Self::Set(items), "size") => Some(Value::Number(items.len() as f64)),
            (Self::TypedArray(array), "length") => Some(Value::Number(array.len() as f64)),
            (Self::TypedArray(array), index) => index
                .parse::<usize>()
                .ok()
                .and_then(|i| array.get(i))
                .map(Value::Number),
            (Self::RegExp(pattern), "source") => Some(Value::from(pattern.source())),
            (Self::RegExp(pattern), "flags") => Some(Value::from(pattern.flags())),
            (Self::Error(error), "name") => Some(Value::from(error.name.as_str())),
            (Self::Error(error), "message") => Some(Value::from(error.message.as_str())),
            (Self::NumberFormat(format), "locale") => Some(Value::from(format.locale())),
            (Self::Date(date), "time") => Some(Value::Number(date.timestamp_millis() as f64)),
            _ => None,
        }
    }

    /// Values held by this built-in.
    pub(crate) fn children(&self) -> Vec<Value> {
        match self {
            Self::Map(entries) => entries
                .iter()
                .flat_map(|(k, v)| [k.clone(), v.clone()])
                .collect(),
            Self::Set(items) => items.clone(),
            Self::Scheduler(scheduler) => scheduler
                .entries()
                .into_iter()
                .flat_map(|entry| entry.args)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn deep_clone(&self) -> Builtin {
        match self {
            Self::Date(date) => Self::Date(*date),
            Self::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.deep_clone(), v.deep_clone()))
                    .collect(),
            ),
            Self::Set(items) => Self::Set(items.iter().map(Value::deep_clone).collect()),
            Self::TypedArray(array) => Self::TypedArray(array.clone()),
            Self::RegExp(pattern) => Self::RegExp(pattern.clone()),
            Self::BigInt(n) => Self::BigInt(n.clone()),
            Self::NumberFormat(format) => Self::NumberFormat(format.clone()),
            Self::Error(error) => Self::Error(error.clone()),
            Self::Scheduler(scheduler) => Self::Scheduler(scheduler.detached_copy()),
        }
    }

    /// Plain structural rendering, used when no registry is involved.
    ///
    /// Dates become ISO strings, maps become lists of pairs, sets and typed
    /// arrays become lists. Kinds with no useful plain form become `{}`.
    pub(crate) fn structural(&self) -> Value {
        match self {
            Self::Date(date) => Value::from(format_date(date)),
            Self::Map(entries) => Value::list(
                entries
                    .iter()
                    .map(|(k, v)| Value::list(vec![k.clone(), v.clone()]))
                    .collect(),
            ),
            Self::Set(items) => Value::list(items.clone()),
            Self::TypedArray(array) => {
                Value::list(array.to_f64().into_iter().map(Value::Number).collect())
            }
            Self::BigInt(n) => Value::from(n.as_str()),
            Self::Error(error) => Value::map([
                ("name", Value::from(error.name.as_str())),
                ("message", Value::from(error.message.as_str())),
            ]),
            Self::RegExp(_) | Self::NumberFormat(_) | Self::Scheduler(_) => Value::empty_map(),
        }
    }
}

impl PartialEq for Builtin {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => a == b,
            (Self::TypedArray(a), Self::TypedArray(b)) => a == b,
            (Self::RegExp(a), Self::RegExp(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::NumberFormat(a), Self::NumberFormat(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a == b,
            (Self::Scheduler(a), Self::Scheduler(b)) => a.entries() == b.entries(),
            _ => false,
        }
    }
}

/// Render a date the way it is stored: RFC 3339, millisecond precision, `Z`.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored date.
pub fn parse_date(text: &str) -> Result<DateTime<Utc>, AmberError> {
    DateTime::parse_from_rfc3339(text)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|e| AmberError::revive("Date", format!("{text:?}: {e}")))
}

impl Value {
    /// A date at the given milliseconds since the Unix epoch.
    pub fn date_from_millis(millis: i64) -> Option<Value> {
        DateTime::from_timestamp_millis(millis).map(|date| Value::builtin(Builtin::Date(date)))
    }
}

// =============================================================================
// TYPED ARRAYS
// =============================================================================

/// Names of the fixed-width numeric array kinds.
pub const TYPED_ARRAY_TAGS: [&str; 8] = [
    "Int8Array",
    "Uint8Array",
    "Int16Array",
    "Uint16Array",
    "Int32Array",
    "Uint32Array",
    "Float32Array",
    "Float64Array",
];

/// A fixed-width numeric array.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedArray {
    Int8(Vec<i8>),
    Uint8(Vec<u8>),
    Int16(Vec<i16>),
    Uint16(Vec<u16>),
    Int32(Vec<i32>),
    Uint32(Vec<u32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

macro_rules! widen {
    ($items:expr) => {
        $items.iter().map(|&n| f64::from(n)).collect()
    };
}

macro_rules! narrow {
    ($values:expr, $ty:ty) => {
        $values.iter().map(|&n| n as $ty).collect()
    };
}

impl TypedArray {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Int8(_) => "Int8Array",
            Self::Uint8(_) => "Uint8Array",
            Self::Int16(_) => "Int16Array",
            Self::Uint16(_) => "Uint16Array",
            Self::Int32(_) => "Int32Array",
            Self::Uint32(_) => "Uint32Array",
            Self::Float32(_) => "Float32Array",
            Self::Float64(_) => "Float64Array",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Int8(v) => v.len(),
            Self::Uint8(v) => v.len(),
            Self::Int16(v) => v.len(),
            Self::Uint16(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Uint32(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.to_f64().get(index).copied()
    }

    /// Every element widened to `f64`.
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Self::Int8(v) => widen!(v),
            Self::Uint8(v) => widen!(v),
            Self::Int16(v) => widen!(v),
            Self::Uint16(v) => widen!(v),
            Self::Int32(v) => widen!(v),
            Self::Uint32(v) => widen!(v),
            Self::Float32(v) => widen!(v),
            Self::Float64(v) => v.clone(),
        }
    }

    /// Build an array of the tagged kind. Out-of-range values saturate.
    pub fn from_f64(tag: &str, values: &[f64]) -> Option<Self> {
        Some(match tag {
            "Int8Array" => Self::Int8(narrow!(values, i8)),
            "Uint8Array" => Self::Uint8(narrow!(values, u8)),
            "Int16Array" => Self::Int16(narrow!(values, i16)),
            "Uint16Array" => Self::Uint16(narrow!(values, u16)),
            "Int32Array" => Self::Int32(narrow!(values, i32)),
            "Uint32Array" => Self::Uint32(narrow!(values, u32)),
            "Float32Array" => Self::Float32(narrow!(values, f32)),
            "Float64Array" => Self::Float64(values.to_vec()),
            _ => return None,
        })
    }
}

// =============================================================================
// PATTERNS
// =============================================================================

/// A compiled regular expression with its source and flags.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    flags: String,
    regex: Regex,
}

impl Pattern {
    /// Compile a pattern. Supported flags: `i`, `m`, `s`; `g`, `u`, `y`, `d`
    /// and `v` are recorded but have no effect on matching.
    pub fn new(source: impl Into<String>, flags: impl Into<String>) -> Result<Self, AmberError> {
        let source = source.into();
        let flags = flags.into();
        if let Some(bad) = flags.chars().find(|c| !"dgimsuyv".contains(*c)) {
            return Err(AmberError::revive("RegExp", format!("unknown flag `{bad}`")));
        }
        let regex = RegexBuilder::new(&source)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .build()
            .map_err(|e| AmberError::revive("RegExp", e.to_string()))?;
        Ok(Self {
            source,
            flags,
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn flags(&self) -> &str {
        &self.flags
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.flags == other.flags
    }
}

// =============================================================================
// BIG INTEGERS
// =============================================================================

/// An arbitrary-precision integer kept as normalized decimal digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BigInt(String);

impl BigInt {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0.starts_with('-')
    }
}

impl FromStr for BigInt {
    type Err = AmberError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmberError::revive("BigInt", format!("{text:?} is not an integer")));
        }
        let digits = digits.trim_start_matches('0');
        Ok(match (digits.is_empty(), negative) {
            (true, _) => Self("0".to_string()),
            (false, true) => Self(format!("-{digits}")),
            (false, false) => Self(digits.to_string()),
        })
    }
}

impl From<i128> for BigInt {
    fn from(n: i128) -> Self {
        Self(n.to_string())
    }
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// NUMBER FORMATS
// =============================================================================

/// Locale-aware decimal number formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberFormat {
    locale: String,
    minimum_fraction_digits: u8,
    maximum_fraction_digits: u8,
    use_grouping: bool,
}

impl NumberFormat {
    /// Defaults: 0 to 3 fraction digits, grouping on.
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            minimum_fraction_digits: 0,
            maximum_fraction_digits: 3,
            use_grouping: true,
        }
    }

    #[must_use]
    pub fn with_fraction_digits(mut self, minimum: u8, maximum: u8) -> Self {
        self.minimum_fraction_digits = minimum.min(20);
        self.maximum_fraction_digits = maximum.clamp(self.minimum_fraction_digits, 20);
        self
    }

    #[must_use]
    pub fn with_grouping(mut self, use_grouping: bool) -> Self {
        self.use_grouping = use_grouping;
        self
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn minimum_fraction_digits(&self) -> u8 {
        self.minimum_fraction_digits
    }

    pub fn maximum_fraction_digits(&self) -> u8 {
        self.maximum_fraction_digits
    }

    pub fn use_grouping(&self) -> bool {
        self.use_grouping
    }

    fn language(&self) -> &str {
        self.locale.split(['-', '_']).next().unwrap_or_default()
    }

    fn separators(&self) -> (&'static str, &'static str) {
        match self.language() {
            "de" | "es" | "it" | "nl" | "pt" | "id" | "tr" => (".", ","),
            "fr" | "ru" | "pl" | "cs" | "sv" | "fi" | "nb" | "uk" => ("\u{a0}", ","),
            _ => (",", "."),
        }
    }

    pub fn format(&self, n: f64) -> String {
        if n.is_nan() {
            return "NaN".to_string();
        }
        if n.is_infinite() {
            return if n > 0.0 { "∞" } else { "-∞" }.to_string();
        }

        let fixed = format!("{:.*}", usize::from(self.maximum_fraction_digits), n.abs());
        let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
        let mut frac = frac_part.trim_end_matches('0').to_string();
        while frac.len() < usize::from(self.minimum_fraction_digits) {
            frac.push('0');
        }

        let (group_sep, decimal_sep) = self.separators();
        let mut out = String::new();
        if n.is_sign_negative() && (int_part.bytes().any(|b| b != b'0') || !frac.is_empty()) {
            out.push('-');
        }
        if self.use_grouping {
            let len = int_part.len();
            for (i, digit) in int_part.chars().enumerate() {
                if i > 0 && (len - i) % 3 == 0 {
                    out.push_str(group_sep);
                }
                out.push(digit);
            }
        } else {
            out.push_str(int_part);
        }
        if !frac.is_empty() {
            out.push_str(decimal_sep);
            out.push_str(&frac);
        }
        out
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Names of the standard error hierarchy.
pub const ERROR_NAMES: [&str; 8] = [
    "Error",
    "TypeError",
    "RangeError",
    "SyntaxError",
    "ReferenceError",
    "EvalError",
    "URIError",
    "AggregateError",
];

/// An error object: name, message and optional stack and source location.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub file_name: Option<String>,
    pub line_number: Option<u32>,
    pub column_number: Option<u32>,
}

impl ErrorValue {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    /// True if the name belongs to the standard hierarchy.
    pub fn is_standard(&self) -> bool {
        ERROR_NAMES.contains(&self.name.as_str())
    }
}

// =============================================================================
// TESTS
// =============================================================================
