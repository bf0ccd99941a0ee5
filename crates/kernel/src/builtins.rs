//! Built-in non-plain reference types: Date, RegExp, Error and Function.
//!
//! Each type is a cheap-to-clone handle over shared, interior-mutable data.
//! Cloning a handle shares identity; use the copy engine to duplicate.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::{Regex, RegexBuilder};

use crate::value::{Identity, Value, ValueError};

/// Flag letters accepted by [`RegExpRef`], in canonical order.
const REGEXP_FLAGS: &str = "dgimsuvy";

/// Largest absolute epoch offset a Date can hold (±100,000,000 days).
const MAX_TIME_MS: f64 = 8.64e15;

/// A mutable point in time, stored as milliseconds since the Unix epoch.
///
/// `NaN` denotes an invalid date.
#[derive(Clone)]
pub struct DateRef(Rc<RefCell<f64>>);

impl DateRef {
    pub fn new(millis: f64) -> Self {
        Self(Rc::new(RefCell::new(clip_time(millis))))
    }

    /// Epoch milliseconds (`NaN` if invalid).
    pub fn get_time(&self) -> f64 {
        *self.0.borrow()
    }

    pub fn set_time(&self, millis: f64) {
        *self.0.borrow_mut() = clip_time(millis);
    }

    pub fn is_valid(&self) -> bool {
        !self.get_time().is_nan()
    }

    /// ISO-8601 rendering with millisecond precision, `None` for invalid dates.
    pub fn to_iso_string(&self) -> Option<String> {
        let millis = self.get_time();
        if millis.is_nan() {
            return None;
        }
        DateTime::<Utc>::from_timestamp_millis(millis as i64)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn identity(&self) -> Identity {
        Identity::of(&self.0)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for DateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_iso_string() {
            Some(iso) => write!(f, "Date({iso})"),
            None => f.write_str("Date(Invalid Date)"),
        }
    }
}

/// Truncate to whole milliseconds and reject out-of-range instants.
fn clip_time(millis: f64) -> f64 {
    if !millis.is_finite() || millis.abs() > MAX_TIME_MS {
        return f64::NAN;
    }
    millis.trunc() + 0.0
}

struct RegExpData {
    source: String,
    flags: String,
    last_index: usize,
    compiled: Option<Regex>,
}

/// A regular expression: pattern source, flag string and match cursor.
///
/// The pattern is compiled lazily on first match, so any source string can
/// be held and round-tripped even if the matcher cannot compile it.
/// Match offsets are byte offsets into the haystack.
#[derive(Clone)]
pub struct RegExpRef(Rc<RefCell<RegExpData>>);

impl RegExpRef {
    /// Build a regular expression. Flags are validated and stored in
    /// canonical order (`"dgimsuvy"`).
    pub fn new(source: impl Into<String>, flags: &str) -> Result<Self, ValueError> {
        let flags = canonical_flags(flags)?;
        Ok(Self(Rc::new(RefCell::new(RegExpData {
            source: source.into(),
            flags,
            last_index: 0,
            compiled: None,
        }))))
    }

    /// A distinct expression with the same source and flags and a reset
    /// `last_index`.
    pub(crate) fn duplicate(&self) -> Self {
        let data = self.0.borrow();
        Self(Rc::new(RefCell::new(RegExpData {
            source: data.source.clone(),
            flags: data.flags.clone(),
            last_index: 0,
            compiled: data.compiled.clone(),
        })))
    }

    pub fn source(&self) -> String {
        self.0.borrow().source.clone()
    }

    pub fn flags(&self) -> String {
        self.0.borrow().flags.clone()
    }

    pub fn has_flag(&self, flag: char) -> bool {
        self.0.borrow().flags.contains(flag)
    }

    pub fn last_index(&self) -> usize {
        self.0.borrow().last_index
    }

    pub fn set_last_index(&self, index: usize) {
        self.0.borrow_mut().last_index = index;
    }

    /// Test whether the pattern matches anywhere in `haystack`.
    ///
    /// With the `g` or `y` flag this advances `last_index` like `exec`.
    pub fn is_match(&self, haystack: &str) -> Result<bool, ValueError> {
        Ok(self.find(haystack)?.is_some())
    }

    /// Find the next match, honoring `last_index` for global and sticky
    /// expressions. Returns the byte range of the match.
    pub fn find(&self, haystack: &str) -> Result<Option<(usize, usize)>, ValueError> {
        let mut data = self.0.borrow_mut();
        let regex = match data.compiled.clone() {
            Some(regex) => regex,
            None => {
                let regex = compile(&data.source, &data.flags)?;
                data.compiled = Some(regex.clone());
                regex
            }
        };

        let global = data.flags.contains('g');
        let sticky = data.flags.contains('y');
        if !global && !sticky {
            return Ok(regex.find(haystack).map(|m| (m.start(), m.end())));
        }

        let start = data.last_index;
        let found = if start > haystack.len() || !haystack.is_char_boundary(start) {
            None
        } else {
            regex
                .find_at(haystack, start)
                .filter(|m| !sticky || m.start() == start)
        };
        match found {
            Some(m) => {
                data.last_index = m.end();
                Ok(Some((m.start(), m.end())))
            }
            None => {
                data.last_index = 0;
                Ok(None)
            }
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::of(&self.0)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for RegExpRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0.borrow();
        write!(f, "/{}/{}", data.source, data.flags)
    }
}

fn canonical_flags(flags: &str) -> Result<String, ValueError> {
    let mut seen = [false; REGEXP_FLAGS.len()];
    for c in flags.chars() {
        let slot = REGEXP_FLAGS
            .find(c)
            .ok_or_else(|| ValueError::InvalidFlags(flags.to_string()))?;
        if seen[slot] {
            return Err(ValueError::InvalidFlags(flags.to_string()));
        }
        seen[slot] = true;
    }
    Ok(REGEXP_FLAGS
        .chars()
        .zip(seen)
        .filter_map(|(c, on)| on.then_some(c))
        .collect())
}

fn compile(source: &str, flags: &str) -> Result<Regex, ValueError> {
    RegexBuilder::new(source)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()
        .map_err(|e| ValueError::Pattern {
            pattern: source.to_string(),
            reason: e.to_string(),
        })
}

struct ErrorData {
    name: String,
    message: String,
    stack: Option<String>,
    fields: BTreeMap<String, Value>,
}

/// An error object: runtime type name, message, optional stack trace and
/// any custom fields attached to it.
#[derive(Clone)]
pub struct ErrorRef(Rc<RefCell<ErrorData>>);

impl ErrorRef {
    /// A plain `Error` with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_name("Error", message)
    }

    /// An error of a specific runtime type, e.g. `TypeError`.
    pub fn with_name(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self(Rc::new(RefCell::new(ErrorData {
            name: name.into(),
            message: message.into(),
            stack: None,
            fields: BTreeMap::new(),
        })))
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn message(&self) -> String {
        self.0.borrow().message.clone()
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.0.borrow_mut().message = message.into();
    }

    pub fn stack(&self) -> Option<String> {
        self.0.borrow().stack.clone()
    }

    pub fn set_stack(&self, stack: Option<String>) {
        self.0.borrow_mut().stack = stack;
    }

    /// Attach a custom field (e.g. `code`).
    pub fn set_field(&self, key: impl Into<String>, value: Value) {
        self.0.borrow_mut().fields.insert(key.into(), value);
    }

    pub fn field(&self, key: &str) -> Option<Value> {
        self.0.borrow().fields.get(key).cloned()
    }

    pub fn field_count(&self) -> usize {
        self.0.borrow().fields.len()
    }

    pub fn identity(&self) -> Identity {
        Identity::of(&self.0)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ErrorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0.borrow();
        write!(f, "{}: {}", data.name, data.message)
    }
}

/// Signature of a native function body.
pub type NativeFn = dyn Fn(&[Value]) -> Value;

/// An opaque callable. Functions carry identity but no copyable data.
#[derive(Clone)]
pub struct Function {
    name: Rc<str>,
    body: Rc<NativeFn>,
}

impl Function {
    pub fn new(name: &str, body: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Self {
            name: Rc::from(name),
            body: Rc::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.body)(args)
    }

    pub fn identity(&self) -> Identity {
        Identity::of(&self.body)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name)
    }
}
