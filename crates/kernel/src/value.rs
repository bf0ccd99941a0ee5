//! The dynamic value graph held in store state.
//!
//! Primitives (`Null`, `Bool`, `Number`, `String`) are immutable and compared
//! by value. Every other variant is a handle to shared data with reference
//! identity, so values may form shared and cyclic graphs.
//!
//! Reference cycles are not collected: a cyclic graph stays allocated until
//! one of its edges is removed.

use std::collections::HashSet;
use std::fmt::{self, Write as _};
use std::rc::Rc;

use crate::builtins::{DateRef, ErrorRef, Function, RegExpRef};
use crate::container::{ArrayRef, ObjectRef};

/// Errors from value construction and conversion.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("cyclic structure cannot be converted to JSON")]
    Cycle,
    #[error("invalid regular expression flags: {0:?}")]
    InvalidFlags(String),
    #[error("invalid regular expression /{pattern}/: {reason}")]
    Pattern { pattern: String, reason: String },
    #[error("prototype chain would become cyclic")]
    PrototypeCycle,
}

/// Pointer identity of a reference value.
///
/// Only meaningful while the value it was taken from is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(usize);

impl Identity {
    pub(crate) fn of<T: ?Sized>(rc: &Rc<T>) -> Self {
        Self(Rc::as_ptr(rc) as *const () as usize)
    }
}

/// Classification of a value, one tag per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Function,
    Date,
    RegExp,
    Error,
    Array,
    Object,
}

impl ValueKind {
    /// Primitive kinds are immutable and have no identity.
    pub fn is_primitive(self) -> bool {
        matches!(self, Self::Null | Self::Bool | Self::Number | Self::String)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Function => "function",
            Self::Date => "date",
            Self::RegExp => "regexp",
            Self::Error => "error",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// A node in the state graph.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Function(Function),
    Date(DateRef),
    RegExp(RegExpRef),
    Error(ErrorRef),
    Array(ArrayRef),
    Object(ObjectRef),
}

impl Value {
    /// A new empty object.
    pub fn object() -> Self {
        Self::Object(ObjectRef::new())
    }

    /// A new object holding `entries` as enumerable properties.
    pub fn object_from<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let obj = ObjectRef::new();
        for (key, value) in entries {
            obj.set(key, value);
        }
        Self::Object(obj)
    }

    /// A new array holding `items`.
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Array(ArrayRef::from_vec(items.into_iter().collect()))
    }

    pub fn date(millis: f64) -> Self {
        Self::Date(DateRef::new(millis))
    }

    pub fn regexp(source: impl Into<String>, flags: &str) -> Result<Self, ValueError> {
        Ok(Self::RegExp(RegExpRef::new(source, flags)?))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorRef::new(message))
    }

    pub fn function(name: &str, body: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Self::Function(Function::new(name, body))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Number(_) => ValueKind::Number,
            Self::String(_) => ValueKind::String,
            Self::Function(_) => ValueKind::Function,
            Self::Date(_) => ValueKind::Date,
            Self::RegExp(_) => ValueKind::RegExp,
            Self::Error(_) => ValueKind::Error,
            Self::Array(_) => ValueKind::Array,
            Self::Object(_) => ValueKind::Object,
        }
    }

    pub fn is_primitive(&self) -> bool {
        self.kind().is_primitive()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Identity of reference values and functions; `None` for primitives.
    pub fn identity(&self) -> Option<Identity> {
        match self {
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => None,
            Self::Function(f) => Some(f.identity()),
            Self::Date(d) => Some(d.identity()),
            Self::RegExp(r) => Some(r.identity()),
            Self::Error(e) => Some(e.identity()),
            Self::Array(a) => Some(a.identity()),
            Self::Object(o) => Some(o.identity()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateRef> {
        match self {
            Self::Date(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_regexp(&self) -> Option<&RegExpRef> {
        match self {
            Self::RegExp(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorRef> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Property access: object keys (through the prototype chain) or array
    /// indices written as decimal strings.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Self::Object(o) => o.get(key),
            Self::Array(a) => key.parse::<usize>().ok().and_then(|i| a.get(i)),
            _ => None,
        }
    }

    /// Truthiness: `null`, `false`, `0`, `NaN` and `""` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Strict equality: primitives by value, everything else by identity.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Structural equality over own enumerable data.
    ///
    /// Terminates on cyclic graphs: a pair of nodes already under comparison
    /// is assumed equal. `NaN` equals `NaN`; functions compare by identity.
    pub fn deep_eq(&self, other: &Value) -> bool {
        deep_eq_inner(self, other, &mut HashSet::new())
    }
}

fn deep_eq_inner(a: &Value, b: &Value, seen: &mut HashSet<(Identity, Identity)>) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::Date(x), Value::Date(y)) => {
            let (x, y) = (x.get_time(), y.get_time());
            x == y || (x.is_nan() && y.is_nan())
        }
        (Value::RegExp(x), Value::RegExp(y)) => {
            x.source() == y.source() && x.flags() == y.flags()
        }
        (Value::Error(x), Value::Error(y)) => x.name() == y.name() && x.message() == y.message(),
        (Value::Array(x), Value::Array(y)) => {
            if !seen.insert((x.identity(), y.identity())) {
                return true;
            }
            let (xs, ys) = (x.to_vec(), y.to_vec());
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(p, q)| deep_eq_inner(p, q, seen))
        }
        (Value::Object(x), Value::Object(y)) => {
            if !seen.insert((x.identity(), y.identity())) {
                return true;
            }
            let (xs, ys) = (x.entries(), y.entries());
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && deep_eq_inner(va, vb, seen))
        }
        _ => a.strict_eq(b),
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Self::Object(o)
    }
}

impl From<ArrayRef> for Value {
    fn from(a: ArrayRef) -> Self {
        Self::Array(a)
    }
}

impl From<DateRef> for Value {
    fn from(d: DateRef) -> Self {
        Self::Date(d)
    }
}

impl From<RegExpRef> for Value {
    fn from(r: RegExpRef) -> Self {
        Self::RegExp(r)
    }
}

impl From<ErrorRef> for Value {
    fn from(e: ErrorRef) -> Self {
        Self::Error(e)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Self::Function(f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        render(self, &mut out, &mut Vec::new())?;
        f.write_str(&out)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Render a number the way a script console would.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == f64::INFINITY {
        "Infinity".to_string()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        // -0 prints as 0
        format!("{}", n + 0.0)
    }
}

/// Cycle-aware rendering; ancestors on `stack` print as `[Circular]`.
fn render(value: &Value, out: &mut String, stack: &mut Vec<Identity>) -> fmt::Result {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => write!(out, "{b}")?,
        Value::Number(n) => out.push_str(&format_number(*n)),
        Value::String(s) => write!(out, "{s:?}")?,
        Value::Function(func) => write!(out, "{func:?}")?,
        Value::Date(d) => match d.to_iso_string() {
            Some(iso) => out.push_str(&iso),
            None => out.push_str("Invalid Date"),
        },
        Value::RegExp(r) => write!(out, "{r:?}")?,
        Value::Error(e) => write!(out, "[{e:?}]")?,
        Value::Array(a) => {
            if stack.contains(&a.identity()) {
                out.push_str("[Circular]");
                return Ok(());
            }
            stack.push(a.identity());
            out.push('[');
            for (i, item) in a.to_vec().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render(item, out, stack)?;
            }
            out.push(']');
            stack.pop();
        }
        Value::Object(o) => {
            if stack.contains(&o.identity()) {
                out.push_str("[Circular]");
                return Ok(());
            }
            let entries = o.entries();
            if entries.is_empty() {
                out.push_str("{}");
                return Ok(());
            }
            stack.push(o.identity());
            out.push_str("{ ");
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write!(out, "{key}: ")?;
                render(item, out, stack)?;
            }
            out.push_str(" }");
            stack.pop();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_strict_eq_by_value() {
        assert!(Value::from(1.5).strict_eq(&Value::from(1.5)));
        assert!(Value::from("a").strict_eq(&Value::from("a")));
        assert!(Value::Null.strict_eq(&Value::Null));
        assert!(!Value::from(f64::NAN).strict_eq(&Value::from(f64::NAN)));
        assert!(!Value::from(1.0).strict_eq(&Value::from("1")));
    }

    #[test]
    fn objects_strict_eq_by_identity() {
        let a = Value::object();
        let b = Value::object();
        assert!(a.strict_eq(&a.clone()));
        assert!(!a.strict_eq(&b));
        assert!(a.deep_eq(&b));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from(false).is_truthy());
        assert!(!Value::from(0.0).is_truthy());
        assert!(!Value::from(f64::NAN).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::object().is_truthy());
        assert!(Value::array([]).is_truthy());
    }

    #[test]
    fn deep_eq_handles_cycles() {
        let a = ObjectRef::new();
        a.set("self", Value::Object(a.clone()));
        let b = ObjectRef::new();
        b.set("self", Value::Object(b.clone()));
        assert!(Value::Object(a).deep_eq(&Value::Object(b)));
    }

    #[test]
    fn deep_eq_detects_differences() {
        let a = Value::object_from([("x", Value::from(1.0))]);
        let b = Value::object_from([("x", Value::from(2.0))]);
        let c = Value::object_from([("y", Value::from(1.0))]);
        assert!(!a.deep_eq(&b));
        assert!(!a.deep_eq(&c));
        assert!(!Value::array([Value::from(1.0)]).deep_eq(&Value::array([])));
    }

    #[test]
    fn deep_eq_builtins() {
        assert!(Value::date(5.0).deep_eq(&Value::date(5.0)));
        assert!(!Value::date(5.0).deep_eq(&Value::date(6.0)));
        let r1 = Value::regexp("a", "g").unwrap();
        let r2 = Value::regexp("a", "g").unwrap();
        assert!(r1.deep_eq(&r2));
        assert!(Value::error("boom").deep_eq(&Value::error("boom")));
    }

    #[test]
    fn kind_tags() {
        assert_eq!(Value::Null.kind(), ValueKind::Null);
        assert_eq!(Value::array([]).kind(), ValueKind::Array);
        assert_eq!(Value::function("f", |_| Value::Null).kind(), ValueKind::Function);
        assert!(ValueKind::String.is_primitive());
        assert!(!ValueKind::Date.is_primitive());
        assert_eq!(ValueKind::RegExp.to_string(), "regexp");
    }

    #[test]
    fn get_reads_object_keys_and_array_indices() {
        let v = Value::object_from([("list", Value::array([Value::from("a")]))]);
        let list = v.get("list").unwrap();
        assert_eq!(list.get("0").unwrap().as_str(), Some("a"));
        assert!(list.get("x").is_none());
        assert!(Value::from(1.0).get("x").is_none());
    }

    #[test]
    fn display_marks_cycles() {
        let obj = ObjectRef::new();
        obj.set("n", Value::from(1.0));
        obj.set("me", Value::Object(obj.clone()));
        assert_eq!(Value::Object(obj).to_string(), "{ me: [Circular], n: 1 }");
    }

    #[test]
    fn display_shared_is_not_circular() {
        let shared = Value::array([Value::from(2.0)]);
        let v = Value::array([shared.clone(), shared]);
        assert_eq!(v.to_string(), "[[2], [2]]");
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.25), "0.25");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }
}
