//! Runtime values (spec §3.3): a closed tagged union with all coercions
//! expressed as explicit helper functions rather than relying on any
//! language-level implicit conversion.

use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{ast::NodeId, scope::ScopeHandle};

pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
pub type StructRef = Rc<RefCell<IndexMap<String, Value>>>;

/// `{container, index/field, level}` (spec §9): a pointer is a small
/// record, never a raw address, so `*p = v` / `p->f = v` always route
/// through a real container the interpreter already owns.
#[derive(Debug, Clone)]
pub enum PointerTarget {
    ArrayElement { array: ArrayRef, index: usize },
    StructField { object: StructRef, field: String },
    Variable { scope: ScopeHandle, name: String },
}

#[derive(Debug, Clone)]
pub struct Pointer {
    pub target: PointerTarget,
    pub level: u8,
}

/// A function reference: the `FuncDef` node plus the scope it was bound
/// in (spec §3.3 "function reference (AST pointer + captured scope
/// chain)").
#[derive(Debug, Clone)]
pub struct FunctionRef {
    pub def: NodeId,
    pub name: String,
    pub captured: Option<ScopeHandle>,
}

/// An opaque library object instance (spec §3.3, §4.7.5): the library
/// registry owns the real state keyed by `instance_id`; this is a
/// non-owning handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInstance {
    pub library: String,
    pub instance_id: u64,
}

/// A dynamically typed runtime value (spec §3.3).
///
/// `Str` holds an `Rc<str>`: Arduino `String` is modeled as a value type
/// (copy-on-assign, per the reference's documented choice at spec §9) —
/// cloning the `Rc` is indistinguishable from a deep copy because the
/// content itself is immutable once created. Arrays, structs, and object
/// instances share storage by reference, per §4.7.2's "pass-by-value for
/// scalars, by shared reference for arrays/strings/objects" (object
/// instances are always by-reference since they only ever exist as an
/// opaque handle into the registry).
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Str(Rc<str>),
    Array(ArrayRef),
    Struct(StructRef),
    Pointer(Rc<Pointer>),
    Function(Rc<FunctionRef>),
    Object(ObjectInstance),
}

impl Value {
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::Str(Rc::from(s.into()))
    }

    #[must_use]
    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Bool(_) => "bool",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Float32(_) => "float32",
            Self::Float64(_) => "float64",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Struct(_) => "struct",
            Self::Pointer(_) => "pointer",
            Self::Function(_) => "function",
            Self::Object(_) => "object",
        }
    }

    /// "Truthiness" coercion (spec §4.7.2: "zero/empty-string/false →
    /// false, else true").
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined => false,
            Self::Bool(b) => *b,
            Self::Int32(n) => *n != 0,
            Self::Int64(n) => *n != 0,
            Self::Float32(n) => *n != 0.0,
            Self::Float64(n) => *n != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Array(a) => !a.borrow().is_empty(),
            Self::Struct(_) | Self::Pointer(_) | Self::Function(_) | Self::Object(_) => true,
        }
    }

    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32(_) | Self::Float64(_))
    }

    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Bool(b) => f64::from(*b),
            Self::Int32(n) => f64::from(*n),
            Self::Int64(n) => *n as f64,
            Self::Float32(n) => f64::from(*n),
            Self::Float64(n) => *n,
            Self::Str(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Integer coercion; truncates floats toward zero (spec §3.3 "integer
    /// division truncates toward zero" — the same truncation rule applies
    /// to any float-to-int coercion here).
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Bool(b) => i64::from(*b),
            Self::Int32(n) => i64::from(*n),
            Self::Int64(n) => *n,
            Self::Float32(n) => *n as i64,
            Self::Float64(n) => *n as i64,
            Self::Str(s) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    #[must_use]
    pub fn display_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_owned(),
            Self::Bool(b) => b.to_string(),
            Self::Int32(n) => n.to_string(),
            Self::Int64(n) => n.to_string(),
            Self::Float32(n) => format_float(f64::from(*n)),
            Self::Float64(n) => format_float(*n),
            Self::Str(s) => s.to_string(),
            Self::Array(a) => format!("[{}]", a.borrow().iter().map(Value::display_string).collect::<Vec<_>>().join(", ")),
            Self::Struct(s) => format!(
                "{{{}}}",
                s.borrow()
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.display_string()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Self::Pointer(_) => "<pointer>".to_owned(),
            Self::Function(f) => format!("<function {}>", f.name),
            Self::Object(o) => format!("<{} #{}>", o.library, o.instance_id),
        }
    }

    /// Value equality after usual-arithmetic conversion (spec §4.7.2
    /// "case tests compared by value equality after usual-arithmetic
    /// conversion").
    #[must_use]
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Undefined, Value::Undefined) => true,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ if self.is_numeric() && other.is_numeric() => {
                if self.is_float() || other.is_float() {
                    (self.as_f64() - other.as_f64()).abs() < f64::EPSILON
                } else {
                    self.as_i64() == other.as_i64()
                }
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Int32(_) | Self::Int64(_) | Self::Float32(_) | Self::Float64(_))
    }
}

fn format_float(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.2}")
    } else {
        format!("{v}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_string())
    }
}

/// Numeric "usual arithmetic conversions" result type: whichever of
/// `{Int32, Int64, Float64}` the two operands promote to (spec §3.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    #[must_use]
    pub fn of(value: &Value) -> Self {
        if value.is_float() {
            Self::Float(value.as_f64())
        } else {
            Self::Int(value.as_i64())
        }
    }

    #[must_use]
    pub fn to_value(self) -> Value {
        match self {
            Self::Int(n) => {
                if let Ok(n32) = i32::try_from(n) {
                    Value::Int32(n32)
                } else {
                    Value::Int64(n)
                }
            }
            Self::Float(f) => Value::Float64(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_matches_spec_rules() {
        assert!(!Value::Int32(0).truthy());
        assert!(Value::Int32(1).truthy());
        assert!(!Value::string("").truthy());
        assert!(Value::string("x").truthy());
        assert!(!Value::Bool(false).truthy());
    }

    #[test]
    fn loose_equality_promotes_int_float() {
        assert!(Value::Int32(2).loosely_equals(&Value::Float64(2.0)));
        assert!(!Value::Int32(2).loosely_equals(&Value::Float64(2.5)));
    }

    #[test]
    fn string_clone_is_value_like() {
        let a = Value::string("hi");
        let b = a.clone();
        assert_eq!(a.display_string(), b.display_string());
    }
}
