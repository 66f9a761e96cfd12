use std::cmp::Ordering;
use std::fmt::{self, Debug, Display, Formatter};

use funcgen::Function;
use smol_str::SmolStr;

use crate::list::List;
use crate::map::Map;

#[derive(Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(SmolStr),
    List(List),
    Map(Map),
    Closure(Function<Value>),
}

impl Value {
    pub const TRUE: Value = Value::Bool(true);
    pub const FALSE: Value = Value::Bool(false);

    pub fn name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Closure(_) => "closure",
        }
    }

    #[inline(always)]
    pub fn to_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value; integers are widened.
    #[inline(always)]
    pub fn to_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_list(&self) -> Option<&List> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn to_map(&self) -> Option<&Map> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn to_closure(&self) -> Option<&Function<Value>> {
        match self {
            Value::Closure(function) => Some(function),
            _ => None,
        }
    }
}

// Integers and floats compare by numeric value; closures by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.to_float() == other.to_float()
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.to_float()?.partial_cmp(&other.to_float()?)
            }
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(SmolStr::new(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(SmolStr::from(s))
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Value::List(list)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Map(map)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(List::new(items))
    }
}

impl From<Function<Value>> for Value {
    fn from(function: Function<Value>) -> Self {
        Value::Closure(function)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
            Value::List(list) => write!(f, "{}", list),
            Value::Map(map) => write!(f, "{}", map),
            Value::Closure(function) => write!(f, "<function/{}>", function.arity()),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s.as_str()),
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => write!(f, "{:.1}", v),
            other => write!(f, "{}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::int_float(Value::Int(2), Value::Float(2.0), true)]
    #[case::int_int(Value::Int(2), Value::Int(3), false)]
    #[case::string(Value::from("a"), Value::from("a"), true)]
    #[case::mixed(Value::from("1"), Value::Int(1), false)]
    #[case::list(Value::from(vec![Value::Int(1)]), Value::from(vec![Value::Float(1.0)]), true)]
    fn test_eq(#[case] a: Value, #[case] b: Value, #[case] expected: bool) {
        assert_eq!(a == b, expected);
    }

    #[rstest]
    #[case::int(Value::Int(3), "3")]
    #[case::float(Value::Float(2.5), "2.5")]
    #[case::string(Value::from("abc"), "abc")]
    #[case::list(Value::from(vec![Value::Int(1), Value::from("x")]), "[1, x]")]
    fn test_display(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(value.to_string(), expected);
    }

    #[test]
    fn test_debug_quotes_strings() {
        assert_eq!(format!("{:?}", Value::from("a")), "\"a\"");
        assert_eq!(format!("{:?}", Value::Float(2.0)), "2.0");
    }

    #[test]
    fn test_partial_cmp() {
        assert!(Value::Int(1) < Value::Float(1.5));
        assert!(Value::from("a") < Value::from("b"));
        assert_eq!(Value::Int(1).partial_cmp(&Value::from("a")), None);
    }
}
