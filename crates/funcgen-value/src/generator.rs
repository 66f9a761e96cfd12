use std::cmp::Ordering;
use std::f64::consts::PI;

use funcgen::{
    Arity, ClosureHandler, EvalError, Function, FunctionGenerator, IdentName, JitMarshal, ListHandler, MapHandler,
    MethodHandler,
};
use tracing::debug;

use crate::list::List;
use crate::map::Map;
use crate::methods;
use crate::value::Value;

/// Value-kind capabilities of [`Value`]: closures, lists, maps, methods and JIT marshalling.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueHandler;

impl ClosureHandler<Value> for ValueHandler {
    fn from_closure(&self, function: Function<Value>) -> Value {
        Value::Closure(function)
    }

    fn to_closure(&self, value: &Value) -> Option<Function<Value>> {
        value.to_closure().cloned()
    }
}

impl ListHandler<Value> for ValueHandler {
    fn from_list(&self, items: Vec<Value>) -> Value {
        Value::List(List::new(items))
    }

    fn access_list(&self, list: &Value, index: &Value) -> Result<Value, String> {
        match (list, index) {
            (Value::List(list), Value::Int(i)) => list.get(*i).map_err(|e| e.to_string()),
            (Value::List(_), other) => Err(format!("index must be an int, got {}", other.name())),
            (other, _) => Err(format!("{} is not a list", other.name())),
        }
    }
}

impl MapHandler<Value> for ValueHandler {
    fn from_map(&self, entries: Vec<(IdentName, Value)>) -> Value {
        Value::Map(Map::new(entries))
    }

    fn access_map(&self, map: &Value, key: &str) -> Result<Value, String> {
        match map {
            Value::Map(map) => map
                .get(key)
                .cloned()
                .ok_or_else(|| format!("key {} not found in map", key)),
            other => Err(format!("{} is not a map", other.name())),
        }
    }

    fn is_map(&self, value: &Value) -> bool {
        matches!(value, Value::Map(_))
    }
}

impl MethodHandler<Value> for ValueHandler {
    fn call_method(&self, value: &Value, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        methods::call_method(value, name, args).map_err(|e| e.into_eval(name))
    }
}

// Native code runs float arithmetic. Int arithmetic wraps and keeps its kind, so calls with an
// int argument stay on the interpreted path.
impl JitMarshal<Value> for ValueHandler {
    fn to_native(&self, value: &Value) -> Option<f64> {
        match value {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn from_native(&self, value: f64) -> Value {
        Value::Float(value)
    }

    fn constant_to_native(&self, value: &Value) -> Option<f64> {
        value.to_float()
    }
}

fn invalid(op: &str, a: &Value, b: &Value) -> EvalError {
    EvalError::custom(format!("invalid types for {}: {} and {}", op, a.name(), b.name()))
}

fn number(name: &str, value: &Value) -> Result<f64, EvalError> {
    value
        .to_float()
        .ok_or_else(|| EvalError::custom(format!("{} requires a number, got {}", name, value.name())))
}

/// Integer arithmetic if both operands are ints, float arithmetic otherwise.
fn arithmetic(
    op: &str,
    a: &Value,
    b: &Value,
    int: fn(i64, i64) -> i64,
    float: fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int(*a, *b))),
        _ => match (a.to_float(), b.to_float()) {
            (Some(x), Some(y)) => Ok(Value::Float(float(x, y))),
            _ => Err(invalid(op, a, b)),
        },
    }
}

fn add(a: &Value, b: &Value) -> Result<Value, EvalError> {
    match (a, b) {
        (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::from(format!("{}{}", a, b))),
        (Value::List(list), Value::List(other)) => {
            let mut items = list.items()?.to_vec();
            items.extend(other.items()?.iter().cloned());
            Ok(Value::List(List::new(items)))
        }
        _ => arithmetic("+", a, b, i64::wrapping_add, |x, y| x + y),
    }
}

fn compare(op: &str, a: &Value, b: &Value, accept: fn(Ordering) -> bool) -> Result<Value, EvalError> {
    a.partial_cmp(b)
        .map(|ordering| Value::Bool(accept(ordering)))
        .ok_or_else(|| invalid(op, a, b))
}

fn logic(op: &str, a: &Value, b: &Value, f: fn(bool, bool) -> bool) -> Result<Value, EvalError> {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(f(*a, *b))),
        _ => Err(invalid(op, a, b)),
    }
}

fn min_max(name: &str, args: &[Value], pick: fn(f64, f64) -> bool) -> Result<Value, EvalError> {
    let (first, rest) = args
        .split_first()
        .ok_or_else(|| EvalError::custom(format!("{} requires at least one argument", name)))?;
    let mut best = first;
    let mut best_number = number(name, first)?;
    for value in rest {
        let n = number(name, value)?;
        if pick(n, best_number) {
            best = value;
            best_number = n;
        }
    }
    Ok(best.clone())
}

fn parse_number(s: &str) -> Result<Value, String> {
    let digits: String = s.chars().filter(|c| *c != '_').collect();
    if let Ok(i) = digits.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    digits
        .parse::<f64>()
        .map(Value::Float)
        .map_err(|e| format!("invalid number '{}': {}", s, e))
}

/// Creates a generator for [`Value`] with the standard operators, constants and functions.
///
/// Operators in priority order, lowest first: `|`, `&`, `=`, `!=`, `<`, `<=`, `>`, `>=`,
/// `+`, `-`, `*`, `/`, `%`, `^`. Unary operators: `-` and `!`.
pub fn new_generator() -> FunctionGenerator<Value> {
    let mut generator = FunctionGenerator::new();
    generator
        .add_op("|", true, |a, b| logic("|", a, b, |x, y| x || y))
        .add_op("&", true, |a, b| logic("&", a, b, |x, y| x && y))
        .add_op("=", false, |a, b| Ok(Value::Bool(a == b)))
        .add_op("!=", false, |a, b| Ok(Value::Bool(a != b)))
        .add_op("<", false, |a, b| compare("<", a, b, Ordering::is_lt))
        .add_op("<=", false, |a, b| compare("<=", a, b, Ordering::is_le))
        .add_op(">", false, |a, b| compare(">", a, b, Ordering::is_gt))
        .add_op(">=", false, |a, b| compare(">=", a, b, Ordering::is_ge))
        .add_op("+", false, add)
        .add_op("-", false, |a, b| arithmetic("-", a, b, i64::wrapping_sub, |x, y| x - y))
        .add_op("*", true, |a, b| arithmetic("*", a, b, i64::wrapping_mul, |x, y| x * y))
        .add_op("/", false, |a, b| Ok(Value::Float(number("/", a)? / number("/", b)?)))
        .add_op("%", false, |a, b| match (a, b) {
            (Value::Int(_), Value::Int(0)) => Err(EvalError::custom("division by zero in %")),
            _ => arithmetic("%", a, b, i64::wrapping_rem, |x, y| x % y),
        })
        .add_op("^", false, |a, b| Ok(Value::Float(number("^", a)?.powf(number("^", b)?))))
        .add_unary("-", |a| match a {
            Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(EvalError::custom(format!("invalid type for unary -: {}", other.name()))),
        })
        .add_unary("!", |a| match a {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(EvalError::custom(format!("invalid type for !: {}", other.name()))),
        })
        .add_constant("pi", Value::Float(PI))
        .add_constant("true", Value::TRUE)
        .add_constant("false", Value::FALSE)
        .add_simple_function("sqrt", |a| Ok(Value::Float(number("sqrt", a)?.sqrt())))
        .add_simple_function("abs", |a| match a {
            Value::Int(i) => Ok(Value::Int(i.wrapping_abs())),
            other => Ok(Value::Float(number("abs", other)?.abs())),
        })
        .add_simple_function("sin", |a| Ok(Value::Float(number("sin", a)?.sin())))
        .add_simple_function("cos", |a| Ok(Value::Float(number("cos", a)?.cos())))
        .add_simple_function("list", |a| match a {
            Value::Int(n) => Ok(Value::List(List::range(*n))),
            other => Err(EvalError::custom(format!("list requires an int, got {}", other.name()))),
        })
        .add_static_function(
            "min",
            Function::new(Arity::Variadic, true, |args| min_max("min", args, |n, best| n < best)),
        )
        .add_static_function(
            "max",
            Function::new(Arity::Variadic, true, |args| min_max("max", args, |n, best| n > best)),
        )
        .set_closure_handler(ValueHandler)
        .set_list_handler(ValueHandler)
        .set_map_handler(ValueHandler)
        .set_method_handler(ValueHandler)
        .set_to_bool(Value::to_bool)
        .set_number_parser(parse_number)
        .set_string_converter(|s| Value::from(s))
        .set_jit_marshal(ValueHandler);

    debug!(operators = generator.operators().len(), "value generator created");
    generator
}

#[cfg(test)]
mod tests {
    use funcgen::ast::build;
    use funcgen::{AstRef, Env};
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn generator() -> FunctionGenerator<Value> {
        new_generator()
    }

    fn int(i: i64) -> AstRef<Value> {
        build::constant(Value::Int(i))
    }

    #[rstest]
    #[case::int_add(build::operate("+", int(1), int(2)), Value::Int(3))]
    #[case::mixed_add(build::operate("+", int(1), build::constant(Value::Float(0.5))), Value::Float(1.5))]
    #[case::concat(build::operate("+", build::constant(Value::from("a")), int(1)), Value::from("a1"))]
    #[case::division(build::operate("/", int(7), int(2)), Value::Float(3.5))]
    #[case::remainder(build::operate("%", int(7), int(3)), Value::Int(1))]
    #[case::power(build::operate("^", int(2), int(10)), Value::Float(1024.0))]
    #[case::compare(build::operate("<", int(1), build::constant(Value::Float(1.5))), Value::TRUE)]
    #[case::equal(build::operate("=", int(2), build::constant(Value::Float(2.0))), Value::TRUE)]
    #[case::logic(build::operate("&", build::ident("true"), build::ident("false")), Value::FALSE)]
    #[case::negate(build::unary("-", int(3)), Value::Int(-3))]
    #[case::not(build::unary("!", build::ident("false")), Value::TRUE)]
    #[case::min(build::call_named("min", vec![int(3), int(1), int(2)]), Value::Int(1))]
    #[case::max(build::call_named("max", vec![int(3), build::constant(Value::Float(4.5))]), Value::Float(4.5))]
    #[case::abs(build::call_named("abs", vec![int(-3)]), Value::Int(3))]
    #[case::list_size(build::method_call(build::call_named("list", vec![int(4)]), "size", vec![]), Value::Int(4))]
    fn test_preset(
        mut generator: FunctionGenerator<Value>,
        #[values(true, false)] optimize: bool,
        #[case] ast: AstRef<Value>,
        #[case] expected: Value,
    ) {
        generator.set_optimize(optimize);
        assert_eq!(generator.generate(&ast).unwrap().eval(&Env::new()), Ok(expected));
    }

    #[rstest]
    #[case::remainder_by_zero(build::operate("%", int(1), int(0)), "division by zero")]
    #[case::bad_operands(build::operate("-", build::constant(Value::from("a")), int(1)), "invalid types for -")]
    #[case::empty_min(build::call_named("min", vec![]), "at least one argument")]
    fn test_preset_errors(generator: FunctionGenerator<Value>, #[case] ast: AstRef<Value>, #[case] message: &str) {
        let err = generator
            .generate(&ast)
            .and_then(|expression| expression.eval(&Env::new()))
            .unwrap_err();
        assert!(err.to_string().contains(message), "{}", err);
    }

    #[rstest]
    #[case::int("42", Value::Int(42))]
    #[case::underscores("10_000", Value::Int(10_000))]
    #[case::float("1.5", Value::Float(1.5))]
    #[case::exponent("1e3", Value::Float(1000.0))]
    fn test_parse_number(#[case] input: &str, #[case] expected: Value) {
        assert_eq!(parse_number(input), Ok(expected));
    }

    #[test]
    fn test_parse_number_rejects_garbage() {
        assert!(parse_number("12a").is_err());
    }

    #[test]
    fn test_operators_in_priority_order() {
        let generator = new_generator();
        let symbols: Vec<&str> = generator.operators().iter().map(|op| op.symbol.as_str()).collect();
        assert_eq!(
            symbols,
            vec!["|", "&", "=", "!=", "<", "<=", ">", ">=", "+", "-", "*", "/", "%", "^"]
        );
    }

    #[rstest]
    #[case::float(Value::Float(1.5), Some(1.5))]
    #[case::int(Value::Int(4), None)]
    #[case::string(Value::from("4"), None)]
    fn test_marshal_arguments(#[case] value: Value, #[case] expected: Option<f64>) {
        assert_eq!(ValueHandler.to_native(&value), expected);
    }

    #[test]
    fn test_marshal_int_constants() {
        assert_eq!(ValueHandler.constant_to_native(&Value::Int(4)), Some(4.0));
        assert_eq!(ValueHandler.constant_to_native(&Value::TRUE), None);
    }

    #[test]
    fn test_access_errors() {
        let handler = ValueHandler;
        assert!(handler.access_list(&Value::Int(1), &Value::Int(0)).is_err());
        assert!(handler.access_map(&Value::Int(1), "a").is_err());
        assert_eq!(
            handler.access_list(&Value::from(vec![Value::Int(7)]), &Value::Int(0)),
            Ok(Value::Int(7))
        );
    }
}
