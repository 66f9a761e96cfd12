//! Method tables of lists and maps.
use std::sync::LazyLock;

use funcgen::Function;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::error::Error;
use crate::list::List;
use crate::map::Map;
use crate::value::Value;

pub(crate) struct Method<T> {
    /// Number of arguments, not counting the receiver.
    pub args: usize,
    pub func: fn(&T, &[Value]) -> Result<Value, Error>,
}

impl<T> Method<T> {
    const fn new(args: usize, func: fn(&T, &[Value]) -> Result<Value, Error>) -> Self {
        Self { args, func }
    }
}

/// Extracts the closure argument at `index` and checks its arity.
fn closure(name: &str, args: &[Value], index: usize, arity: usize) -> Result<Function<Value>, Error> {
    match args.get(index) {
        Some(Value::Closure(function)) if function.arity().accepts(arity) => Ok(function.clone()),
        Some(Value::Closure(_)) => Err(Error::ClosureArity {
            name: name.to_string(),
            position: index + 1,
            expected: arity,
        }),
        _ => Err(Error::NotAClosure {
            name: name.to_string(),
            position: index + 1,
        }),
    }
}

fn string<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a SmolStr, Error> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(Error::invalid_type(name, "a string")),
    }
}

pub(crate) static LIST_METHODS: LazyLock<FxHashMap<&'static str, Method<List>>> = LazyLock::new(|| {
    let mut map: FxHashMap<&'static str, Method<List>> = FxHashMap::default();

    map.insert(
        "accept",
        Method::new(1, |list, args| Ok(list.accept(closure("accept", args, 0, 1)?).into())),
    );
    map.insert(
        "map",
        Method::new(1, |list, args| Ok(list.map(closure("map", args, 0, 1)?).into())),
    );
    map.insert(
        "reduce",
        Method::new(1, |list, args| list.reduce(closure("reduce", args, 0, 2)?)),
    );
    map.insert(
        "replace",
        Method::new(1, |list, args| list.replace(closure("replace", args, 0, 1)?)),
    );
    map.insert(
        "combine",
        Method::new(1, |list, args| Ok(list.combine(closure("combine", args, 0, 2)?).into())),
    );
    map.insert(
        "indexOf",
        Method::new(1, |list, args| Ok(Value::Int(list.index_of(&args[0])?))),
    );
    map.insert(
        "groupByString",
        Method::new(1, |list, args| {
            Ok(list.group_by_string(closure("groupByString", args, 0, 1)?)?.into())
        }),
    );
    map.insert(
        "groupByInt",
        Method::new(1, |list, args| {
            Ok(list.group_by_int(closure("groupByInt", args, 0, 1)?)?.into())
        }),
    );
    map.insert(
        "order",
        Method::new(1, |list, args| Ok(list.order(closure("order", args, 0, 2)?)?.into())),
    );
    map.insert("reverse", Method::new(0, |list, _| Ok(list.reverse()?.into())));
    map.insert(
        "append",
        Method::new(1, |list, args| Ok(list.append(args[0].clone())?.into())),
    );
    map.insert(
        "iir",
        Method::new(2, |list, args| {
            Ok(list.iir(closure("iir", args, 0, 1)?, closure("iir", args, 1, 2)?).into())
        }),
    );
    map.insert(
        "visit",
        Method::new(2, |list, args| list.visit(args[0].clone(), closure("visit", args, 1, 2)?)),
    );
    map.insert(
        "top",
        Method::new(1, |list, args| match &args[0] {
            Value::Int(n) => Ok(list.top(usize::try_from(*n).unwrap_or(0)).into()),
            _ => Err(Error::invalid_type("top", "an int")),
        }),
    );
    map.insert(
        "number",
        Method::new(1, |list, args| Ok(list.number(closure("number", args, 0, 2)?).into())),
    );
    map.insert("size", Method::new(0, |list, _| Ok(list.size()?.into())));
    map.insert("first", Method::new(0, |list, _| list.first()));
    map.insert("string", Method::new(0, |list, _| Ok(list.string()?.into())));

    map
});

pub(crate) static MAP_METHODS: LazyLock<FxHashMap<&'static str, Method<Map>>> = LazyLock::new(|| {
    let mut map: FxHashMap<&'static str, Method<Map>> = FxHashMap::default();

    map.insert(
        "accept",
        Method::new(1, |m, args| Ok(m.accept(closure("accept", args, 0, 2)?)?.into())),
    );
    map.insert(
        "map",
        Method::new(1, |m, args| Ok(m.map(closure("map", args, 0, 2)?)?.into())),
    );
    map.insert(
        "replace",
        Method::new(1, |m, args| m.replace(closure("replace", args, 0, 1)?)),
    );
    map.insert("list", Method::new(0, |m, _| Ok(m.list().into())));
    map.insert("size", Method::new(0, |m, _| Ok(m.len().into())));
    map.insert(
        "isAvail",
        Method::new(1, |m, args| Ok(m.contains_key(string("isAvail", args, 0)?).into())),
    );
    map.insert(
        "get",
        Method::new(1, |m, args| {
            let key = string("get", args, 0)?;
            m.get(key).cloned().ok_or_else(|| Error::KeyNotFound(key.to_string()))
        }),
    );
    map.insert(
        "put",
        Method::new(2, |m, args| Ok(m.put(string("put", args, 0)?.clone(), args[1].clone()).into())),
    );

    map
});

fn dispatch<T>(
    table: &FxHashMap<&'static str, Method<T>>,
    kind: &'static str,
    receiver: &T,
    name: &str,
    args: &[Value],
) -> Result<Value, Error> {
    let method = table.get(name).ok_or_else(|| Error::MethodNotFound {
        kind,
        name: name.to_string(),
    })?;
    if method.args != args.len() {
        return Err(Error::ArityMismatch {
            name: name.to_string(),
            expected: method.args,
            got: args.len(),
        });
    }
    (method.func)(receiver, args)
}

/// Calls the built-in method `name` on `value`.
pub fn call_method(value: &Value, name: &str, args: &[Value]) -> Result<Value, Error> {
    match value {
        Value::List(list) => dispatch(&LIST_METHODS, "list", list, name, args),
        Value::Map(map) => dispatch(&MAP_METHODS, "map", map, name, args),
        other => Err(Error::MethodNotFound {
            kind: other.name(),
            name: name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use funcgen::{Arity, EvalError};
    use rstest::rstest;

    use super::*;

    fn closure_value<F>(args: usize, f: F) -> Value
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Value::Closure(Function::new(Arity::Fixed(args), false, f))
    }

    fn ints(values: &[i64]) -> Value {
        Value::from(values.iter().copied().map(Value::Int).collect::<Vec<_>>())
    }

    fn sample_map() -> Value {
        Value::Map(Map::new(vec![
            (SmolStr::new("a"), Value::Int(1)),
            (SmolStr::new("b"), Value::Int(2)),
        ]))
    }

    #[rstest]
    #[case::size(ints(&[1, 2, 3]), "size", vec![], Value::Int(3))]
    #[case::first(ints(&[4, 5]), "first", vec![], Value::Int(4))]
    #[case::reverse(ints(&[1, 2]), "reverse", vec![], ints(&[2, 1]))]
    #[case::append(ints(&[1]), "append", vec![Value::Int(2)], ints(&[1, 2]))]
    #[case::index_of(ints(&[1, 2]), "indexOf", vec![Value::Int(2)], Value::Int(1))]
    #[case::top(ints(&[1, 2, 3]), "top", vec![Value::Int(2)], ints(&[1, 2]))]
    #[case::string(ints(&[1, 2]), "string", vec![], Value::from("[1, 2]"))]
    #[case::map_size(sample_map(), "size", vec![], Value::Int(2))]
    #[case::map_get(sample_map(), "get", vec![Value::from("b")], Value::Int(2))]
    #[case::map_is_avail(sample_map(), "isAvail", vec![Value::from("c")], Value::Bool(false))]
    fn test_call_method(#[case] value: Value, #[case] name: &str, #[case] args: Vec<Value>, #[case] expected: Value) {
        assert_eq!(call_method(&value, name, &args), Ok(expected));
    }

    #[test]
    fn test_map_put() {
        let updated = call_method(&sample_map(), "put", &[Value::from("c"), Value::Int(3)]).unwrap();
        assert_eq!(updated.to_string(), "{a:1, b:2, c:3}");
        assert_eq!(sample_map().to_string(), "{a:1, b:2}");
    }

    #[test]
    fn test_reduce() {
        let sum = closure_value(2, |args| Ok(Value::Int(args[0].to_int().unwrap() + args[1].to_int().unwrap())));
        assert_eq!(call_method(&ints(&[1, 2, 3]), "reduce", &[sum]), Ok(Value::Int(6)));
    }

    #[rstest]
    #[case::unknown_method(ints(&[1]), "nope", vec![], "method nope not found on list")]
    #[case::wrong_arity(ints(&[1]), "size", vec![Value::Int(1)], "number of args wrong")]
    #[case::not_a_closure(ints(&[1]), "map", vec![Value::Int(1)], "1. argument of map needs to be a closure")]
    #[case::closure_arity(
        ints(&[1]),
        "reduce",
        vec![closure_value(1, |args| Ok(args[0].clone()))],
        "needs to be a closure with 2 arguments"
    )]
    #[case::empty_first(ints(&[]), "first", vec![], "no items")]
    #[case::missing_key(sample_map(), "get", vec![Value::from("z")], "key z not found")]
    #[case::key_not_string(sample_map(), "get", vec![Value::Int(1)], "requires a string")]
    #[case::int_receiver(Value::Int(1), "size", vec![], "method size not found on int")]
    fn test_call_method_errors(
        #[case] value: Value,
        #[case] name: &str,
        #[case] args: Vec<Value>,
        #[case] message: &str,
    ) {
        let err = call_method(&value, name, &args).unwrap_err();
        assert!(err.to_string().contains(message), "{}", err);
    }
}
