use funcgen::{Arity, Function};
use funcgen_value::{List, Map, Value};
use proptest::prelude::*;
use smol_str::SmolStr;

mod strategies {
    use super::*;

    pub fn arb_key() -> impl Strategy<Value = SmolStr> {
        "[a-e]{1,2}".prop_map(SmolStr::from)
    }

    pub fn arb_entries() -> impl Strategy<Value = Vec<(SmolStr, i64)>> {
        prop::collection::vec((arb_key(), -100i64..100), 0..40)
    }
}

fn less() -> Function<Value> {
    Function::new(Arity::Fixed(2), true, |args: &[Value]| Ok(Value::Bool(args[0] < args[1])))
}

fn by_key() -> Function<Value> {
    Function::new(Arity::Fixed(2), true, |args: &[Value]| {
        let key = |value: &Value| value.to_list().and_then(|l| l.first().ok()).and_then(|v| v.to_int());
        Ok(Value::Bool(key(&args[0]) < key(&args[1])))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn order_matches_sort(values in prop::collection::vec(-1000i64..1000, 0..200)) {
        let list = List::new(values.iter().copied().map(Value::Int).collect());
        let ordered: Vec<i64> = list
            .order(less())
            .unwrap()
            .items()
            .unwrap()
            .iter()
            .filter_map(Value::to_int)
            .collect();

        let mut expected = values;
        expected.sort();
        prop_assert_eq!(ordered, expected);
    }

    #[test]
    fn order_is_stable(pairs in prop::collection::vec((0i64..5, any::<i64>()), 0..100)) {
        let list = List::new(
            pairs
                .iter()
                .map(|(k, v)| Value::from(vec![Value::Int(*k), Value::Int(*v)]))
                .collect(),
        );
        let ordered: Vec<(i64, i64)> = list
            .order(by_key())
            .unwrap()
            .items()
            .unwrap()
            .iter()
            .map(|pair| {
                let items = pair.to_list().unwrap().items().unwrap();
                (items[0].to_int().unwrap(), items[1].to_int().unwrap())
            })
            .collect();

        let mut expected = pairs;
        expected.sort_by_key(|(k, _)| *k);
        prop_assert_eq!(ordered, expected);
    }

    #[test]
    fn put_matches_last_write(entries in strategies::arb_entries()) {
        let mut map = Map::default();
        let mut expected: Vec<(SmolStr, i64)> = Vec::new();
        for (key, value) in &entries {
            map = map.put(key.clone(), Value::Int(*value));
            match expected.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = *value,
                None => expected.push((key.clone(), *value)),
            }
        }

        prop_assert_eq!(map.len(), expected.len());
        let actual: Vec<(SmolStr, i64)> = map
            .to_vec()
            .into_iter()
            .filter_map(|(k, v)| v.to_int().map(|v| (k, v)))
            .collect();
        prop_assert_eq!(&actual, &expected);
        prop_assert_eq!(map, expected.into_iter().map(|(k, v)| (k, Value::Int(v))).collect::<Map>());
    }

    #[test]
    fn put_never_changes_the_original(entries in strategies::arb_entries(), key in strategies::arb_key()) {
        let original: Map = entries.iter().map(|(k, v)| (k.clone(), Value::Int(*v))).collect();
        let before = original.to_vec();
        let updated = original.put(key.clone(), Value::from("new"));

        prop_assert_eq!(original.to_vec(), before);
        prop_assert_eq!(updated.get(&key), Some(&Value::from("new")));
    }
}
