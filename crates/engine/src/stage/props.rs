use serde_json::{Map, Value};

pub type Properties = Map<String, Value>;

/// Recursive subset match: every key of `filter` must be present in `props`
/// (or in `fallback` when `props` lacks it) with a deep-matching value.
pub fn matches_properties(filter: &Properties, props: &Properties, fallback: &Properties) -> bool {
    filter.iter().all(|(key, expected)| {
        match props.get(key).or_else(|| fallback.get(key)) {
            Some(actual) => value_matches(expected, actual),
            None => false,
        }
    })
}

fn value_matches(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => expected
            .iter()
            .all(|(key, value)| actual.get(key).is_some_and(|inner| value_matches(value, inner))),
        (Value::Object(_), _) => false,
        _ => expected == actual,
    }
}

pub(crate) fn filter_matches(
    filter: Option<&Properties>,
    props: &Properties,
    fallback: &Properties,
) -> bool {
    filter.map_or(true, |filter| matches_properties(filter, props, fallback))
}
