//! Helpers for reading configuration attributes and building state values

use std::collections::HashMap;

use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Resource, Value};

/// Convert DSL enum value to AWS SDK format
/// e.g., "aws.ecs.LaunchType.FARGATE" -> "FARGATE", "LaunchType.EC2" -> "EC2"
///
/// Underscores are kept: `TASK_DEFINITION` is a valid AWS value.
pub fn convert_enum_value(value: &str) -> String {
    let parts: Vec<&str> = value.split('.').collect();
    let is_type_name = |s: &str| s.chars().next().is_some_and(|c| c.is_uppercase());
    let is_namespace = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_lowercase());

    let raw_value = match parts.as_slice() {
        [type_name, v] if is_type_name(*type_name) => *v,
        [ns, type_name, v] if is_namespace(*ns) && is_type_name(*type_name) => *v,
        [ns1, ns2, type_name, v]
            if is_namespace(*ns1) && is_namespace(*ns2) && is_type_name(*type_name) =>
        {
            *v
        }
        _ => value,
    };
    raw_value.to_string()
}

pub fn get_string(attributes: &HashMap<String, Value>, key: &str) -> Option<String> {
    match attributes.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

pub fn get_int(attributes: &HashMap<String, Value>, key: &str) -> Option<i64> {
    match attributes.get(key) {
        Some(Value::Int(n)) => Some(*n),
        _ => None,
    }
}

pub fn get_bool(attributes: &HashMap<String, Value>, key: &str) -> Option<bool> {
    match attributes.get(key) {
        Some(Value::Bool(b)) => Some(*b),
        _ => None,
    }
}

/// Nested object attribute
pub fn get_map<'a>(attributes: &'a HashMap<String, Value>, key: &str) -> Option<&'a HashMap<String, Value>> {
    match attributes.get(key) {
        Some(Value::Map(map)) => Some(map),
        _ => None,
    }
}

/// Items of a list attribute; empty when unset
pub fn get_list<'a>(attributes: &'a HashMap<String, Value>, key: &str) -> &'a [Value] {
    match attributes.get(key) {
        Some(Value::List(items)) => items,
        _ => &[],
    }
}

/// String items of a list attribute; non-string items are skipped
pub fn get_string_list(attributes: &HashMap<String, Value>, key: &str) -> Vec<String> {
    match attributes.get(key) {
        Some(Value::List(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

/// String entries of a map attribute; non-string values are skipped
pub fn get_string_map(attributes: &HashMap<String, Value>, key: &str) -> HashMap<String, String> {
    match attributes.get(key) {
        Some(value) => string_map(value),
        None => HashMap::new(),
    }
}

pub fn string_map(value: &Value) -> HashMap<String, String> {
    match value {
        Value::Map(map) => map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
        _ => HashMap::new(),
    }
}

/// A string attribute the operation cannot proceed without
pub fn require_string(resource: &Resource, key: &str) -> ProviderResult<String> {
    get_string(&resource.attributes, key).ok_or_else(|| {
        ProviderError::validation(format!("{} is required", key)).for_resource(resource.id.clone())
    })
}

/// Narrow an integer attribute to the SDK's i32
pub fn to_i32(key: &str, n: i64) -> ProviderResult<i32> {
    i32::try_from(n)
        .map_err(|_| ProviderError::validation(format!("{} is out of range: {}", key, n)))
}

pub fn string_list_value<I, S>(items: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Value::List(items.into_iter().map(|s| Value::String(s.into())).collect())
}

pub fn string_map_value<I, K, V>(entries: I) -> Value
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_enum_value() {
        assert_eq!(convert_enum_value("aws.ecs.LaunchType.FARGATE"), "FARGATE");
        assert_eq!(convert_enum_value("ecs.PropagateTags.TASK_DEFINITION"), "TASK_DEFINITION");
        assert_eq!(convert_enum_value("SchedulingStrategy.DAEMON"), "DAEMON");
        // Already in AWS format (no conversion needed)
        assert_eq!(convert_enum_value("REPLICA"), "REPLICA");
        assert_eq!(convert_enum_value("Decrypt"), "Decrypt");
        // Dotted values that are not enum references pass through
        assert_eq!(convert_enum_value("1.4.0"), "1.4.0");
        assert_eq!(convert_enum_value("alias/app.key"), "alias/app.key");
    }

    #[test]
    fn attribute_getters() {
        let resource = Resource::new("ecs.service", "web")
            .with_attribute("name", Value::from("web"))
            .with_attribute("desired_count", Value::Int(2))
            .with_attribute("subnets", string_list_value(["subnet-1", "subnet-2"]))
            .with_attribute("tags", string_map_value([("env", "prod")]));

        assert_eq!(require_string(&resource, "name").unwrap(), "web");
        assert!(require_string(&resource, "cluster").is_err());
        assert_eq!(get_int(&resource.attributes, "desired_count"), Some(2));
        assert_eq!(get_bool(&resource.attributes, "desired_count"), None);
        assert!(get_map(&resource.attributes, "tags").is_some());
        assert!(get_map(&resource.attributes, "name").is_none());
        assert_eq!(get_list(&resource.attributes, "subnets").len(), 2);
        assert!(get_list(&resource.attributes, "missing").is_empty());
        assert_eq!(
            get_string_list(&resource.attributes, "subnets"),
            vec!["subnet-1".to_string(), "subnet-2".to_string()]
        );
        assert_eq!(
            get_string_map(&resource.attributes, "tags").get("env").map(String::as_str),
            Some("prod")
        );
    }

    #[test]
    fn i32_narrowing() {
        assert_eq!(to_i32("desired_count", 3).unwrap(), 3);
        assert!(to_i32("desired_count", i64::from(i32::MAX) + 1).is_err());
    }
}
