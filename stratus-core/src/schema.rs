//! Schema - Define type schemas for resources
//!
//! Providers declare a schema for each resource type. The host validates
//! configuration against it before any provider operation runs.

use std::collections::HashMap;
use std::fmt;

use crate::resource::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// List
    List(Box<AttributeType>),
    /// Unordered collection without duplicates
    Set(Box<AttributeType>),
    /// Map
    Map(Box<AttributeType>),
    /// Nested block with its own attribute schemas
    Object(HashMap<String, AttributeSchema>),
}

impl AttributeType {
    pub fn enumeration(variants: &[&str]) -> Self {
        AttributeType::Enum(variants.iter().map(|v| v.to_string()).collect())
    }

    pub fn list(inner: AttributeType) -> Self {
        AttributeType::List(Box::new(inner))
    }

    pub fn set(inner: AttributeType) -> Self {
        AttributeType::Set(Box::new(inner))
    }

    pub fn map(inner: AttributeType) -> Self {
        AttributeType::Map(Box::new(inner))
    }

    pub fn object(attributes: Vec<AttributeSchema>) -> Self {
        AttributeType::Object(
            attributes
                .into_iter()
                .map(|a| (a.name.clone(), a))
                .collect(),
        )
    }

    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { validate, base, .. }, v) => {
                base.validate(v)?;
                validate(v).map_err(|msg| TypeError::ValidationFailed { message: msg })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Set(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                    if items[..i].contains(item) {
                        return Err(TypeError::DuplicateSetItem { index: i });
                    }
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Object(attributes), Value::Map(map)) => {
                for (name, schema) in attributes {
                    if schema.required && !map.contains_key(name) {
                        return Err(TypeError::MissingRequired { name: name.clone() });
                    }
                }
                for (k, v) in map {
                    let schema = attributes
                        .get(k)
                        .ok_or_else(|| TypeError::UnknownAttribute { name: k.clone() })?;
                    schema
                        .attr_type
                        .validate(v)
                        .map_err(|e| TypeError::MapValueError {
                            key: k.clone(),
                            inner: Box::new(e),
                        })?;
                    let conflict = schema
                        .conflicts_with
                        .iter()
                        .find(|other| map.contains_key(other.as_str()));
                    if let Some(other) = conflict {
                        let (first, second) = if k < other { (k, other) } else { (other, k) };
                        return Err(TypeError::ConflictingAttributes {
                            first: first.clone(),
                            second: second.clone(),
                        });
                    }
                }
                Ok(())
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name().to_string(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Set(inner) => format!("Set<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Object(_) => "Object".to_string(),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    #[error("Attribute '{name}' is computed and cannot be set")]
    ComputedAttribute { name: String },

    #[error("Attributes '{first}' and '{second}' cannot be set together")]
    ConflictingAttributes { first: String, second: String },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Duplicate set item at index {index}")]
    DuplicateSetItem { index: usize },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    /// Set by the provider from the remote object
    pub computed: bool,
    /// May be set by configuration (false for computed-only attributes)
    pub optional: bool,
    /// Changing this attribute replaces the remote object
    pub force_new: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// Attributes that may not be set alongside this one
    pub conflicts_with: Vec<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            computed: false,
            optional: true,
            force_new: false,
            default: None,
            description: None,
            conflicts_with: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self.optional = false;
        self
    }

    /// Configurable, but filled in from the remote object when unset
    pub fn optional_computed(mut self) -> Self {
        self.computed = true;
        self.optional = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn conflicts_with(mut self, other: impl Into<String>) -> Self {
        self.conflicts_with.push(other.into());
        self
    }
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
    /// Data sources are read-only
    pub data_source: bool,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
            data_source: false,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn as_data_source(mut self) -> Self {
        self.data_source = true;
        self
    }

    /// Validate resource attributes
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();

        // Check required attributes
        for (name, schema) in &self.attributes {
            if schema.required && !attributes.contains_key(name) && schema.default.is_none() {
                errors.push(TypeError::MissingRequired { name: name.clone() });
            }
        }

        for (name, value) in attributes {
            let Some(schema) = self.attributes.get(name) else {
                errors.push(TypeError::UnknownAttribute { name: name.clone() });
                continue;
            };

            if schema.computed && !schema.optional {
                errors.push(TypeError::ComputedAttribute { name: name.clone() });
                continue;
            }

            if let Err(e) = schema.attr_type.validate(value) {
                errors.push(e);
            }

            for other in &schema.conflicts_with {
                if name < other && attributes.contains_key(other) {
                    errors.push(TypeError::ConflictingAttributes {
                        first: name.clone(),
                        second: other.clone(),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Fill in defaults for attributes absent from the configuration
    pub fn apply_defaults(&self, attributes: &mut HashMap<String, Value>) {
        for (name, schema) in &self.attributes {
            if let Some(default) = &schema.default {
                attributes
                    .entry(name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
    }

    /// Attributes whose change between `from` and `to` requires replacement
    pub fn force_new_changes(
        &self,
        from: &HashMap<String, Value>,
        to: &HashMap<String, Value>,
    ) -> Vec<String> {
        let mut changed: Vec<String> = self
            .attributes
            .values()
            .filter(|schema| schema.force_new)
            .filter(|schema| match (from.get(&schema.name), to.get(&schema.name)) {
                (current, Some(desired)) => current != Some(desired),
                // Removed from the configuration: computed attributes keep
                // the remote value and defaulted ones were already filled in.
                (Some(current), None) => {
                    !schema.computed && schema.default.is_none() && !is_empty(current)
                }
                (None, None) => false,
            })
            .map(|schema| schema.name.clone())
            .collect();
        changed.sort();
        changed
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::List(items) => items.is_empty(),
        Value::Map(map) => map.is_empty(),
        _ => false,
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| {
                if let Value::Int(n) = value {
                    if *n > 0 {
                        Ok(())
                    } else {
                        Err("Value must be positive".to_string())
                    }
                } else {
                    Err("Expected integer".to_string())
                }
            },
        }
    }

    /// Integer that may be zero but not negative
    pub fn non_negative_int() -> AttributeType {
        AttributeType::Custom {
            name: "NonNegativeInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| match value {
                Value::Int(n) if *n >= 0 => Ok(()),
                Value::Int(_) => Err("Value must not be negative".to_string()),
                _ => Err("Expected integer".to_string()),
            },
        }
    }

    /// String holding a JSON document
    pub fn json_string() -> AttributeType {
        AttributeType::Custom {
            name: "JsonString".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| {
                if let Value::String(s) = value {
                    serde_json::from_str::<serde_json::Value>(s)
                        .map(|_| ())
                        .map_err(|e| format!("Invalid JSON: {}", e))
                } else {
                    Err("Expected string".to_string())
                }
            },
        }
    }

    /// Amazon Resource Name
    pub fn arn() -> AttributeType {
        AttributeType::Custom {
            name: "Arn".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| {
                if let Value::String(s) = value {
                    validate_arn(s)
                } else {
                    Err("Expected string".to_string())
                }
            },
        }
    }
}

/// Validate the shape `arn:partition:service:region:account:resource`
pub fn validate_arn(s: &str) -> Result<(), String> {
    let parts: Vec<&str> = s.splitn(6, ':').collect();
    if parts.len() != 6 || parts[0] != "arn" {
        return Err(format!(
            "Invalid ARN '{}': expected arn:partition:service:region:account:resource",
            s
        ));
    }
    if parts[1].is_empty() || parts[2].is_empty() || parts[5].is_empty() {
        return Err(format!(
            "Invalid ARN '{}': partition, service and resource must not be empty",
            s
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_string_type() {
        let t = AttributeType::String;
        assert!(t.validate(&Value::String("hello".to_string())).is_ok());
        assert!(t.validate(&Value::Int(42)).is_err());
    }

    #[test]
    fn validate_enum_type() {
        let t = AttributeType::enumeration(&["REPLICA", "DAEMON"]);
        assert!(t.validate(&Value::String("DAEMON".to_string())).is_ok());
        assert!(t.validate(&Value::String("daemon".to_string())).is_err());
    }

    #[test]
    fn validate_positive_int() {
        let t = types::positive_int();
        assert!(t.validate(&Value::Int(1)).is_ok());
        assert!(t.validate(&Value::Int(100)).is_ok());
        assert!(t.validate(&Value::Int(0)).is_err());
        assert!(t.validate(&Value::Int(-1)).is_err());
        assert!(t.validate(&Value::String("1".to_string())).is_err());
    }

    #[test]
    fn set_rejects_duplicates() {
        let t = AttributeType::set(AttributeType::String);
        let ok = Value::List(vec![Value::from("Encrypt"), Value::from("Decrypt")]);
        let dup = Value::List(vec![Value::from("Encrypt"), Value::from("Encrypt")]);
        assert!(t.validate(&ok).is_ok());
        assert!(matches!(
            t.validate(&dup),
            Err(TypeError::DuplicateSetItem { index: 1 })
        ));
    }

    #[test]
    fn object_checks_nested_attributes() {
        let t = AttributeType::object(vec![
            AttributeSchema::new("container_name", AttributeType::String).required(),
            AttributeSchema::new("container_port", AttributeType::Int),
        ]);

        let mut ok = HashMap::new();
        ok.insert("container_name".to_string(), Value::from("web"));
        ok.insert("container_port".to_string(), Value::Int(80));
        assert!(t.validate(&Value::Map(ok)).is_ok());

        let mut missing = HashMap::new();
        missing.insert("container_port".to_string(), Value::Int(80));
        assert!(t.validate(&Value::Map(missing)).is_err());

        let mut unknown = HashMap::new();
        unknown.insert("container_name".to_string(), Value::from("web"));
        unknown.insert("bogus".to_string(), Value::Int(1));
        assert!(t.validate(&Value::Map(unknown)).is_err());
    }

    #[test]
    fn object_rejects_conflicting_keys() {
        let t = AttributeType::object(vec![
            AttributeSchema::new("equals", AttributeType::String).conflicts_with("subset"),
            AttributeSchema::new("subset", AttributeType::String).conflicts_with("equals"),
        ]);
        let one = Value::Map(HashMap::from([("equals".to_string(), Value::from("a"))]));
        assert!(t.validate(&one).is_ok());

        let both = Value::Map(HashMap::from([
            ("equals".to_string(), Value::from("a")),
            ("subset".to_string(), Value::from("b")),
        ]));
        assert!(matches!(
            t.validate(&both),
            Err(TypeError::ConflictingAttributes { first, second })
                if first == "equals" && second == "subset"
        ));
    }

    #[test]
    fn validate_resource_schema() {
        let schema = ResourceSchema::new("resource")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(AttributeSchema::new("count", types::positive_int()))
            .attribute(AttributeSchema::new("enabled", AttributeType::Bool));

        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), Value::String("my-resource".to_string()));
        attrs.insert("count".to_string(), Value::Int(5));
        attrs.insert("enabled".to_string(), Value::Bool(true));

        assert!(schema.validate(&attrs).is_ok());
    }

    #[test]
    fn missing_required_attribute() {
        let schema = ResourceSchema::new("grant")
            .attribute(AttributeSchema::new("key_id", AttributeType::String).required());

        let attrs = HashMap::new();
        let result = schema.validate(&attrs);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_and_computed_attributes_are_rejected() {
        let schema = ResourceSchema::new("grant")
            .attribute(AttributeSchema::new("key_id", AttributeType::String).required())
            .attribute(AttributeSchema::new("grant_id", AttributeType::String).computed());

        let mut attrs = HashMap::new();
        attrs.insert("key_id".to_string(), Value::from("k"));
        attrs.insert("grant_id".to_string(), Value::from("g"));
        attrs.insert("bogus".to_string(), Value::from("x"));

        let errors = schema.validate(&attrs).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn conflicting_attributes_are_reported_once() {
        let schema = ResourceSchema::new("constraints")
            .attribute(
                AttributeSchema::new("a", AttributeType::String).conflicts_with("b"),
            )
            .attribute(
                AttributeSchema::new("b", AttributeType::String).conflicts_with("a"),
            );

        let mut attrs = HashMap::new();
        attrs.insert("a".to_string(), Value::from("1"));
        attrs.insert("b".to_string(), Value::from("2"));

        let errors = schema.validate(&attrs).unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn force_new_changes_lists_only_replacing_attributes() {
        let schema = ResourceSchema::new("svc")
            .attribute(AttributeSchema::new("name", AttributeType::String).force_new())
            .attribute(AttributeSchema::new("desired_count", AttributeType::Int));

        let mut from = HashMap::new();
        from.insert("name".to_string(), Value::from("a"));
        from.insert("desired_count".to_string(), Value::Int(1));
        let mut to = from.clone();
        to.insert("desired_count".to_string(), Value::Int(2));
        assert!(schema.force_new_changes(&from, &to).is_empty());

        to.insert("name".to_string(), Value::from("b"));
        assert_eq!(schema.force_new_changes(&from, &to), vec!["name".to_string()]);
    }

    #[test]
    fn removing_force_new_attribute_requires_replacement() {
        let schema = ResourceSchema::new("grant")
            .attribute(AttributeSchema::new("key_id", AttributeType::String).force_new())
            .attribute(AttributeSchema::new("name", AttributeType::String).force_new())
            .attribute(
                AttributeSchema::new("network_mode", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("retire_on_delete", AttributeType::Bool)
                    .force_new()
                    .with_default(false.into()),
            )
            .attribute(
                AttributeSchema::new("load_balancer", AttributeType::list(AttributeType::String))
                    .force_new(),
            );

        let from = HashMap::from([
            ("key_id".to_string(), Value::from("k")),
            ("name".to_string(), Value::from("n")),
            ("network_mode".to_string(), Value::from("awsvpc")),
            ("retire_on_delete".to_string(), Value::Bool(true)),
            ("load_balancer".to_string(), Value::List(vec![])),
        ]);
        let to = HashMap::from([("key_id".to_string(), Value::from("k"))]);
        assert_eq!(schema.force_new_changes(&from, &to), vec!["name".to_string()]);
    }

    #[test]
    fn defaults_fill_missing_attributes() {
        let schema = ResourceSchema::new("svc").attribute(
            AttributeSchema::new("scheduling_strategy", AttributeType::String)
                .with_default(Value::from("REPLICA")),
        );
        let mut attrs = HashMap::new();
        schema.apply_defaults(&mut attrs);
        assert_eq!(
            attrs.get("scheduling_strategy"),
            Some(&Value::from("REPLICA"))
        );
    }

    #[test]
    fn validate_arn_shapes() {
        assert!(validate_arn("arn:aws:iam::123456789012:role/ecs").is_ok());
        assert!(validate_arn("arn:aws:kms:us-east-1:123456789012:key/abc").is_ok());
        assert!(validate_arn("not-an-arn").is_err());
        assert!(validate_arn("arn:aws:iam::123456789012:").is_err());
    }

    #[test]
    fn json_string_type() {
        let t = types::json_string();
        assert!(t.validate(&Value::from("[{\"name\":\"web\"}]")).is_ok());
        assert!(t.validate(&Value::from("[{")).is_err());
    }
}
