//! WAF (classic) resource schema definitions

use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::types as aws_types;

fn size_constraint() -> AttributeType {
    AttributeType::object(vec![
        AttributeSchema::new(
            "field_to_match",
            AttributeType::object(vec![
                AttributeSchema::new("type", aws_types::match_field_type()).required(),
                AttributeSchema::new("data", AttributeType::String),
            ]),
        )
        .required(),
        AttributeSchema::new("comparison_operator", aws_types::comparison_operator()).required(),
        AttributeSchema::new("size", aws_types::constraint_size()).required(),
        AttributeSchema::new("text_transformation", aws_types::text_transformation()).required(),
    ])
}

/// Returns the schema for WAF size constraint sets
pub fn size_constraint_set_schema() -> ResourceSchema {
    ResourceSchema::new("waf.size_constraint_set")
        .with_description("A set of request size constraints for WAF rules")
        .attribute(
            AttributeSchema::new("name", aws_types::waf_name())
                .required()
                .force_new()
                .with_description("Name of the size constraint set"),
        )
        .attribute(
            AttributeSchema::new("size_constraints", AttributeType::set(size_constraint()))
                .with_description("Parts of web requests to inspect and the size to compare"),
        )
        .attribute(
            AttributeSchema::new("arn", types::arn())
                .computed()
                .with_description("ARN of the size constraint set"),
        )
}

/// Returns all WAF-related schemas
pub fn schemas() -> Vec<ResourceSchema> {
    vec![size_constraint_set_schema()]
}
