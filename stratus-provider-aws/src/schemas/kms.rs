//! KMS grant schema definition

use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

use super::types;

/// Returns the schema for KMS grants
///
/// Grants cannot be modified, so every configurable attribute forces
/// replacement.
pub fn grant_schema() -> ResourceSchema {
    ResourceSchema::new("kms.grant")
        .with_description("A grant allowing a principal to use a KMS key")
        .attribute(
            AttributeSchema::new("name", AttributeType::String)
                .force_new()
                .with_description("A friendly name for the grant"),
        )
        .attribute(
            AttributeSchema::new("key_id", AttributeType::String)
                .required()
                .force_new()
                .with_description("Key ID or key ARN of the KMS key"),
        )
        .attribute(
            AttributeSchema::new("grantee_principal", types::principal_arn())
                .required()
                .force_new()
                .with_description("ARN of the principal receiving the grant"),
        )
        .attribute(
            AttributeSchema::new("operations", AttributeType::set(types::grant_operation()))
                .required()
                .force_new()
                .with_description("Operations the grant permits"),
        )
        .attribute(
            AttributeSchema::new("retiring_principal", types::principal_arn())
                .force_new()
                .with_description("ARN of the principal allowed to retire the grant"),
        )
        .attribute(
            AttributeSchema::new(
                "constraints",
                AttributeType::object(vec![
                    AttributeSchema::new(
                        "encryption_context_equals",
                        AttributeType::map(AttributeType::String),
                    )
                    .conflicts_with("encryption_context_subset"),
                    AttributeSchema::new(
                        "encryption_context_subset",
                        AttributeType::map(AttributeType::String),
                    )
                    .conflicts_with("encryption_context_equals"),
                ]),
            )
            .force_new()
            .with_description(
                "Encryption context constraints; exactly one of encryption_context_equals \
                 or encryption_context_subset",
            ),
        )
        .attribute(
            AttributeSchema::new("grant_creation_tokens", AttributeType::set(AttributeType::String))
                .force_new()
                .with_description("Grant tokens used when creating the grant"),
        )
        .attribute(
            AttributeSchema::new("retire_on_delete", AttributeType::Bool)
                .force_new()
                .with_default(false.into())
                .with_description("Retire instead of revoke the grant on delete"),
        )
        .attribute(
            AttributeSchema::new("grant_id", AttributeType::String)
                .computed()
                .with_description("Unique identifier of the grant"),
        )
        .attribute(
            AttributeSchema::new("grant_token", AttributeType::String)
                .computed()
                .with_description("Grant token returned when the grant was created"),
        )
}

/// Returns all KMS-related schemas
pub fn schemas() -> Vec<ResourceSchema> {
    vec![grant_schema()]
}
