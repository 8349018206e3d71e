//! IAM credential report schema definition

use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

/// Columns of a credential report row, in report order
pub const REPORT_COLUMNS: &[&str] = &[
    "user",
    "arn",
    "user_creation_time",
    "password_enabled",
    "password_last_used",
    "password_last_changed",
    "password_next_rotation",
    "mfa_active",
    "access_key_1_active",
    "access_key_1_last_rotated",
    "access_key_1_last_used_date",
    "access_key_1_last_used_region",
    "access_key_1_last_used_service",
    "access_key_2_active",
    "access_key_2_last_rotated",
    "access_key_2_last_used_date",
    "access_key_2_last_used_region",
    "access_key_2_last_used_service",
    "cert_1_active",
    "cert_1_last_rotated",
    "cert_2_active",
    "cert_2_last_rotated",
];

/// Columns holding `true`/`false`
pub const BOOLEAN_COLUMNS: &[&str] = &[
    "password_enabled",
    "mfa_active",
    "access_key_1_active",
    "access_key_2_active",
    "cert_1_active",
    "cert_2_active",
];

fn user_schema() -> AttributeType {
    AttributeType::object(
        REPORT_COLUMNS
            .iter()
            .map(|column| {
                let attr_type = if BOOLEAN_COLUMNS.contains(column) {
                    AttributeType::Bool
                } else {
                    AttributeType::String
                };
                AttributeSchema::new(*column, attr_type).computed()
            })
            .collect(),
    )
}

/// Returns the schema for the IAM credential report data source
pub fn credential_report_schema() -> ResourceSchema {
    ResourceSchema::new("iam.credential_report")
        .with_description("The account's IAM credential report")
        .as_data_source()
        .attribute(
            AttributeSchema::new("generated_time", AttributeType::String)
                .computed()
                .with_description("When the report was generated (RFC 3339)"),
        )
        .attribute(
            AttributeSchema::new("users", AttributeType::list(user_schema()))
                .computed()
                .with_description("One entry per IAM user, plus the root account"),
        )
}

/// Returns all IAM-related schemas
pub fn schemas() -> Vec<ResourceSchema> {
    vec![credential_report_schema()]
}
