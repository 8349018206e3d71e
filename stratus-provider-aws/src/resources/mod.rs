//! Resource type definitions and per-resource CRUD
//!
//! Each submodule adds the lifecycle methods for one resource type to
//! `AwsProvider`; this module lists the types the provider serves.

pub mod ecs_service;
pub mod ecs_task_definition;
pub mod iam_credential_report;
pub mod kms_grant;
pub mod waf_size_constraint_set;

use std::time::Duration;

use stratus_core::provider::ResourceType;
use stratus_core::schema::ResourceSchema;

use crate::schemas;

/// How long IAM changes take to become visible to other services
pub const PROPAGATION_TIMEOUT: Duration = Duration::from_secs(2 * 60);

// =============================================================================
// Resource Type Definitions
// =============================================================================

macro_rules! define_resource_type {
    ($name:ident, $type_name:expr, $schema:path) => {
        pub struct $name;
        impl ResourceType for $name {
            fn name(&self) -> &'static str {
                $type_name
            }
            fn schema(&self) -> ResourceSchema {
                $schema()
            }
        }
    };
}

define_resource_type!(KmsGrantType, "kms.grant", schemas::kms::grant_schema);
define_resource_type!(
    IamCredentialReportType,
    "iam.credential_report",
    schemas::iam::credential_report_schema
);
define_resource_type!(EcsServiceType, "ecs.service", schemas::ecs::service_schema);
define_resource_type!(
    EcsTaskDefinitionType,
    "ecs.task_definition",
    schemas::ecs::task_definition_schema
);
define_resource_type!(
    WafSizeConstraintSetType,
    "waf.size_constraint_set",
    schemas::waf::size_constraint_set_schema
);

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    vec![
        Box::new(KmsGrantType),
        Box::new(IamCredentialReportType),
        Box::new(EcsServiceType),
        Box::new(EcsTaskDefinitionType),
        Box::new(WafSizeConstraintSetType),
    ]
}

/// Look up a resource type by name
pub fn find_resource_type(name: &str) -> Option<Box<dyn ResourceType>> {
    resource_types().into_iter().find(|t| t.name() == name)
}
