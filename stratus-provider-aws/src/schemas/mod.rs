//! AWS resource schema definitions

pub mod ecs;
pub mod iam;
pub mod kms;
pub mod types;
pub mod waf;

use stratus_core::schema::ResourceSchema;

/// Returns all AWS schemas
pub fn all_schemas() -> Vec<ResourceSchema> {
    let mut schemas = Vec::new();
    schemas.extend(ecs::schemas());
    schemas.extend(iam::schemas());
    schemas.extend(kms::schemas());
    schemas.extend(waf::schemas());
    schemas
}
