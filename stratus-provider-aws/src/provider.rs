//! AWS Provider implementation
//!
//! `AwsProvider` owns one SDK client per service and routes each lifecycle
//! call to the resource module for the resource type.

use std::collections::HashMap;

use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State, Value};

use crate::client::AwsClients;
use crate::config::{ConfigError, ProviderConfig};
use crate::resources::ecs_service::normalize_ecs_service_attributes;
use crate::resources::ecs_task_definition::normalize_task_definition_attributes;
use crate::resources::find_resource_type;
use crate::resources::kms_grant::normalize_kms_grant_attributes;
use crate::resources::waf_size_constraint_set::normalize_size_constraint_set_attributes;

/// AWS Provider
pub struct AwsProvider {
    pub(crate) clients: AwsClients,
}

impl AwsProvider {
    /// Create a new AWS Provider from its configuration
    pub async fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let clients = AwsClients::connect(config).await?;
        Ok(Self { clients })
    }

    /// Create with specific clients (for testing)
    pub fn with_clients(clients: AwsClients) -> Self {
        Self { clients }
    }

    pub fn region(&self) -> &str {
        &self.clients.region
    }

    pub fn partition(&self) -> &'static str {
        self.clients.partition
    }

    pub fn account_id(&self) -> Option<&str> {
        self.clients.account_id.as_deref()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    pub async fn read_resource(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
        prior: Option<&State>,
    ) -> ProviderResult<State> {
        let identifier = match (id.resource_type.as_str(), identifier) {
            ("iam.credential_report", _) => return self.read_iam_credential_report(id).await,
            (_, Some(identifier)) => identifier,
            (_, None) => return Ok(State::not_found(id.clone())),
        };

        match id.resource_type.as_str() {
            "kms.grant" => self.read_kms_grant(id, identifier, prior).await,
            "ecs.service" => self.read_ecs_service(id, identifier, prior).await,
            "ecs.task_definition" => self.read_ecs_task_definition(id, identifier).await,
            "waf.size_constraint_set" => self.read_waf_size_constraint_set(id, identifier).await,
            _ => Err(unknown_type(id)),
        }
    }

    pub async fn create_resource(&self, mut resource: Resource) -> ProviderResult<State> {
        let resource_type = find_resource_type(&resource.id.resource_type)
            .ok_or_else(|| unknown_type(&resource.id))?;
        let schema = resource_type.schema();
        if schema.data_source {
            return Err(ProviderError::validation(format!(
                "{} is a data source and cannot be created",
                resource.id.resource_type
            ))
            .for_resource(resource.id.clone()));
        }
        schema.apply_defaults(&mut resource.attributes);
        normalize_attributes(&resource.id.resource_type, &mut resource.attributes)
            .map_err(|e| e.for_resource(resource.id.clone()))?;

        match resource.id.resource_type.as_str() {
            "kms.grant" => self.create_kms_grant(resource).await,
            "ecs.service" => self.create_ecs_service(resource).await,
            "ecs.task_definition" => self.create_ecs_task_definition(resource).await,
            "waf.size_constraint_set" => self.create_waf_size_constraint_set(resource).await,
            _ => Err(unknown_type(&resource.id)),
        }
    }

    pub async fn update_resource(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        mut to: Resource,
    ) -> ProviderResult<State> {
        let resource_type = find_resource_type(&id.resource_type).ok_or_else(|| unknown_type(id))?;
        let schema = resource_type.schema();
        schema.apply_defaults(&mut to.attributes);
        normalize_attributes(&id.resource_type, &mut to.attributes)
            .map_err(|e| e.for_resource(id.clone()))?;

        let replace = schema.force_new_changes(&from.attributes, &to.attributes);
        if !replace.is_empty() {
            return Err(ProviderError::validation(format!(
                "cannot update in place, replacement required for: {}",
                replace.join(", ")
            ))
            .for_resource(id.clone()));
        }

        match id.resource_type.as_str() {
            "kms.grant" => self.read_kms_grant(id, identifier, Some(from)).await,
            "ecs.service" => self.update_ecs_service(id, identifier, from, to).await,
            "ecs.task_definition" => {
                self.update_ecs_task_definition(id, identifier, from, to)
                    .await
            }
            "waf.size_constraint_set" => {
                self.update_waf_size_constraint_set(id, identifier, from, to)
                    .await
            }
            "iam.credential_report" => Err(ProviderError::validation(
                "iam.credential_report is a data source and cannot be updated",
            )
            .for_resource(id.clone())),
            _ => Err(unknown_type(id)),
        }
    }

    pub async fn delete_resource(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
    ) -> ProviderResult<()> {
        match id.resource_type.as_str() {
            "kms.grant" => self.delete_kms_grant(id, identifier, from).await,
            "ecs.service" => self.delete_ecs_service(id, identifier, from).await,
            "ecs.task_definition" => self.delete_ecs_task_definition(id, identifier).await,
            "waf.size_constraint_set" => {
                self.delete_waf_size_constraint_set(id, identifier).await
            }
            // Nothing remote to delete
            "iam.credential_report" => Ok(()),
            _ => Err(unknown_type(id)),
        }
    }

    pub async fn import_resource(&self, id: &ResourceId, import_id: &str) -> ProviderResult<State> {
        match id.resource_type.as_str() {
            "ecs.service" => self.import_ecs_service(id, import_id).await,
            _ => self.read_resource(id, Some(import_id), None).await,
        }
    }
}

/// Rewrite configured attributes into the form reads report them in, so that
/// equivalent spellings (enum references, set order, JSON layout) compare equal
pub fn normalize_attributes(
    resource_type: &str,
    attributes: &mut HashMap<String, Value>,
) -> ProviderResult<()> {
    match resource_type {
        "kms.grant" => normalize_kms_grant_attributes(attributes),
        "ecs.service" => normalize_ecs_service_attributes(attributes)?,
        "ecs.task_definition" => normalize_task_definition_attributes(attributes)?,
        "waf.size_constraint_set" => normalize_size_constraint_set_attributes(attributes)?,
        _ => {}
    }
    Ok(())
}

fn unknown_type(id: &ResourceId) -> ProviderError {
    ProviderError::new(format!("Unknown resource type: {}", id.resource_type)).for_resource(id.clone())
}
