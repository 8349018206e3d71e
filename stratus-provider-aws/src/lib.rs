//! Stratus AWS Provider
//!
//! Manages KMS grants, ECS services and task definitions, and WAF size
//! constraint sets, and reads the IAM credential report as a data source.

pub mod arn;
pub mod client;
pub mod config;
pub mod errors;
pub mod provider;
pub mod resources;
pub mod schemas;
pub mod utils;

use stratus_core::provider::{BoxFuture, Provider, ProviderResult, ResourceType};
use stratus_core::resource::{Resource, ResourceId, State};

pub use config::ProviderConfig;
pub use provider::AwsProvider;

impl Provider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resources::resource_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(String::from);
        Box::pin(async move { self.read_resource(&id, identifier.as_deref(), None).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(resource).await })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move { self.update_resource(&id, &identifier, &from, to).await })
    }

    fn refresh(
        &self,
        id: &ResourceId,
        identifier: &str,
        prior: &State,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let prior = prior.clone();
        Box::pin(async move {
            self.read_resource(&id, Some(&identifier), Some(&prior))
                .await
        })
    }

    fn delete(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
    ) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        Box::pin(async move { self.delete_resource(&id, &identifier, &from).await })
    }

    fn import(&self, id: &ResourceId, import_id: &str) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let import_id = import_id.to_string();
        Box::pin(async move { self.import_resource(&id, &import_id).await })
    }
}

#[cfg(test)]
mod tests {
    use aws_config::{BehaviorVersion, Region, SdkConfig};

    use super::*;
    use crate::client::AwsClients;

    fn offline_provider() -> AwsProvider {
        let config = ProviderConfig::new("us-east-1");
        let shared = SdkConfig::builder()
            .region(Region::new("us-east-1"))
            .behavior_version(BehaviorVersion::latest())
            .build();
        AwsProvider::with_clients(AwsClients::from_shared(&shared, &config))
    }

    #[test]
    fn provider_name_and_types() {
        let provider = offline_provider();
        assert_eq!(provider.name(), "aws");

        let mut names: Vec<_> = provider.resource_types().iter().map(|t| t.name()).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "ecs.service",
                "ecs.task_definition",
                "iam.credential_report",
                "kms.grant",
                "waf.size_constraint_set",
            ]
        );
    }

    #[tokio::test]
    async fn read_without_identifier_is_not_found() {
        let provider = offline_provider();
        let id = ResourceId::new("kms.grant", "app");
        let state = provider.read(&id, None).await.unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn unknown_type_is_rejected() {
        let provider = offline_provider();
        let id = ResourceId::new("s3.bucket", "logs");
        let err = provider.read(&id, Some("logs")).await.unwrap_err();
        assert!(err.to_string().contains("Unknown resource type"));
    }

    #[tokio::test]
    async fn data_source_cannot_be_created() {
        let provider = offline_provider();
        let resource = Resource::new("iam.credential_report", "report");
        let err = provider.create(&resource).await.unwrap_err();
        assert!(err.to_string().contains("data source"));
    }
}
