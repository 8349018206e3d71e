//! AWS client construction

use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};

use crate::config::{ConfigError, ProviderConfig};
use crate::errors::format_sdk_error;

/// Build a service client from the shared config, honoring an endpoint override
macro_rules! service_client {
    ($sdk:ident, $shared:expr, $endpoint:expr) => {{
        let mut builder = $sdk::config::Builder::from($shared);
        if let Some(url) = $endpoint {
            builder = builder.endpoint_url(url);
        }
        $sdk::Client::from_conf(builder.build())
    }};
}

/// SDK clients for every service the provider talks to
#[derive(Clone)]
pub struct AwsClients {
    pub ecs: aws_sdk_ecs::Client,
    pub iam: aws_sdk_iam::Client,
    pub kms: aws_sdk_kms::Client,
    pub sts: aws_sdk_sts::Client,
    pub waf: aws_sdk_waf::Client,
    pub region: String,
    pub partition: &'static str,
    /// Caller account, unless the lookup was skipped
    pub account_id: Option<String>,
}

impl AwsClients {
    /// Load the shared SDK configuration and build all clients
    ///
    /// Unless `skip_requesting_account_id` is set, the caller identity is
    /// looked up and checked against the allowed/forbidden account lists.
    pub async fn connect(config: &ProviderConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .retry_config(
                RetryConfig::standard().with_max_attempts(config.max_retries.saturating_add(1)),
            );
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        let shared = loader.load().await;

        let mut clients = Self::from_shared(&shared, config);

        if config.skip_requesting_account_id {
            log::warn!("AWS account ID lookup skipped; account guards are not enforced");
            return Ok(clients);
        }

        let identity = clients
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| ConfigError::AccountLookup(format_sdk_error(&e)))?;
        let account_id = identity
            .account()
            .ok_or_else(|| ConfigError::AccountLookup("empty caller identity".to_string()))?
            .to_string();
        config.check_account(&account_id)?;
        log::debug!("Using AWS account {} in {}", account_id, config.region);

        clients.account_id = Some(account_id);
        Ok(clients)
    }

    /// Build clients from an already loaded SDK config without any remote call
    pub fn from_shared(shared: &SdkConfig, config: &ProviderConfig) -> Self {
        let endpoints = &config.endpoints;
        Self {
            ecs: service_client!(aws_sdk_ecs, shared, endpoints.ecs.as_deref()),
            iam: service_client!(aws_sdk_iam, shared, endpoints.iam.as_deref()),
            kms: service_client!(aws_sdk_kms, shared, endpoints.kms.as_deref()),
            sts: service_client!(aws_sdk_sts, shared, endpoints.sts.as_deref()),
            waf: service_client!(aws_sdk_waf, shared, endpoints.waf.as_deref()),
            region: config.region.clone(),
            partition: config.partition(),
            account_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clients_built_from_shared_config() {
        let mut config = ProviderConfig::new("us-gov-west-1");
        config.endpoints.kms = Some("http://localhost:4566".to_string());
        let shared = SdkConfig::builder()
            .region(Region::new("us-gov-west-1"))
            .behavior_version(BehaviorVersion::latest())
            .build();

        let clients = AwsClients::from_shared(&shared, &config);
        assert_eq!(clients.partition, "aws-us-gov");
        assert_eq!(clients.region, "us-gov-west-1");
        assert_eq!(clients.account_id, None);
        assert_eq!(
            clients.kms.config().region().map(|r| r.as_ref()),
            Some("us-gov-west-1")
        );
    }
}
