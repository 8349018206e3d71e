//! Provider configuration
//!
//! The provider block accepts a region, an optional shared-config profile,
//! per-service endpoint overrides and account guards. It can be loaded from
//! JSON or from the attribute map of a provider block.

use std::collections::HashMap;

use serde::Deserialize;
use stratus_core::resource::Value;

/// Default number of SDK-level retries for throttled or failed requests
pub const DEFAULT_MAX_RETRIES: u32 = 25;

/// Services whose endpoint can be overridden
pub const ENDPOINT_SERVICES: &[&str] = &["ecs", "iam", "kms", "sts", "waf"];

/// Known AWS regions across the commercial, China and GovCloud partitions
const VALID_REGIONS: &[&str] = &[
    "af-south-1",
    "ap-east-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ca-central-1",
    "ca-west-1",
    "eu-central-1",
    "eu-central-2",
    "eu-north-1",
    "eu-south-1",
    "eu-south-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "il-central-1",
    "me-central-1",
    "me-south-1",
    "sa-east-1",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "cn-north-1",
    "cn-northwest-1",
    "us-gov-east-1",
    "us-gov-west-1",
];

/// Errors raised while loading or checking the provider configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required attribute: {0}")]
    MissingAttribute(String),

    #[error("Invalid attribute '{name}': {message}")]
    InvalidAttribute { name: String, message: String },

    #[error("Unknown provider attribute: {0}")]
    UnknownAttribute(String),

    #[error("Invalid AWS Region: {0}")]
    InvalidRegion(String),

    #[error("Unknown endpoint service '{0}', expected one of: {list}", list = ENDPOINT_SERVICES.join(", "))]
    UnknownEndpointService(String),

    #[error("Invalid endpoint URL for {service}: {url}")]
    InvalidEndpoint { service: String, url: String },

    #[error("allowed_account_ids and forbidden_account_ids cannot both be set")]
    ConflictingAccountLists,

    #[error("AWS account ID not allowed: {account_id}")]
    AccountNotAllowed { account_id: String },

    #[error("Forbidden AWS account ID: {account_id}")]
    AccountForbidden { account_id: String },

    #[error("Failed to look up AWS account ID: {0}")]
    AccountLookup(String),

    #[error("Failed to parse provider configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Per-service endpoint URL overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Endpoints {
    pub ecs: Option<String>,
    pub iam: Option<String>,
    pub kms: Option<String>,
    pub sts: Option<String>,
    pub waf: Option<String>,
}

impl Endpoints {
    pub fn get(&self, service: &str) -> Option<&str> {
        match service {
            "ecs" => self.ecs.as_deref(),
            "iam" => self.iam.as_deref(),
            "kms" => self.kms.as_deref(),
            "sts" => self.sts.as_deref(),
            "waf" => self.waf.as_deref(),
            _ => None,
        }
    }

    fn set(&mut self, service: &str, url: String) -> Result<(), ConfigError> {
        let slot = match service {
            "ecs" => &mut self.ecs,
            "iam" => &mut self.iam,
            "kms" => &mut self.kms,
            "sts" => &mut self.sts,
            "waf" => &mut self.waf,
            other => return Err(ConfigError::UnknownEndpointService(other.to_string())),
        };
        *slot = Some(url);
        Ok(())
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// AWS provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub region: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub endpoints: Endpoints,
    #[serde(default)]
    pub allowed_account_ids: Vec<String>,
    #[serde(default)]
    pub forbidden_account_ids: Vec<String>,
    #[serde(default)]
    pub skip_region_validation: bool,
    #[serde(default)]
    pub skip_requesting_account_id: bool,
}

impl ProviderConfig {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            profile: None,
            max_retries: DEFAULT_MAX_RETRIES,
            endpoints: Endpoints::default(),
            allowed_account_ids: Vec::new(),
            forbidden_account_ids: Vec::new(),
            skip_region_validation: false,
            skip_requesting_account_id: false,
        }
    }

    /// Parse and validate a JSON provider configuration
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mut config: ProviderConfig = serde_json::from_str(json)?;
        config.region = normalize_region(&config.region);
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from a provider block's attributes
    pub fn from_attributes(attributes: &HashMap<String, Value>) -> Result<Self, ConfigError> {
        let region = match attributes.get("region") {
            Some(Value::String(s)) => normalize_region(s),
            Some(_) => return Err(invalid("region", "expected a string")),
            None => return Err(ConfigError::MissingAttribute("region".to_string())),
        };
        let mut config = ProviderConfig::new(region);

        for (name, value) in attributes {
            match (name.as_str(), value) {
                ("region", _) => {}
                ("profile", Value::String(s)) => config.profile = Some(s.clone()),
                ("max_retries", Value::Int(n)) => {
                    config.max_retries = u32::try_from(*n)
                        .map_err(|_| invalid("max_retries", "must not be negative"))?;
                }
                ("endpoints", Value::Map(map)) => {
                    for (service, url) in map {
                        match url {
                            Value::String(url) => config.endpoints.set(service, url.clone())?,
                            _ => return Err(invalid("endpoints", "URLs must be strings")),
                        }
                    }
                }
                ("allowed_account_ids", Value::List(items)) => {
                    config.allowed_account_ids = string_list(name, items)?;
                }
                ("forbidden_account_ids", Value::List(items)) => {
                    config.forbidden_account_ids = string_list(name, items)?;
                }
                ("skip_region_validation", Value::Bool(b)) => config.skip_region_validation = *b,
                ("skip_requesting_account_id", Value::Bool(b)) => {
                    config.skip_requesting_account_id = *b
                }
                (
                    "profile"
                    | "max_retries"
                    | "endpoints"
                    | "allowed_account_ids"
                    | "forbidden_account_ids"
                    | "skip_region_validation"
                    | "skip_requesting_account_id",
                    _,
                ) => return Err(invalid(name, "unexpected value type")),
                _ => return Err(ConfigError::UnknownAttribute(name.clone())),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration before any client is built
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.is_empty() {
            return Err(ConfigError::MissingAttribute("region".to_string()));
        }
        if !self.skip_region_validation && !VALID_REGIONS.contains(&self.region.as_str()) {
            return Err(ConfigError::InvalidRegion(self.region.clone()));
        }
        if !self.allowed_account_ids.is_empty() && !self.forbidden_account_ids.is_empty() {
            return Err(ConfigError::ConflictingAccountLists);
        }
        for service in ENDPOINT_SERVICES {
            if let Some(url) = self.endpoints.get(service)
                && !(url.starts_with("https://") || url.starts_with("http://"))
            {
                return Err(ConfigError::InvalidEndpoint {
                    service: service.to_string(),
                    url: url.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Partition of the configured region
    pub fn partition(&self) -> &'static str {
        partition_for_region(&self.region)
    }

    /// Enforce the allowed/forbidden account lists
    pub fn check_account(&self, account_id: &str) -> Result<(), ConfigError> {
        if !self.allowed_account_ids.is_empty()
            && !self.allowed_account_ids.iter().any(|a| a == account_id)
        {
            return Err(ConfigError::AccountNotAllowed {
                account_id: account_id.to_string(),
            });
        }
        if self.forbidden_account_ids.iter().any(|a| a == account_id) {
            return Err(ConfigError::AccountForbidden {
                account_id: account_id.to_string(),
            });
        }
        Ok(())
    }
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::InvalidAttribute {
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn string_list(name: &str, items: &[Value]) -> Result<Vec<String>, ConfigError> {
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            _ => Err(invalid(name, "expected a list of strings")),
        })
        .collect()
}

/// Partition ID for a region
pub fn partition_for_region(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "aws-cn"
    } else if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else {
        "aws"
    }
}

/// Normalize region string to AWS format (hyphens)
/// - "aws.Region.ap_northeast_1" -> "ap-northeast-1"
/// - "ap_northeast_1" -> "ap-northeast-1"
/// - "ap-northeast-1" -> "ap-northeast-1"
pub fn normalize_region(s: &str) -> String {
    let region_part = if s.contains('.') {
        s.split('.').next_back().unwrap_or(s)
    } else {
        s
    };
    region_part.replace('_', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_defaults() {
        let config = ProviderConfig::from_json(r#"{"region": "us-west-2"}"#).unwrap();
        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.profile, None);
        assert_eq!(config.endpoints, Endpoints::default());
        assert!(!config.skip_requesting_account_id);
    }

    #[test]
    fn json_requires_region() {
        let err = ProviderConfig::from_json("{}").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn json_rejects_unknown_fields() {
        let result = ProviderConfig::from_json(r#"{"region": "us-east-1", "regoin": "x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn region_is_validated_unless_skipped() {
        let err = ProviderConfig::from_json(r#"{"region": "mars-north-1"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRegion(r) if r == "mars-north-1"));

        let config = ProviderConfig::from_json(
            r#"{"region": "mars-north-1", "skip_region_validation": true}"#,
        )
        .unwrap();
        assert_eq!(config.region, "mars-north-1");
    }

    #[test]
    fn dsl_region_is_normalized() {
        let config = ProviderConfig::from_json(r#"{"region": "aws.Region.ap_northeast_1"}"#).unwrap();
        assert_eq!(config.region, "ap-northeast-1");
    }

    #[test]
    fn account_lists_are_mutually_exclusive() {
        let err = ProviderConfig::from_json(
            r#"{"region": "us-east-1", "allowed_account_ids": ["111"], "forbidden_account_ids": ["222"]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingAccountLists));
    }

    #[test]
    fn check_account_enforces_lists() {
        let mut config = ProviderConfig::new("us-east-1");
        config.allowed_account_ids = vec!["123456789012".to_string()];
        assert!(config.check_account("123456789012").is_ok());
        assert!(matches!(
            config.check_account("999999999999"),
            Err(ConfigError::AccountNotAllowed { .. })
        ));

        let mut config = ProviderConfig::new("us-east-1");
        config.forbidden_account_ids = vec!["999999999999".to_string()];
        assert!(config.check_account("123456789012").is_ok());
        assert!(matches!(
            config.check_account("999999999999"),
            Err(ConfigError::AccountForbidden { .. })
        ));
    }

    #[test]
    fn endpoint_overrides() {
        let config = ProviderConfig::from_json(
            r#"{"region": "us-east-1", "endpoints": {"kms": "http://localhost:4566"}}"#,
        )
        .unwrap();
        assert_eq!(config.endpoints.get("kms"), Some("http://localhost:4566"));
        assert_eq!(config.endpoints.get("ecs"), None);

        let err = ProviderConfig::from_json(
            r#"{"region": "us-east-1", "endpoints": {"kms": "localhost:4566"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint { .. }));
    }

    #[test]
    fn partition_is_derived_from_region() {
        assert_eq!(partition_for_region("us-east-1"), "aws");
        assert_eq!(partition_for_region("cn-north-1"), "aws-cn");
        assert_eq!(partition_for_region("us-gov-west-1"), "aws-us-gov");
        assert_eq!(ProviderConfig::new("cn-northwest-1").partition(), "aws-cn");
    }

    #[test]
    fn from_attributes() {
        let mut attrs = HashMap::new();
        attrs.insert("region".to_string(), Value::from("aws.Region.eu_west_1"));
        attrs.insert("profile".to_string(), Value::from("staging"));
        attrs.insert("max_retries".to_string(), Value::Int(5));
        attrs.insert(
            "endpoints".to_string(),
            Value::Map(HashMap::from([(
                "ecs".to_string(),
                Value::from("https://ecs.internal"),
            )])),
        );
        attrs.insert(
            "allowed_account_ids".to_string(),
            Value::List(vec![Value::from("123456789012")]),
        );

        let config = ProviderConfig::from_attributes(&attrs).unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.profile.as_deref(), Some("staging"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.endpoints.get("ecs"), Some("https://ecs.internal"));
        assert_eq!(config.allowed_account_ids, vec!["123456789012".to_string()]);
    }

    #[test]
    fn from_attributes_rejects_bad_input() {
        let attrs = HashMap::from([("profile".to_string(), Value::from("x"))]);
        assert!(matches!(
            ProviderConfig::from_attributes(&attrs),
            Err(ConfigError::MissingAttribute(_))
        ));

        let attrs = HashMap::from([
            ("region".to_string(), Value::from("us-east-1")),
            ("max_retries".to_string(), Value::Int(-1)),
        ]);
        assert!(matches!(
            ProviderConfig::from_attributes(&attrs),
            Err(ConfigError::InvalidAttribute { .. })
        ));

        let attrs = HashMap::from([
            ("region".to_string(), Value::from("us-east-1")),
            (
                "endpoints".to_string(),
                Value::Map(HashMap::from([("s3".to_string(), Value::from("https://x"))])),
            ),
        ]);
        assert!(matches!(
            ProviderConfig::from_attributes(&attrs),
            Err(ConfigError::UnknownEndpointService(_))
        ));

        let attrs = HashMap::from([
            ("region".to_string(), Value::from("us-east-1")),
            ("access_key".to_string(), Value::from("AKIA")),
        ]);
        assert!(matches!(
            ProviderConfig::from_attributes(&attrs),
            Err(ConfigError::UnknownAttribute(_))
        ));
    }
}
