//! AWS-specific type definitions

use stratus_core::resource::Value;
use stratus_core::schema::{AttributeType, validate_arn};

use crate::utils::convert_enum_value;

pub const GRANT_OPERATIONS: &[&str] = &[
    "Decrypt",
    "Encrypt",
    "GenerateDataKey",
    "GenerateDataKeyWithoutPlaintext",
    "ReEncryptFrom",
    "ReEncryptTo",
    "Sign",
    "Verify",
    "GetPublicKey",
    "CreateGrant",
    "RetireGrant",
    "DescribeKey",
    "GenerateDataKeyPair",
    "GenerateDataKeyPairWithoutPlaintext",
    "GenerateMac",
    "VerifyMac",
    "DeriveSharedSecret",
];

pub const LAUNCH_TYPES: &[&str] = &["EC2", "FARGATE", "EXTERNAL"];
pub const SCHEDULING_STRATEGIES: &[&str] = &["REPLICA", "DAEMON"];
pub const PROPAGATE_TAGS: &[&str] = &["SERVICE", "TASK_DEFINITION", "NONE"];
pub const NETWORK_MODES: &[&str] = &["bridge", "host", "awsvpc", "none"];
pub const COMPATIBILITIES: &[&str] = &["EC2", "FARGATE", "EXTERNAL"];
pub const IPC_MODES: &[&str] = &["host", "task", "none"];
pub const PID_MODES: &[&str] = &["host", "task"];
pub const DOCKER_VOLUME_SCOPES: &[&str] = &["task", "shared"];
pub const EFS_SETTINGS: &[&str] = &["ENABLED", "DISABLED"];
pub const PROXY_TYPES: &[&str] = &["APPMESH"];
pub const TASK_PLACEMENT_CONSTRAINT_TYPES: &[&str] = &["memberOf"];
pub const SERVICE_PLACEMENT_CONSTRAINT_TYPES: &[&str] = &["memberOf", "distinctInstance"];
pub const PLACEMENT_STRATEGY_TYPES: &[&str] = &["binpack", "random", "spread"];
pub const DEPLOYMENT_CONTROLLER_TYPES: &[&str] = &["CODE_DEPLOY", "ECS", "EXTERNAL"];

pub const COMPARISON_OPERATORS: &[&str] = &["EQ", "NE", "LE", "LT", "GE", "GT"];
pub const TEXT_TRANSFORMATIONS: &[&str] = &[
    "NONE",
    "COMPRESS_WHITE_SPACE",
    "HTML_ENTITY_DECODE",
    "LOWERCASE",
    "CMD_LINE",
    "URL_DECODE",
];
pub const MATCH_FIELD_TYPES: &[&str] = &[
    "URI",
    "QUERY_STRING",
    "HEADER",
    "METHOD",
    "BODY",
    "SINGLE_QUERY_ARG",
    "ALL_QUERY_ARGS",
];

/// Largest size a WAF size constraint accepts (bytes)
pub const MAX_CONSTRAINT_SIZE: i64 = 21_474_836_480;

/// Check an enum value given either as the AWS value or as a DSL reference
/// (e.g. `aws.ecs.LaunchType.FARGATE`)
fn check_enum(value: &Value, type_name: &str, variants: &[&str]) -> Result<(), String> {
    let Value::String(s) = value else {
        return Err("Expected string".to_string());
    };
    let normalized = convert_enum_value(s);
    if variants.contains(&normalized.as_str()) {
        Ok(())
    } else {
        Err(format!(
            "Invalid {} '{}', expected one of: {}",
            type_name,
            s,
            variants.join(", ")
        ))
    }
}

macro_rules! aws_enum {
    ($(#[$doc:meta])* $fn_name:ident, $type_name:expr, $variants:expr) => {
        $(#[$doc])*
        pub fn $fn_name() -> AttributeType {
            AttributeType::Custom {
                name: $type_name.to_string(),
                base: Box::new(AttributeType::String),
                validate: |value| check_enum(value, $type_name, $variants),
            }
        }
    };
}

aws_enum!(
    /// KMS grant operation
    grant_operation,
    "GrantOperation",
    GRANT_OPERATIONS
);
aws_enum!(launch_type, "LaunchType", LAUNCH_TYPES);
aws_enum!(scheduling_strategy, "SchedulingStrategy", SCHEDULING_STRATEGIES);
aws_enum!(propagate_tags, "PropagateTags", PROPAGATE_TAGS);
aws_enum!(network_mode, "NetworkMode", NETWORK_MODES);
aws_enum!(compatibility, "Compatibility", COMPATIBILITIES);
aws_enum!(ipc_mode, "IpcMode", IPC_MODES);
aws_enum!(pid_mode, "PidMode", PID_MODES);
aws_enum!(docker_volume_scope, "Scope", DOCKER_VOLUME_SCOPES);
aws_enum!(
    /// EFS transit encryption and IAM authorization switch
    efs_setting,
    "EfsSetting",
    EFS_SETTINGS
);
aws_enum!(proxy_type, "ProxyConfigurationType", PROXY_TYPES);
aws_enum!(
    task_placement_constraint_type,
    "TaskDefinitionPlacementConstraintType",
    TASK_PLACEMENT_CONSTRAINT_TYPES
);
aws_enum!(
    service_placement_constraint_type,
    "PlacementConstraintType",
    SERVICE_PLACEMENT_CONSTRAINT_TYPES
);
aws_enum!(placement_strategy_type, "PlacementStrategyType", PLACEMENT_STRATEGY_TYPES);
aws_enum!(
    deployment_controller_type,
    "DeploymentControllerType",
    DEPLOYMENT_CONTROLLER_TYPES
);
aws_enum!(comparison_operator, "ComparisonOperator", COMPARISON_OPERATORS);
aws_enum!(text_transformation, "TextTransformation", TEXT_TRANSFORMATIONS);
aws_enum!(
    /// Part of a web request a WAF condition inspects
    match_field_type,
    "MatchFieldType",
    MATCH_FIELD_TYPES
);

/// IAM principal given as an ARN
pub fn principal_arn() -> AttributeType {
    AttributeType::Custom {
        name: "PrincipalArn".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) => validate_arn(s),
            _ => Err("Expected string".to_string()),
        },
    }
}

/// IAM role given by name or by ARN
pub fn role_reference() -> AttributeType {
    AttributeType::Custom {
        name: "RoleReference".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) if s.starts_with("arn:") => validate_arn(s),
            Value::String(s) if !s.is_empty() => Ok(()),
            Value::String(_) => Err("Role reference must not be empty".to_string()),
            _ => Err("Expected string".to_string()),
        },
    }
}

/// TCP/UDP port number
pub fn port() -> AttributeType {
    AttributeType::Custom {
        name: "PortNumber".to_string(),
        base: Box::new(AttributeType::Int),
        validate: |value| match value {
            Value::Int(n) if (0..=65535).contains(n) => Ok(()),
            Value::Int(_) => Err("Port number must be between 0 and 65535".to_string()),
            _ => Err("Expected integer".to_string()),
        },
    }
}

/// Deployment percentage (0-200 for minimum healthy, up to 2000 for maximum)
pub fn percent() -> AttributeType {
    AttributeType::Custom {
        name: "Percent".to_string(),
        base: Box::new(AttributeType::Int),
        validate: |value| match value {
            Value::Int(n) if (0..=2000).contains(n) => Ok(()),
            Value::Int(n) => Err(format!("Percent must be between 0 and 2000, got {}", n)),
            _ => Err("Expected integer".to_string()),
        },
    }
}

/// WAF size constraint size in bytes
pub fn constraint_size() -> AttributeType {
    AttributeType::Custom {
        name: "ConstraintSize".to_string(),
        base: Box::new(AttributeType::Int),
        validate: |value| match value {
            Value::Int(n) if (0..=MAX_CONSTRAINT_SIZE).contains(n) => Ok(()),
            Value::Int(n) => Err(format!(
                "Size must be between 0 and {}, got {}",
                MAX_CONSTRAINT_SIZE, n
            )),
            _ => Err("Expected integer".to_string()),
        },
    }
}

/// WAF resource name: 1-128 characters
pub fn waf_name() -> AttributeType {
    AttributeType::Custom {
        name: "WafName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) if !s.is_empty() && s.chars().count() <= 128 => Ok(()),
            Value::String(_) => Err("Name must be between 1 and 128 characters".to_string()),
            _ => Err("Expected string".to_string()),
        },
    }
}
