//! ECS Service
//!
//! The identifier is the service ARN. The cluster is taken from the
//! configuration when set, otherwise recovered from the long ARN format
//! (`service/<cluster>/<name>`), otherwise the `default` cluster.
//!
//! Service creation and updates race IAM: a role or service-linked role that
//! was just created may not be usable yet, so those calls are retried on the
//! specific `InvalidParameterException` messages ECS returns in that case.

use std::collections::HashMap;
use std::time::Duration;

use aws_sdk_ecs::error::ProvideErrorMetadata;
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, CapacityProviderStrategyItem, DeploymentCircuitBreaker,
    DeploymentConfiguration, DeploymentController, DeploymentControllerType, LaunchType,
    LoadBalancer, NetworkConfiguration, PlacementConstraint, PlacementConstraintType,
    PlacementStrategy, PlacementStrategyType, PropagateTags, SchedulingStrategy, Service,
    ServiceField, ServiceRegistry, Tag,
};
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::retry::{Attempt, Retry};
use stratus_core::waiter::StateChangeConf;

use crate::arn::{
    Arn, cluster_name_from_arn, family_and_revision_from_arn, is_arn_for, role_name_from_arn,
    service_parts_from_arn,
};
use crate::errors::{
    CLUSTER_NOT_FOUND, INVALID_PARAMETER, SERVICE_NOT_FOUND, is_aws_err, sdk_error, wait_error,
};
use crate::provider::AwsProvider;
use crate::resources::PROPAGATION_TIMEOUT;
use crate::utils::{
    convert_enum_value, get_bool, get_int, get_map, get_string, get_string_list,
    get_string_map, require_string, string_list_value, string_map_value, to_i32,
};

const SERVICE_CREATE_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const SERVICE_UPDATE_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Bound on waiting for a service to settle or go away
const SERVICE_TIMEOUT: Duration = Duration::from_secs(20 * 60);

pub const STATUS_ACTIVE: &str = "ACTIVE";
pub const STATUS_DRAINING: &str = "DRAINING";
pub const STATUS_INACTIVE: &str = "INACTIVE";
/// Waiter states derived from deployments, not reported by ECS
const STATE_STABLE: &str = "STABLE";
const STATE_PENDING: &str = "PENDING";

const DEFAULT_CLUSTER: &str = "default";

/// `InvalidParameterException` messages ECS returns while IAM is propagating
const IAM_PROPAGATION_MESSAGES: &[&str] = &[
    "verify that the ECS service role being passed has the proper permissions",
    "does not have an associated load balancer",
];
const SERVICE_LINKED_ROLE_MESSAGE: &str = "Unable to assume the service linked role";

/// `InvalidParameterException` messages ECS returns while a service winds down
const DELETE_RETRY_MESSAGES: &[&str] = &[
    "The service cannot be stopped while deployments are active.",
    "has a dependent object",
];

/// Attributes that only steer provider behavior and are never reported by ECS
const CONFIG_ONLY_ATTRIBUTES: &[&str] = &["wait_for_steady_state", "force_new_deployment"];

const MAX_PLACEMENT_STRATEGIES: usize = 5;
const MAX_PLACEMENT_CONSTRAINTS: usize = 10;

/// Path segment of roles AWS creates on behalf of a service
const SERVICE_LINKED_ROLE_PATH: &str = ":role/aws-service-role/";

fn is_iam_propagation_error<E: ProvideErrorMetadata>(err: &E) -> bool {
    IAM_PROPAGATION_MESSAGES
        .iter()
        .any(|message| is_aws_err(err, INVALID_PARAMETER, message))
}

fn is_create_retryable<E: ProvideErrorMetadata>(err: &E) -> bool {
    is_aws_err(err, CLUSTER_NOT_FOUND, "")
        || is_iam_propagation_error(err)
        || is_aws_err(err, INVALID_PARAMETER, SERVICE_LINKED_ROLE_MESSAGE)
}

fn is_delete_retryable<E: ProvideErrorMetadata>(err: &E) -> bool {
    DELETE_RETRY_MESSAGES
        .iter()
        .any(|message| is_aws_err(err, INVALID_PARAMETER, message))
}

/// Cluster to address a service in
pub fn service_cluster(identifier: &str, configured: Option<&str>) -> String {
    if let Some(cluster) = configured.filter(|c| !c.is_empty()) {
        return cluster.to_string();
    }
    match service_parts_from_arn(identifier) {
        Ok((Some(cluster), _)) => cluster,
        _ => DEFAULT_CLUSTER.to_string(),
    }
}

/// Split a `<cluster>/<service>` import ID
pub fn parse_service_import_id(import_id: &str) -> ProviderResult<(String, String)> {
    match import_id.split('/').collect::<Vec<_>>().as_slice() {
        [cluster, service] if !cluster.is_empty() && !service.is_empty() => {
            Ok((cluster.to_string(), service.to_string()))
        }
        _ => Err(ProviderError::validation(format!(
            "wrong format of import ID ({}), expected <cluster>/<service>",
            import_id
        ))),
    }
}

/// Waiter state of a service
///
/// When waiting for a steady state an active service reports `STABLE` once
/// a single deployment remains and all desired tasks are running.
pub fn service_state(service: &Service, steady: bool) -> String {
    let status = service.status().unwrap_or_default();
    if !steady || status != STATUS_ACTIVE {
        return status.to_string();
    }
    if service.deployments().len() == 1 && service.running_count() == service.desired_count() {
        STATE_STABLE.to_string()
    } else {
        STATE_PENDING.to_string()
    }
}

fn scheduling_strategy(attributes: &HashMap<String, Value>) -> SchedulingStrategy {
    let strategy = get_string(attributes, "scheduling_strategy")
        .map(|s| convert_enum_value(&s))
        .unwrap_or_else(|| "REPLICA".to_string());
    SchedulingStrategy::from(strategy.as_str())
}

/// Deployment limits for the scheduling strategy
///
/// Daemon services only accept a minimum healthy percent, and only when it
/// differs from the ECS default.
pub fn expand_deployment_configuration(
    strategy: &SchedulingStrategy,
    attributes: &HashMap<String, Value>,
) -> ProviderResult<DeploymentConfiguration> {
    let maximum = get_int(attributes, "deployment_maximum_percent")
        .map(|n| to_i32("deployment_maximum_percent", n))
        .transpose()?;
    let minimum = get_int(attributes, "deployment_minimum_healthy_percent")
        .map(|n| to_i32("deployment_minimum_healthy_percent", n))
        .transpose()?;

    let circuit_breaker = get_map(attributes, "deployment_circuit_breaker").map(|cb| {
        DeploymentCircuitBreaker::builder()
            .enable(get_bool(cb, "enable").unwrap_or(false))
            .rollback(get_bool(cb, "rollback").unwrap_or(false))
            .build()
    });

    let builder = DeploymentConfiguration::builder().set_deployment_circuit_breaker(circuit_breaker);
    let builder = match strategy {
        SchedulingStrategy::Daemon => builder.set_minimum_healthy_percent(minimum.filter(|m| *m != 100)),
        _ => builder
            .set_maximum_percent(maximum)
            .set_minimum_healthy_percent(minimum),
    };
    Ok(builder.build())
}

pub fn expand_load_balancers(value: Option<&Value>) -> ProviderResult<Vec<LoadBalancer>> {
    let Some(Value::List(items)) = value else {
        return Ok(Vec::new());
    };

    items
        .iter()
        .map(|item| {
            let Value::Map(lb) = item else {
                return Err(ProviderError::validation("load_balancer: expected an object"));
            };
            let port = get_int(lb, "container_port")
                .map(|p| to_i32("container_port", p))
                .transpose()?;
            Ok(LoadBalancer::builder()
                .set_target_group_arn(get_string(lb, "target_group_arn"))
                .set_load_balancer_name(get_string(lb, "elb_name"))
                .set_container_name(get_string(lb, "container_name"))
                .set_container_port(port)
                .build())
        })
        .collect()
}

pub fn flatten_load_balancers(load_balancers: &[LoadBalancer]) -> Value {
    Value::List(
        load_balancers
            .iter()
            .map(|lb| {
                let mut map = HashMap::new();
                if let Some(arn) = lb.target_group_arn() {
                    map.insert("target_group_arn".to_string(), Value::from(arn));
                }
                if let Some(name) = lb.load_balancer_name() {
                    map.insert("elb_name".to_string(), Value::from(name));
                }
                if let Some(name) = lb.container_name() {
                    map.insert("container_name".to_string(), Value::from(name));
                }
                if let Some(port) = lb.container_port() {
                    map.insert("container_port".to_string(), Value::Int(i64::from(port)));
                }
                Value::Map(map)
            })
            .collect(),
    )
}

pub fn expand_network_configuration(
    value: Option<&Value>,
) -> ProviderResult<Option<NetworkConfiguration>> {
    let Some(Value::Map(nc)) = value else {
        return Ok(None);
    };

    let security_groups = get_string_list(nc, "security_groups");
    let assign_public_ip = get_bool(nc, "assign_public_ip").map(|enabled| {
        if enabled {
            AssignPublicIp::Enabled
        } else {
            AssignPublicIp::Disabled
        }
    });

    let vpc = AwsVpcConfiguration::builder()
        .set_subnets(Some(get_string_list(nc, "subnets")))
        .set_security_groups((!security_groups.is_empty()).then_some(security_groups))
        .set_assign_public_ip(assign_public_ip)
        .build()
        .map_err(|e| ProviderError::validation(format!("network_configuration: {}", e)))?;

    Ok(Some(
        NetworkConfiguration::builder()
            .awsvpc_configuration(vpc)
            .build(),
    ))
}

pub fn flatten_network_configuration(nc: &NetworkConfiguration) -> Option<Value> {
    let vpc = nc.awsvpc_configuration()?;

    let mut subnets = vpc.subnets().to_vec();
    subnets.sort();
    let mut security_groups = vpc.security_groups().to_vec();
    security_groups.sort();

    let mut map = HashMap::new();
    map.insert("subnets".to_string(), string_list_value(subnets));
    if !security_groups.is_empty() {
        map.insert("security_groups".to_string(), string_list_value(security_groups));
    }
    if let Some(assign) = vpc.assign_public_ip() {
        map.insert(
            "assign_public_ip".to_string(),
            Value::Bool(*assign == AssignPublicIp::Enabled),
        );
    }
    Some(Value::Map(map))
}

fn object_items<'a>(attribute: &str, items: &'a [Value]) -> ProviderResult<Vec<&'a HashMap<String, Value>>> {
    items
        .iter()
        .map(|item| match item {
            Value::Map(map) => Ok(map),
            _ => Err(ProviderError::validation(format!("{}: expected an object", attribute))),
        })
        .collect()
}

/// Spread over hosts is reported as spread over instance IDs; binpack
/// fields are case-insensitive
fn placement_field(kind: &str, field: &str) -> String {
    match kind {
        "spread" if field.eq_ignore_ascii_case("host") => "instanceId".to_string(),
        "binpack" => field.to_lowercase(),
        _ => field.to_string(),
    }
}

pub fn expand_placement_strategies(value: Option<&Value>) -> ProviderResult<Vec<PlacementStrategy>> {
    let Some(Value::List(items)) = value else {
        return Ok(Vec::new());
    };
    if items.len() > MAX_PLACEMENT_STRATEGIES {
        return Err(ProviderError::validation(format!(
            "ordered_placement_strategy: at most {} strategies are allowed",
            MAX_PLACEMENT_STRATEGIES
        )));
    }

    object_items("ordered_placement_strategy", items).map(|strategies| {
        strategies
            .into_iter()
            .map(|ps| {
                let kind = get_string(ps, "type").map(|t| convert_enum_value(&t)).unwrap_or_default();
                let field = get_string(ps, "field")
                    .filter(|f| !f.is_empty())
                    .map(|f| placement_field(&kind, &f));
                PlacementStrategy::builder()
                    .r#type(PlacementStrategyType::from(kind.as_str()))
                    .set_field(field)
                    .build()
            })
            .collect()
    })
}

/// Strategies keep their order; it decides placement
pub fn flatten_placement_strategies(strategies: &[PlacementStrategy]) -> Value {
    Value::List(
        strategies
            .iter()
            .map(|ps| {
                let kind = ps.r#type().map(|t| t.as_str()).unwrap_or_default();
                let mut map = HashMap::from([("type".to_string(), Value::from(kind))]);
                if let Some(field) = ps.field() {
                    map.insert("field".to_string(), Value::String(placement_field(kind, field)));
                }
                Value::Map(map)
            })
            .collect(),
    )
}

pub fn expand_placement_constraints(value: Option<&Value>) -> ProviderResult<Vec<PlacementConstraint>> {
    let Some(Value::List(items)) = value else {
        return Ok(Vec::new());
    };
    if items.len() > MAX_PLACEMENT_CONSTRAINTS {
        return Err(ProviderError::validation(format!(
            "placement_constraints: at most {} constraints are allowed",
            MAX_PLACEMENT_CONSTRAINTS
        )));
    }

    object_items("placement_constraints", items).map(|constraints| {
        constraints
            .into_iter()
            .map(|pc| {
                PlacementConstraint::builder()
                    .set_type(
                        get_string(pc, "type")
                            .map(|t| PlacementConstraintType::from(convert_enum_value(&t).as_str())),
                    )
                    .set_expression(get_string(pc, "expression").filter(|e| !e.is_empty()))
                    .build()
            })
            .collect()
    })
}

/// Constraints ordered by type, then expression
pub fn flatten_placement_constraints(constraints: &[PlacementConstraint]) -> Value {
    let mut pairs: Vec<(&str, Option<&str>)> = constraints
        .iter()
        .map(|pc| (pc.r#type().map(|t| t.as_str()).unwrap_or_default(), pc.expression()))
        .collect();
    pairs.sort();
    Value::List(
        pairs
            .into_iter()
            .map(|(kind, expression)| {
                let mut map = HashMap::from([("type".to_string(), Value::from(kind))]);
                if let Some(expression) = expression {
                    map.insert("expression".to_string(), Value::from(expression));
                }
                Value::Map(map)
            })
            .collect(),
    )
}

pub fn expand_capacity_provider_strategy(
    value: Option<&Value>,
) -> ProviderResult<Vec<CapacityProviderStrategyItem>> {
    let Some(Value::List(items)) = value else {
        return Ok(Vec::new());
    };

    object_items("capacity_provider_strategy", items)?
        .into_iter()
        .map(|item| {
            let weight = to_i32("weight", get_int(item, "weight").unwrap_or(0))?;
            let base = to_i32("base", get_int(item, "base").unwrap_or(0))?;
            CapacityProviderStrategyItem::builder()
                .set_capacity_provider(get_string(item, "capacity_provider"))
                .weight(weight)
                .base(base)
                .build()
                .map_err(|e| ProviderError::validation(format!("capacity_provider_strategy: {}", e)))
        })
        .collect()
}

/// Capacity providers ordered by name
pub fn flatten_capacity_provider_strategy(items: &[CapacityProviderStrategyItem]) -> Value {
    let mut items: Vec<&CapacityProviderStrategyItem> = items.iter().collect();
    items.sort_by(|a, b| a.capacity_provider().cmp(b.capacity_provider()));
    Value::List(
        items
            .into_iter()
            .map(|item| {
                Value::Map(HashMap::from([
                    ("capacity_provider".to_string(), Value::from(item.capacity_provider())),
                    ("weight".to_string(), Value::Int(i64::from(item.weight()))),
                    ("base".to_string(), Value::Int(i64::from(item.base()))),
                ]))
            })
            .collect(),
    )
}

pub fn expand_service_registries(value: Option<&Value>) -> ProviderResult<Vec<ServiceRegistry>> {
    let Some(Value::List(items)) = value else {
        return Ok(Vec::new());
    };
    if items.len() > 1 {
        return Err(ProviderError::validation(
            "service_registries: at most one registry is allowed",
        ));
    }

    object_items("service_registries", items)?
        .into_iter()
        .map(|registry| {
            let port = |key: &str| get_int(registry, key).map(|p| to_i32(key, p)).transpose();
            Ok(ServiceRegistry::builder()
                .set_registry_arn(get_string(registry, "registry_arn"))
                .set_port(port("port")?)
                .set_container_name(get_string(registry, "container_name"))
                .set_container_port(port("container_port")?)
                .build())
        })
        .collect()
}

pub fn flatten_service_registries(registries: &[ServiceRegistry]) -> Value {
    Value::List(
        registries
            .iter()
            .map(|registry| {
                let mut map = HashMap::new();
                if let Some(arn) = registry.registry_arn() {
                    map.insert("registry_arn".to_string(), Value::from(arn));
                }
                if let Some(port) = registry.port() {
                    map.insert("port".to_string(), Value::Int(i64::from(port)));
                }
                if let Some(name) = registry.container_name() {
                    map.insert("container_name".to_string(), Value::from(name));
                }
                if let Some(port) = registry.container_port() {
                    map.insert("container_port".to_string(), Value::Int(i64::from(port)));
                }
                Value::Map(map)
            })
            .collect(),
    )
}

pub fn expand_deployment_controller(
    attributes: &HashMap<String, Value>,
) -> ProviderResult<Option<DeploymentController>> {
    let Some(controller) = get_map(attributes, "deployment_controller") else {
        return Ok(None);
    };
    let kind = get_string(controller, "type")
        .map(|t| convert_enum_value(&t))
        .unwrap_or_else(|| "ECS".to_string());
    DeploymentController::builder()
        .r#type(DeploymentControllerType::from(kind.as_str()))
        .build()
        .map(Some)
        .map_err(|e| ProviderError::validation(format!("deployment_controller: {}", e)))
}

fn flatten_circuit_breaker(circuit_breaker: &DeploymentCircuitBreaker) -> Value {
    Value::Map(HashMap::from([
        ("enable".to_string(), Value::Bool(circuit_breaker.enable())),
        ("rollback".to_string(), Value::Bool(circuit_breaker.rollback())),
    ]))
}

/// ECS tags from a tag map, ordered by key
pub fn expand_tags(tags: HashMap<String, String>) -> Vec<Tag> {
    let mut tags: Vec<(String, String)> = tags.into_iter().collect();
    tags.sort();
    tags.into_iter()
        .map(|(key, value)| Tag::builder().key(key).value(value).build())
        .collect()
}

pub fn flatten_tags(tags: &[Tag]) -> HashMap<String, String> {
    tags.iter()
        .filter_map(|tag| Some((tag.key()?.to_string(), tag.value().unwrap_or_default().to_string())))
        .collect()
}

/// Tags to set and tag keys to remove to go from `from` to `to`
pub fn tag_changes(
    from: &HashMap<String, String>,
    to: &HashMap<String, String>,
) -> (Vec<Tag>, Vec<String>) {
    let set: HashMap<String, String> = to
        .iter()
        .filter(|(key, value)| from.get(*key) != Some(*value))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let mut removed: Vec<String> = from.keys().filter(|k| !to.contains_key(*k)).cloned().collect();
    removed.sort();
    (expand_tags(set), removed)
}

/// Bring configured attributes into the form reads produce
pub fn normalize_ecs_service_attributes(attributes: &mut HashMap<String, Value>) -> ProviderResult<()> {
    for key in ["launch_type", "scheduling_strategy", "propagate_tags"] {
        if let Some(value) = get_string(attributes, key) {
            attributes.insert(key.to_string(), Value::String(convert_enum_value(&value)));
        }
    }
    if let Some(Value::Map(nc)) = attributes.get_mut("network_configuration") {
        for key in ["subnets", "security_groups"] {
            if nc.contains_key(key) {
                let mut items = get_string_list(nc, key);
                items.sort();
                nc.insert(key.to_string(), string_list_value(items));
            }
        }
    }
    if attributes.contains_key("ordered_placement_strategy") {
        let strategies = expand_placement_strategies(attributes.get("ordered_placement_strategy"))?;
        attributes.insert(
            "ordered_placement_strategy".to_string(),
            flatten_placement_strategies(&strategies),
        );
    }
    if attributes.contains_key("placement_constraints") {
        let constraints = expand_placement_constraints(attributes.get("placement_constraints"))?;
        attributes.insert(
            "placement_constraints".to_string(),
            flatten_placement_constraints(&constraints),
        );
    }
    if attributes.contains_key("capacity_provider_strategy") {
        let items = expand_capacity_provider_strategy(attributes.get("capacity_provider_strategy"))?;
        attributes.insert(
            "capacity_provider_strategy".to_string(),
            flatten_capacity_provider_strategy(&items),
        );
    }
    if let Some(controller) = expand_deployment_controller(attributes)? {
        attributes.insert(
            "deployment_controller".to_string(),
            Value::Map(HashMap::from([(
                "type".to_string(),
                Value::from(controller.r#type().as_str()),
            )])),
        );
    }
    Ok(())
}

/// Whether a configured reference is written as an ARN of the given service
fn configured_as_arn(
    prior: Option<&HashMap<String, Value>>,
    key: &str,
    partition: &str,
    service: &str,
) -> bool {
    prior
        .and_then(|attrs| get_string(attrs, key))
        .is_some_and(|value| is_arn_for(partition, service, &value))
}

/// Map a described service onto resource attributes
///
/// The cluster, IAM role and task definition are reported in the shape the
/// prior configuration used: full ARN when it used one, short name otherwise.
pub fn flatten_service(
    service: &Service,
    prior: Option<&HashMap<String, Value>>,
    partition: &str,
) -> HashMap<String, Value> {
    let mut attributes = HashMap::new();

    if let Some(arn) = service.service_arn() {
        attributes.insert("id".to_string(), Value::from(arn));
    }
    if let Some(name) = service.service_name() {
        attributes.insert("name".to_string(), Value::from(name));
    }
    if let Some(cluster_arn) = service.cluster_arn() {
        let cluster = if configured_as_arn(prior, "cluster", partition, "ecs") {
            cluster_arn.to_string()
        } else {
            cluster_name_from_arn(cluster_arn)
        };
        attributes.insert("cluster".to_string(), Value::String(cluster));
    }
    if let Some(task_definition) = service.task_definition() {
        let task_definition = if configured_as_arn(prior, "task_definition", partition, "ecs") {
            task_definition.to_string()
        } else {
            family_and_revision_from_arn(task_definition)
                .unwrap_or_else(|_| task_definition.to_string())
        };
        attributes.insert("task_definition".to_string(), Value::String(task_definition));
    }
    // A service-linked role ECS picked itself is not part of the configuration
    let unconfigured_role = prior.and_then(|attrs| attrs.get("iam_role")).is_none();
    if let Some(role_arn) = service
        .role_arn()
        .filter(|arn| !(unconfigured_role && arn.contains(SERVICE_LINKED_ROLE_PATH)))
    {
        let role = if configured_as_arn(prior, "iam_role", partition, "iam") {
            role_arn.to_string()
        } else {
            role_name_from_arn(role_arn)
        };
        attributes.insert("iam_role".to_string(), Value::String(role));
    }

    attributes.insert(
        "desired_count".to_string(),
        Value::Int(i64::from(service.desired_count())),
    );
    if let Some(strategy) = service.scheduling_strategy() {
        attributes.insert("scheduling_strategy".to_string(), Value::from(strategy.as_str()));
    }
    if let Some(launch_type) = service.launch_type() {
        attributes.insert("launch_type".to_string(), Value::from(launch_type.as_str()));
    }
    if let Some(version) = service.platform_version() {
        attributes.insert("platform_version".to_string(), Value::from(version));
    }
    if let Some(propagate) = service.propagate_tags() {
        attributes.insert("propagate_tags".to_string(), Value::from(propagate.as_str()));
    }
    if let Some(grace) = service.health_check_grace_period_seconds() {
        attributes.insert(
            "health_check_grace_period_seconds".to_string(),
            Value::Int(i64::from(grace)),
        );
    }
    attributes.insert(
        "enable_ecs_managed_tags".to_string(),
        Value::Bool(service.enable_ecs_managed_tags()),
    );
    attributes.insert(
        "enable_execute_command".to_string(),
        Value::Bool(service.enable_execute_command()),
    );

    if let Some(deployment) = service.deployment_configuration() {
        if let Some(maximum) = deployment.maximum_percent() {
            attributes.insert(
                "deployment_maximum_percent".to_string(),
                Value::Int(i64::from(maximum)),
            );
        }
        if let Some(minimum) = deployment.minimum_healthy_percent() {
            attributes.insert(
                "deployment_minimum_healthy_percent".to_string(),
                Value::Int(i64::from(minimum)),
            );
        }
        // ECS reports a disabled breaker on every service
        let configured = prior.is_some_and(|attrs| attrs.contains_key("deployment_circuit_breaker"));
        if let Some(cb) = deployment
            .deployment_circuit_breaker()
            .filter(|cb| configured || cb.enable() || cb.rollback())
        {
            attributes.insert("deployment_circuit_breaker".to_string(), flatten_circuit_breaker(cb));
        }
    }
    if let Some(controller) = service.deployment_controller() {
        attributes.insert(
            "deployment_controller".to_string(),
            Value::Map(HashMap::from([(
                "type".to_string(),
                Value::from(controller.r#type().as_str()),
            )])),
        );
    }
    if !service.capacity_provider_strategy().is_empty() {
        attributes.insert(
            "capacity_provider_strategy".to_string(),
            flatten_capacity_provider_strategy(service.capacity_provider_strategy()),
        );
    }
    if !service.placement_strategy().is_empty() {
        attributes.insert(
            "ordered_placement_strategy".to_string(),
            flatten_placement_strategies(service.placement_strategy()),
        );
    }
    if !service.placement_constraints().is_empty() {
        attributes.insert(
            "placement_constraints".to_string(),
            flatten_placement_constraints(service.placement_constraints()),
        );
    }
    if !service.service_registries().is_empty() {
        attributes.insert(
            "service_registries".to_string(),
            flatten_service_registries(service.service_registries()),
        );
    }
    if !service.load_balancers().is_empty() {
        attributes.insert(
            "load_balancer".to_string(),
            flatten_load_balancers(service.load_balancers()),
        );
    }
    if let Some(nc) = service
        .network_configuration()
        .and_then(flatten_network_configuration)
    {
        attributes.insert("network_configuration".to_string(), nc);
    }
    let tags = flatten_tags(service.tags());
    if !tags.is_empty() {
        attributes.insert("tags".to_string(), string_map_value(tags));
    }

    for name in CONFIG_ONLY_ATTRIBUTES {
        if let Some(value) = prior.and_then(|attrs| attrs.get(*name)) {
            attributes.insert(name.to_string(), value.clone());
        }
    }
    attributes
        .entry("wait_for_steady_state".to_string())
        .or_insert(Value::Bool(false));

    attributes
}

impl AwsProvider {
    /// Describe a service; `None` when it or its cluster does not exist
    pub(crate) async fn find_ecs_service(
        &self,
        cluster: &str,
        service: &str,
    ) -> ProviderResult<Option<Service>> {
        let output = match self
            .clients
            .ecs
            .describe_services()
            .cluster(cluster)
            .services(service)
            .include(ServiceField::Tags)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if is_aws_err(&e, CLUSTER_NOT_FOUND, "") => {
                log::warn!("ECS cluster ({}) of service ({}) not found", cluster, service);
                return Ok(None);
            }
            Err(e) => return Err(sdk_error(format!("reading ECS Service ({})", service), e)),
        };

        if let Some(failure) = output.failures().first() {
            if failure.reason() == Some("MISSING") {
                return Ok(None);
            }
            return Err(ProviderError::new(format!(
                "reading ECS Service ({}): {}",
                service,
                failure.reason().unwrap_or("unknown failure")
            )));
        }

        Ok(output.services().first().cloned())
    }

    /// Create an ECS service
    pub(crate) async fn create_ecs_service(&self, resource: Resource) -> ProviderResult<State> {
        let id = resource.id.clone();
        let attrs = &resource.attributes;
        let for_resource = |e: ProviderError| e.for_resource(id.clone());

        let name = require_string(&resource, "name")?;
        let cluster = get_string(attrs, "cluster");
        let strategy = scheduling_strategy(attrs);
        let deployment = expand_deployment_configuration(&strategy, attrs).map_err(for_resource)?;
        let desired_count = match strategy {
            SchedulingStrategy::Daemon => None,
            _ => Some(to_i32("desired_count", get_int(attrs, "desired_count").unwrap_or(0)).map_err(for_resource)?),
        };
        let grace_period = get_int(attrs, "health_check_grace_period_seconds")
            .map(|n| to_i32("health_check_grace_period_seconds", n))
            .transpose()
            .map_err(for_resource)?;
        let launch_type = get_string(attrs, "launch_type")
            .map(|s| LaunchType::from(convert_enum_value(&s).as_str()));
        let propagate_tags = get_string(attrs, "propagate_tags")
            .map(|s| PropagateTags::from(convert_enum_value(&s).as_str()));
        let load_balancers = expand_load_balancers(attrs.get("load_balancer")).map_err(for_resource)?;
        let network = expand_network_configuration(attrs.get("network_configuration"))
            .map_err(for_resource)?;
        let capacity_providers = expand_capacity_provider_strategy(attrs.get("capacity_provider_strategy"))
            .map_err(for_resource)?;
        let placement_strategies = expand_placement_strategies(attrs.get("ordered_placement_strategy"))
            .map_err(for_resource)?;
        let placement_constraints =
            expand_placement_constraints(attrs.get("placement_constraints")).map_err(for_resource)?;
        let registries = expand_service_registries(attrs.get("service_registries")).map_err(for_resource)?;
        let controller = expand_deployment_controller(attrs).map_err(for_resource)?;
        let tags = expand_tags(get_string_map(attrs, "tags"));
        let client_token = format!("stratus-{}", chrono::Utc::now().format("%Y%m%d%H%M%S%f"));

        let request = self
            .clients
            .ecs
            .create_service()
            .service_name(&name)
            .set_cluster(cluster.clone())
            .set_task_definition(get_string(attrs, "task_definition"))
            .scheduling_strategy(strategy)
            .deployment_configuration(deployment)
            .set_desired_count(desired_count)
            .set_launch_type(launch_type)
            .set_capacity_provider_strategy(
                (!capacity_providers.is_empty()).then_some(capacity_providers),
            )
            .set_placement_strategy((!placement_strategies.is_empty()).then_some(placement_strategies))
            .set_placement_constraints(
                (!placement_constraints.is_empty()).then_some(placement_constraints),
            )
            .set_service_registries((!registries.is_empty()).then_some(registries))
            .set_deployment_controller(controller)
            .set_role(get_string(attrs, "iam_role"))
            .set_health_check_grace_period_seconds(grace_period)
            .set_load_balancers((!load_balancers.is_empty()).then_some(load_balancers))
            .set_network_configuration(network)
            .set_platform_version(get_string(attrs, "platform_version"))
            .set_propagate_tags(propagate_tags)
            .enable_ecs_managed_tags(get_bool(attrs, "enable_ecs_managed_tags").unwrap_or(false))
            .enable_execute_command(get_bool(attrs, "enable_execute_command").unwrap_or(false))
            .set_tags((!tags.is_empty()).then_some(tags))
            .client_token(client_token);

        log::debug!("Creating ECS Service ({})", name);
        let output = Retry::new(PROPAGATION_TIMEOUT + SERVICE_CREATE_TIMEOUT)
            .run_with_final_attempt(|| {
                let request = request.clone();
                async move {
                    request
                        .send()
                        .await
                        .map_err(|e| Attempt::classify(e, is_create_retryable))
                }
            })
            .await
            .map_err(|e| sdk_error(format!("creating ECS Service ({})", name), e))
            .map_err(for_resource)?;

        let arn = output
            .service()
            .and_then(|s| s.service_arn())
            .ok_or_else(|| {
                ProviderError::new(format!("creating ECS Service ({}): empty response", name))
            })
            .map_err(for_resource)?
            .to_string();

        // The service exists from here on; failures hand back its ARN
        let created = |e: ProviderError| {
            let partial = State::existing(id.clone(), attrs.clone()).with_identifier(arn.as_str());
            e.for_resource(id.clone()).with_partial_state(partial)
        };

        let steady = get_bool(attrs, "wait_for_steady_state").unwrap_or(false);
        let cluster = service_cluster(&arn, cluster.as_deref());
        self.wait_for_ecs_service(&cluster, &arn, steady)
            .await
            .map_err(created)?;

        let prior = State::existing(id.clone(), resource.attributes.clone());
        let state = self
            .read_ecs_service(&id, &arn, Some(&prior))
            .await
            .map_err(created)?;
        if !state.exists {
            return Err(ProviderError::not_found(format!(
                "ECS Service ({}) not found after creation",
                arn
            ))
            .for_resource(id));
        }
        Ok(state)
    }

    /// Read an ECS service
    pub(crate) async fn read_ecs_service(
        &self,
        id: &ResourceId,
        identifier: &str,
        prior: Option<&State>,
    ) -> ProviderResult<State> {
        let prior = prior.map(|p| &p.attributes);
        let configured = prior.and_then(|attrs| get_string(attrs, "cluster"));
        let cluster = service_cluster(identifier, configured.as_deref());

        let service = self
            .find_ecs_service(&cluster, identifier)
            .await
            .map_err(|e| e.for_resource(id.clone()))?;

        let Some(service) = service else {
            log::warn!("ECS Service ({}) not found, removing from state", identifier);
            return Ok(State::not_found(id.clone()));
        };
        if service.status() == Some(STATUS_INACTIVE) {
            log::warn!(
                "ECS Service ({}) in status {:?}, removing from state",
                identifier,
                STATUS_INACTIVE
            );
            return Ok(State::not_found(id.clone()));
        }

        let attributes = flatten_service(&service, prior, self.partition());
        let arn = service.service_arn().unwrap_or(identifier).to_string();
        Ok(State::existing(id.clone(), attributes).with_identifier(arn))
    }

    /// Update an ECS service in place
    pub(crate) async fn update_ecs_service(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: Resource,
    ) -> ProviderResult<State> {
        let for_resource = |e: ProviderError| e.for_resource(id.clone());
        let attrs = &to.attributes;
        let changed = |key: &str| from.attributes.get(key) != attrs.get(key);
        let cluster = service_cluster(identifier, get_string(attrs, "cluster").as_deref());

        let settings_changed = from
            .attributes
            .keys()
            .chain(attrs.keys())
            .filter(|key| !matches!(key.as_str(), "tags" | "id"))
            .any(|key| changed(key.as_str()));

        if settings_changed {
            let mut request = self
                .clients
                .ecs
                .update_service()
                .cluster(&cluster)
                .service(identifier)
                .force_new_deployment(get_bool(attrs, "force_new_deployment").unwrap_or(false));

            // A removed circuit breaker is switched off
            let mut deployment_attrs = attrs.clone();
            if changed("deployment_circuit_breaker") {
                deployment_attrs
                    .entry("deployment_circuit_breaker".to_string())
                    .or_insert_with(|| {
                        Value::Map(HashMap::from([
                            ("enable".to_string(), Value::Bool(false)),
                            ("rollback".to_string(), Value::Bool(false)),
                        ]))
                    });
            }

            let strategy = scheduling_strategy(attrs);
            match strategy {
                SchedulingStrategy::Daemon => {
                    if changed("deployment_minimum_healthy_percent")
                        || changed("deployment_circuit_breaker")
                    {
                        request = request.deployment_configuration(
                            expand_deployment_configuration(&strategy, &deployment_attrs).map_err(for_resource)?,
                        );
                    }
                }
                _ => {
                    if changed("deployment_maximum_percent")
                        || changed("deployment_minimum_healthy_percent")
                        || changed("deployment_circuit_breaker")
                    {
                        request = request.deployment_configuration(
                            expand_deployment_configuration(&strategy, &deployment_attrs).map_err(for_resource)?,
                        );
                    }
                    if changed("desired_count") {
                        let count = get_int(attrs, "desired_count").unwrap_or(0);
                        request = request.desired_count(to_i32("desired_count", count).map_err(for_resource)?);
                    }
                }
            }

            if changed("enable_ecs_managed_tags") {
                request = request.enable_ecs_managed_tags(
                    get_bool(attrs, "enable_ecs_managed_tags").unwrap_or(false),
                );
            }
            if changed("enable_execute_command") {
                request = request
                    .enable_execute_command(get_bool(attrs, "enable_execute_command").unwrap_or(false));
            }
            if changed("health_check_grace_period_seconds") {
                let grace = get_int(attrs, "health_check_grace_period_seconds").unwrap_or(0);
                request = request.health_check_grace_period_seconds(
                    to_i32("health_check_grace_period_seconds", grace).map_err(for_resource)?,
                );
            }
            if changed("load_balancer") {
                request = request.set_load_balancers(Some(
                    expand_load_balancers(attrs.get("load_balancer")).map_err(for_resource)?,
                ));
            }
            // An empty list clears what was set before
            if changed("ordered_placement_strategy") {
                request = request.set_placement_strategy(Some(
                    expand_placement_strategies(attrs.get("ordered_placement_strategy"))
                        .map_err(for_resource)?,
                ));
            }
            if changed("placement_constraints") {
                request = request.set_placement_constraints(Some(
                    expand_placement_constraints(attrs.get("placement_constraints"))
                        .map_err(for_resource)?,
                ));
            }
            if changed("network_configuration") {
                request = request.set_network_configuration(
                    expand_network_configuration(attrs.get("network_configuration"))
                        .map_err(for_resource)?,
                );
            }
            if changed("platform_version") {
                request = request.set_platform_version(get_string(attrs, "platform_version"));
            }
            if changed("propagate_tags") {
                request = request.set_propagate_tags(
                    get_string(attrs, "propagate_tags")
                        .map(|s| PropagateTags::from(convert_enum_value(&s).as_str())),
                );
            }
            if changed("task_definition") {
                request = request.set_task_definition(get_string(attrs, "task_definition"));
            }

            log::debug!("Updating ECS Service ({})", identifier);
            Retry::new(PROPAGATION_TIMEOUT + SERVICE_UPDATE_TIMEOUT)
                .run_with_final_attempt(|| {
                    let request = request.clone();
                    async move {
                        request
                            .send()
                            .await
                            .map_err(|e| Attempt::classify(e, is_iam_propagation_error))
                    }
                })
                .await
                .map_err(|e| sdk_error(format!("updating ECS Service ({})", identifier), e))
                .map_err(for_resource)?;

            let steady = get_bool(attrs, "wait_for_steady_state").unwrap_or(false);
            self.wait_for_ecs_service(&cluster, identifier, steady)
                .await
                .map_err(for_resource)?;
        }

        if changed("tags") {
            self.update_ecs_tags(identifier, &from.attributes, attrs)
                .await
                .map_err(for_resource)?;
        }

        let prior = State::existing(id.clone(), to.attributes.clone());
        self.read_ecs_service(id, identifier, Some(&prior)).await
    }

    /// Drain and delete an ECS service, then wait until it is inactive
    pub(crate) async fn delete_ecs_service(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
    ) -> ProviderResult<()> {
        let for_resource = |e: ProviderError| e.for_resource(id.clone());
        let configured = get_string(&from.attributes, "cluster");
        let cluster = service_cluster(identifier, configured.as_deref());

        let Some(service) = self
            .find_ecs_service(&cluster, identifier)
            .await
            .map_err(for_resource)?
        else {
            return Ok(());
        };

        let status = service.status().unwrap_or_default();
        if status == STATUS_INACTIVE {
            return Ok(());
        }

        let daemon = service.scheduling_strategy() == Some(&SchedulingStrategy::Daemon);
        if status != STATUS_DRAINING && !daemon {
            log::debug!("Draining ECS Service ({})", identifier);
            self.clients
                .ecs
                .update_service()
                .cluster(&cluster)
                .service(identifier)
                .desired_count(0)
                .send()
                .await
                .map_err(|e| sdk_error(format!("draining ECS Service ({})", identifier), e))
                .map_err(for_resource)?;
        }

        log::debug!("Deleting ECS Service: {}", identifier);
        let request = self
            .clients
            .ecs
            .delete_service()
            .cluster(&cluster)
            .service(identifier);
        let deleted = Retry::new(SERVICE_TIMEOUT)
            .run_with_final_attempt(|| {
                let request = request.clone();
                async move {
                    request
                        .send()
                        .await
                        .map_err(|e| Attempt::classify(e, is_delete_retryable))
                }
            })
            .await;
        match deleted {
            Ok(_) => {}
            Err(e) if is_aws_err(&e, SERVICE_NOT_FOUND, "") => return Ok(()),
            Err(e) => {
                return Err(for_resource(sdk_error(
                    format!("deleting ECS Service ({})", identifier),
                    e,
                )));
            }
        }

        self.wait_for_ecs_service_inactive(&cluster, identifier)
            .await
            .map_err(for_resource)
    }

    /// Import a service given as `<cluster>/<service>`
    ///
    /// The cluster is recorded as an ARN.
    pub(crate) async fn import_ecs_service(
        &self,
        id: &ResourceId,
        import_id: &str,
    ) -> ProviderResult<State> {
        let (cluster, name) =
            parse_service_import_id(import_id).map_err(|e| e.for_resource(id.clone()))?;
        log::debug!("Importing ECS service {} from cluster {}", name, cluster);

        let cluster_arn = self.ecs_cluster_arn(&cluster);
        let prior = State::existing(
            id.clone(),
            HashMap::from([("cluster".to_string(), Value::String(cluster_arn))]),
        );
        self.read_ecs_service(id, &name, Some(&prior)).await
    }

    fn ecs_cluster_arn(&self, cluster: &str) -> String {
        match self.account_id() {
            Some(account_id) => Arn {
                partition: self.partition().to_string(),
                service: "ecs".to_string(),
                region: self.region().to_string(),
                account_id: account_id.to_string(),
                resource: format!("cluster/{}", cluster),
            }
            .to_string(),
            None => {
                log::warn!(
                    "AWS account ID unknown, recording cluster ({}) by name",
                    cluster
                );
                cluster.to_string()
            }
        }
    }

    /// Apply tag additions and removals to an ECS resource
    pub(crate) async fn update_ecs_tags(
        &self,
        arn: &str,
        from: &HashMap<String, Value>,
        to: &HashMap<String, Value>,
    ) -> ProviderResult<()> {
        let (set, removed) = tag_changes(&get_string_map(from, "tags"), &get_string_map(to, "tags"));

        if !removed.is_empty() {
            log::debug!("Removing tags {:?} from {}", removed, arn);
            self.clients
                .ecs
                .untag_resource()
                .resource_arn(arn)
                .set_tag_keys(Some(removed))
                .send()
                .await
                .map_err(|e| sdk_error(format!("untagging ECS resource ({})", arn), e))?;
        }
        if !set.is_empty() {
            self.clients
                .ecs
                .tag_resource()
                .resource_arn(arn)
                .set_tags(Some(set))
                .send()
                .await
                .map_err(|e| sdk_error(format!("tagging ECS resource ({})", arn), e))?;
        }
        Ok(())
    }

    /// Wait until the service is active, or stable when `steady` is set
    async fn wait_for_ecs_service(
        &self,
        cluster: &str,
        service: &str,
        steady: bool,
    ) -> ProviderResult<Service> {
        let (pending, target, goal): (&[&str], &[&str], &str) = if steady {
            (&[STATE_PENDING], &[STATE_STABLE], "stable")
        } else {
            (&[STATUS_DRAINING, STATUS_INACTIVE], &[STATUS_ACTIVE], "active")
        };

        let found = StateChangeConf::new(pending, target, SERVICE_TIMEOUT)
            .wait_for_state(|| async move {
                let found = self.find_ecs_service(cluster, service).await?;
                Ok::<_, ProviderError>(found.map(|s| {
                    let state = service_state(&s, steady);
                    (s, state)
                }))
            })
            .await
            .map_err(|e| {
                wait_error(
                    format!("waiting for ECS Service ({}) to become {}", service, goal),
                    e,
                )
            })?;

        found.ok_or_else(|| ProviderError::not_found(format!("ECS Service ({}) not found", service)))
    }

    async fn wait_for_ecs_service_inactive(&self, cluster: &str, service: &str) -> ProviderResult<()> {
        StateChangeConf::new(&[STATUS_ACTIVE, STATUS_DRAINING], &[STATUS_INACTIVE], SERVICE_TIMEOUT)
            .wait_for_state(|| async move {
                let found = self.find_ecs_service(cluster, service).await?;
                // A service that is gone entirely counts as inactive
                let state = found
                    .as_ref()
                    .and_then(|s| s.status())
                    .unwrap_or(STATUS_INACTIVE)
                    .to_string();
                Ok::<_, ProviderError>(Some(((), state)))
            })
            .await
            .map(|_| ())
            .map_err(|e| {
                wait_error(format!("waiting for ECS Service ({}) to be deleted", service), e)
            })
    }
}
