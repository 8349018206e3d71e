//! ECS resource schema definitions

use stratus_core::resource::Value;
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::types as aws_types;

fn load_balancer() -> AttributeType {
    AttributeType::object(vec![
        AttributeSchema::new("target_group_arn", types::arn()),
        AttributeSchema::new("elb_name", AttributeType::String),
        AttributeSchema::new("container_name", AttributeType::String).required(),
        AttributeSchema::new("container_port", aws_types::port()).required(),
    ])
}

fn network_configuration() -> AttributeType {
    AttributeType::object(vec![
        AttributeSchema::new("subnets", AttributeType::set(AttributeType::String)).required(),
        AttributeSchema::new("security_groups", AttributeType::set(AttributeType::String)),
        AttributeSchema::new("assign_public_ip", AttributeType::Bool),
    ])
}

fn placement_strategy() -> AttributeType {
    AttributeType::object(vec![
        AttributeSchema::new("type", aws_types::placement_strategy_type()).required(),
        AttributeSchema::new("field", AttributeType::String),
    ])
}

fn service_placement_constraint() -> AttributeType {
    AttributeType::object(vec![
        AttributeSchema::new("type", aws_types::service_placement_constraint_type()).required(),
        AttributeSchema::new("expression", AttributeType::String),
    ])
}

fn capacity_provider_strategy() -> AttributeType {
    AttributeType::object(vec![
        AttributeSchema::new("capacity_provider", AttributeType::String).required(),
        AttributeSchema::new("weight", types::non_negative_int()),
        AttributeSchema::new("base", types::non_negative_int()),
    ])
}

fn service_registry() -> AttributeType {
    AttributeType::object(vec![
        AttributeSchema::new("registry_arn", types::arn()).required(),
        AttributeSchema::new("port", aws_types::port()),
        AttributeSchema::new("container_name", AttributeType::String),
        AttributeSchema::new("container_port", aws_types::port()),
    ])
}

/// Returns the schema for ECS services
pub fn service_schema() -> ResourceSchema {
    ResourceSchema::new("ecs.service")
        .with_description("A long-running set of tasks on an ECS cluster")
        .attribute(
            AttributeSchema::new("name", AttributeType::String)
                .required()
                .force_new()
                .with_description("Name of the service"),
        )
        .attribute(
            AttributeSchema::new("cluster", AttributeType::String)
                .optional_computed()
                .force_new()
                .with_description("Cluster name or ARN (defaults to the default cluster)"),
        )
        .attribute(
            AttributeSchema::new("task_definition", AttributeType::String)
                .with_description("family:revision or full ARN of the task definition"),
        )
        .attribute(
            AttributeSchema::new("desired_count", types::non_negative_int())
                .with_description("Number of task instances to keep running"),
        )
        .attribute(
            AttributeSchema::new("launch_type", aws_types::launch_type())
                .optional_computed()
                .force_new()
                .conflicts_with("capacity_provider_strategy")
                .with_description("Launch type: EC2, FARGATE or EXTERNAL"),
        )
        .attribute(
            AttributeSchema::new(
                "capacity_provider_strategy",
                AttributeType::list(capacity_provider_strategy()),
            )
            .optional_computed()
            .force_new()
            .conflicts_with("launch_type")
            .with_description("Capacity providers to spread tasks over (defaults to the cluster's)"),
        )
        .attribute(
            AttributeSchema::new(
                "ordered_placement_strategy",
                AttributeType::list(placement_strategy()),
            )
            .with_description("Task placement strategies, applied in order (at most 5)"),
        )
        .attribute(
            AttributeSchema::new(
                "placement_constraints",
                AttributeType::list(service_placement_constraint()),
            )
            .with_description("Rules for task placement (at most 10)"),
        )
        .attribute(
            AttributeSchema::new(
                "deployment_controller",
                AttributeType::object(vec![AttributeSchema::new(
                    "type",
                    aws_types::deployment_controller_type(),
                )]),
            )
            .optional_computed()
            .force_new()
            .with_description("Deployment controller: CODE_DEPLOY, ECS or EXTERNAL"),
        )
        .attribute(
            AttributeSchema::new(
                "deployment_circuit_breaker",
                AttributeType::object(vec![
                    AttributeSchema::new("enable", AttributeType::Bool).required(),
                    AttributeSchema::new("rollback", AttributeType::Bool).required(),
                ]),
            )
            .with_description("Stop, and optionally roll back, failing deployments"),
        )
        .attribute(
            AttributeSchema::new("service_registries", AttributeType::list(service_registry()))
                .force_new()
                .with_description("Cloud Map service discovery registration (at most 1)"),
        )
        .attribute(
            AttributeSchema::new("scheduling_strategy", aws_types::scheduling_strategy())
                .force_new()
                .with_default("REPLICA".into())
                .with_description("REPLICA or DAEMON"),
        )
        .attribute(
            AttributeSchema::new("deployment_maximum_percent", aws_types::percent())
                .with_default(Value::Int(200))
                .with_description("Upper limit on running tasks during a deployment"),
        )
        .attribute(
            AttributeSchema::new("deployment_minimum_healthy_percent", aws_types::percent())
                .with_default(Value::Int(100))
                .with_description("Lower limit on healthy tasks during a deployment"),
        )
        .attribute(
            AttributeSchema::new("iam_role", aws_types::role_reference())
                .force_new()
                .with_description("Role the service uses to talk to the load balancer"),
        )
        .attribute(
            AttributeSchema::new("health_check_grace_period_seconds", types::non_negative_int())
                .with_description("Seconds to ignore failing load balancer health checks"),
        )
        .attribute(
            AttributeSchema::new("load_balancer", AttributeType::list(load_balancer()))
                .force_new()
                .with_description("Load balancers to register tasks with"),
        )
        .attribute(
            AttributeSchema::new("network_configuration", network_configuration())
                .with_description("awsvpc networking for the tasks"),
        )
        .attribute(
            AttributeSchema::new("platform_version", AttributeType::String)
                .optional_computed()
                .with_description("Fargate platform version"),
        )
        .attribute(
            AttributeSchema::new("propagate_tags", aws_types::propagate_tags())
                .with_description("Where task tags are propagated from"),
        )
        .attribute(
            AttributeSchema::new("enable_ecs_managed_tags", AttributeType::Bool)
                .with_description("Tag tasks with ECS managed tags"),
        )
        .attribute(
            AttributeSchema::new("enable_execute_command", AttributeType::Bool)
                .with_description("Allow ECS Exec into the service's tasks"),
        )
        .attribute(
            AttributeSchema::new("force_new_deployment", AttributeType::Bool)
                .with_description("Start a new deployment on update even without changes"),
        )
        .attribute(
            AttributeSchema::new("wait_for_steady_state", AttributeType::Bool)
                .with_default(false.into())
                .with_description("Wait for the service to reach a steady state"),
        )
        .attribute(
            AttributeSchema::new("tags", AttributeType::map(AttributeType::String))
                .with_description("Tags to apply to the service"),
        )
        .attribute(
            AttributeSchema::new("id", types::arn())
                .computed()
                .with_description("ARN of the service"),
        )
}

fn volume() -> AttributeType {
    AttributeType::object(vec![
        AttributeSchema::new("name", AttributeType::String).required(),
        AttributeSchema::new("host_path", AttributeType::String),
        AttributeSchema::new(
            "docker_volume_configuration",
            AttributeType::object(vec![
                AttributeSchema::new("scope", aws_types::docker_volume_scope()),
                AttributeSchema::new("autoprovision", AttributeType::Bool),
                AttributeSchema::new("driver", AttributeType::String),
                AttributeSchema::new("driver_opts", AttributeType::map(AttributeType::String)),
                AttributeSchema::new("labels", AttributeType::map(AttributeType::String)),
            ]),
        )
        .conflicts_with("efs_volume_configuration"),
        AttributeSchema::new(
            "efs_volume_configuration",
            AttributeType::object(vec![
                AttributeSchema::new("file_system_id", AttributeType::String).required(),
                AttributeSchema::new("root_directory", AttributeType::String),
                AttributeSchema::new("transit_encryption", aws_types::efs_setting()),
                AttributeSchema::new("transit_encryption_port", types::positive_int()),
                AttributeSchema::new(
                    "authorization_config",
                    AttributeType::object(vec![
                        AttributeSchema::new("access_point_id", AttributeType::String),
                        AttributeSchema::new("iam", aws_types::efs_setting()),
                    ]),
                ),
            ]),
        )
        .conflicts_with("docker_volume_configuration"),
    ])
}

/// Returns the schema for ECS task definitions
///
/// Task definitions are immutable revisions: everything except tags
/// registers a new revision.
pub fn task_definition_schema() -> ResourceSchema {
    ResourceSchema::new("ecs.task_definition")
        .with_description("A revision of an ECS task definition")
        .attribute(
            AttributeSchema::new("family", AttributeType::String)
                .required()
                .force_new()
                .with_description("Family the revision belongs to"),
        )
        .attribute(
            AttributeSchema::new("container_definitions", types::json_string())
                .required()
                .force_new()
                .with_description("JSON list of container definitions"),
        )
        .attribute(
            AttributeSchema::new("task_role_arn", types::arn())
                .force_new()
                .with_description("Role the containers assume"),
        )
        .attribute(
            AttributeSchema::new("execution_role_arn", types::arn())
                .force_new()
                .with_description("Role the ECS agent uses to pull images and write logs"),
        )
        .attribute(
            AttributeSchema::new("network_mode", aws_types::network_mode())
                .optional_computed()
                .force_new()
                .with_description("Docker networking mode"),
        )
        .attribute(
            AttributeSchema::new("cpu", AttributeType::String)
                .force_new()
                .with_description("Task-level CPU units"),
        )
        .attribute(
            AttributeSchema::new("memory", AttributeType::String)
                .force_new()
                .with_description("Task-level memory (MiB)"),
        )
        .attribute(
            AttributeSchema::new(
                "requires_compatibilities",
                AttributeType::set(aws_types::compatibility()),
            )
            .force_new()
            .with_description("Launch types the task definition is validated against"),
        )
        .attribute(
            AttributeSchema::new("volume", AttributeType::list(volume()))
                .force_new()
                .with_description("Volumes the containers can mount"),
        )
        .attribute(
            AttributeSchema::new(
                "placement_constraints",
                AttributeType::list(AttributeType::object(vec![
                    AttributeSchema::new("type", aws_types::task_placement_constraint_type())
                        .required(),
                    AttributeSchema::new("expression", AttributeType::String),
                ])),
            )
            .force_new()
            .with_description("Rules for task placement (at most 10)"),
        )
        .attribute(
            AttributeSchema::new("ipc_mode", aws_types::ipc_mode())
                .force_new()
                .with_description("IPC resource namespace: host, task or none"),
        )
        .attribute(
            AttributeSchema::new("pid_mode", aws_types::pid_mode())
                .force_new()
                .with_description("Process namespace: host or task"),
        )
        .attribute(
            AttributeSchema::new(
                "proxy_configuration",
                AttributeType::object(vec![
                    AttributeSchema::new("container_name", AttributeType::String).required(),
                    AttributeSchema::new("type", aws_types::proxy_type()),
                    AttributeSchema::new("properties", AttributeType::map(AttributeType::String)),
                ]),
            )
            .force_new()
            .with_description("App Mesh proxy settings"),
        )
        .attribute(
            AttributeSchema::new(
                "inference_accelerator",
                AttributeType::list(AttributeType::object(vec![
                    AttributeSchema::new("device_name", AttributeType::String).required(),
                    AttributeSchema::new("device_type", AttributeType::String).required(),
                ])),
            )
            .force_new()
            .with_description("Elastic Inference accelerators for the containers"),
        )
        .attribute(
            AttributeSchema::new("tags", AttributeType::map(AttributeType::String))
                .with_description("Tags to apply to the task definition"),
        )
        .attribute(
            AttributeSchema::new("arn", types::arn())
                .computed()
                .with_description("ARN of this revision"),
        )
        .attribute(
            AttributeSchema::new("revision", AttributeType::Int)
                .computed()
                .with_description("Revision number within the family"),
        )
}

/// Returns all ECS-related schemas
pub fn schemas() -> Vec<ResourceSchema> {
    vec![service_schema(), task_definition_schema()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use stratus_core::resource::Value;

    #[test]
    fn valid_fargate_service() {
        let attrs = HashMap::from([
            ("name".to_string(), Value::from("web")),
            ("cluster".to_string(), Value::from("prod")),
            ("task_definition".to_string(), Value::from("web:3")),
            ("desired_count".to_string(), Value::Int(2)),
            ("launch_type".to_string(), Value::from("aws.ecs.LaunchType.FARGATE")),
            (
                "network_configuration".to_string(),
                Value::Map(HashMap::from([
                    (
                        "subnets".to_string(),
                        Value::List(vec![Value::from("subnet-1")]),
                    ),
                    ("assign_public_ip".to_string(), Value::Bool(true)),
                ])),
            ),
        ]);
        assert!(service_schema().validate(&attrs).is_ok());
    }

    #[test]
    fn load_balancer_requires_container() {
        let attrs = HashMap::from([
            ("name".to_string(), Value::from("web")),
            (
                "load_balancer".to_string(),
                Value::List(vec![Value::Map(HashMap::from([(
                    "elb_name".to_string(),
                    Value::from("web-elb"),
                )]))]),
            ),
        ]);
        assert!(service_schema().validate(&attrs).is_err());
    }

    #[test]
    fn service_defaults() {
        let mut attrs = HashMap::from([("name".to_string(), Value::from("web"))]);
        service_schema().apply_defaults(&mut attrs);
        assert_eq!(attrs.get("scheduling_strategy"), Some(&Value::from("REPLICA")));
        assert_eq!(attrs.get("deployment_maximum_percent"), Some(&Value::Int(200)));
        assert_eq!(
            attrs.get("deployment_minimum_healthy_percent"),
            Some(&Value::Int(100))
        );
    }

    #[test]
    fn changing_cluster_forces_replacement() {
        let schema = service_schema();
        let from = HashMap::from([
            ("name".to_string(), Value::from("web")),
            ("cluster".to_string(), Value::from("prod")),
            ("desired_count".to_string(), Value::Int(1)),
        ]);
        let mut to = from.clone();
        to.insert("cluster".to_string(), Value::from("staging"));
        to.insert("desired_count".to_string(), Value::Int(3));
        assert_eq!(schema.force_new_changes(&from, &to), vec!["cluster".to_string()]);
    }

    #[test]
    fn task_definition_requires_json_containers() {
        let schema = task_definition_schema();
        let attrs = HashMap::from([
            ("family".to_string(), Value::from("web")),
            ("container_definitions".to_string(), Value::from("[{")),
        ]);
        assert!(schema.validate(&attrs).is_err());

        let attrs = HashMap::from([
            ("family".to_string(), Value::from("web")),
            (
                "container_definitions".to_string(),
                Value::from(r#"[{"name": "web", "image": "nginx"}]"#),
            ),
            (
                "requires_compatibilities".to_string(),
                Value::List(vec![Value::from("FARGATE")]),
            ),
        ]);
        assert!(schema.validate(&attrs).is_ok());
    }

    #[test]
    fn service_launch_type_conflicts_with_capacity_providers() {
        let strategy = Value::List(vec![Value::Map(HashMap::from([
            ("capacity_provider".to_string(), Value::from("FARGATE_SPOT")),
            ("weight".to_string(), Value::Int(1)),
        ]))]);
        let mut attrs = HashMap::from([
            ("name".to_string(), Value::from("web")),
            ("capacity_provider_strategy".to_string(), strategy),
        ]);
        assert!(service_schema().validate(&attrs).is_ok());

        attrs.insert("launch_type".to_string(), Value::from("FARGATE"));
        assert!(service_schema().validate(&attrs).is_err());
    }

    #[test]
    fn service_placement_accepts_known_types() {
        let attrs = HashMap::from([
            ("name".to_string(), Value::from("web")),
            (
                "ordered_placement_strategy".to_string(),
                Value::List(vec![Value::Map(HashMap::from([
                    ("type".to_string(), Value::from("binpack")),
                    ("field".to_string(), Value::from("memory")),
                ]))]),
            ),
            (
                "placement_constraints".to_string(),
                Value::List(vec![Value::Map(HashMap::from([(
                    "type".to_string(),
                    Value::from("distinctInstance"),
                )]))]),
            ),
            (
                "deployment_circuit_breaker".to_string(),
                Value::Map(HashMap::from([
                    ("enable".to_string(), Value::Bool(true)),
                    ("rollback".to_string(), Value::Bool(true)),
                ])),
            ),
        ]);
        assert!(service_schema().validate(&attrs).is_ok());

        let mut bad = attrs.clone();
        bad.insert(
            "ordered_placement_strategy".to_string(),
            Value::List(vec![Value::Map(HashMap::from([(
                "type".to_string(),
                Value::from("closest"),
            )]))]),
        );
        assert!(service_schema().validate(&bad).is_err());
    }

    #[test]
    fn volume_takes_one_driver_configuration() {
        let volume = |extra: Vec<(&str, Value)>| {
            let mut map = HashMap::from([("name".to_string(), Value::from("data"))]);
            for (k, v) in extra {
                map.insert(k.to_string(), v);
            }
            HashMap::from([
                ("family".to_string(), Value::from("web")),
                (
                    "container_definitions".to_string(),
                    Value::from(r#"[{"name": "web", "image": "nginx"}]"#),
                ),
                ("volume".to_string(), Value::List(vec![Value::Map(map)])),
            ])
        };
        let docker = Value::Map(HashMap::from([
            ("scope".to_string(), Value::from("shared")),
            ("autoprovision".to_string(), Value::Bool(true)),
        ]));
        let efs = Value::Map(HashMap::from([
            ("file_system_id".to_string(), Value::from("fs-1234")),
            ("transit_encryption".to_string(), Value::from("ENABLED")),
            ("transit_encryption_port".to_string(), Value::Int(2999)),
        ]));

        let schema = task_definition_schema();
        assert!(schema.validate(&volume(vec![("host_path", Value::from("/ecs/data"))])).is_ok());
        assert!(schema.validate(&volume(vec![("docker_volume_configuration", docker.clone())])).is_ok());
        assert!(schema.validate(&volume(vec![("efs_volume_configuration", efs.clone())])).is_ok());
        assert!(
            schema
                .validate(&volume(vec![
                    ("docker_volume_configuration", docker),
                    ("efs_volume_configuration", efs),
                ]))
                .is_err()
        );

        let zero_port = Value::Map(HashMap::from([
            ("file_system_id".to_string(), Value::from("fs-1234")),
            ("transit_encryption_port".to_string(), Value::Int(0)),
        ]));
        assert!(schema.validate(&volume(vec![("efs_volume_configuration", zero_port)])).is_err());
    }

    #[test]
    fn only_tags_update_in_place() {
        let schema = task_definition_schema();
        let in_place: Vec<&str> = schema
            .attributes
            .values()
            .filter(|a| !a.force_new && !a.computed)
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(in_place, vec!["tags"]);
    }
}
