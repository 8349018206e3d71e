//! Acceptance tests against a live AWS account
//!
//! These create and destroy real objects. Only free-standing resources with
//! no running cost are exercised.
//!
//! To run these tests:
//! ```bash
//! export STRATUS_ACC=1
//! export AWS_REGION=us-east-1
//! cargo test -p stratus-provider-aws --test acceptance --features acceptance-tests
//! ```

#![cfg(feature = "acceptance-tests")]

use std::collections::HashMap;
use std::env;

use stratus_core::provider::Provider;
use stratus_core::resource::{Resource, ResourceId, Value};
use stratus_provider_aws::{AwsProvider, ProviderConfig};

fn enabled() -> bool {
    let enabled = env::var("STRATUS_ACC")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if !enabled {
        eprintln!("Skipping acceptance tests (STRATUS_ACC not set)");
    }
    enabled
}

async fn provider() -> AwsProvider {
    let region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
    AwsProvider::new(&ProviderConfig::new(region))
        .await
        .expect("failed to configure AWS provider")
}

fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix, chrono::Utc::now().timestamp_millis())
}

fn size_constraint(field: &str, size: i64) -> Value {
    Value::Map(HashMap::from([
        (
            "field_to_match".to_string(),
            Value::Map(HashMap::from([("type".to_string(), Value::from(field))])),
        ),
        ("comparison_operator".to_string(), Value::from("GT")),
        ("size".to_string(), Value::Int(size)),
        ("text_transformation".to_string(), Value::from("NONE")),
    ]))
}

#[tokio::test]
async fn credential_report_lists_root_account() {
    if !enabled() {
        return;
    }
    let provider = provider().await;

    let id = ResourceId::new("iam.credential_report", "report");
    let state = provider.read(&id, None).await.unwrap();
    assert!(state.exists);
    assert_eq!(state.identifier.as_deref(), Some("credential_report"));

    let users = state.get("users").and_then(Value::as_list).unwrap();
    assert!(users.iter().any(|u| {
        u.as_map()
            .and_then(|m| m.get("user"))
            .and_then(Value::as_str)
            == Some("<root_account>")
    }));
}

#[tokio::test]
async fn waf_size_constraint_set_lifecycle() {
    if !enabled() {
        return;
    }
    let provider = provider().await;

    let resource = Resource::new("waf.size_constraint_set", "body")
        .with_attribute("name", Value::from(unique_name("stratus-acc")))
        .with_attribute(
            "size_constraints",
            Value::List(vec![size_constraint("BODY", 4096)]),
        );
    let created = provider.create(&resource).await.unwrap();
    let identifier = created.identifier.clone().unwrap();
    assert_eq!(
        created.get("size_constraints").and_then(Value::as_list).map(|l| l.len()),
        Some(1)
    );

    let updated_resource = resource.clone().with_attribute(
        "size_constraints",
        Value::List(vec![
            size_constraint("BODY", 8192),
            size_constraint("URI", 512),
        ]),
    );
    let updated = provider
        .update(&resource.id, &identifier, &created, &updated_resource)
        .await
        .unwrap();
    assert_eq!(
        updated.get("size_constraints").and_then(Value::as_list).map(|l| l.len()),
        Some(2)
    );

    provider
        .delete(&resource.id, &identifier, &updated)
        .await
        .unwrap();
    let gone = provider.read(&resource.id, Some(&identifier)).await.unwrap();
    assert!(!gone.exists);
}

#[tokio::test]
async fn ecs_task_definition_lifecycle() {
    if !enabled() {
        return;
    }
    let provider = provider().await;

    let containers = r#"[{"name":"web","image":"nginx:latest","memory":128,"essential":true}]"#;
    let resource = Resource::new("ecs.task_definition", "web")
        .with_attribute("family", Value::from(unique_name("stratus-acc")))
        .with_attribute("container_definitions", Value::from(containers))
        .with_attribute(
            "tags",
            Value::Map(HashMap::from([("env".to_string(), Value::from("acc"))])),
        );
    let created = provider.create(&resource).await.unwrap();
    let identifier = created.identifier.clone().unwrap();
    assert!(identifier.contains(":task-definition/"));

    let refreshed = provider
        .refresh(&resource.id, &identifier, &created)
        .await
        .unwrap();
    assert_eq!(refreshed.get("container_definitions"), created.get("container_definitions"));

    provider
        .delete(&resource.id, &identifier, &refreshed)
        .await
        .unwrap();
    let gone = provider.read(&resource.id, Some(&identifier)).await.unwrap();
    assert!(!gone.exists);
}
