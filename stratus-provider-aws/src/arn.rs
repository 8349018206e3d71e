//! Amazon Resource Name helpers

use std::fmt;
use std::str::FromStr;

/// A parsed ARN: `arn:partition:service:region:account:resource`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ARN ({0})")]
pub struct ArnError(pub String);

impl FromStr for Arn {
    type Err = ArnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(6, ':').collect();
        if parts.len() != 6 || parts[0] != "arn" {
            return Err(ArnError(s.to_string()));
        }
        if parts[1].is_empty() || parts[2].is_empty() || parts[5].is_empty() {
            return Err(ArnError(s.to_string()));
        }
        Ok(Arn {
            partition: parts[1].to_string(),
            service: parts[2].to_string(),
            region: parts[3].to_string(),
            account_id: parts[4].to_string(),
            resource: parts[5].to_string(),
        })
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

/// Returns true if `s` is an ARN for the given service in the given partition
pub fn is_arn_for(partition: &str, service: &str, s: &str) -> bool {
    s.parse::<Arn>()
        .is_ok_and(|arn| arn.partition == partition && arn.service == service)
}

/// Cluster name from an ECS cluster ARN (`...:cluster/<name>`); plain names
/// pass through unchanged
pub fn cluster_name_from_arn(s: &str) -> String {
    match s.parse::<Arn>() {
        Ok(arn) => arn
            .resource
            .strip_prefix("cluster/")
            .unwrap_or(&arn.resource)
            .to_string(),
        Err(_) => s.to_string(),
    }
}

/// Role name from an IAM role ARN. Roles created under a path keep it, with
/// a leading `/` (`...:role/service-role/foo` becomes `/service-role/foo`).
pub fn role_name_from_arn(s: &str) -> String {
    match s.parse::<Arn>() {
        Ok(arn) => {
            let name = arn.resource.strip_prefix("role/").unwrap_or(&arn.resource);
            if name.contains('/') {
                format!("/{}", name)
            } else {
                name.to_string()
            }
        }
        Err(_) => s.to_string(),
    }
}

/// `family:revision` from a task definition ARN
pub fn family_and_revision_from_arn(s: &str) -> Result<String, ArnError> {
    let arn: Arn = s.parse()?;
    arn.resource
        .strip_prefix("task-definition/")
        .map(String::from)
        .ok_or_else(|| ArnError(s.to_string()))
}

/// Cluster name and service name from an ECS service ARN
///
/// The long ARN format is `service/<cluster>/<service>`; the legacy short
/// format `service/<service>` carries no cluster.
pub fn service_parts_from_arn(s: &str) -> Result<(Option<String>, String), ArnError> {
    let arn: Arn = s.parse()?;
    let rest = arn
        .resource
        .strip_prefix("service/")
        .ok_or_else(|| ArnError(s.to_string()))?;
    match rest.split_once('/') {
        Some((cluster, service)) if !cluster.is_empty() && !service.is_empty() => {
            Ok((Some(cluster.to_string()), service.to_string()))
        }
        Some(_) => Err(ArnError(s.to_string())),
        None => Ok((None, rest.to_string())),
    }
}
