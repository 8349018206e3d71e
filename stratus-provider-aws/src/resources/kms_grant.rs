//! KMS Grant
//!
//! A grant is identified by `<key_id>:<grant_id>`. Grants cannot be
//! modified; every configurable attribute forces replacement.
//!
//! A newly created IAM principal may not be visible to KMS yet, so creation
//! and lookups retry for the IAM propagation window. Lookups page through
//! `ListGrants` by marker, since KMS has no "describe grant" call.

use std::collections::HashMap;
use std::time::Duration;

use aws_sdk_kms::Client as KmsClient;
use aws_sdk_kms::types::{GrantConstraints, GrantListEntry, GrantOperation};
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::retry::{Attempt, Retry};
use stratus_core::waiter::StateChangeConf;

use crate::errors::{
    INVALID_ARN, NOT_FOUND, is_any_aws_err, is_aws_err, retry_error, sdk_error, wait_error,
};
use crate::provider::AwsProvider;
use crate::resources::PROPAGATION_TIMEOUT;
use crate::utils::{
    convert_enum_value, get_bool, get_string, get_string_list, require_string, string_list_value,
    string_map, string_map_value,
};

const REVOKE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const LIST_GRANTS_PAGE_SIZE: i32 = 100;

/// Errors worth retrying while a grantee is propagating
const CREATE_RETRY_CODES: &[&str] = &[
    NOT_FOUND,
    INVALID_ARN,
    "DependencyTimeoutException",
    "KMSInternalException",
];

/// Attributes KMS does not report back, carried over from configuration
const CONFIG_ONLY_ATTRIBUTES: &[&str] = &["retire_on_delete", "grant_creation_tokens", "grant_token"];

pub fn encode_kms_grant_id(key_id: &str, grant_id: &str) -> String {
    format!("{}:{}", key_id, grant_id)
}

/// Split `<key_id>:<grant_id>`
///
/// A key ARN contains colons itself, so the grant id is whatever follows the
/// last one.
pub fn decode_kms_grant_id(id: &str) -> ProviderResult<(String, String)> {
    let invalid = || {
        ProviderError::validation(format!(
            "unexpected format of ID ({}), expected KeyID:GrantID",
            id
        ))
    };

    let (key_id, grant_id) = if id.starts_with("arn:") {
        let (key_arn, grant_id) = id.rsplit_once(':').ok_or_else(invalid)?;
        let arn: crate::arn::Arn = key_arn.parse().map_err(|_| invalid())?;
        if !arn.resource.starts_with("key/") {
            return Err(invalid());
        }
        (key_arn, grant_id)
    } else {
        let mut parts = id.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(key_id), Some(grant_id), None) => (key_id, grant_id),
            _ => return Err(invalid()),
        }
    };

    if key_id.is_empty() || grant_id.is_empty() {
        return Err(invalid());
    }
    Ok((key_id.to_string(), grant_id.to_string()))
}

/// Bring configured attributes into the form reads produce
pub fn normalize_kms_grant_attributes(attributes: &mut HashMap<String, Value>) {
    if attributes.contains_key("operations") {
        let mut operations: Vec<String> = get_string_list(attributes, "operations")
            .iter()
            .map(|op| convert_enum_value(op))
            .collect();
        operations.sort();
        attributes.insert("operations".to_string(), string_list_value(operations));
    }
}

/// Build grant constraints from the `constraints` attribute
pub fn expand_grant_constraints(value: Option<&Value>) -> ProviderResult<Option<GrantConstraints>> {
    let Some(Value::Map(map)) = value else {
        return Ok(None);
    };

    let equals = map.get("encryption_context_equals").map(string_map);
    let subset = map.get("encryption_context_subset").map(string_map);
    match (&equals, &subset) {
        (Some(_), Some(_)) => {
            return Err(ProviderError::validation(
                "constraints: encryption_context_equals and encryption_context_subset \
                 cannot both be set",
            ));
        }
        (None, None) => {
            return Err(ProviderError::validation(
                "constraints: one of encryption_context_equals or \
                 encryption_context_subset is required",
            ));
        }
        _ => {}
    }

    Ok(Some(
        GrantConstraints::builder()
            .set_encryption_context_equals(equals)
            .set_encryption_context_subset(subset)
            .build(),
    ))
}

pub fn flatten_grant_constraints(constraints: &GrantConstraints) -> Option<Value> {
    let mut map = HashMap::new();
    if let Some(equals) = constraints.encryption_context_equals() {
        map.insert(
            "encryption_context_equals".to_string(),
            string_map_value(equals.clone()),
        );
    }
    if let Some(subset) = constraints.encryption_context_subset() {
        map.insert(
            "encryption_context_subset".to_string(),
            string_map_value(subset.clone()),
        );
    }
    if map.is_empty() { None } else { Some(Value::Map(map)) }
}

/// Map a listed grant onto resource attributes
///
/// `key_id` is taken from the identifier so it keeps the form (id or ARN)
/// the configuration used.
pub fn flatten_grant(grant: &GrantListEntry, key_id: &str) -> HashMap<String, Value> {
    let mut attributes = HashMap::new();
    attributes.insert("key_id".to_string(), Value::from(key_id));

    if let Some(grant_id) = grant.grant_id() {
        attributes.insert("grant_id".to_string(), Value::from(grant_id));
    }
    if let Some(name) = grant.name()
        && !name.is_empty()
    {
        attributes.insert("name".to_string(), Value::from(name));
    }
    // KMS reports a principal ID instead of an ARN once the principal is
    // deleted; only ARNs are meaningful to compare against configuration.
    if let Some(principal) = grant.grantee_principal()
        && principal.starts_with("arn:")
    {
        attributes.insert("grantee_principal".to_string(), Value::from(principal));
    }
    if let Some(principal) = grant.retiring_principal()
        && principal.starts_with("arn:")
    {
        attributes.insert("retiring_principal".to_string(), Value::from(principal));
    }

    let mut operations: Vec<&str> = grant.operations().iter().map(|op| op.as_str()).collect();
    operations.sort_unstable();
    attributes.insert("operations".to_string(), string_list_value(operations));

    if let Some(constraints) = grant.constraints().and_then(flatten_grant_constraints) {
        attributes.insert("constraints".to_string(), constraints);
    }

    attributes
}

/// Find a grant by paging through `ListGrants`
///
/// Each page is retried on `NotFoundException` (the key or grant is not
/// visible yet) until `retry` gives up. Returns `None` when no page contains
/// the grant, or when the key stays missing for the whole retry window.
pub async fn find_kms_grant_by_id(
    kms: &KmsClient,
    key_id: &str,
    grant_id: &str,
    retry: &Retry,
) -> ProviderResult<Option<GrantListEntry>> {
    let mut marker: Option<String> = None;

    loop {
        let page = retry
            .run(|| {
                let request = kms
                    .list_grants()
                    .key_id(key_id)
                    .limit(LIST_GRANTS_PAGE_SIZE)
                    .set_marker(marker.clone());
                async move {
                    request
                        .send()
                        .await
                        .map_err(|e| Attempt::classify(e, |e| is_aws_err(e, NOT_FOUND, "")))
                }
            })
            .await;

        let page = match page {
            Ok(page) => page,
            Err(err) if err.is_timeout() => {
                log::warn!(
                    "KMS key ({}) still not found after {:?}",
                    key_id,
                    retry.timeout
                );
                return Ok(None);
            }
            Err(err) => {
                return Err(retry_error(
                    format!("listing KMS Grants for key ({})", key_id),
                    err,
                ));
            }
        };

        if let Some(grant) = page.grants().iter().find(|g| g.grant_id() == Some(grant_id)) {
            return Ok(Some(grant.clone()));
        }

        match page.next_marker() {
            Some(next) if !next.is_empty() => marker = Some(next.to_string()),
            _ => return Ok(None),
        }
    }
}

impl AwsProvider {
    /// Create a KMS grant
    pub(crate) async fn create_kms_grant(&self, resource: Resource) -> ProviderResult<State> {
        let id = resource.id.clone();
        let attrs = &resource.attributes;

        let key_id = require_string(&resource, "key_id")?;
        let grantee = require_string(&resource, "grantee_principal")?;
        let operations: Vec<GrantOperation> = get_string_list(attrs, "operations")
            .iter()
            .map(|op| GrantOperation::from(convert_enum_value(op).as_str()))
            .collect();
        if operations.is_empty() {
            return Err(ProviderError::validation("operations must not be empty").for_resource(id));
        }
        let constraints = expand_grant_constraints(resource.get("constraints"))
            .map_err(|e| e.for_resource(id.clone()))?;
        let grant_tokens = get_string_list(attrs, "grant_creation_tokens");
        let grant_tokens = (!grant_tokens.is_empty()).then_some(grant_tokens);

        let context = format!("creating KMS Grant for key ({})", key_id);
        log::debug!("{}", context);

        let output = Retry::new(PROPAGATION_TIMEOUT)
            .run(|| {
                let request = self
                    .clients
                    .kms
                    .create_grant()
                    .key_id(&key_id)
                    .grantee_principal(&grantee)
                    .set_operations(Some(operations.clone()))
                    .set_name(get_string(attrs, "name"))
                    .set_retiring_principal(get_string(attrs, "retiring_principal"))
                    .set_constraints(constraints.clone())
                    .set_grant_tokens(grant_tokens.clone());
                async move {
                    request.send().await.map_err(|e| {
                        Attempt::classify(e, |e| is_any_aws_err(e, CREATE_RETRY_CODES))
                    })
                }
            })
            .await
            .map_err(|e| retry_error(&context, e).for_resource(id.clone()))?;

        let grant_id = output
            .grant_id()
            .ok_or_else(|| {
                ProviderError::new(format!("{}: empty response", context)).for_resource(id.clone())
            })?
            .to_string();
        let identifier = encode_kms_grant_id(&key_id, &grant_id);

        // The grant may take a moment to show up in ListGrants. It exists
        // either way, so a failed wait still hands back its identifier.
        let grant = match self.wait_for_kms_grant(&key_id, &grant_id).await {
            Ok(grant) => grant,
            Err(e) => {
                let mut attributes = attrs.clone();
                attributes.insert("grant_id".to_string(), Value::from(grant_id.as_str()));
                if let Some(token) = output.grant_token() {
                    attributes.insert("grant_token".to_string(), Value::from(token));
                }
                let partial = State::existing(id.clone(), attributes).with_identifier(identifier);
                return Err(e.for_resource(id).with_partial_state(partial));
            }
        };

        let mut attributes = flatten_grant(&grant, &key_id);
        attributes.insert(
            "retire_on_delete".to_string(),
            Value::Bool(get_bool(attrs, "retire_on_delete").unwrap_or(false)),
        );
        if let Some(tokens) = attrs.get("grant_creation_tokens") {
            attributes.insert("grant_creation_tokens".to_string(), tokens.clone());
        }
        if let Some(token) = output.grant_token() {
            attributes.insert("grant_token".to_string(), Value::from(token));
        }

        Ok(State::existing(id, attributes).with_identifier(identifier))
    }

    /// Read a KMS grant
    pub(crate) async fn read_kms_grant(
        &self,
        id: &ResourceId,
        identifier: &str,
        prior: Option<&State>,
    ) -> ProviderResult<State> {
        let (key_id, grant_id) =
            decode_kms_grant_id(identifier).map_err(|e| e.for_resource(id.clone()))?;

        let grant = find_kms_grant_by_id(
            &self.clients.kms,
            &key_id,
            &grant_id,
            &Retry::new(PROPAGATION_TIMEOUT),
        )
        .await
        .map_err(|e| e.for_resource(id.clone()))?;

        let Some(grant) = grant else {
            log::warn!(
                "KMS Grant ({}) not found for key ({}), removing from state",
                grant_id,
                key_id
            );
            return Ok(State::not_found(id.clone()));
        };

        let mut attributes = flatten_grant(&grant, &key_id);
        match prior {
            Some(prior) => {
                for name in CONFIG_ONLY_ATTRIBUTES {
                    if let Some(value) = prior.get(name) {
                        attributes.insert(name.to_string(), value.clone());
                    }
                }
            }
            None => {
                attributes.insert("retire_on_delete".to_string(), Value::Bool(false));
            }
        }

        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    /// Retire or revoke a KMS grant and wait until it is gone
    pub(crate) async fn delete_kms_grant(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
    ) -> ProviderResult<()> {
        let (key_id, grant_id) =
            decode_kms_grant_id(identifier).map_err(|e| e.for_resource(id.clone()))?;
        let retire = get_bool(&from.attributes, "retire_on_delete").unwrap_or(false);

        let result = if retire {
            log::debug!("Retiring KMS Grant ({}) for key ({})", grant_id, key_id);
            self.clients
                .kms
                .retire_grant()
                .key_id(&key_id)
                .grant_id(&grant_id)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| {
                    if is_aws_err(&e, NOT_FOUND, "") {
                        None
                    } else {
                        Some(sdk_error(format!("retiring KMS Grant ({})", grant_id), e))
                    }
                })
        } else {
            log::debug!("Revoking KMS Grant ({}) for key ({})", grant_id, key_id);
            self.clients
                .kms
                .revoke_grant()
                .key_id(&key_id)
                .grant_id(&grant_id)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| {
                    if is_aws_err(&e, NOT_FOUND, "") {
                        None
                    } else {
                        Some(sdk_error(format!("revoking KMS Grant ({})", grant_id), e))
                    }
                })
        };

        match result {
            Ok(()) => {}
            // Already gone
            Err(None) => return Ok(()),
            Err(Some(err)) => return Err(err.for_resource(id.clone())),
        }

        log::debug!("Checking if KMS Grant ({}) is revoked", grant_id);
        self.wait_for_kms_grant_to_be_revoked(&key_id, &grant_id)
            .await
            .map_err(|e| e.for_resource(id.clone()))
    }

    /// Wait until a new grant is listed
    async fn wait_for_kms_grant(&self, key_id: &str, grant_id: &str) -> ProviderResult<GrantListEntry> {
        let lookup = &Retry::new(Duration::from_secs(30));
        let grant = StateChangeConf::new(&[], &["present"], PROPAGATION_TIMEOUT)
            .wait_for_state(|| async move {
                let grant = find_kms_grant_by_id(&self.clients.kms, key_id, grant_id, lookup).await?;
                Ok::<_, ProviderError>(grant.map(|g| (g, "present".to_string())))
            })
            .await
            .map_err(|e| {
                wait_error(format!("waiting for KMS Grant ({}) to be listed", grant_id), e)
            })?;

        grant.ok_or_else(|| ProviderError::not_found(format!("KMS Grant ({}) not found", grant_id)))
    }

    /// Poll until the grant no longer appears in `ListGrants`
    async fn wait_for_kms_grant_to_be_revoked(
        &self,
        key_id: &str,
        grant_id: &str,
    ) -> ProviderResult<()> {
        let lookup = &Retry::new(Duration::from_secs(30));
        StateChangeConf::new(&["present"], &[], REVOKE_TIMEOUT)
            .wait_for_state(|| async move {
                let grant = find_kms_grant_by_id(&self.clients.kms, key_id, grant_id, lookup).await?;
                Ok::<_, ProviderError>(grant.map(|g| (g, "present".to_string())))
            })
            .await
            .map(|_| ())
            .map_err(|e| {
                wait_error(format!("waiting for KMS Grant ({}) to be revoked", grant_id), e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_plain_key_id() {
        let id = encode_kms_grant_id("1234abcd-12ab-34cd-56ef-1234567890ab", "abc123");
        assert_eq!(id, "1234abcd-12ab-34cd-56ef-1234567890ab:abc123");
        let (key_id, grant_id) = decode_kms_grant_id(&id).unwrap();
        assert_eq!(key_id, "1234abcd-12ab-34cd-56ef-1234567890ab");
        assert_eq!(grant_id, "abc123");
    }

    #[test]
    fn decode_key_arn() {
        let key_arn = "arn:aws:kms:us-west-2:123456789012:key/1234abcd-12ab-34cd-56ef-1234567890ab";
        let id = encode_kms_grant_id(key_arn, "abc123");
        let (key_id, grant_id) = decode_kms_grant_id(&id).unwrap();
        assert_eq!(key_id, key_arn);
        assert_eq!(grant_id, "abc123");
    }

    #[test]
    fn decode_rejects_malformed_ids() {
        for id in [
            "abc123",
            "key:",
            ":grant",
            "a:b:c",
            "arn:aws:kms:us-west-2:123456789012:key/1234abcd",
            "arn:aws:kms:us-west-2:123456789012:alias/app:abc123",
        ] {
            let err = decode_kms_grant_id(id).unwrap_err();
            assert!(err.message.contains("expected KeyID:GrantID"), "{}", id);
        }
    }

    #[test]
    fn operations_normalized_like_reads() {
        let mut attributes = HashMap::from([(
            "operations".to_string(),
            string_list_value(["aws.kms.GrantOperation.Encrypt", "Decrypt"]),
        )]);
        normalize_kms_grant_attributes(&mut attributes);
        assert_eq!(
            attributes.get("operations"),
            Some(&string_list_value(["Decrypt", "Encrypt"]))
        );
    }

    #[test]
    fn constraints_require_exactly_one_context() {
        assert!(expand_grant_constraints(None).unwrap().is_none());

        let both = Value::Map(HashMap::from([
            (
                "encryption_context_equals".to_string(),
                string_map_value([("a", "1")]),
            ),
            (
                "encryption_context_subset".to_string(),
                string_map_value([("b", "2")]),
            ),
        ]));
        assert!(expand_grant_constraints(Some(&both)).is_err());

        let neither = Value::Map(HashMap::new());
        assert!(expand_grant_constraints(Some(&neither)).is_err());
    }

    #[test]
    fn constraints_round_trip() {
        let value = Value::Map(HashMap::from([(
            "encryption_context_subset".to_string(),
            string_map_value([("Department", "Finance")]),
        )]));
        let constraints = expand_grant_constraints(Some(&value)).unwrap().unwrap();
        assert!(constraints.encryption_context_equals().is_none());
        assert_eq!(flatten_grant_constraints(&constraints), Some(value));
    }

    #[test]
    fn flatten_listed_grant() {
        let grant = GrantListEntry::builder()
            .grant_id("abc123")
            .name("app")
            .key_id("arn:aws:kms:us-west-2:123456789012:key/1234abcd")
            .grantee_principal("arn:aws:iam::123456789012:role/app")
            .retiring_principal("AROAEXAMPLEID")
            .operations(GrantOperation::Encrypt)
            .operations(GrantOperation::Decrypt)
            .build();

        let attrs = flatten_grant(&grant, "1234abcd");
        assert_eq!(attrs.get("key_id"), Some(&Value::from("1234abcd")));
        assert_eq!(attrs.get("grant_id"), Some(&Value::from("abc123")));
        assert_eq!(attrs.get("name"), Some(&Value::from("app")));
        assert_eq!(
            attrs.get("grantee_principal"),
            Some(&Value::from("arn:aws:iam::123456789012:role/app"))
        );
        // Principal IDs are not ARNs and are not reported
        assert!(!attrs.contains_key("retiring_principal"));
        assert_eq!(
            attrs.get("operations"),
            Some(&string_list_value(["Decrypt", "Encrypt"]))
        );
        assert!(!attrs.contains_key("constraints"));
    }
}
