//! WAF (classic) Size Constraint Set
//!
//! Every classic WAF mutation needs a fresh change token. A token goes stale
//! when another change lands first, in which case the call is retried with a
//! new one.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;

use aws_sdk_waf::error::ProvideErrorMetadata;
use aws_sdk_waf::types::{
    ChangeAction, ComparisonOperator, FieldToMatch, MatchFieldType, SizeConstraint,
    SizeConstraintSetUpdate, TextTransformation,
};
use stratus_core::provider::{ErrorKind, ProviderError, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::retry::{Attempt, Retry, RetryError};

use crate::arn::Arn;
use crate::errors::{WAF_NONEXISTENT_ITEM, WAF_STALE_DATA, is_aws_err, sdk_error};
use crate::provider::AwsProvider;
use crate::utils::{convert_enum_value, get_int, get_string, require_string};

const CHANGE_TOKEN_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// One size constraint, comparable as a whole
///
/// WAF has no per-constraint identity: constraints are added and removed as
/// complete tuples.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SizeConstraintTuple {
    pub field_type: String,
    pub data: Option<String>,
    pub comparison_operator: String,
    pub size: i64,
    pub text_transformation: String,
}

impl SizeConstraintTuple {
    pub fn from_value(value: &Value) -> ProviderResult<Self> {
        let invalid = |what: &str| {
            ProviderError::validation(format!("size_constraints: {} is required", what))
        };
        let Value::Map(map) = value else {
            return Err(ProviderError::validation(
                "size_constraints: expected an object",
            ));
        };
        let field = match map.get("field_to_match") {
            Some(Value::Map(field)) => field,
            _ => return Err(invalid("field_to_match")),
        };

        Ok(Self {
            field_type: get_string(field, "type")
                .map(|t| convert_enum_value(&t))
                .ok_or_else(|| invalid("field_to_match.type"))?,
            data: get_string(field, "data").filter(|d| !d.is_empty()),
            comparison_operator: get_string(map, "comparison_operator")
                .map(|op| convert_enum_value(&op))
                .ok_or_else(|| invalid("comparison_operator"))?,
            size: get_int(map, "size").ok_or_else(|| invalid("size"))?,
            text_transformation: get_string(map, "text_transformation")
                .map(|t| convert_enum_value(&t))
                .ok_or_else(|| invalid("text_transformation"))?,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut field = HashMap::from([("type".to_string(), Value::from(self.field_type.as_str()))]);
        if let Some(data) = &self.data {
            field.insert("data".to_string(), Value::from(data.as_str()));
        }
        Value::Map(HashMap::from([
            ("field_to_match".to_string(), Value::Map(field)),
            (
                "comparison_operator".to_string(),
                Value::from(self.comparison_operator.as_str()),
            ),
            ("size".to_string(), Value::Int(self.size)),
            (
                "text_transformation".to_string(),
                Value::from(self.text_transformation.as_str()),
            ),
        ]))
    }

    pub fn to_sdk(&self) -> ProviderResult<SizeConstraint> {
        let invalid =
            |e: aws_sdk_waf::error::BuildError| ProviderError::validation(format!("size_constraints: {}", e));
        let field = FieldToMatch::builder()
            .r#type(MatchFieldType::from(self.field_type.as_str()))
            .set_data(self.data.clone())
            .build()
            .map_err(invalid)?;
        SizeConstraint::builder()
            .field_to_match(field)
            .comparison_operator(ComparisonOperator::from(self.comparison_operator.as_str()))
            .size(self.size)
            .text_transformation(TextTransformation::from(self.text_transformation.as_str()))
            .build()
            .map_err(invalid)
    }

    pub fn from_sdk(constraint: &SizeConstraint) -> Self {
        let field = constraint.field_to_match();
        Self {
            field_type: field
                .map(|f| f.r#type().as_str().to_string())
                .unwrap_or_default(),
            data: field.and_then(|f| f.data()).map(String::from),
            comparison_operator: constraint.comparison_operator().as_str().to_string(),
            size: constraint.size(),
            text_transformation: constraint.text_transformation().as_str().to_string(),
        }
    }
}

/// Constraints of a `size_constraints` attribute as a set
pub fn expand_size_constraints(value: Option<&Value>) -> ProviderResult<BTreeSet<SizeConstraintTuple>> {
    match value {
        Some(Value::List(items)) => items.iter().map(SizeConstraintTuple::from_value).collect(),
        Some(_) => Err(ProviderError::validation("size_constraints: expected a list")),
        None => Ok(BTreeSet::new()),
    }
}

/// Constraints in canonical order
pub fn flatten_size_constraints<'a>(
    constraints: impl IntoIterator<Item = &'a SizeConstraintTuple>,
) -> Value {
    let ordered: BTreeSet<&SizeConstraintTuple> = constraints.into_iter().collect();
    Value::List(ordered.into_iter().map(SizeConstraintTuple::to_value).collect())
}

/// Updates that turn `old` into `new`: deletions first, then insertions.
/// Tuples present in both are left alone.
pub fn diff_size_constraints(
    old: &BTreeSet<SizeConstraintTuple>,
    new: &BTreeSet<SizeConstraintTuple>,
) -> Vec<(ChangeAction, SizeConstraintTuple)> {
    let deletes = old
        .difference(new)
        .map(|c| (ChangeAction::Delete, c.clone()));
    let inserts = new
        .difference(old)
        .map(|c| (ChangeAction::Insert, c.clone()));
    deletes.chain(inserts).collect()
}

fn build_updates(
    changes: &[(ChangeAction, SizeConstraintTuple)],
) -> ProviderResult<Vec<SizeConstraintSetUpdate>> {
    changes
        .iter()
        .map(|(action, constraint)| {
            SizeConstraintSetUpdate::builder()
                .action(action.clone())
                .size_constraint(constraint.to_sdk()?)
                .build()
                .map_err(|e| ProviderError::validation(format!("size_constraints: {}", e)))
        })
        .collect()
}

/// Bring configured attributes into the form reads produce
pub fn normalize_size_constraint_set_attributes(
    attributes: &mut HashMap<String, Value>,
) -> ProviderResult<()> {
    if attributes.contains_key("size_constraints") {
        let constraints = expand_size_constraints(attributes.get("size_constraints"))?;
        attributes.insert(
            "size_constraints".to_string(),
            flatten_size_constraints(&constraints),
        );
    }
    Ok(())
}

/// Classify a failed WAF mutation: a stale change token is retried, a
/// missing object surfaces as not found
fn change_token_attempt<E>(context: &str, err: E) -> Attempt<ProviderError>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    if is_aws_err(&err, WAF_STALE_DATA, "") {
        Attempt::Retryable(sdk_error(context, err))
    } else if is_aws_err(&err, WAF_NONEXISTENT_ITEM, "") {
        Attempt::Permanent(sdk_error(context, err).with_kind(ErrorKind::NotFound))
    } else {
        Attempt::Permanent(sdk_error(context, err))
    }
}

impl AwsProvider {
    /// Run a WAF mutation with a fresh change token, retrying while the
    /// token goes stale
    pub(crate) async fn with_change_token<T, E, F, Fut>(
        &self,
        context: &str,
        op: F,
    ) -> ProviderResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let waf = &self.clients.waf;
        let op = &op;

        let result = Retry::new(CHANGE_TOKEN_TIMEOUT)
            .run(|| async move {
                let token = match waf.get_change_token().send().await {
                    Ok(output) => match output.change_token() {
                        Some(token) => token.to_string(),
                        None => {
                            return Err(Attempt::Permanent(ProviderError::new(
                                "getting WAF change token: empty response",
                            )));
                        }
                    },
                    Err(e) => {
                        return Err(Attempt::Permanent(sdk_error("getting WAF change token", e)));
                    }
                };

                op(token).await.map_err(|e| change_token_attempt(context, e))
            })
            .await;

        result.map_err(|e| match e {
            RetryError::Failed(e) => e,
            RetryError::TimedOut { last: Some(e), .. } => e.with_kind(ErrorKind::Timeout),
            RetryError::TimedOut { last: None, timeout } => {
                ProviderError::timeout(format!("{}: timeout after {:?}", context, timeout))
            }
        })
    }

    async fn apply_size_constraint_changes(
        &self,
        set_id: &str,
        changes: &[(ChangeAction, SizeConstraintTuple)],
    ) -> ProviderResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let updates = build_updates(changes)?;
        let request = self
            .clients
            .waf
            .update_size_constraint_set()
            .size_constraint_set_id(set_id)
            .set_updates(Some(updates));

        self.with_change_token(
            &format!("updating WAF Size Constraint Set ({})", set_id),
            |token| request.clone().change_token(token).send(),
        )
        .await
        .map(|_| ())
    }

    fn waf_size_constraint_set_arn(&self, set_id: &str) -> Option<String> {
        // Classic WAF is global: the ARN has no region
        self.account_id().map(|account_id| {
            Arn {
                partition: self.partition().to_string(),
                service: "waf".to_string(),
                region: String::new(),
                account_id: account_id.to_string(),
                resource: format!("sizeconstraintset/{}", set_id),
            }
            .to_string()
        })
    }

    /// Create a size constraint set and insert its constraints
    pub(crate) async fn create_waf_size_constraint_set(
        &self,
        resource: Resource,
    ) -> ProviderResult<State> {
        let id = resource.id.clone();
        let for_resource = |e: ProviderError| e.for_resource(id.clone());

        let name = require_string(&resource, "name")?;
        let constraints =
            expand_size_constraints(resource.get("size_constraints")).map_err(for_resource)?;

        let request = self.clients.waf.create_size_constraint_set().name(&name);
        let output = self
            .with_change_token(
                &format!("creating WAF Size Constraint Set ({})", name),
                |token| request.clone().change_token(token).send(),
            )
            .await
            .map_err(for_resource)?;

        let set_id = output
            .size_constraint_set()
            .map(|set| set.size_constraint_set_id().to_string())
            .ok_or_else(|| {
                ProviderError::new(format!(
                    "creating WAF Size Constraint Set ({}): empty response",
                    name
                ))
            })
            .map_err(for_resource)?;
        log::debug!("Created WAF Size Constraint Set ({}) as {}", name, set_id);

        // From here on the set exists; failures hand back its identifier
        let created = |e: ProviderError| {
            let attributes = HashMap::from([("name".to_string(), Value::from(name.as_str()))]);
            let partial = State::existing(id.clone(), attributes).with_identifier(set_id.as_str());
            e.for_resource(id.clone()).with_partial_state(partial)
        };

        let inserts = diff_size_constraints(&BTreeSet::new(), &constraints);
        self.apply_size_constraint_changes(&set_id, &inserts)
            .await
            .map_err(created)?;

        let state = self.read_waf_size_constraint_set(&id, &set_id).await.map_err(created)?;
        if !state.exists {
            return Err(ProviderError::not_found(format!(
                "WAF Size Constraint Set ({}) not found after creation",
                set_id
            ))
            .for_resource(id));
        }
        Ok(state)
    }

    /// Read a size constraint set
    pub(crate) async fn read_waf_size_constraint_set(
        &self,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let output = match self
            .clients
            .waf
            .get_size_constraint_set()
            .size_constraint_set_id(identifier)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if is_aws_err(&e, WAF_NONEXISTENT_ITEM, "") => {
                log::warn!(
                    "WAF Size Constraint Set ({}) not found, removing from state",
                    identifier
                );
                return Ok(State::not_found(id.clone()));
            }
            Err(e) => {
                return Err(sdk_error(
                    format!("reading WAF Size Constraint Set ({})", identifier),
                    e,
                )
                .for_resource(id.clone()));
            }
        };

        let Some(set) = output.size_constraint_set() else {
            return Ok(State::not_found(id.clone()));
        };

        let constraints: BTreeSet<SizeConstraintTuple> = set
            .size_constraints()
            .iter()
            .map(SizeConstraintTuple::from_sdk)
            .collect();

        let mut attributes = HashMap::new();
        if let Some(name) = set.name() {
            attributes.insert("name".to_string(), Value::from(name));
        }
        attributes.insert(
            "size_constraints".to_string(),
            flatten_size_constraints(&constraints),
        );
        if let Some(arn) = self.waf_size_constraint_set_arn(identifier) {
            attributes.insert("arn".to_string(), Value::String(arn));
        }

        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    /// Apply constraint changes to a size constraint set
    pub(crate) async fn update_waf_size_constraint_set(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: Resource,
    ) -> ProviderResult<State> {
        let for_resource = |e: ProviderError| e.for_resource(id.clone());
        let old = expand_size_constraints(from.get("size_constraints")).map_err(for_resource)?;
        let new = expand_size_constraints(to.get("size_constraints")).map_err(for_resource)?;

        let changes = diff_size_constraints(&old, &new);
        self.apply_size_constraint_changes(identifier, &changes)
            .await
            .map_err(for_resource)?;

        self.read_waf_size_constraint_set(id, identifier).await
    }

    /// Remove all constraints, then delete the set
    pub(crate) async fn delete_waf_size_constraint_set(
        &self,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<()> {
        let for_resource = |e: ProviderError| e.for_resource(id.clone());

        // A set still holding constraints cannot be deleted
        let current = self.read_waf_size_constraint_set(id, identifier).await?;
        if !current.exists {
            return Ok(());
        }
        let constraints =
            expand_size_constraints(current.get("size_constraints")).map_err(for_resource)?;
        let deletes = diff_size_constraints(&constraints, &BTreeSet::new());
        self.apply_size_constraint_changes(identifier, &deletes)
            .await
            .map_err(for_resource)?;

        log::debug!("Deleting WAF Size Constraint Set ({})", identifier);
        let request = self
            .clients
            .waf
            .delete_size_constraint_set()
            .size_constraint_set_id(identifier);
        let context = format!("deleting WAF Size Constraint Set ({})", identifier);
        match self
            .with_change_token(&context, |token| request.clone().change_token(token).send())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(for_resource(e)),
        }
    }
}
