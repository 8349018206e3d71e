//! IAM Credential Report data source

use std::collections::HashMap;
use std::time::Duration;

use aws_sdk_iam::primitives::DateTime;
use chrono::SecondsFormat;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{ResourceId, State, Value};
use stratus_core::retry::{Attempt, Retry};

use crate::errors::{REPORT_IN_PROGRESS, REPORT_NOT_PRESENT, is_any_aws_err, retry_error, sdk_error};
use crate::provider::AwsProvider;
use crate::schemas::iam::BOOLEAN_COLUMNS;

const REPORT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Cell values IAM uses for "nothing to report"
const ABSENT_VALUES: &[&str] = &["N/A", "not_supported", "no_information"];

/// Flatten the CSV body of a credential report into one map per row
///
/// Columns are keyed by the header row, so columns IAM adds later are kept.
pub fn parse_credential_report(content: &[u8]) -> Result<Vec<Value>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(content);
    let headers = reader.headers()?.clone();

    let mut users = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut user = HashMap::new();
        for (column, cell) in headers.iter().zip(record.iter()) {
            if let Some(value) = cell_value(column, cell) {
                user.insert(column.to_string(), value);
            }
        }
        users.push(Value::Map(user));
    }
    Ok(users)
}

fn cell_value(column: &str, cell: &str) -> Option<Value> {
    if cell.is_empty() || ABSENT_VALUES.contains(&cell) {
        return None;
    }
    if BOOLEAN_COLUMNS.contains(&column) {
        return match cell {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        };
    }
    Some(Value::from(cell))
}

fn format_generated_time(time: &DateTime) -> Option<String> {
    chrono::DateTime::from_timestamp(time.secs(), time.subsec_nanos())
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

impl AwsProvider {
    /// Generate the credential report and read it once IAM has finished
    pub(crate) async fn read_iam_credential_report(&self, id: &ResourceId) -> ProviderResult<State> {
        let iam = &self.clients.iam;

        let generated = iam
            .generate_credential_report()
            .send()
            .await
            .map_err(|e| sdk_error("generating IAM credential report", e).for_resource(id.clone()))?;
        log::debug!(
            "IAM credential report generation: {}",
            generated.state().map(|s| s.as_str()).unwrap_or("unknown")
        );

        let report = Retry::new(REPORT_TIMEOUT)
            .run(|| {
                let request = iam.get_credential_report();
                async move {
                    request.send().await.map_err(|e| {
                        Attempt::classify(e, |e| {
                            is_any_aws_err(e, &[REPORT_IN_PROGRESS, REPORT_NOT_PRESENT])
                        })
                    })
                }
            })
            .await
            .map_err(|e| retry_error("reading IAM credential report", e).for_resource(id.clone()))?;

        let content = report.content().ok_or_else(|| {
            ProviderError::new("reading IAM credential report: empty content")
                .for_resource(id.clone())
        })?;
        let users = parse_credential_report(content.as_ref()).map_err(|e| {
            ProviderError::new(format!("decoding IAM credential report: {}", e))
                .with_cause(e)
                .for_resource(id.clone())
        })?;

        let mut attributes = HashMap::new();
        if let Some(time) = report.generated_time().and_then(format_generated_time) {
            attributes.insert("generated_time".to_string(), Value::String(time));
        }
        attributes.insert("users".to_string(), Value::List(users));

        Ok(State::existing(id.clone(), attributes).with_identifier("credential_report"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
user,arn,user_creation_time,password_enabled,password_last_used,password_last_changed,password_next_rotation,mfa_active,access_key_1_active,access_key_1_last_rotated,access_key_1_last_used_date,access_key_1_last_used_region,access_key_1_last_used_service,access_key_2_active,access_key_2_last_rotated,access_key_2_last_used_date,access_key_2_last_used_region,access_key_2_last_used_service,cert_1_active,cert_1_last_rotated,cert_2_active,cert_2_last_rotated
<root_account>,arn:aws:iam::123456789012:root,2020-01-01T00:00:00+00:00,not_supported,2024-05-01T10:00:00+00:00,not_supported,not_supported,true,false,N/A,N/A,N/A,N/A,false,N/A,N/A,N/A,N/A,false,N/A,false,N/A
deploy,arn:aws:iam::123456789012:user/deploy,2021-03-04T05:06:07+00:00,false,no_information,N/A,N/A,false,true,2023-02-01T00:00:00+00:00,2024-06-01T12:00:00+00:00,us-east-1,s3,false,N/A,N/A,N/A,N/A,false,N/A,false,N/A
";

    #[test]
    fn flattens_rows() {
        let users = parse_credential_report(REPORT.as_bytes()).unwrap();
        assert_eq!(users.len(), 2);

        let root = users[0].as_map().unwrap();
        assert_eq!(root.get("user"), Some(&Value::from("<root_account>")));
        assert_eq!(root.get("mfa_active"), Some(&Value::Bool(true)));
        assert!(!root.contains_key("password_enabled"));
        assert!(!root.contains_key("access_key_1_last_rotated"));

        let deploy = users[1].as_map().unwrap();
        assert_eq!(deploy.get("password_enabled"), Some(&Value::Bool(false)));
        assert!(!deploy.contains_key("password_last_used"));
        assert_eq!(deploy.get("access_key_1_active"), Some(&Value::Bool(true)));
        assert_eq!(
            deploy.get("access_key_1_last_used_service"),
            Some(&Value::from("s3"))
        );
    }

    #[test]
    fn header_only_report_has_no_users() {
        let header = REPORT.lines().next().unwrap();
        assert!(parse_credential_report(header.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn malformed_row_is_an_error() {
        let report = "user,arn\ndeploy,arn:aws:iam::123456789012:user/deploy,extra\n";
        assert!(parse_credential_report(report.as_bytes()).is_err());
    }

    #[test]
    fn generated_time_is_rfc3339() {
        let time = DateTime::from_secs(1_717_243_200);
        assert_eq!(
            format_generated_time(&time).as_deref(),
            Some("2024-06-01T12:00:00Z")
        );
    }
}
