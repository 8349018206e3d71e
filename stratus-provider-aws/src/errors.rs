//! AWS error classification
//!
//! Retry and not-found decisions are made on the AWS error code, and for a
//! few ambiguous codes on a substring of the message.

use aws_sdk_kms::error::{DisplayErrorContext, ProvideErrorMetadata};
use stratus_core::provider::ProviderError;
use stratus_core::retry::RetryError;
use stratus_core::waiter::WaitError;

pub const NOT_FOUND: &str = "NotFoundException";
pub const INVALID_ARN: &str = "InvalidArnException";
pub const CLUSTER_NOT_FOUND: &str = "ClusterNotFoundException";
pub const SERVICE_NOT_FOUND: &str = "ServiceNotFoundException";
pub const INVALID_PARAMETER: &str = "InvalidParameterException";
pub const REPORT_IN_PROGRESS: &str = "ReportInProgress";
pub const REPORT_NOT_PRESENT: &str = "ReportNotPresent";
pub const WAF_NONEXISTENT_ITEM: &str = "WAFNonexistentItemException";
pub const WAF_STALE_DATA: &str = "WAFStaleDataException";

/// Returns true if the error has the given code and, when `message_contains`
/// is not empty, a message containing it
pub fn is_aws_err<E: ProvideErrorMetadata>(err: &E, code: &str, message_contains: &str) -> bool {
    if err.code() != Some(code) {
        return false;
    }
    message_contains.is_empty() || err.message().is_some_and(|m| m.contains(message_contains))
}

/// Returns true if the error has any of the given codes
pub fn is_any_aws_err<E: ProvideErrorMetadata>(err: &E, codes: &[&str]) -> bool {
    err.code().is_some_and(|code| codes.contains(&code))
}

/// Human-readable form of an SDK error: `Code: message` when the service
/// answered, the full error chain otherwise
pub fn format_sdk_error<E>(err: &E) -> String
where
    E: ProvideErrorMetadata + std::error::Error,
{
    match (err.code(), err.message()) {
        (Some(code), Some(message)) => format!("{}: {}", code, message),
        (Some(code), None) => code.to_string(),
        _ => DisplayErrorContext(err).to_string(),
    }
}

/// Wrap an SDK error with what the provider was doing
pub fn sdk_error<E>(context: impl std::fmt::Display, err: E) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    ProviderError::new(format!("{}: {}", context, format_sdk_error(&err))).with_cause(err)
}

/// Convert the outcome of a retried SDK call into a provider error
pub fn retry_error<E>(context: impl std::fmt::Display, err: RetryError<E>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match err {
        RetryError::Failed(e) => sdk_error(context, e),
        RetryError::TimedOut {
            last: Some(e),
            timeout,
        } => sdk_error(format!("{} (timeout after {:?})", context, timeout), e)
            .with_kind(stratus_core::provider::ErrorKind::Timeout),
        RetryError::TimedOut { last: None, timeout } => {
            ProviderError::timeout(format!("{}: timeout after {:?}", context, timeout))
        }
    }
}

/// Convert a waiter failure whose refresh step already yields provider errors
pub fn wait_error(context: impl std::fmt::Display, err: WaitError<ProviderError>) -> ProviderError {
    match err {
        WaitError::Refresh(e) => e.context(context),
        other @ WaitError::Timeout { .. } => {
            ProviderError::timeout(format!("{}: {}", context, other))
        }
        other => ProviderError::new(format!("{}: {}", context, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_kms::error::ErrorMetadata;
    use aws_sdk_kms::operation::create_grant::CreateGrantError;
    use stratus_core::provider::ErrorKind;

    fn service_error(code: &str, message: &str) -> CreateGrantError {
        CreateGrantError::generic(ErrorMetadata::builder().code(code).message(message).build())
    }

    #[test]
    fn matches_code_and_message() {
        let err = service_error(
            INVALID_PARAMETER,
            "Unable to assume the service linked role. Please verify that the ECS service linked role exists.",
        );
        assert_eq!(err.code(), Some(INVALID_PARAMETER));
        assert!(is_aws_err(&err, INVALID_PARAMETER, ""));
        assert!(is_aws_err(&err, INVALID_PARAMETER, "Unable to assume the service linked role"));
        assert!(!is_aws_err(&err, INVALID_PARAMETER, "does not have an associated load balancer"));
        assert!(!is_aws_err(&err, NOT_FOUND, ""));
    }

    #[test]
    fn matches_any_code() {
        let err = service_error(INVALID_ARN, "Invalid arn");
        assert!(is_any_aws_err(&err, &[NOT_FOUND, INVALID_ARN]));
        assert!(!is_any_aws_err(&err, &[NOT_FOUND]));
    }

    #[test]
    fn formats_code_and_message() {
        let err = service_error(NOT_FOUND, "Key 'alias/x' does not exist");
        assert_eq!(format_sdk_error(&err), "NotFoundException: Key 'alias/x' does not exist");

        let err = sdk_error("creating KMS Grant for key (alias/x)", service_error(NOT_FOUND, "gone"));
        assert_eq!(
            err.to_string(),
            "creating KMS Grant for key (alias/x): NotFoundException: gone"
        );
    }

    #[test]
    fn timed_out_retry_becomes_timeout_error() {
        let err = retry_error(
            "creating KMS Grant",
            RetryError::TimedOut {
                last: Some(service_error(NOT_FOUND, "principal not found")),
                timeout: std::time::Duration::from_secs(120),
            },
        );
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.message.contains("principal not found"));
    }

    #[test]
    fn wait_refresh_error_keeps_kind() {
        let err = wait_error(
            "waiting for ECS Service",
            WaitError::Refresh(ProviderError::not_found("service gone")),
        );
        assert!(err.is_not_found());
        assert_eq!(err.message, "waiting for ECS Service: service gone");
    }
}
