//! AWS error classification
//!
//! Maps SDK errors to [`ProviderError`] using the service error code from
//! `ProvideErrorMetadata`, never the Debug representation.

use crate::reconcile::ProviderError;
use aws_sdk_ecs::error::{DisplayErrorContext, ProvideErrorMetadata};

/// Error codes for "not found" conditions across ECR, ECS, ELBv2 and API Gateway
const NOT_FOUND_CODES: &[&str] = &[
    "RepositoryNotFoundException",
    "ImageNotFoundException",
    "ClusterNotFoundException",
    "ServiceNotFoundException",
    "ServiceNotActiveException",
    "LoadBalancerNotFound",
    "TargetGroupNotFound",
    "ListenerNotFound",
    "NotFoundException",
];

const ALREADY_EXISTS_CODES: &[&str] = &[
    "RepositoryAlreadyExistsException",
    "DuplicateLoadBalancerName",
    "DuplicateTargetGroupName",
    "DuplicateListener",
    "ConflictException",
];

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
];

/// Resource still referenced by something that is going away
const DEPENDENCY_CODES: &[&str] = &[
    "DependencyViolation",
    "ResourceInUse",
    "ResourceInUseException",
    "ClusterContainsServicesException",
    "ClusterContainsTasksException",
];

/// Classify an AWS error by its code
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> ProviderError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => ProviderError::NotFound { resource: message },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => {
            ProviderError::AlreadyExists { resource: message }
        }
        Some(c) if THROTTLING_CODES.contains(&c) => ProviderError::Throttled { message },
        Some(c) if DEPENDENCY_CODES.contains(&c) => ProviderError::DependencyViolation { message },
        _ => ProviderError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify any SDK operation error
///
/// Errors without a service code (dispatch failures, timeouts) keep the
/// full error context as their message.
pub fn classify_sdk_error<E>(err: &E) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    match err.code() {
        Some(code) => classify_aws_error(Some(code), err.message()),
        None => ProviderError::Sdk {
            code: None,
            message: DisplayErrorContext(err).to_string(),
        },
    }
}

/// `.classify()` on SDK call results
pub trait SdkResultExt<T> {
    fn classify(self) -> Result<T, ProviderError>;
}

impl<T, E> SdkResultExt<T> for Result<T, E>
where
    E: ProvideErrorMetadata + std::error::Error,
{
    fn classify(self) -> Result<T, ProviderError> {
        self.map_err(|e| classify_sdk_error(&e))
    }
}

/// Turn a not-found error into `None`
pub fn ignore_not_found<T>(result: Result<T, ProviderError>) -> Result<Option<T>, ProviderError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Hints printed next to errors the user can fix
const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "AccessDeniedException",
        "Check that the active credentials allow ECR, ECS, ELB and API Gateway actions.",
    ),
    (
        "UnrecognizedClientException",
        "The AWS credentials are invalid. Check AWS_PROFILE or --profile.",
    ),
    (
        "ExpiredTokenException",
        "The AWS session has expired. Refresh your credentials.",
    ),
    (
        "TooManyLoadBalancers",
        "Request a service limit increase via AWS Service Quotas console.",
    ),
    (
        "TooManyTargetGroups",
        "Request a service limit increase via AWS Service Quotas console.",
    ),
    (
        "LimitExceededException",
        "Request a service limit increase via AWS Service Quotas console.",
    ),
];

/// A user-facing hint for an error, if one is known
pub fn suggestion(error: &ProviderError) -> Option<&'static str> {
    match error {
        ProviderError::Sdk { code: Some(c), .. } => SUGGESTIONS
            .iter()
            .find(|(code, _)| *code == c.as_str())
            .map(|(_, s)| *s),
        ProviderError::Command { command, .. } if command.starts_with("docker") => {
            Some("Make sure the docker daemon is running and the build context exists.")
        }
        _ => None,
    }
}
