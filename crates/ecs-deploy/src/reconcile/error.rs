//! Error taxonomy for reconciliation

use super::descriptor::ResourceId;
use ecs_deploy_common::ResourceKind;
use thiserror::Error;

/// Errors in the declared plan itself. Always fatal, and raised before the
/// provider is called where possible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("dependency cycle: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<ResourceId> },

    #[error("{dependent} depends on {dependency}, which is not declared")]
    UnknownDependency {
        dependent: ResourceId,
        dependency: ResourceId,
    },

    #[error("{0} is declared more than once")]
    DuplicateDescriptor(ResourceId),

    #[error("no provider adapter registered for {0} resources")]
    MissingAdapter(ResourceKind),

    #[error("{dependent} needs {dependency}, but no handle for it was produced")]
    MissingDependency {
        dependent: ResourceId,
        dependency: ResourceId,
    },
}

fn format_cycle(cycle: &[ResourceId]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

/// Errors reported by a provider adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("{resource} already exists")]
    AlreadyExists { resource: String },

    #[error("request throttled: {message}")]
    Throttled { message: String },

    #[error("resource is still in use: {message}")]
    DependencyViolation { message: String },

    /// The adapter needed a dependency handle that was not resolved
    #[error("dependency {0} was not resolved")]
    MissingDependency(ResourceId),

    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("unexpected provider response: {0}")]
    Malformed(String),

    #[error("{}", format_sdk(.code.as_deref(), .message))]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

fn format_sdk(code: Option<&str>, message: &str) -> String {
    match code {
        Some(code) => format!("{code}: {message}"),
        None => message.to_string(),
    }
}

impl ProviderError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        ProviderError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn already_exists(resource: impl Into<String>) -> Self {
        ProviderError::AlreadyExists {
            resource: resource.into(),
        }
    }

    pub fn malformed(what: impl Into<String>) -> Self {
        ProviderError::Malformed(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ProviderError::AlreadyExists { .. })
    }

    /// Transient errors the reconciler retries with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Throttled { .. } | ProviderError::DependencyViolation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_closes_the_loop() {
        let err = ConfigurationError::CyclicDependency {
            cycle: vec![
                ResourceId::new(ResourceKind::Cluster, "a"),
                ResourceId::new(ResourceKind::Service, "b"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle: cluster/a -> service/b -> cluster/a"
        );
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(
            ProviderError::Throttled {
                message: "slow down".into()
            }
            .is_retryable()
        );
        assert!(
            ProviderError::DependencyViolation {
                message: "in use".into()
            }
            .is_retryable()
        );
        assert!(!ProviderError::not_found("x").is_retryable());
        assert!(!ProviderError::already_exists("x").is_retryable());
    }

    #[test]
    fn test_sdk_message_includes_code() {
        let err = ProviderError::Sdk {
            code: Some("AccessDeniedException".into()),
            message: "no".into(),
        };
        assert_eq!(err.to_string(), "AccessDeniedException: no");
    }
}
