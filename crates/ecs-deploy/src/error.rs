//! Deployment configuration validation errors

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("name cannot be empty")]
    EmptyName,

    #[error("region cannot be empty")]
    EmptyRegion,

    #[error("account_id must be 12 digits, got: {0}")]
    InvalidAccountId(String),

    #[error("network.vpc_id cannot be empty")]
    EmptyVpcId,

    #[error("network.subnets must list at least one subnet")]
    NoSubnets,

    #[error("task.execution_role_arn cannot be empty")]
    EmptyExecutionRole,

    #[error("{what} name '{name}' is longer than {max} characters")]
    NameTooLong {
        what: &'static str,
        name: String,
        max: usize,
    },

    #[error("{what} must be greater than 0")]
    ZeroPort { what: &'static str },

    #[error("gateway.path must start with '/', got: {0}")]
    InvalidPath(String),

    #[error("drain_timeout_secs must be greater than 0")]
    InvalidDrainTimeout,

    #[error("image.build_timeout_secs must be greater than 0")]
    InvalidBuildTimeout,
}
