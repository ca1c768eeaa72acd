//! Declarative reconciliation of resource descriptors against a provider

pub mod adapter;
pub mod descriptor;
pub mod error;
pub mod plan;
pub mod reconciler;
pub mod report;

pub use adapter::{AdapterSet, Dependencies, ResourceAdapter};
pub use descriptor::{Handle, ResourceDescriptor, ResourceId, ResourceParams, ResourceState};
pub use error::{ConfigurationError, ProviderError};
pub use plan::Plan;
pub use reconciler::{FailurePolicy, Mode, Reconciler, ReconcilerConfig, RetryConfig};
pub use report::{Action, ExecutionReport, FailureReason, OperationOutcome, Summary};
