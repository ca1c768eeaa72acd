//! ecs-deploy-common - Shared types and defaults
//!
//! This crate holds the types shared between the reconciler and its
//! configuration layer, without any AWS SDK dependencies.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values for the deployed stack
//! - [`resource_kind`]: The kinds of resources the reconciler manages

pub mod defaults;
pub mod resource_kind;

pub use resource_kind::{ParseResourceKindError, ResourceKind};
