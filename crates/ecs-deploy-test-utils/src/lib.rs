//! Shared test utilities for ecs-deploy
//!
//! Used only as a dev-dependency of `ecs-deploy`.
//!
//! ## Modules
//!
//! - [`control_plane`]: in-memory provider with one fake adapter per kind

pub mod control_plane;

pub use control_plane::{Call, FakeAdapter, FakeControlPlane, Operation};
