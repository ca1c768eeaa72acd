//! ecs-deploy library
//!
//! Reconciles a declared ECS Fargate stack (registry, image, cluster, task
//! definition, load balancer, target group, listener, service and API
//! Gateway) against AWS. Apply creates whatever is missing; destroy tears
//! the stack down in reverse dependency order, draining the service first.

pub mod aws;
pub mod command;
pub mod config;
pub mod docker;
pub mod error;
pub mod reconcile;
pub mod stack;
pub mod wait;
