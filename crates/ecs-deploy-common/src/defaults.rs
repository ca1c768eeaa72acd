//! Default configuration values for the deployed stack
//!
//! These match the values the stack was originally provisioned with, so a
//! configuration file only has to name what differs.

/// Default AWS region
pub const DEFAULT_REGION: &str = "us-east-2";

/// Default image tag pushed to the registry
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Default platform passed to `docker build --platform`
pub const DEFAULT_PLATFORM: &str = "linux/amd64";

/// Default Fargate task CPU units
pub const DEFAULT_TASK_CPU: &str = "256";

/// Default Fargate task memory (MiB)
pub const DEFAULT_TASK_MEMORY: &str = "512";

/// Default port the container listens on
pub const DEFAULT_CONTAINER_PORT: u16 = 8080;

/// Default port the load balancer listener accepts traffic on
pub const DEFAULT_LISTENER_PORT: u16 = 80;

/// Default number of service tasks
pub const DEFAULT_DESIRED_COUNT: u32 = 2;

/// Default health check and gateway path
pub const DEFAULT_HEALTH_CHECK_PATH: &str = "/sports";

/// Default API Gateway deployment stage
pub const DEFAULT_STAGE_NAME: &str = "prod";

/// Default time to wait for a service to drain before deleting it (seconds)
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 300;

/// Default timeout for each container build tool invocation (seconds)
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 1800;

/// Default number of retries for transient provider errors
pub const DEFAULT_MAX_RETRIES: usize = 5;

// Serde default functions for struct field defaults

pub fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

pub fn default_image_tag() -> String {
    DEFAULT_IMAGE_TAG.to_string()
}

pub fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}

pub fn default_task_cpu() -> String {
    DEFAULT_TASK_CPU.to_string()
}

pub fn default_task_memory() -> String {
    DEFAULT_TASK_MEMORY.to_string()
}

pub fn default_container_port() -> u16 {
    DEFAULT_CONTAINER_PORT
}

pub fn default_listener_port() -> u16 {
    DEFAULT_LISTENER_PORT
}

pub fn default_desired_count() -> u32 {
    DEFAULT_DESIRED_COUNT
}

pub fn default_health_check_path() -> String {
    DEFAULT_HEALTH_CHECK_PATH.to_string()
}

pub fn default_stage_name() -> String {
    DEFAULT_STAGE_NAME.to_string()
}

pub fn default_drain_timeout_secs() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_SECS
}

pub fn default_build_timeout_secs() -> u64 {
    DEFAULT_BUILD_TIMEOUT_SECS
}

pub fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}
