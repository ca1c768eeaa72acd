//! Deployment configuration loaded from JSON
//!
//! Only `name`, `network` and `task.execution_role_arn` have to be given;
//! resource names are derived from `name` unless overridden.

use crate::error::ConfigError;
use crate::reconcile::{FailurePolicy, ReconcilerConfig, RetryConfig};
use crate::wait::WaitConfig;
use anyhow::{Context, Result};
use ecs_deploy_common::ResourceKind;
use ecs_deploy_common::defaults::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// ELBv2 limit for load balancer and target group names
const MAX_ELB_NAME_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    /// Stack name; prefix of every derived resource name
    pub name: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Named AWS profile (defaults to the environment's credentials chain)
    #[serde(default)]
    pub profile: Option<String>,

    /// Refuse to run against any other account
    #[serde(default)]
    pub account_id: Option<String>,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub task: TaskConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    pub network: NetworkConfig,

    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub reconcile: ReconcileSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// Delete the repository on destroy even if it still holds images
    #[serde(default = "default_true")]
    pub force_delete: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: None,
            force_delete: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    #[serde(default = "default_image_tag")]
    pub tag: String,
    /// Docker build context
    #[serde(default = "default_context")]
    pub context: PathBuf,
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            tag: default_image_tag(),
            context: default_context(),
            dockerfile: None,
            platform: default_platform(),
            build_timeout_secs: default_build_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default = "default_task_cpu")]
    pub cpu: String,
    #[serde(default = "default_task_memory")]
    pub memory: String,
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    #[serde(default)]
    pub execution_role_arn: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            family: None,
            cpu: default_task_cpu(),
            memory: default_task_memory(),
            container_port: default_container_port(),
            execution_role_arn: String::new(),
            environment: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    #[serde(default = "default_true")]
    pub assign_public_ip: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: None,
            desired_count: default_desired_count(),
            assign_public_ip: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    pub vpc_id: String,
    pub subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadBalancerConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub target_group: Option<String>,
    #[serde(default = "default_listener_port")]
    pub listener_port: u16,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            name: None,
            target_group: None,
            listener_port: default_listener_port(),
            health_check_path: default_health_check_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Set to false to deploy without an API Gateway in front
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub name: Option<String>,
    /// Path exposed by the gateway and proxied to the load balancer
    #[serde(default = "default_health_check_path")]
    pub path: String,
    #[serde(default = "default_stage_name")]
    pub stage: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: None,
            path: default_health_check_path(),
            stage: default_stage_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileSettings {
    #[serde(default)]
    pub policy: FailurePolicy,
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Kinds whose failure does not fail a best-effort run
    #[serde(default)]
    pub optional: Vec<ResourceKind>,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            policy: FailurePolicy::default(),
            drain_timeout_secs: default_drain_timeout_secs(),
            max_retries: default_max_retries(),
            optional: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

impl DeployConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.region.trim().is_empty() {
            return Err(ConfigError::EmptyRegion);
        }
        if let Some(account) = &self.account_id {
            let account = account.trim();
            if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
                return Err(ConfigError::InvalidAccountId(account.to_string()));
            }
        }
        if self.network.vpc_id.trim().is_empty() {
            return Err(ConfigError::EmptyVpcId);
        }
        if self.network.subnets.is_empty() {
            return Err(ConfigError::NoSubnets);
        }
        if self.task.execution_role_arn.trim().is_empty() {
            return Err(ConfigError::EmptyExecutionRole);
        }

        for (what, name) in [
            ("load balancer", self.load_balancer_name()),
            ("target group", self.target_group_name()),
        ] {
            if name.len() > MAX_ELB_NAME_LEN {
                return Err(ConfigError::NameTooLong {
                    what,
                    name,
                    max: MAX_ELB_NAME_LEN,
                });
            }
        }

        if self.task.container_port == 0 {
            return Err(ConfigError::ZeroPort {
                what: "task.container_port",
            });
        }
        if self.load_balancer.listener_port == 0 {
            return Err(ConfigError::ZeroPort {
                what: "load_balancer.listener_port",
            });
        }
        if !self.gateway.path.starts_with('/') {
            return Err(ConfigError::InvalidPath(self.gateway.path.clone()));
        }
        if self.reconcile.drain_timeout_secs == 0 {
            return Err(ConfigError::InvalidDrainTimeout);
        }
        if self.image.build_timeout_secs == 0 {
            return Err(ConfigError::InvalidBuildTimeout);
        }
        Ok(())
    }

    pub fn registry_name(&self) -> String {
        self.registry.name.clone().unwrap_or_else(|| self.name.clone())
    }

    pub fn cluster_name(&self) -> String {
        derived(&self.cluster.name, &self.name, "cluster")
    }

    pub fn task_family(&self) -> String {
        derived(&self.task.family, &self.name, "task-def")
    }

    pub fn service_name(&self) -> String {
        derived(&self.service.name, &self.name, "service")
    }

    pub fn load_balancer_name(&self) -> String {
        derived(&self.load_balancer.name, &self.name, "lb")
    }

    pub fn target_group_name(&self) -> String {
        derived(&self.load_balancer.target_group, &self.name, "tg")
    }

    /// Listeners have no provider-side name; this one names the descriptor
    pub fn listener_name(&self) -> String {
        format!(
            "{}:{}",
            self.load_balancer_name(),
            self.load_balancer.listener_port
        )
    }

    pub fn gateway_name(&self) -> String {
        derived(&self.gateway.name, &self.name, "gw")
    }

    /// Container name inside the task definition
    pub fn container_name(&self) -> String {
        self.name.clone()
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            policy: self.reconcile.policy,
            retry: RetryConfig {
                max_retries: self.reconcile.max_retries,
                ..RetryConfig::default()
            },
            drain: WaitConfig::default()
                .with_timeout(Duration::from_secs(self.reconcile.drain_timeout_secs)),
        }
    }
}

fn derived(explicit: &Option<String>, stack: &str, suffix: &str) -> String {
    explicit
        .clone()
        .unwrap_or_else(|| format!("{stack}-{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"{
        "name": "sports-api",
        "network": {
            "vpc_id": "vpc-037608f5ddf68b438",
            "subnets": ["subnet-023863d2535821480", "subnet-0eeb018c552f1801c"],
            "security_groups": ["sg-006d3ebb0bac7b387"]
        },
        "task": {
            "execution_role_arn": "arn:aws:iam::443370693600:role/ecsTaskExecutionRole"
        }
    }"#;

    fn minimal() -> DeployConfig {
        serde_json::from_str(MINIMAL).unwrap()
    }

    #[test]
    fn test_load_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{MINIMAL}").unwrap();

        let config = DeployConfig::load(file.path()).unwrap();
        assert_eq!(config.name, "sports-api");
        assert_eq!(config.network.subnets.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = DeployConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_defaults() {
        let config = minimal();
        assert_eq!(config.region, DEFAULT_REGION);
        assert_eq!(config.task.cpu, "256");
        assert_eq!(config.task.memory, "512");
        assert_eq!(config.task.container_port, 8080);
        assert_eq!(config.load_balancer.listener_port, 80);
        assert_eq!(config.service.desired_count, 2);
        assert_eq!(config.gateway.stage, "prod");
        assert_eq!(config.gateway.path, "/sports");
        assert!(config.gateway.enabled);
        assert!(config.registry.force_delete);
        assert_eq!(config.reconcile.policy, FailurePolicy::Abort);
    }

    #[test]
    fn test_derived_names() {
        let config = minimal();
        assert_eq!(config.registry_name(), "sports-api");
        assert_eq!(config.cluster_name(), "sports-api-cluster");
        assert_eq!(config.task_family(), "sports-api-task-def");
        assert_eq!(config.service_name(), "sports-api-service");
        assert_eq!(config.load_balancer_name(), "sports-api-lb");
        assert_eq!(config.target_group_name(), "sports-api-tg");
        assert_eq!(config.gateway_name(), "sports-api-gw");
        assert_eq!(config.listener_name(), "sports-api-lb:80");
    }

    #[test]
    fn test_explicit_names_win() {
        let mut config = minimal();
        config.cluster.name = Some("shared".into());
        assert_eq!(config.cluster_name(), "shared");
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let json = MINIMAL.replacen("\"name\"", "\"nmae\": \"x\", \"name\"", 1);
        assert!(serde_json::from_str::<DeployConfig>(&json).is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = minimal();
        config.network.subnets.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoSubnets));

        let mut config = minimal();
        config.account_id = Some("12345".into());
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidAccountId("12345".into()))
        );

        let mut config = minimal();
        config.gateway.path = "sports".into();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPath("sports".into()))
        );

        let mut config = minimal();
        config.task.execution_role_arn.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptyExecutionRole));
    }

    #[test]
    fn test_long_elb_names_are_rejected() {
        let mut config = minimal();
        config.name = "a-very-long-stack-name-for-testing".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NameTooLong {
                what: "load balancer",
                ..
            })
        ));
    }

    #[test]
    fn test_policy_and_optional_kinds_parse() {
        let json = MINIMAL.replacen(
            "\"name\": \"sports-api\",",
            r#""name": "sports-api",
               "reconcile": { "policy": "best-effort", "optional": ["gateway"], "drain_timeout_secs": 60 },"#,
            1,
        );
        let config: DeployConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.reconcile.policy, FailurePolicy::BestEffort);
        assert_eq!(config.reconcile.optional, vec![ResourceKind::Gateway]);

        let rc = config.reconciler_config();
        assert_eq!(rc.drain.timeout, Duration::from_secs(60));
        assert_eq!(rc.retry.max_retries, DEFAULT_MAX_RETRIES);
    }
}
