//! ecs-deploy: idempotent provisioning and teardown of an ECS Fargate
//! service behind an application load balancer and API Gateway

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ecs_deploy::aws::{self, AwsContext};
use ecs_deploy::config::DeployConfig;
use ecs_deploy::docker::DockerCli;
use ecs_deploy::reconcile::{ExecutionReport, FailurePolicy, FailureReason, Mode, Reconciler};
use ecs_deploy::stack;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ecs-deploy")]
#[command(about = "Deploy and tear down an ECS Fargate service stack")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct CommonArgs {
    /// Path to the deployment config JSON file
    #[arg(short, long, env = "ECS_DEPLOY_CONFIG", default_value = "deploy.json")]
    config: PathBuf,

    /// AWS region (overrides the config file)
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// AWS profile to use (overrides the config file)
    #[arg(long, env = "AWS_PROFILE")]
    profile: Option<String>,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Keep going after a failure with resources that do not depend on it
    #[arg(long)]
    best_effort: bool,

    /// Seconds to wait for the service to drain before deleting it
    #[arg(long)]
    drain_timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create every missing resource of the stack
    Apply(RunArgs),

    /// Delete the stack in reverse dependency order
    Destroy(RunArgs),

    /// Print the ordered plan without calling AWS
    Plan(CommonArgs),
}

impl CommonArgs {
    fn load(&self) -> Result<DeployConfig> {
        let mut config = DeployConfig::load(&self.config)?;
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        if let Some(profile) = &self.profile {
            config.profile = Some(profile.clone());
        }
        Ok(config)
    }
}

impl RunArgs {
    fn load(&self) -> Result<DeployConfig> {
        let mut config = self.common.load()?;
        if self.best_effort {
            config.reconcile.policy = FailurePolicy::BestEffort;
        }
        if let Some(secs) = self.drain_timeout {
            config.reconcile.drain_timeout_secs = secs;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
                .add_directive("aws_config=warn".parse()?)
                .add_directive("aws_smithy_runtime=warn".parse()?),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Plan(common) => {
            let config = common.load()?;
            config.validate().context("Invalid deployment config")?;
            let plan = stack::plan(&config)?;
            for (position, descriptor) in plan.iter().enumerate() {
                let deps: Vec<String> =
                    descriptor.depends_on.iter().map(ToString::to_string).collect();
                println!(
                    "{:>2}. {}{}{}",
                    position + 1,
                    descriptor.id,
                    if descriptor.required { "" } else { " (optional)" },
                    if deps.is_empty() {
                        String::new()
                    } else {
                        format!("  <- {}", deps.join(", "))
                    }
                );
            }
            Ok(0)
        }
        Command::Apply(run_args) => reconcile(Mode::Apply, run_args.load()?).await,
        Command::Destroy(run_args) => reconcile(Mode::Destroy, run_args.load()?).await,
    }
}

async fn reconcile(mode: Mode, config: DeployConfig) -> Result<i32> {
    config.validate().context("Invalid deployment config")?;
    let plan = stack::plan(&config)?;

    info!(
        %mode,
        stack = %config.name,
        region = %config.region,
        profile = ?config.profile,
        resources = plan.len(),
        "Loaded deployment config"
    );

    let ctx = AwsContext::with_profile(&config.region, config.profile.as_deref()).await;
    if let Some(expected) = &config.account_id {
        aws::verify_account(&ctx, expected).await?;
    }

    let adapters = aws::aws_adapters(&ctx, DockerCli::new(config.image.build_timeout_secs));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current step and stopping");
            on_signal.cancel();
        }
    });

    let reconciler =
        Reconciler::new(adapters, config.reconciler_config()).with_cancellation(cancel);
    let report = reconciler.run(mode, &plan).await?;

    println!("{report}");
    print_suggestions(&report);

    Ok(report.exit_code())
}

/// Hints for failures whose provider error code has a known fix
fn print_suggestions(report: &ExecutionReport) {
    for outcome in report.outcomes() {
        let Some(FailureReason::Provider(err)) = outcome.action.failure() else {
            continue;
        };
        if let Some(hint) = aws::suggestion(err) {
            eprintln!("\x1b[36mHint ({}):\x1b[0m {hint}", outcome.id);
        }
    }
}

/// Print an error with its full chain of causes
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}
