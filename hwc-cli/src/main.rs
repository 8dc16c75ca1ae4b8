use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use log::debug;
use tokio_util::sync::CancellationToken;

use hwc_core::provider::{Provider, ProviderError};
use hwc_core::resource::{Resource, ResourceId, State, Value};
use hwc_core::timeouts::{DEFAULT_OPERATION_TIMEOUT, TIMEOUTS_ATTRIBUTE, parse_duration};
use hwc_core::waiter::{Resolved, WaitError};
use hwc_provider::client::DEFAULT_ENDPOINT_TEMPLATE;
use hwc_provider::jobs::{self, job_api};
use hwc_provider::resources::RESOURCE_CONFIGS;
use hwc_provider::utils::{json_to_value, value_to_json};
use hwc_provider::{ClientConfig, HttpClient, HuaweiCloudProvider};

#[derive(Parser)]
#[command(name = "hwc")]
#[command(
    about = "Drive HuaweiCloud asynchronous operations to completion",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Endpoint template; {service} and {region} are filled in per request
    #[arg(long, env = "HWC_ENDPOINT", default_value = DEFAULT_ENDPOINT_TEMPLATE, global = true)]
    endpoint: String,

    #[arg(long, env = "HWC_REGION", default_value = "cn-north-4", global = true)]
    region: String,

    #[arg(long, env = "HWC_PROJECT_ID", global = true)]
    project_id: Option<String>,

    /// IAM token sent as X-Auth-Token
    #[arg(long, env = "HWC_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for a job or billing order to finish
    Wait {
        #[command(subcommand)]
        target: WaitTarget,
    },
    /// Show the current state of a resource
    Read {
        /// Resource type (e.g. rds_instance)
        resource_type: String,
        /// Cloud-side identifier ("<cluster_id>/<id>" for node pools)
        identifier: String,
    },
    /// Create a resource and wait until it is usable
    Create {
        /// Resource type (e.g. dns_zone)
        resource_type: String,
        /// Local name for the resource
        name: String,

        /// Request attributes as a JSON object
        #[arg(long, conflicts_with = "file")]
        json: Option<String>,

        /// Read request attributes from a JSON file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Override the create timeout (e.g. 30m, 1h30m)
        #[arg(long, value_parser = parse_timeout)]
        timeout: Option<Duration>,
    },
    /// Delete a resource and wait until it is gone
    Delete {
        resource_type: String,
        identifier: String,

        /// Override the delete timeout (e.g. 20m)
        #[arg(long, value_parser = parse_timeout)]
        timeout: Option<Duration>,
    },
    /// List supported resource types and their default timeouts
    Types,
}

#[derive(Subcommand)]
enum WaitTarget {
    /// Wait for an asynchronous job
    Job {
        /// Service owning the job (ecs, rds, dds, cce)
        service: String,
        job_id: String,

        #[arg(long, value_parser = parse_timeout, default_value = "10m")]
        timeout: Duration,
    },
    /// Wait for a billing order to complete
    Order {
        order_id: String,

        #[arg(long, value_parser = parse_timeout, default_value = "10m")]
        timeout: Duration,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, stopping wait...".yellow());
            on_interrupt.cancel();
        }
    });

    let result = match cli.command {
        Commands::Wait { target } => run_wait(&cli.connection, target, &cancel).await,
        Commands::Read {
            resource_type,
            identifier,
        } => run_read(&cli.connection, &resource_type, &identifier).await,
        Commands::Create {
            resource_type,
            name,
            json,
            file,
            timeout,
        } => {
            run_create(
                &cli.connection,
                &resource_type,
                &name,
                json.as_deref(),
                file.as_ref(),
                timeout,
                &cancel,
            )
            .await
        }
        Commands::Delete {
            resource_type,
            identifier,
            timeout,
        } => run_delete(&cli.connection, &resource_type, &identifier, timeout, &cancel).await,
        Commands::Types => {
            run_types();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn build_client(connection: &ConnectionArgs) -> Result<HttpClient, String> {
    let project_id = connection
        .project_id
        .clone()
        .ok_or("--project-id (or HWC_PROJECT_ID) is required")?;
    let token = connection
        .token
        .clone()
        .ok_or("--token (or HWC_TOKEN) is required")?;

    let config = ClientConfig::new(connection.region.clone(), project_id, token)
        .with_endpoint(connection.endpoint.clone());
    debug!(
        "using endpoint {} in region {}",
        config.endpoint_template, config.region
    );
    HttpClient::new(config).map_err(|e| format!("Failed to create client: {}", e))
}

/// Run `operation` until it finishes or the user interrupts
///
/// `operation` is polled first so a wait that observes the cancellation itself reports it.
async fn until_canceled<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T, String>>,
) -> Result<T, String> {
    tokio::select! {
        biased;
        result = operation => result,
        _ = cancel.cancelled() => {
            Err("interrupted; the operation may still be running in the cloud".to_string())
        }
    }
}

async fn run_wait(
    connection: &ConnectionArgs,
    target: WaitTarget,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let client = build_client(connection)?;

    let (label, result) = match target {
        WaitTarget::Job {
            service,
            job_id,
            timeout,
        } => {
            let api = job_api(&service)
                .ok_or_else(|| format!("No job API for service {:?}", service))?;
            println!("Waiting for job {} ({})...", job_id.bold(), service);
            let result = jobs::wait_for_job(&client, api, &job_id, timeout, cancel).await;
            (format!("job {}", job_id), result)
        }
        WaitTarget::Order { order_id, timeout } => {
            println!("Waiting for order {}...", order_id.bold());
            let result = jobs::wait_for_order(&client, &order_id, timeout, cancel).await;
            (format!("order {}", order_id), result)
        }
    };

    report_wait(&label, result)
}

fn report_wait(
    label: &str,
    result: Result<Resolved<serde_json::Value>, WaitError>,
) -> Result<(), String> {
    match result {
        Ok(resolved) => {
            println!(
                "  {} {} reached {} ({} probe(s), {:?})",
                "✓".green(),
                label,
                resolved.state.green().bold(),
                resolved.attempts,
                resolved.elapsed
            );
            Ok(())
        }
        Err(e) => {
            println!("  {} {}", "✗".red(), label);
            Err(e.to_string())
        }
    }
}

fn resource_id(resource_type: &str, name: &str) -> Result<ResourceId, String> {
    if hwc_provider::resource_config(resource_type).is_none() {
        return Err(format!(
            "Unknown resource type: {} (see `hwc types`)",
            resource_type
        ));
    }
    Ok(ResourceId::new(resource_type, name))
}

async fn run_read(
    connection: &ConnectionArgs,
    resource_type: &str,
    identifier: &str,
) -> Result<(), String> {
    let id = resource_id(resource_type, identifier)?;
    let provider = HuaweiCloudProvider::new(build_client(connection)?);

    let state = provider
        .read(&id, Some(identifier))
        .await
        .map_err(|e| format!("Failed to read state: {}", e))?;

    if !state.exists {
        println!("{} {} not found", resource_type, identifier.bold());
        return Ok(());
    }
    print_state(&state)
}

fn print_state(state: &State) -> Result<(), String> {
    println!(
        "{} {} [{}]",
        state.id.resource_type,
        state.identifier.as_deref().unwrap_or("-").bold(),
        state.status.as_deref().unwrap_or("unknown").cyan()
    );

    let attributes: serde_json::Map<String, serde_json::Value> = state
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), value_to_json(v)))
        .collect();
    let rendered = serde_json::to_string_pretty(&attributes)
        .map_err(|e| format!("Failed to render attributes: {}", e))?;
    println!("{}", rendered);
    Ok(())
}

/// Parse request attributes from `--json` or `--file`
fn load_attributes(
    json: Option<&str>,
    file: Option<&PathBuf>,
) -> Result<HashMap<String, Value>, String> {
    let raw = match (json, file) {
        (Some(json), _) => json.to_string(),
        (None, Some(file)) => fs::read_to_string(file)
            .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?,
        (None, None) => return Ok(HashMap::new()),
    };

    let parsed: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON attributes: {}", e))?;
    match json_to_value(&parsed) {
        Some(Value::Map(attributes)) => Ok(attributes),
        _ => Err("Attributes must be a JSON object".to_string()),
    }
}

/// Set the `create` entry of the `timeouts` attribute, keeping any other entries
fn set_create_timeout(attributes: &mut HashMap<String, Value>, timeout: Duration) {
    let entry = Value::String(format!("{}s", timeout.as_secs()));
    match attributes.get_mut(TIMEOUTS_ATTRIBUTE) {
        Some(Value::Map(timeouts)) => {
            timeouts.insert("create".to_string(), entry);
        }
        _ => {
            let timeouts = HashMap::from([("create".to_string(), entry)]);
            attributes.insert(TIMEOUTS_ATTRIBUTE.to_string(), Value::Map(timeouts));
        }
    }
}

fn describe_failure(e: ProviderError) -> String {
    if e.wait_error().is_some_and(WaitError::is_canceled) {
        format!("{}; the operation may still be running in the cloud", e)
    } else {
        e.to_string()
    }
}

async fn run_create(
    connection: &ConnectionArgs,
    resource_type: &str,
    name: &str,
    json: Option<&str>,
    file: Option<&PathBuf>,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let id = resource_id(resource_type, name)?;
    let mut resource = Resource {
        id: id.clone(),
        attributes: load_attributes(json, file)?,
    };
    if let Some(timeout) = timeout {
        set_create_timeout(&mut resource.attributes, timeout);
    }

    let provider =
        HuaweiCloudProvider::new(build_client(connection)?).with_cancel(cancel.clone());

    println!("{}", format!("Creating {}...", id).cyan().bold());
    let state = until_canceled(cancel, async {
        provider.create(&resource).await.map_err(describe_failure)
    })
    .await
    .map_err(|e| {
        println!("  {} {}", "✗".red(), id);
        e
    })?;

    println!("  {} {}", "✓".green(), id);
    print_state(&state)
}

async fn run_delete(
    connection: &ConnectionArgs,
    resource_type: &str,
    identifier: &str,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let id = resource_id(resource_type, identifier)?;
    let provider =
        HuaweiCloudProvider::new(build_client(connection)?).with_cancel(cancel.clone());

    println!("{}", format!("Deleting {}...", id).red().bold());
    until_canceled(cancel, async {
        provider
            .delete_resource(&id, identifier, timeout)
            .await
            .map_err(describe_failure)
    })
    .await
    .map_err(|e| {
        println!("  {} {}", "✗".red(), id);
        e
    })?;

    println!("  {} {}", "✓".green(), id);
    Ok(())
}

fn run_types() {
    println!("{}", "Supported resource types:".bold());
    for config in RESOURCE_CONFIGS {
        let timeouts = config.timeouts;
        let mut line = format!(
            "  {:<16} create {:>6}  update {:>6}  delete {:>6}",
            config.type_name,
            format_duration(timeouts.create),
            format_duration(timeouts.update),
            format_duration(timeouts.delete),
        );
        if config.update.is_none() {
            line.push_str(&format!("  {}", "(no in-place update)".dimmed()));
        }
        if let Some(link) = &config.parent {
            line.push_str(&format!("  requires {}", link.id_attribute));
        }
        println!("{}", line);
    }
    println!();
    println!(
        "Waits default to {} unless a type overrides it.",
        format_duration(DEFAULT_OPERATION_TIMEOUT)
    );
}

/// Render a duration in the same notation `--timeout` accepts
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 || out.is_empty() {
        out.push_str(&format!("{}s", s));
    }
    out
}
