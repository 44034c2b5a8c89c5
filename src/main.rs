//! toolgate - Main CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use toolgate::cli::{Args, Commands, Config};
use toolgate::engine::Engine;
use toolgate::logging::init_logging;
use toolgate::proxy::{DispatchRequest, ProxyBridge};
use toolgate::server;
use toolgate::tools::ToolKind;

/// Client-side timeout for `tools` and `call`
const CLIENT_TIMEOUT: Duration = Duration::from_secs(600);

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.clone())?;
    args.apply_overrides(&mut config);
    config.validate()?;

    let _log_guard = init_logging(&config.logging, args.verbosity().log_level())?;

    // one cooperative scheduler; recursive filesystem work uses the bounded blocking pool
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .max_blocking_threads(config.tools.max_blocking_threads)
        .build()
        .context("failed to build runtime")?;

    runtime.block_on(run(args, config))
}

async fn run(args: Args, config: Config) -> Result<()> {
    match args.command() {
        Commands::Serve => serve(&config).await,
        Commands::Tools { url } => list_tools(&config, url).await,
        Commands::Call {
            task,
            tool,
            params,
            request_id,
            url,
        } => call_tool(&config, url, task, tool, &params, request_id).await,
        Commands::Config => show_config(&args, &config),
    }
}

async fn serve(config: &Config) -> Result<()> {
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid listen address {}", config.bind_address()))?;

    let engine = Arc::new(Engine::open(config).await?);
    if config.proxy.enabled && config.proxy.discover_on_start {
        let discovered = engine.discover_proxy_tools().await;
        tracing::info!(discovered, "startup proxy discovery finished");
    }

    println!(
        "{} listening on {} (workspace: {})",
        "toolgate".green().bold(),
        addr.to_string().cyan(),
        config.workspace_root().display()
    );
    server::serve(addr, engine).await
}

/// Base URL of the local service as a client sees it
fn service_url(config: &Config, url: Option<String>) -> String {
    url.unwrap_or_else(|| {
        let host = match config.server.host.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            other => other,
        };
        format!("http://{}:{}", host, config.server.port)
    })
}

/// Print the catalog: built locally with discovery, or fetched from `url`
async fn list_tools(config: &Config, url: Option<String>) -> Result<()> {
    if let Some(url) = url {
        let client = ProxyBridge::new(&url, CLIENT_TIMEOUT)?;
        let names = client.list_tools().await?;
        println!("{} ({})", "Tools".bold(), names.len());
        for name in names {
            println!("  {}", name);
        }
        return Ok(());
    }

    let engine = Engine::open(config).await?;
    if config.proxy.enabled {
        let discovered = engine.discover_proxy_tools().await;
        tracing::debug!(discovered, "proxy discovery for listing finished");
    }
    let info = engine.catalog().info().await;

    println!(
        "{} ({} local, {} proxy)",
        "Tools".bold(),
        info.local_count,
        info.proxy_count
    );
    for tool in info.tools {
        let kind = match tool.kind {
            ToolKind::Local => "local".green(),
            ToolKind::Proxy => "proxy".yellow(),
        };
        println!("  {:<24} {:<6} {}", tool.name, kind, tool.description);
    }
    Ok(())
}

async fn call_tool(
    config: &Config,
    url: Option<String>,
    task: String,
    tool: String,
    params: &str,
    request_id: Option<String>,
) -> Result<()> {
    let params: serde_json::Value =
        serde_json::from_str(params).context("params must be a JSON object")?;
    if !params.is_object() {
        anyhow::bail!("params must be a JSON object");
    }

    let mut request = DispatchRequest::new(task, tool, params);
    request.request_id = request_id;

    let client = ProxyBridge::new(&service_url(config, url), CLIENT_TIMEOUT)?;
    let envelope = client.forward_request(&request).await;

    println!("{}", serde_json::to_string_pretty(&envelope)?);
    if envelope.success {
        eprintln!("{}", "✓ success".green());
        Ok(())
    } else {
        eprintln!(
            "{} {}",
            "✗ failed:".red(),
            envelope.error.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }
}

fn show_config(args: &Args, config: &Config) -> Result<()> {
    println!("{}", "toolgate configuration".bold());
    match args.config.clone().or_else(Config::default_path) {
        Some(path) if path.exists() => println!("  source: {}", path.display()),
        _ => println!("  source: built-in defaults"),
    }
    println!();
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
