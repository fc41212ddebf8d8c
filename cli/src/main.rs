use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use client::{ClientConfig, ClientError, RoutingClient, WsConnector};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("routing client failed: {0}")]
    Client(#[from] ClientError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid --extra entry `{0}`; expected key=value")]
    InvalidExtra(String),
    #[error("timed out waiting for module {0}")]
    Timeout(String),
    #[error("server returned HTTP {status} for {path}")]
    ServerError { status: u16, path: String },
}

#[derive(Parser, Debug)]
#[command(name = "rocky", about = "Rocky routing layer CLI")]
struct Cli {
    #[arg(long, env = "ROCKY_ROUTER_URL", default_value = client::config::DEFAULT_ROUTER_URL)]
    router_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the router's health endpoint.
    Ping,
    /// List published routing servers.
    Routers,
    /// Dump raw module records for a namespace.
    Modules { namespace: String },
    /// Register as an instance and print topology changes until Ctrl-C.
    Join(JoinArgs),
    /// Resolve a module and send it one request.
    Call(CallArgs),
}

#[derive(Args, Debug)]
struct IdentityArgs {
    #[arg(long, env = "ROCKY_NAMESPACE")]
    namespace: String,

    #[arg(long, env = "ROCKY_PROFILE", default_value = client::config::DEFAULT_PROFILE)]
    profile: String,

    #[arg(long, env = "ROCKY_ACCESS_KEY", default_value = "")]
    access_key: String,

    #[arg(long, env = "ROCKY_INSTANCE_ID")]
    instance_id: Option<String>,
}

#[derive(Args, Debug)]
struct JoinArgs {
    #[command(flatten)]
    identity: IdentityArgs,

    #[arg(long, env = "ROCKY_INSTANCE_IP", default_value = client::config::DEFAULT_INSTANCE_IP)]
    ip: String,

    #[arg(long, env = "ROCKY_INSTANCE_PORT", default_value_t = 0)]
    port: u16,

    /// Module served by this instance; repeat for several.
    #[arg(long = "module")]
    modules: Vec<String>,

    /// Extra metadata as key=value; repeat for several.
    #[arg(long = "extra")]
    extra: Vec<String>,

    /// Announce the instance active right after connecting.
    #[arg(long, default_value_t = false)]
    active: bool,
}

#[derive(Args, Debug)]
struct CallArgs {
    #[command(flatten)]
    identity: IdentityArgs,

    module: String,

    command: i32,

    /// Request payload, sent as UTF-8 bytes.
    #[arg(long, default_value = "")]
    data: String,

    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Ping => run_ping(&cli.router_url).await,
        Command::Routers => print_json(&get_json(&cli.router_url, "/rocky/routers").await?),
        Command::Modules { namespace } => {
            print_json(&get_json(&cli.router_url, &format!("/rocky/module/{namespace}")).await?)
        }
        Command::Join(args) => run_join(&cli.router_url, args).await,
        Command::Call(args) => run_call(&cli.router_url, args).await,
    }
}

async fn run_ping(router_url: &str) -> Result<(), CliError> {
    let path = "/healthz";
    let response = reqwest::Client::new().get(format!("{}{path}", router_url.trim_end_matches('/'))).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::ServerError { status: status.as_u16(), path: path.to_owned() });
    }
    println!("ok");
    Ok(())
}

async fn get_json(router_url: &str, path: &str) -> Result<Value, CliError> {
    let url = format!("{}{path}", router_url.trim_end_matches('/'));
    let response = reqwest::Client::new().get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::ServerError { status: status.as_u16(), path: path.to_owned() });
    }
    Ok(response.json().await?)
}

fn client_config(router_url: &str, identity: IdentityArgs) -> ClientConfig {
    let mut cfg = ClientConfig::new(identity.namespace);
    cfg.router_url = router_url.to_owned();
    cfg.profile = identity.profile;
    cfg.access_key = identity.access_key;
    if let Some(id) = identity.instance_id {
        cfg.instance_id = id;
    }
    cfg
}

async fn run_join(router_url: &str, args: JoinArgs) -> Result<(), CliError> {
    let mut cfg = client_config(router_url, args.identity);
    cfg.instance_ip = args.ip;
    cfg.instance_port = args.port;
    cfg.modules = args.modules;

    let client = RoutingClient::new(cfg, Arc::new(WsConnector));
    client.set_extra(parse_extra(&args.extra)?).await;
    let mut changes = client.subscribe_changes();
    client.start().await?;
    eprintln!("joined as {}", client.config().instance_id);
    if args.active {
        client.active().await?;
    }

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let topology = client.modules().topology().await;
                print_json(&serde_json::to_value(&topology)?)?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if args.active {
        let _ = client.inactive().await;
    }
    client.close().await;
    Ok(())
}

async fn run_call(router_url: &str, args: CallArgs) -> Result<(), CliError> {
    let client = RoutingClient::new(client_config(router_url, args.identity), Arc::new(WsConnector));
    let mut changes = client.subscribe_changes();
    client.start().await?;

    let deadline = tokio::time::Instant::now() + Duration::from_millis(args.timeout_ms);
    let target = loop {
        match client.modules().use_module(&args.module).await {
            Ok(target) => break target,
            Err(ClientError::UnknownModule(_) | ClientError::ServiceUnavailable(_)) => {
                if tokio::time::timeout_at(deadline, changes.changed()).await.is_err() {
                    client.close().await;
                    return Err(CliError::Timeout(args.module));
                }
            }
            Err(e) => return Err(e.into()),
        }
    };

    let request = target.request(args.command)?.payload(args.data.into_bytes()).send();
    let reply = tokio::time::timeout_at(deadline, request).await;
    client.close().await;
    let reply = reply.map_err(|_| CliError::Timeout(args.module))??;
    println!("{}", String::from_utf8_lossy(&reply));
    Ok(())
}

fn parse_extra(entries: &[String]) -> Result<HashMap<String, String>, CliError> {
    entries
        .iter()
        .map(|entry| {
            entry
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
                .ok_or_else(|| CliError::InvalidExtra(entry.clone()))
        })
        .collect()
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
