//! Thin CLI client over `reaper-platform`'s control-plane HTTP API (spec
//! §6). Every subcommand issues one request and prints the response; no
//! business logic lives here beyond request shaping and unwrapping the
//! `{success, data?, error?}` envelope `reaper-platform` returns.

use clap::{Parser, Subcommand};
use reaper_core::endpoints;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "reaper")]
#[command(about = "Reaper CLI - Policy and agent management")]
#[command(version = reaper_core::VERSION)]
struct Cli {
    /// Base URL of the reaper-platform control-plane API.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8081")]
    platform_url: String,

    /// Request timeout in seconds.
    #[arg(long, global = true, default_value_t = 10)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Policy management commands
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
    /// Agent management commands
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// Delegation management commands
    Delegation {
        #[command(subcommand)]
        action: DelegationAction,
    },
    /// Platform status and monitoring
    Status,
}

#[derive(Subcommand)]
enum PolicyAction {
    /// List all policies
    List,
    /// Show a single policy
    Show { name: String },
    /// Create a new policy from a JSON file
    Create {
        name: String,
        #[arg(long)]
        file: std::path::PathBuf,
    },
    /// Replace an existing policy from a JSON file
    Update {
        name: String,
        #[arg(long)]
        file: std::path::PathBuf,
    },
    /// Delete a policy
    Delete { name: String },
    /// Validate a policy file without admitting it
    Validate {
        #[arg(long)]
        file: std::path::PathBuf,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// List all agents
    List,
    /// Show agent details
    Show { id: String },
    /// Register a new agent from a JSON file
    Register {
        #[arg(long)]
        file: std::path::PathBuf,
    },
    /// Remove an agent
    Remove { id: String },
}

#[derive(Subcommand)]
enum DelegationAction {
    /// List all delegation chains
    List,
    /// Show a single delegation chain
    Show { id: String },
    /// Register a delegation chain from a JSON file
    Create {
        #[arg(long)]
        file: std::path::PathBuf,
    },
    /// Remove a delegation chain
    Remove { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(cli.timeout_secs))
        .build()?;
    let api = ApiClient {
        client,
        base_url: cli.platform_url.clone(),
    };

    match cli.command {
        Commands::Policy { action } => handle_policy_action(&api, action).await,
        Commands::Agent { action } => handle_agent_action(&api, action).await,
        Commands::Delegation { action } => handle_delegation_action(&api, action).await,
        Commands::Status => handle_status(&api).await,
    }
}

/// Wraps the control-plane's `{success, data?, error?}` response envelope.
struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get(&self, path: &str) -> anyhow::Result<Value> {
        let resp = self.client.get(self.url(path)).send().await?;
        unwrap_envelope(resp).await
    }

    async fn post(&self, path: &str, body: Value) -> anyhow::Result<Value> {
        let resp = self.client.post(self.url(path)).json(&body).send().await?;
        unwrap_envelope(resp).await
    }

    async fn put(&self, path: &str, body: Value) -> anyhow::Result<Value> {
        let resp = self.client.put(self.url(path)).json(&body).send().await?;
        unwrap_envelope(resp).await
    }

    async fn delete(&self, path: &str) -> anyhow::Result<Value> {
        let resp = self.client.delete(self.url(path)).send().await?;
        unwrap_envelope(resp).await
    }
}

async fn unwrap_envelope(resp: reqwest::Response) -> anyhow::Result<Value> {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    if status.is_success() && body.get("success").and_then(Value::as_bool).unwrap_or(false) {
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    } else {
        let code = body
            .pointer("/error/code")
            .and_then(Value::as_str)
            .unwrap_or("Unknown");
        let message = body
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("request failed");
        anyhow::bail!("{status} {code}: {message}")
    }
}

fn print_json(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn read_json_file(path: &std::path::Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("invalid JSON in {}: {e}", path.display()))
}

async fn handle_policy_action(api: &ApiClient, action: PolicyAction) -> anyhow::Result<()> {
    match action {
        PolicyAction::List => {
            let data = api.get(endpoints::API_V1_POLICIES).await?;
            print_json(&data);
        }
        PolicyAction::Show { name } => {
            let data = api.get(&format!("{}/{name}", endpoints::API_V1_POLICIES)).await?;
            print_json(&data);
        }
        PolicyAction::Create { name, file } => {
            let mut payload = read_json_file(&file)?;
            if let Some(obj) = payload.as_object_mut() {
                obj.entry("name").or_insert_with(|| json!(name));
            }
            let data = api.post(endpoints::API_V1_POLICIES, payload).await?;
            print_json(&data);
        }
        PolicyAction::Update { name, file } => {
            let payload = read_json_file(&file)?;
            let data = api
                .put(&format!("{}/{name}", endpoints::API_V1_POLICIES), payload)
                .await?;
            print_json(&data);
        }
        PolicyAction::Delete { name } => {
            let data = api.delete(&format!("{}/{name}", endpoints::API_V1_POLICIES)).await?;
            print_json(&data);
        }
        PolicyAction::Validate { file } => {
            let payload = read_json_file(&file)?;
            let data = api.post(endpoints::API_V1_POLICIES_VALIDATE, payload).await?;
            print_json(&data);
        }
    }
    Ok(())
}

async fn handle_agent_action(api: &ApiClient, action: AgentAction) -> anyhow::Result<()> {
    match action {
        AgentAction::List => {
            let data = api.get(endpoints::API_V1_AGENTS).await?;
            print_json(&data);
        }
        AgentAction::Show { id } => {
            let data = api.get(&format!("{}/{id}", endpoints::API_V1_AGENTS)).await?;
            print_json(&data);
        }
        AgentAction::Register { file } => {
            let payload = read_json_file(&file)?;
            let data = api.post(endpoints::API_V1_AGENTS, payload).await?;
            print_json(&data);
        }
        AgentAction::Remove { id } => {
            let data = api.delete(&format!("{}/{id}", endpoints::API_V1_AGENTS)).await?;
            print_json(&data);
        }
    }
    Ok(())
}

async fn handle_delegation_action(api: &ApiClient, action: DelegationAction) -> anyhow::Result<()> {
    match action {
        DelegationAction::List => {
            let data = api.get(endpoints::API_V1_DELEGATIONS).await?;
            print_json(&data);
        }
        DelegationAction::Show { id } => {
            let data = api
                .get(&format!("{}/{id}", endpoints::API_V1_DELEGATIONS))
                .await?;
            print_json(&data);
        }
        DelegationAction::Create { file } => {
            let payload = read_json_file(&file)?;
            let data = api.post(endpoints::API_V1_DELEGATIONS, payload).await?;
            print_json(&data);
        }
        DelegationAction::Remove { id } => {
            let data = api
                .delete(&format!("{}/{id}", endpoints::API_V1_DELEGATIONS))
                .await?;
            print_json(&data);
        }
    }
    Ok(())
}

async fn handle_status(api: &ApiClient) -> anyhow::Result<()> {
    let health = api.get(endpoints::HEALTH).await?;
    let stats = api.get(endpoints::API_V1_STATS).await?;
    print_json(&json!({ "health": health, "stats": stats }));
    Ok(())
}
