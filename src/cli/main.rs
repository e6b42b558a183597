use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "cmdb-analytics-cli")]
#[command(about = "CMDB report analytics CLI", long_about = None)]
struct Cli {
    #[arg(short, long, env = "CMDB_ANALYTICS_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Scope {
    Full,
    Incremental,
}

#[derive(Subcommand)]
enum Commands {
    /// Freshness of every view
    Views,

    /// Rows of one view
    View {
        #[arg(value_name = "VIEW")]
        name: String,

        #[arg(short, long)]
        report_id: Option<String>,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(short = 'u', long)]
        started_by: Option<String>,

        #[arg(long)]
        from: Option<DateTime<Utc>>,

        #[arg(long)]
        to: Option<DateTime<Utc>>,

        #[arg(short, long)]
        limit: Option<usize>,

        /// Wait for a recompute instead of serving a stale snapshot
        #[arg(short, long)]
        fresh: bool,
    },

    /// Recompute views
    Recompute {
        #[arg(short, long, value_enum, default_value = "incremental")]
        scope: Scope,

        /// Lower bound of an incremental delta (defaults to one hour ago)
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Restrict to these views
        #[arg(short, long)]
        view: Vec<String>,

        /// Return without waiting for the passes
        #[arg(long)]
        no_wait: bool,
    },

    /// Create or update a report definition
    Report {
        #[arg(short, long)]
        name: String,

        #[arg(short = 't', long)]
        report_type: String,

        #[arg(short, long)]
        category: String,

        #[arg(short, long)]
        provider: String,

        #[arg(long)]
        id: Option<String>,
    },

    /// Record the start of an execution
    Start {
        #[arg(value_name = "REPORT_ID")]
        report_id: String,

        #[arg(short = 'u', long)]
        started_by: String,
    },

    /// Record the end of an execution
    Complete {
        #[arg(value_name = "EXECUTION_ID")]
        id: String,

        #[arg(short, long, default_value = "success")]
        status: String,

        #[arg(short, long, default_value = "0")]
        records: u64,

        #[arg(short, long)]
        error_message: Option<String>,
    },

    /// Records processed by a report in a time range
    Volume {
        #[arg(value_name = "REPORT_ID")]
        report_id: String,

        #[arg(long)]
        from: Option<DateTime<Utc>>,

        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },

    /// Check server health
    Health,
}

async fn print_response(request: RequestBuilder) -> anyhow::Result<()> {
    let response = request.send().await.context("request failed")?;
    let status = response.status();
    let body: Value = response.json().await.context("response was not JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if status.is_client_error() || status.is_server_error() {
        bail!("server answered {}", status);
    }
    Ok(())
}

fn push_param(params: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<String>) {
    if let Some(value) = value {
        params.push((key, value));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();

    let request = match cli.command {
        Commands::Views => client.get(format!("{}/v1/views", cli.endpoint)),

        Commands::View {
            name,
            report_id,
            provider,
            category,
            started_by,
            from,
            to,
            limit,
            fresh,
        } => {
            let mut params = Vec::new();
            push_param(&mut params, "report_id", report_id);
            push_param(&mut params, "provider", provider);
            push_param(&mut params, "category", category);
            push_param(&mut params, "started_by", started_by);
            push_param(&mut params, "from", from.map(|t| t.to_rfc3339()));
            push_param(&mut params, "to", to.map(|t| t.to_rfc3339()));
            push_param(&mut params, "limit", limit.map(|l| l.to_string()));
            if fresh {
                params.push(("fresh", "true".to_string()));
            }

            client
                .get(format!("{}/v1/views/{}", cli.endpoint, name))
                .query(&params)
        }

        Commands::Recompute {
            scope,
            since,
            view,
            no_wait,
        } => {
            let mut body = match scope {
                Scope::Full => json!({ "scope": "full" }),
                Scope::Incremental => json!({
                    "scope": "incremental",
                    "since": since.unwrap_or_else(|| Utc::now() - chrono::Duration::hours(1)),
                }),
            };
            if !view.is_empty() {
                body["views"] = json!(view);
            }
            body["wait"] = json!(!no_wait);

            client
                .post(format!("{}/v1/views/recompute", cli.endpoint))
                .json(&body)
        }

        Commands::Report {
            name,
            report_type,
            category,
            provider,
            id,
        } => client.post(format!("{}/v1/reports", cli.endpoint)).json(&json!({
            "id": id,
            "name": name,
            "report_type": report_type,
            "category": category,
            "provider": provider,
        })),

        Commands::Start {
            report_id,
            started_by,
        } => client
            .post(format!("{}/v1/executions", cli.endpoint))
            .json(&json!({
                "report_id": report_id,
                "started_by": started_by,
            })),

        Commands::Complete {
            id,
            status,
            records,
            error_message,
        } => client
            .post(format!("{}/v1/executions/{}/complete", cli.endpoint, id))
            .json(&json!({
                "status": status,
                "records_processed": records,
                "error_message": error_message,
            })),

        Commands::Volume {
            report_id,
            from,
            to,
        } => {
            let mut params = Vec::new();
            push_param(&mut params, "from", from.map(|t| t.to_rfc3339()));
            push_param(&mut params, "to", to.map(|t| t.to_rfc3339()));
            client
                .get(format!("{}/v1/reports/{}/volume", cli.endpoint, report_id))
                .query(&params)
        }

        Commands::Health => client.get(format!("{}/health", cli.endpoint)),
    };

    print_response(request).await
}
