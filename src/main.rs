use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kb_ingest::{
    api,
    config::{Config, JobConfig, JobRequest},
    logging,
    pipeline::{Orchestrator, PipelineContext},
};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "kb-ingest", version, about = "Document extraction and vector indexing pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the job API over HTTP.
    Serve,
    /// Run one job in the foreground and print its summary as JSON.
    Run(RunArgs),
}

/// Job settings; anything omitted falls back to the environment, then to defaults.
#[derive(Args, Debug)]
struct RunArgs {
    /// create, delete, update, or extract_only.
    #[arg(long)]
    operation: Option<String>,
    /// Source bucket.
    #[arg(long)]
    bucket: Option<String>,
    /// Key prefix to enumerate under.
    #[arg(long)]
    prefix: Option<String>,
    /// Objects per partition window.
    #[arg(long)]
    partition_size: Option<usize>,
    /// Zero-based partition window index.
    #[arg(long)]
    partition_index: Option<usize>,
    /// qd, qq, or intention.
    #[arg(long)]
    index_type: Option<String>,
    /// Target collection.
    #[arg(long)]
    collection: Option<String>,
    /// Bucket receiving persisted extraction output.
    #[arg(long)]
    result_bucket: Option<String>,
    /// Language hint forwarded to extractors.
    #[arg(long)]
    language: Option<String>,
}

impl From<RunArgs> for JobRequest {
    fn from(args: RunArgs) -> Self {
        Self {
            s3_bucket: args.bucket,
            s3_prefix: args.prefix,
            operation_type: args.operation,
            batch_file_number: args.partition_size.map(|value| value.to_string()),
            batch_indice: args.partition_index.map(|value| value.to_string()),
            document_language: args.language,
            index_type: args.index_type,
            index_id: args.collection,
            res_bucket: args.result_bucket,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&logging::LogSettings::from_env())
        .context("Failed to initialise logging")?;
    let config = Config::load().context("Failed to load configuration")?;
    let context = Arc::new(PipelineContext::from_config(&config));

    match cli.command {
        Command::Serve => {
            let app = api::create_router(api::ApiState::new(context));
            let (listener, port) = bind_listener(config.server_port)
                .await
                .context("Failed to bind listener")?;
            tracing::info!("Listening on http://0.0.0.0:{}", port);
            axum::serve(listener, app).await.context("Server error")?;
        }
        Command::Run(args) => {
            let job = JobConfig::resolve_from_env(&args.into())
                .context("Invalid job configuration")?;
            let summary = Orchestrator::new(context)
                .run(&job)
                .await
                .context("Run aborted")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

async fn bind_listener(server_port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
