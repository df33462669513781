use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hub::{HubClient, PushTarget, RemoteSink, DEFAULT_HUB_ENDPOINT};
use store::{encode_dataset_parquet, save_captions_csv, save_dataset_parquet, AnnotationStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Caption dataset exports and hub pushes without the web UI.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "./data/dataset")]
    dataset: String,
    #[arg(long, default_value = "train")]
    split: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Summary,
    ExportCsv {
        #[arg(long)]
        output_dir: String,
    },
    ExportParquet {
        #[arg(long)]
        output_dir: String,
    },
    /// Reads the write token from `HF_TOKEN`.
    Push {
        #[arg(long)]
        username: String,
        #[arg(long)]
        repo_name: String,
        #[arg(long, default_value = DEFAULT_HUB_ENDPOINT)]
        endpoint: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let source = dataset::open(&cli.dataset, &cli.split)?;
    info!(dataset = %cli.dataset, source = %source.describe(), "loading dataset");
    let store = AnnotationStore::load(source.examples()?)?;

    match cli.command {
        Command::Summary => {
            print!("{}", summary_report(&source.describe(), store.len()));
        }
        Command::ExportCsv { output_dir } => {
            let path = save_captions_csv(&store, &output_dir)?;
            println!("wrote {} rows to {}", store.len(), path.display());
        }
        Command::ExportParquet { output_dir } => {
            let path = save_dataset_parquet(&store, &output_dir)?;
            println!("wrote {} rows to {}", store.len(), path.display());
        }
        Command::Push {
            username,
            repo_name,
            endpoint,
        } => {
            let token = std::env::var("HF_TOKEN").context("HF_TOKEN is not set")?;
            if store.is_empty() {
                bail!("dataset contains no records");
            }
            let target = PushTarget::new(&username, &repo_name, &token)?;
            let client = HubClient::new(&endpoint)?;
            let shard = encode_dataset_parquet(&store)?;
            let receipt = client.push_dataset(&target, shard).await?;
            match receipt.commit_url {
                Some(url) => println!("pushed {} ({url})", receipt.repo_id),
                None => println!("pushed {}", receipt.repo_id),
            }
        }
    }

    Ok(())
}

/// A freshly loaded dataset has no edits, so only its shape is reported.
fn summary_report(source: &str, records: usize) -> String {
    format!("source: {source}\nrecords: {records}\n")
}
