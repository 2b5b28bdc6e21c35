// src/main.rs
// Prism Engine CLI entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use prism_engine::config::PrismConfig;
use prism_engine::llm::{
    ChunkStrategy, GenerateRequest, InferenceService, ModelHint, ProcessingMode, Response,
};

// === CLI Definition ===

#[derive(Parser)]
#[command(name = "prism")]
#[command(about = "Multi-provider LLM orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// One-shot generation through the delegator
    Generate {
        /// The prompt text
        prompt: String,
        /// Strategy: simple, cot, reflection, or moa
        #[arg(short, long, default_value = "simple")]
        strategy: String,
        /// JSON schema; switches to structured output
        #[arg(long)]
        schema: Option<String>,
        /// Request deadline in seconds (defaults to the configured deadline)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Chunk a large input (file or stdin) and process it
    Process {
        /// Input file; reads stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Directive applied to every chunk
        #[arg(short, long, default_value = "Process this section.")]
        instruction: String,
        /// parallel or sequential
        #[arg(long)]
        mode: Option<String>,
        /// paragraph, sentence, or token
        #[arg(long)]
        strategy: Option<String>,
        #[arg(long)]
        max_chunk_size: Option<usize>,
        #[arg(long)]
        overlap: Option<usize>,
    },
    /// List the models available to each pool
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = PrismConfig::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let service = InferenceService::new(config);

    match cli.command {
        Commands::Generate {
            prompt,
            strategy,
            schema,
            timeout_secs,
        } => {
            service.start().await?;

            let mut req = GenerateRequest::new(prompt);
            if let Some(secs) = timeout_secs {
                req = req.with_timeout(Duration::from_secs(secs));
            }

            let response = if let Some(schema_text) = schema {
                let schema: serde_json::Value =
                    serde_json::from_str(&schema_text).context("schema is not valid JSON")?;
                service.structured(req, schema).await?
            } else {
                match strategy.as_str() {
                    "simple" => service.simple(req).await?,
                    "cot" => service.chain_of_thought(req).await?,
                    "reflection" => service.reflection(req).await?,
                    "moa" => service.moa_direct(req).await?,
                    other => anyhow::bail!("unknown strategy '{other}' (simple|cot|reflection|moa)"),
                }
            };

            print_response(&response);
            service.stop().await;
        }

        Commands::Process {
            file,
            instruction,
            mode,
            strategy,
            max_chunk_size,
            overlap,
        } => {
            service.start().await?;

            let text = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("failed to read stdin")?;
                    buf
                }
            };

            let mode = mode.as_deref().map(str::parse::<ProcessingMode>).transpose()?;
            let strategy = strategy
                .as_deref()
                .map(str::parse::<ChunkStrategy>)
                .transpose()?;

            let req = GenerateRequest::new(text)
                .with_instruction(instruction)
                .with_model(ModelHint::Auto);
            let response = service
                .process_large(req, mode, strategy, max_chunk_size, overlap)
                .await?;

            print_response(&response);
            service.stop().await;
        }

        Commands::Models => {
            println!("primary ({}):", service.config().proxy_provider);
            for model in service.list_primary_models() {
                println!("  {model}");
            }
            println!("fallback ({}):", service.config().base_provider);
            for model in service.list_fallback_models() {
                println!("  {model}");
            }
        }
    }

    Ok(())
}

fn print_response(response: &Response) {
    println!("{}", response.text);
    eprintln!("route: {}", response.route);
    if let Some(err) = &response.error {
        eprintln!("partial result, worst error ({}): {}", err.kind(), err);
    }
}
