use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use proxy_grader::{
    proxy::{CheckerConfig, Mode, ProxyParser},
    ClientId, Engine, EngineConfig, JobOutcome, ProgressNotifier, ProgressSnapshot, SessionStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Bulk proxy checker with residential quality scoring
#[derive(Parser)]
#[command(name = "proxy-grader")]
#[command(about = "Bulk proxy checker with residential quality scoring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse proxies from a file
    Parse {
        /// Input file containing proxies
        input: PathBuf,
        /// Output file for parsed proxies
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check proxies and write the reports
    Check {
        /// Input file containing proxies
        input: PathBuf,
        /// Checking mode (fast, residential)
        #[arg(short, long, default_value = "fast")]
        mode: String,
        /// Output file for the clean list
        #[arg(long)]
        clean: Option<PathBuf>,
        /// Output file for the annotated list
        #[arg(long)]
        detailed: Option<PathBuf>,
        /// Timeout in seconds, defaults to the mode preset
        #[arg(long)]
        timeout: Option<u64>,
        /// Concurrent probes per chunk, defaults to the mode preset
        #[arg(short = 'n', long)]
        concurrency: Option<usize>,
        /// Proxies per chunk, defaults to the mode preset
        #[arg(long)]
        chunk_size: Option<usize>,
        /// URL to test proxies against
        #[arg(long)]
        test_url: Option<String>,
        /// Client the session is registered for
        #[arg(long, default_value = "cli")]
        client: String,
    },
}

/// Prints progress lines to stdout
struct ConsoleNotifier;

#[async_trait]
impl ProgressNotifier for ConsoleNotifier {
    async fn notify(&self, _client: &ClientId, snapshot: ProgressSnapshot) -> Result<()> {
        println!("Progress: {}", snapshot);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Parse { input, output } => {
            let proxies = ProxyParser::parse_file(&input)?;

            println!("Parsed {} proxies from {:?}", proxies.len(), input);

            if let Some(output_path) = output {
                ProxyParser::save_to_file(&proxies, &output_path)?;
                println!("Saved parsed proxies to {:?}", output_path);
            } else {
                for proxy in &proxies {
                    println!("{}", proxy);
                }
            }
        }
        Commands::Check {
            input,
            mode,
            clean,
            detailed,
            timeout,
            concurrency,
            chunk_size,
            test_url,
            client,
        } => {
            let mode: Mode = mode.parse()?;
            let mut config = CheckerConfig::for_mode(mode);
            if let Some(timeout) = timeout {
                config = config.with_timeout(Duration::from_secs(timeout));
            }
            if let Some(concurrency) = concurrency {
                config = config.with_concurrency(concurrency);
            }
            if let Some(chunk_size) = chunk_size {
                config = config.with_chunk_size(chunk_size);
            }
            if let Some(test_url) = test_url {
                config = config.with_test_url(test_url);
            }

            let content = ProxyParser::decode_lossy(&std::fs::read(&input)?);
            let engine = Arc::new(Engine::new(Arc::new(SessionStore::new()), EngineConfig::default()));
            let client = ClientId::new(client);
            let job = engine.submit(client.clone(), config.clone(), &content, Arc::new(ConsoleNotifier))?;

            println!("Loaded {} proxies from {:?}", job.session().addresses().len(), input);
            println!(
                "Checking in {} mode: {} concurrent, timeout {}s, chunks of {}",
                mode,
                config.concurrency,
                config.timeout.as_secs(),
                config.chunk_size
            );
            println!("Test URL: {}", config.test_url);
            println!();

            let ctrl_c_engine = Arc::clone(&engine);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    println!("Stopping after the current chunk...");
                    ctrl_c_engine.cancel(&client);
                }
            });

            match engine.run(job).await {
                JobOutcome::Completed(report) => {
                    println!("{}", report.summary);

                    if let Some(path) = clean {
                        std::fs::write(&path, &report.clean_report)?;
                        println!("\nSaved clean list to {:?}", path);
                    }
                    if let Some(path) = detailed {
                        std::fs::write(&path, &report.detailed_report)?;
                        println!("Saved detailed list to {:?}", path);
                    }
                }
                JobOutcome::Cancelled(snapshot) => {
                    println!("Checking cancelled at {}", snapshot);
                }
                JobOutcome::Failed(message) => {
                    return Err(anyhow!("Checking failed: {}", message));
                }
            }
        }
    }

    Ok(())
}
