//! trawl CLI - run and validate crawl manifests
//!
//! Usage:
//!   trawl run <manifest>       Run a crawl and print the aggregated JSON
//!   trawl validate <manifest>  Check a manifest and list diagnostics

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use trawl::{ApiCrawler, CrawlError, FixSuggestion, Manifest};

#[derive(Parser)]
#[command(name = "trawl")]
#[command(version)]
#[command(about = "Declarative, manifest-driven API crawler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a crawl manifest
    Run {
        /// Path to the YAML manifest
        manifest: String,

        /// Pretty-print the aggregated result
        #[arg(short, long)]
        pretty: bool,
    },
    /// Validate a manifest without running it
    Validate {
        /// Path to the YAML manifest
        manifest: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Run { manifest, pretty } => run(&manifest, pretty),
        Commands::Validate { manifest } => validate(&manifest),
    };

    if let Err(e) = outcome {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn run(path: &str, pretty: bool) -> Result<(), CrawlError> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let mut crawler = ApiCrawler::from_path(path)?;

        // Stream records to stdout as they arrive; otherwise print the
        // aggregated value once the crawl completes.
        let stream = crawler.take_stream();
        let printer = stream.map(|mut rx| {
            tokio::spawn(async move {
                while let Some(record) = rx.recv().await {
                    println!("{record}");
                }
            })
        });

        let cancel = CancellationToken::new();
        let ctrlc = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctrlc.cancel();
            }
        });

        let data = crawler.run(cancel).await?;
        if let Some(printer) = printer {
            let _ = printer.await;
        } else if pretty {
            println!(
                "{}",
                serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string())
            );
        } else {
            println!("{data}");
        }
        Ok(())
    })
}

fn validate(path: &str) -> Result<(), CrawlError> {
    let manifest = Manifest::from_path(path)?;
    let diagnostics = trawl::validate_manifest(&manifest);

    if diagnostics.is_empty() {
        println!("{} manifest is valid", "ok:".green().bold());
        return Ok(());
    }
    for diagnostic in &diagnostics {
        println!(
            "{} {}: {}",
            "error:".red().bold(),
            diagnostic.location,
            diagnostic.message
        );
    }
    Err(CrawlError::ValidationFailed { diagnostics })
}
