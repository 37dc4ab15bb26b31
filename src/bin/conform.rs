//! Conform CLI
//!
//! Compiles schema files and validates JSON values against them.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use conform::{compile_labeled, CheckConfig, CheckStrategy, ConformFileConfig, SchemaNode, SeverityPolicy};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conform")]
#[command(about = "Compile type schemas and validate JSON values")]
struct Cli {
    /// Use the linear checking strategy instead of first-item sampling
    #[arg(long)]
    linear: bool,

    /// Widen float requirements to accept ints
    #[arg(long)]
    numeric_tower: bool,

    /// Log violations as warnings instead of failing
    #[arg(long)]
    warn: bool,

    /// Log the compiled check program
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a schema and validate JSON value files against it
    Check {
        /// Schema file (JSON)
        schema: PathBuf,
        /// Value files to validate
        values: Vec<PathBuf>,
    },

    /// Print the compiled check program for a schema
    Render {
        /// Schema file (JSON)
        schema: PathBuf,
    },

    /// Show memoization cache statistics
    CacheStats,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let file_config = ConformFileConfig::load().unwrap_or_default();
    let mut check = file_config.check_config();
    if cli.linear {
        check.strategy = CheckStrategy::Linear;
    }
    if cli.numeric_tower {
        check.numeric_tower = true;
    }
    if cli.warn {
        check.severity = SeverityPolicy::Warn;
    }
    if cli.debug {
        check.debug = true;
    }
    let config = check.intern();

    match cli.command {
        Commands::Check { schema, values } => {
            let validator = load_and_compile(&schema, &config)?;
            let pending = validator.pending_refs();
            if !pending.is_empty() {
                println!("⏳ pending forward references: {}", pending.join(", "));
            }

            let mut failures = 0;
            for path in &values {
                let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path)?)?;
                match validator.validate(&value) {
                    Ok(()) => println!("✅ {}", path.display()),
                    Err(e) => {
                        println!("❌ {}: {}", path.display(), e);
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{} of {} values did not conform", failures, values.len());
            }
        }

        Commands::Render { schema } => {
            let validator = load_and_compile(&schema, &config)?;
            println!("{}", validator.render());
            for name in validator.pending_refs() {
                println!("  pending ref: {}", name);
            }
        }

        Commands::CacheStats => {
            let stats = conform::cache::stats();
            println!("entries: {}", stats.entries);
            println!("hits:    {}", stats.hits);
            println!("misses:  {}", stats.misses);
        }
    }

    Ok(())
}

fn load_and_compile(
    path: &PathBuf,
    config: &std::sync::Arc<CheckConfig>,
) -> anyhow::Result<conform::Validator> {
    let schema: SchemaNode = serde_json::from_str(&fs::read_to_string(path)?)?;
    let label = path.display().to_string();
    Ok(compile_labeled(&schema, config, &label)?)
}
