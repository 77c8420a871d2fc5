use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tessera_core::facade::{Options, Tessera};
use tessera_core::observability::init_tracing;
use tessera_core::source::remote::RemoteInfo;
use tessera_core::{Event, ModuleListener};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Inspect merged runtime configuration", long_about = None)]
struct Cli {
    /// Configuration file that must exist (repeatable)
    #[arg(long = "file", short = 'f')]
    files: Vec<PathBuf>,

    /// Configuration file loaded only if present (repeatable)
    #[arg(long = "optional-file")]
    optional_files: Vec<PathBuf>,

    /// Merge the process environment
    #[arg(long)]
    env: bool,

    /// Only environment variables with this prefix (implies --env)
    #[arg(long)]
    env_prefix: Option<String>,

    /// YAML file describing a remote config center
    #[arg(long)]
    remote: Option<PathBuf>,

    /// Remote config center kind
    #[arg(long, default_value = "kie")]
    remote_kind: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Print the effective configuration as YAML
    Dump {
        /// Show the winning source of every key instead
        #[arg(long)]
        sources: bool,
    },
    /// Print one key's effective value
    Get {
        key: String,
    },
    /// Print changes as JSON lines until interrupted
    Watch {
        /// Only keys under these module prefixes; everything when empty
        prefixes: Vec<String>,
    },
}

struct PrintListener;

impl ModuleListener for PrintListener {
    fn on_module_event(&self, events: &[Event]) {
        for event in events {
            match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("failed to encode event: {}", e),
            }
        }
    }
}

fn build_options(cli: &Cli) -> Result<Options> {
    let mut options = Options::new();
    for file in &cli.files {
        options = options.with_required_file(file);
    }
    for file in &cli.optional_files {
        options = options.with_optional_file(file);
    }
    if let Some(prefix) = &cli.env_prefix {
        options = options.with_env_prefix(prefix.clone());
    } else if cli.env {
        options = options.with_env_source();
    }
    if let Some(path) = &cli.remote {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading remote settings {}", path.display()))?;
        let info: RemoteInfo = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing remote settings {}", path.display()))?;
        options = options.with_remote_source(cli.remote_kind.clone(), info);
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let tessera = Tessera::init(build_options(&cli)?)
        .await
        .context("initialising configuration")?;

    match &cli.command {
        Commands::Dump { sources } => {
            let stdout = std::io::stdout();
            if *sources {
                serde_yaml::to_writer(stdout.lock(), &tessera.get_configs_with_source_names())?;
            } else {
                tessera.write_to(stdout.lock())?;
            }
        }
        Commands::Get { key } => match tessera.get(key) {
            Some(value) => println!("{}", serde_json::to_string(&value)?),
            None => anyhow::bail!("key not found: {}", key),
        },
        Commands::Watch { prefixes } => {
            let prefixes: Vec<&str> = if prefixes.is_empty() {
                vec![""]
            } else {
                prefixes.iter().map(String::as_str).collect()
            };
            let listener: Arc<dyn ModuleListener> = Arc::new(PrintListener);
            tessera.register_module_listener(listener, &prefixes)?;
            tracing::info!("watching for changes, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
        }
    }

    tessera.clean().await?;
    Ok(())
}
