use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use aria_relay::Config;
use aria_relay::api::{ApiServer, build_providers};
use aria_relay::history::ConversationHistory;

/// Aria - streaming voice assistant relay
#[derive(Parser)]
#[command(name = "aria", version, about)]
struct Cli {
    /// Path to a config file (defaults to the user config dir)
    #[arg(short, long, env = "ARIA_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Directory of static files for the browser client (overrides config)
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Stream one completion through the configured language model
    TestLlm {
        /// Prompt to send
        #[arg(default_value = "Say hello in one short sentence.")]
        prompt: String,
    },
    /// Synthesize a phrase and write the audio to a file
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
        /// Output file for the synthesized audio
        #[arg(short, long, default_value = "tts-test.mp3")]
        output: PathBuf,
    },
    /// Print the config file path
    ConfigPath,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,aria_relay=info",
        1 => "info,aria_relay=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_ref = cli.config.as_deref();

    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestLlm { prompt } => test_llm(config_ref, &prompt).await,
            Command::TestTts { text, output } => test_tts(config_ref, &text, &output).await,
            Command::ConfigPath => cmd_config_path(),
        };
    }

    let mut config = Config::load(config_ref)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(dir) = cli.static_dir {
        config.server.static_dir = Some(dir);
    }
    tracing::debug!(?config, "loaded configuration");

    tracing::info!(
        persona = %config.persona.name,
        port = config.server.port,
        "starting aria relay"
    );

    let providers = build_providers(&config)?;
    let server = ApiServer::new(config, providers);

    // Run until interrupted
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    Ok(())
}

/// Stream one completion through the configured language model
async fn test_llm(config_path: Option<&Path>, prompt: &str) -> anyhow::Result<()> {
    println!("Prompt: \"{prompt}\"\n");

    let config = Config::load(config_path)?;
    let history = ConversationHistory::with_system(&config.persona.system_prompt);
    let providers = build_providers(&config)?;

    let mut stream = providers
        .llm
        .stream_completion(&history.snapshot(), prompt)
        .await?;

    while let Some(token) = stream.next().await {
        print!("{}", token?);
        std::io::stdout().flush()?;
    }
    println!();

    Ok(())
}

/// Synthesize a phrase and write the audio to a file
async fn test_tts(config_path: Option<&Path>, text: &str, output: &Path) -> anyhow::Result<()> {
    println!("Synthesizing: \"{text}\"\n");

    let config = Config::load(config_path)?;
    let providers = build_providers(&config)?;

    let units = futures::stream::iter(vec![text.to_string()]);
    let mut audio = providers.tts.stream_synthesis(Box::pin(units)).await?;

    let mut bytes = Vec::new();
    while let Some(chunk) = audio.next().await {
        bytes.extend_from_slice(&chunk?);
    }

    std::fs::write(output, &bytes)?;
    println!("Wrote {} bytes to {}", bytes.len(), output.display());

    Ok(())
}

/// Print the config file path
fn cmd_config_path() -> anyhow::Result<()> {
    match aria_relay::config::file::config_file_path() {
        Some(path) => println!("{}", path.display()),
        None => println!("no config directory available"),
    }
    Ok(())
}
