//! # shapegen CLI
//!
//! Runs the shape loop against a local Ollama server: sample a shape, ask the
//! model for matplotlib code, render it, ask the model whether the picture
//! matches, repeat until Ctrl-C.
//!
//! Usage:
//!   shapegen
//!   shapegen --model llava --attach-image
//!   shapegen --max-iterations 10 --delay-secs 0 --save-dir renders
//!
//! Generated code runs unsandboxed with your user's privileges.

use clap::Parser;
use shapegen_agent::{Generator, GeneratorConfig};
use shapegen_core::{
    ExecutorConfig, ImageDelivery, LlmProvider, OllamaProvider, ProviderConfig, PythonRunner,
};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "shapegen")]
#[command(author, version, about = "Ask a local model to draw shapes, then ask it to check them")]
struct Cli {
    /// Ollama server address
    #[arg(long, env = "OLLAMA_HOST", default_value = "http://localhost:11434")]
    host: String,

    /// Model used for both code generation and verification
    #[arg(short, long, env = "SHAPEGEN_MODEL", default_value = "llama2")]
    model: String,

    /// Python interpreter with matplotlib and numpy
    #[arg(long, env = "SHAPEGEN_PYTHON", default_value = "python3")]
    python: String,

    /// Seconds to wait between iterations
    #[arg(long, default_value = "5")]
    delay_secs: u64,

    /// Kill generated code after this many seconds (0 = never)
    #[arg(long, default_value = "60")]
    exec_timeout_secs: u64,

    /// Extra HTTP header sent with every Ollama request (repeatable)
    #[arg(long = "header", value_name = "KEY=VALUE", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Give up on a model request after this many seconds (default: wait forever)
    #[arg(long)]
    request_timeout_secs: Option<u64>,

    /// Stop after this many iterations (default: run until interrupted)
    #[arg(long)]
    max_iterations: Option<u64>,

    /// Seed the shape sampler for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Send the image in the message's images field instead of inline text
    #[arg(long)]
    attach_image: bool,

    /// Also write every rendered PNG into this directory
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Check the model is installed before starting the loop
    #[arg(long)]
    preflight: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn provider_config(&self) -> ProviderConfig {
        let mut config = ProviderConfig::ollama()
            .with_base_url(normalize_host(&self.host))
            .with_model(&self.model);
        if let Some(secs) = self.request_timeout_secs {
            config = config.with_timeout(secs);
        }
        for (key, value) in &self.headers {
            config = config.with_header(key, value);
        }
        config
    }

    fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            python: self.python.clone(),
            timeout_secs: (self.exec_timeout_secs > 0).then_some(self.exec_timeout_secs),
        }
    }

    fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            delay: Duration::from_secs(self.delay_secs),
            max_iterations: self.max_iterations,
            seed: self.seed,
            image_delivery: if self.attach_image {
                ImageDelivery::Attached
            } else {
                ImageDelivery::Inline
            },
            save_dir: self.save_dir.clone(),
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty header name in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// `OLLAMA_HOST` is often set without a scheme (`127.0.0.1:11434`).
fn normalize_host(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "shapegen_core=debug,shapegen_agent=debug,shapegen=debug"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Resolves on Ctrl-C. If the handler cannot be installed the loop just
/// runs without an interrupt path.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Check the model is installed. `Some` carries the exit code when the run
/// must stop here, either because the check failed or the user interrupted it.
async fn preflight<F>(provider: &OllamaProvider, shutdown: Pin<&mut F>) -> Option<ExitCode>
where
    F: Future<Output = ()>,
{
    let checked = tokio::select! {
        biased;
        _ = shutdown => {
            println!("\nProgram terminated by user.");
            return Some(ExitCode::SUCCESS);
        }
        checked = provider.ensure_model() => checked,
    };

    let e = checked.err()?;
    eprintln!("Preflight failed: {}", e);
    if e.is_model_not_found() {
        eprintln!(
            "Please run 'ollama pull {}' to install it.",
            provider.default_model()
        );
    }
    Some(ExitCode::FAILURE)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let provider = match OllamaProvider::new(cli.provider_config()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };
    tracing::info!(
        provider = provider.name(),
        host = %cli.host,
        model = provider.default_model(),
        "starting shapegen"
    );

    let shutdown = interrupted();
    tokio::pin!(shutdown);

    if cli.preflight {
        if let Some(code) = preflight(&provider, shutdown.as_mut()).await {
            return code;
        }
    }

    let runner = PythonRunner::new(cli.executor_config());
    let mut generator = Generator::new(provider, runner, cli.generator_config());

    match generator.run(shutdown).await {
        Ok(stats) => {
            println!("{}", stats.summary());
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "stopping");
            println!("{}", generator.stats().summary());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["shapegen"]).unwrap();
        let generator = cli.generator_config();
        assert_eq!(generator.delay, Duration::from_secs(5));
        assert_eq!(generator.max_iterations, None);
        assert_eq!(generator.image_delivery, ImageDelivery::Inline);

        let executor = cli.executor_config();
        assert_eq!(executor.timeout_secs, Some(60));

        let provider = cli.provider_config();
        assert_eq!(provider.timeout_secs, None);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "shapegen",
            "--host",
            "gpu-box:11434",
            "--model",
            "llava",
            "--exec-timeout-secs",
            "0",
            "--max-iterations",
            "3",
            "--attach-image",
            "--seed",
            "9",
            "--header",
            "Authorization=Bearer abc",
            "--header",
            "x-trace=1",
        ])
        .unwrap();

        let provider = cli.provider_config();
        assert_eq!(provider.base_url, "http://gpu-box:11434");
        assert_eq!(provider.default_model, "llava");
        assert_eq!(provider.headers.len(), 2);
        assert_eq!(provider.headers["Authorization"], "Bearer abc");
        assert_eq!(provider.headers["x-trace"], "1");
        assert_eq!(cli.executor_config().timeout_secs, None);

        let generator = cli.generator_config();
        assert_eq!(generator.max_iterations, Some(3));
        assert_eq!(generator.seed, Some(9));
        assert_eq!(generator.image_delivery, ImageDelivery::Attached);
    }

    #[test]
    fn test_header_parsing() {
        assert_eq!(parse_header("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
        assert!(parse_header("no-separator").is_err());
        assert!(parse_header("=value").is_err());
        assert!(Cli::try_parse_from(["shapegen", "--header", "bogus"]).is_err());
    }

    #[tokio::test]
    async fn test_interrupt_during_preflight() {
        let provider = OllamaProvider::new(ProviderConfig::ollama()).unwrap();
        let shutdown = async {};
        tokio::pin!(shutdown);

        let code = preflight(&provider, shutdown.as_mut()).await;
        assert_eq!(code, Some(ExitCode::SUCCESS));
    }

    #[tokio::test]
    async fn test_preflight_failure_stops_run() {
        let provider = OllamaProvider::new(
            ProviderConfig::ollama().with_base_url("http://127.0.0.1:9"),
        )
        .unwrap();
        let shutdown = std::future::pending::<()>();
        tokio::pin!(shutdown);

        let code = preflight(&provider, shutdown.as_mut()).await;
        assert_eq!(code, Some(ExitCode::FAILURE));
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("http://localhost:11434"), "http://localhost:11434");
        assert_eq!(normalize_host("127.0.0.1:11434"), "http://127.0.0.1:11434");
    }
}
