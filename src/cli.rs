use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::applet::AppletLauncher;
use crate::config::Config;
use crate::interpreter::{ExecutionContext, Interpreter, ProgramOutcome, ProgramResult, Value};
use crate::parser;
use crate::registry::{CommandRegistry, PipeRegistry};
use crate::stdlib;

#[derive(Parser)]
#[command(name = "tempo")]
#[command(about = "Tempo - run automation scripts with human checkpoints", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a script with the standard library loaded
    Run {
        /// Script file
        file: PathBuf,

        /// Initial data as key=value; the value is parsed as JSON, falling back to a string
        #[arg(short = 'd', long = "data", value_parser = parse_data_arg)]
        data: Vec<(String, Value)>,

        /// Run without an applet launcher (human checkpoints fail)
        #[arg(long)]
        no_applets: bool,

        /// Step budget for the run (overrides config)
        #[arg(long)]
        max_steps: Option<usize>,
    },

    /// Parse a script without running it
    Check {
        /// Script file
        file: PathBuf,

        /// Print the parsed program as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Run the CLI by parsing process arguments. Returns the process exit code.
pub async fn run_cli() -> Result<i32> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<i32> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<i32> {
    dotenvy::dotenv().ok();

    let max_steps = match &cli.command {
        Commands::Run { max_steps, .. } => *max_steps,
        Commands::Check { .. } => None,
    };
    let config = Config::builder()
        .config_path(cli.config.clone())
        .max_steps(max_steps)
        .build()
        .context("Failed to load configuration")?;

    init_tracing(&config.logging.filter);

    match cli.command {
        Commands::Run {
            file,
            data,
            no_applets,
            ..
        } => run_script(&config, &file, data, no_applets).await,
        Commands::Check { file, json } => check_script(&file, json),
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // Embedders may already have installed a subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/* ===================== Commands ===================== */

async fn run_script(
    config: &Config,
    file: &Path,
    data: Vec<(String, Value)>,
    no_applets: bool,
) -> Result<i32> {
    let source = read_source(file)?;
    let program = parser::parse_program(&source)
        .with_context(|| format!("Failed to parse {}", file.display()))?;
    let interpreter = build_interpreter(config).await?;

    let mut ctx = ExecutionContext::new()
        .with_env(process_env())
        .with_data(data.into_iter().collect::<IndexMap<_, _>>());
    let launcher = (!no_applets).then(|| Arc::new(AppletLauncher::from_config(&config.applet)));
    if let Some(launcher) = &launcher {
        ctx = ctx.with_applet_launcher(Arc::clone(launcher));
    }

    info!(
        file = %file.display(),
        version = %hash_source(&source),
        statements = program.len(),
        "Running script"
    );
    let result = interpreter.execute_program(&program, ctx).await;

    if let Some(launcher) = &launcher {
        launcher.terminate_all().await;
    }

    print_result(&result);
    Ok(result.exit_code())
}

fn check_script(file: &Path, json: bool) -> Result<i32> {
    let source = read_source(file)?;
    let program = parser::parse_program(&source)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    println!("{}: {} statements", file.display(), program.len());
    println!("Version: {}", hash_source(&source));
    if json {
        println!("{}", serde_json::to_string_pretty(&program)?);
    }
    Ok(0)
}

/// Interpreter with the standard command and pipe bundles loaded
pub async fn build_interpreter(config: &Config) -> Result<Interpreter> {
    let mut commands = CommandRegistry::new();
    commands.add_bundle(stdlib::command_bundle());
    commands
        .reload()
        .await
        .context("Failed to load command registry")?;

    let mut pipes = PipeRegistry::new();
    pipes.add_bundle(stdlib::pipe_bundle());
    pipes.reload().await.context("Failed to load pipe registry")?;

    Ok(Interpreter::new(Arc::new(commands), Arc::new(pipes))
        .with_options(config.interpreter.options()))
}

fn print_result(result: &ProgramResult) {
    for line in &result.context.user_logs {
        println!("{}", line);
    }
    if !result.context.user_logs.is_empty() {
        println!();
    }

    match &result.outcome {
        ProgramOutcome::Completed => println!("Completed"),
        ProgramOutcome::Exited(code) => println!("Exited with code {}", code),
        ProgramOutcome::Returned(value) => println!("Returned: {}", value.to_json()),
        ProgramOutcome::Failed(error) => eprintln!("Failed: {}", error),
    }

    let batch = &result.batch;
    println!(
        "Instructions: {} ({} succeeded, {} failed)",
        batch.total, batch.succeeded, batch.failed
    );
    if batch.cost > 0.0 {
        println!("Cost: {}", batch.cost);
    }
    println!("Duration: {}ms", batch.duration_ms);
}

/* ===================== Helpers ===================== */

/// Hash script source using SHA256
pub fn hash_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn read_source(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

/// Non-unicode variables are skipped
fn process_env() -> BTreeMap<String, String> {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

fn parse_data_arg(arg: &str) -> Result<(String, Value), String> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", arg))?;
    if key.is_empty() {
        return Err(format!("missing key in '{}'", arg));
    }
    let value = serde_json::from_str::<serde_json::Value>(raw)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(raw));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_source() {
        assert_eq!(
            hash_source(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(hash_source("@utils/log message=1"), hash_source("@utils/log message=2"));
    }

    #[test]
    fn test_parse_data_arg() {
        assert_eq!(parse_data_arg("n=3"), Ok(("n".to_string(), Value::Num(3.0))));
        assert_eq!(
            parse_data_arg("name=emma"),
            Ok(("name".to_string(), Value::from("emma")))
        );
        assert_eq!(
            parse_data_arg(r#"tags=["a","b"]"#),
            Ok((
                "tags".to_string(),
                Value::from(vec![Value::from("a"), Value::from("b")])
            ))
        );
        assert!(parse_data_arg("novalue").is_err());
        assert!(parse_data_arg("=1").is_err());
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "tempo",
            "run",
            "deploy.tempo",
            "--data",
            "env=\"prod\"",
            "-d",
            "retries=2",
            "--no-applets",
            "--max-steps",
            "500",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                file,
                data,
                no_applets,
                max_steps,
            } => {
                assert_eq!(file, PathBuf::from("deploy.tempo"));
                assert_eq!(
                    data,
                    vec![
                        ("env".to_string(), Value::from("prod")),
                        ("retries".to_string(), Value::Num(2.0)),
                    ]
                );
                assert!(no_applets);
                assert_eq!(max_steps, Some(500));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_check_arguments_with_global_config() {
        let cli = Cli::try_parse_from(["tempo", "check", "a.tempo", "--json", "--config", "t.toml"])
            .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("t.toml")));
        assert!(matches!(cli.command, Commands::Check { json: true, .. }));
    }

    #[tokio::test]
    async fn test_build_interpreter_loads_stdlib() {
        let config = Config::default();
        let interpreter = build_interpreter(&config).await.unwrap();

        assert!(interpreter.commands().resolve("@utils/set").is_some());
        assert!(interpreter.pipes().resolve("upper").is_some());
        assert_eq!(interpreter.options().max_steps, config.interpreter.max_steps);
    }
}
