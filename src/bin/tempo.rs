/// Tempo CLI
///
/// Runs and checks automation scripts against the standard library.
use tempo_core::cli;

#[tokio::main]
async fn main() {
    match cli::run_cli().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
