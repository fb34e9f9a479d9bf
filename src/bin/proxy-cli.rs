use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the buffering proxy", long_about = None)]
struct Cli {
    /// Proxy base URL including the API prefix.
    #[arg(short, long, default_value = "http://localhost:5000/api")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show proxy, upstream and queue status
    Status,
    /// List queued writes awaiting replay
    Queue,
    /// Remove every queued write
    Clear,
    /// Replay queued writes now
    Sync,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/server/status", base)),
        Commands::Queue => client.get(format!("{}/server/queue", base)),
        Commands::Clear => client.post(format!("{}/server/queue/clear", base)),
        Commands::Sync => client.post(format!("{}/server/sync", base)),
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: proxy returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("{}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
