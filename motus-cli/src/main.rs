//! motus-cli — operational frontend for the Motus conversation server
//!
//! # Subcommands
//! - `status`                       — show server health
//! - `version`                      — show server version info
//! - `send --from <user> <text>`    — inject a message through the webhook,
//!                                    as if WhatsApp had delivered it

use clap::{Parser, Subcommand};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "motus-cli",
    version,
    about = "Motus conversation server — operational CLI"
)]
struct Cli {
    /// Motus HTTP server URL (overrides MOTUS_HTTP_URL env var)
    #[arg(long, env = "MOTUS_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show Motus server status
    Status,

    /// Show Motus server version info
    Version,

    /// Send a message through the webhook as a given user
    Send {
        /// Sender identifier (WhatsApp number)
        #[arg(long)]
        from: String,

        /// Message text
        text: String,
    },
}

// ============================================================================
// Webhook envelope
// ============================================================================

/// Build the same notification envelope WhatsApp posts, so a locally
/// injected message walks the full pipeline.
pub fn webhook_envelope(from: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "motus-cli",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "messages": [{
                        "from": from,
                        "id": "wamid.motus-cli",
                        "type": "text",
                        "text": {"body": text}
                    }]
                }
            }]
        }]
    })
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    let resp = client.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Motus server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:      {}", body["version"].as_str().unwrap_or("?"));
            println!("PostgreSQL:   {}", body["postgresql"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("motus-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("motus-cli: cannot reach {} — {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Show server version info by calling GET /version.
fn do_version(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/version", server);
    let resp = client.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Service: {}", body["service"].as_str().unwrap_or("?"));
            println!("Version: {}", body["version"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            eprintln!("motus-cli: server returned HTTP {}", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("motus-cli: cannot reach {} — {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Inject a message through POST /webhook.
fn do_send(server: &str, from: &str, text: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()?;

    let url = format!("{}/webhook", server);
    let envelope = webhook_envelope(from, text);

    let resp = match client.post(&url).json(&envelope).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("motus-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("motus-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    let body: serde_json::Value = resp.json().unwrap_or_default();
    let processed = body["processed"].as_u64().unwrap_or(0);
    let failed = body["failed"].as_u64().unwrap_or(0);

    println!("Accepted: {} processed, {} failed", processed, failed);
    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status => do_status(&cli.server),
        Commands::Version => do_version(&cli.server),
        Commands::Send { from, text } => do_send(&cli.server, &from, &text),
    }
}
