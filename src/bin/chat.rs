use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;

use sitechat::client::ChatClient;
use sitechat::web::models::{ChatMessage, ChatRequest, Role};

#[derive(Parser)]
#[command(name = "chat", about = "Send a prompt to a running chat relay")]
struct Cli {
    /// The prompt to send
    prompt: String,

    /// Base URL of the relay
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "CHAT_SERVER")]
    server: String,

    /// Model to request (server default when omitted)
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    temperature: Option<f64>,

    #[arg(long)]
    max_tokens: Option<u32>,

    /// Wait for the whole answer instead of streaming it
    #[arg(long)]
    no_stream: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("warn"));
    let cli = Cli::parse();

    let client = ChatClient::new(&cli.server);
    let request = ChatRequest {
        messages: vec![ChatMessage::new(Role::User, cli.prompt)],
        model: cli.model,
        temperature: cli.temperature,
        max_tokens: cli.max_tokens,
        stream: !cli.no_stream,
    };

    if cli.no_stream {
        let response = client.send(&request).await.context("chat request failed")?;
        println!("{}", response.message);
        eprintln!(
            "[{}: {} prompt + {} completion tokens]",
            response.model, response.usage.prompt_tokens, response.usage.completion_tokens
        );
        return Ok(());
    }

    let mut deltas = client.stream(&request).await.context("chat request failed")?;
    let stats = deltas.stats();
    let mut stdout = std::io::stdout();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                deltas.abort();
                eprintln!("\n[aborted]");
                return Ok(());
            }
            next = deltas.next() => match next {
                Some(delta) => {
                    write!(stdout, "{}", delta.context("stream interrupted")?)?;
                    stdout.flush()?;
                }
                None => break,
            },
        }
    }
    writeln!(stdout)?;

    if stats.truncated() {
        eprintln!("[warning: response was cut off]");
    }
    if stats.skipped_frames() > 0 {
        eprintln!("[{} malformed frames skipped]", stats.skipped_frames());
    }
    Ok(())
}
