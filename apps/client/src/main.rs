use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use waterchat_chat::{ChatClient, InboundMessage, Role};
use waterchat_config::load as load_config;
use waterchat_runtime::{shutdown_signal, telemetry, ClientServices};

#[derive(Parser)]
#[command(name = "waterchat")]
#[command(about = "Support desk live chat from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a conversation and chat interactively
    Chat {
        conversation_id: String,
        /// Customer the conversation belongs to (legacy schema only)
        #[arg(long)]
        customer: Option<String>,
    },
    /// List conversations with their latest message
    Conversations {
        /// Override `api.conversations_url`
        #[arg(long)]
        url: Option<String>,
    },
    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            conversation_id,
            customer,
        } => run_chat(conversation_id, customer).await,
        Commands::Conversations { url } => list_conversations(url).await,
        Commands::Config => print_config(),
    }
}

async fn run_chat(conversation_id: String, customer: Option<String>) -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    let config = load_config().context("failed to load configuration")?;
    let services =
        ClientServices::initialise(&config).context("failed to initialise client services")?;

    let client = services.spawn_chat()?;
    let printer = tokio::spawn(print_inbound(client.subscribe()));

    info!(conversation = %conversation_id, "joining conversation");
    client.connect(conversation_id.clone());

    println!(
        "Waterchat: {} as {} ({})",
        conversation_id.bold(),
        services.session.display_name(),
        services.session.role
    );
    println!("Type a message and press enter; '/help' lists commands");
    println!("Use Ctrl+C or '/quit' to exit");
    println!("---");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut reader = BufReader::new(tokio::io::stdin());
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = tokio::select! {
            read = reader.read_line(&mut line) => read?,
            _ = &mut shutdown => break,
        };
        if bytes_read == 0 {
            break; // EOF
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" | "/q" => break,
            "/help" | "/h" => {
                println!("Available commands:");
                println!("  /help, /h          - Show this help");
                println!("  /history, /l       - Show messages received so far");
                println!("  /status, /s        - Show connection state");
                println!("  /quit, /exit, /q   - Leave the conversation");
                println!("Anything else is sent to the conversation.");
            }
            "/history" | "/l" => print_history(&client).await,
            "/status" | "/s" => println!("{}", client.state()),
            _ if input.starts_with('/') => {
                println!("Unknown command: {input}");
                println!("Type '/help' for available commands");
            }
            _ => {
                if !client.is_connected() {
                    warn!(state = %client.state(), "not connected; message dropped");
                    println!("{}", "not connected, message not sent".yellow());
                    continue;
                }
                client.send(input, customer.as_deref());
            }
        }
    }

    client.close();
    client.join().await;
    printer.abort();
    println!("Goodbye!");
    Ok(())
}

async fn print_inbound(mut inbound: broadcast::Receiver<InboundMessage>) {
    loop {
        match inbound.recv().await {
            Ok(message) => println!("{}", render(&message)),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "console fell behind, messages skipped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn print_history(client: &ChatClient) {
    let messages = client.messages().await;
    if messages.is_empty() {
        println!("No messages yet");
        return;
    }
    for message in &messages {
        println!("{}", render(message));
    }
}

fn render(message: &InboundMessage) -> String {
    let sender = message
        .sender_name
        .clone()
        .unwrap_or_else(|| message.sender_id.clone());
    let sender = match message.role {
        Some(Role::Admin) => sender.red(),
        Some(Role::Agent) => sender.cyan(),
        Some(Role::Customer) => sender.green(),
        Some(Role::Unknown) | None => sender.normal(),
    };
    format!(
        "[{}] {}: {}",
        message.timestamp.dimmed(),
        sender.bold(),
        message.content
    )
}

async fn list_conversations(url: Option<String>) -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    let config = load_config().context("failed to load configuration")?;
    let services =
        ClientServices::initialise(&config).context("failed to initialise client services")?;

    let url = url
        .or_else(|| services.conversations_url.clone())
        .ok_or_else(|| anyhow!("no conversation list URL; pass --url or set api.conversations_url"))?;

    let conversations = services
        .conversations
        .list(&url)
        .await
        .with_context(|| format!("failed to fetch conversations from {url}"))?;

    if conversations.is_empty() {
        println!("No conversations found");
        return Ok(());
    }

    println!("{:<4} {:<24} {:<12} {:<12} {}", "", "Name", "Customer", "Time", "Last message");
    println!("{}", "-".repeat(90));
    for conversation in conversations {
        let last_message = if conversation.last_message.chars().count() > 40 {
            let truncated: String = conversation.last_message.chars().take(37).collect();
            format!("{truncated}...")
        } else {
            conversation.last_message
        };
        println!(
            "{:<4} {:<24} {:<12} {:<12} {}",
            conversation.initials,
            conversation.name,
            conversation.customer.as_deref().unwrap_or("-"),
            conversation.time,
            last_message
        );
    }

    Ok(())
}

fn print_config() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    let rendered =
        serde_json::to_string_pretty(&config).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}
