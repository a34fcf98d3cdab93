// p2p-chat CLI validation tool
// Runs the signaling and negotiation stack end to end against the in-process
// store, or checks local identity/transport configuration.

use clap::{Parser, Subcommand};
use colored::*;
use futures::try_join;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use p2p_chat::{
    ChatClient, ChatError, ConnectionStatus, EnvIdentity, IceConfig, IdentityProvider,
    MemoryStore, User,
};

#[derive(Parser)]
#[command(name = "p2p-chat")]
#[command(about = "P2P chat over a shared document relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with the environment-backed identity provider and print the user
    Whoami,

    /// Print the transport discovery configuration
    Config,

    /// Connect two in-process peers through the in-memory store and chat
    Demo {
        /// Room id both peers join
        #[arg(short, long, default_value = "demo-room")]
        room_id: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Whoami => whoami().await,
        Commands::Config => show_config(),
        Commands::Demo { room_id } => demo(&room_id).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn whoami() -> Result<(), ChatError> {
    let user = EnvIdentity.sign_in().await?;
    println!("{} {}", "uid:".bold(), user.uid);
    println!("{} {}", "name:".bold(), user.sender_name());
    Ok(())
}

fn show_config() -> Result<(), ChatError> {
    let config = IceConfig::from_env()?;
    for stun in &config.stun_servers {
        println!("{} {}", "stun:".bold(), stun);
    }
    for turn in &config.turn_servers {
        println!("{} {} ({})", "turn:".bold(), turn.urls.join(", "), turn.username);
    }
    Ok(())
}

async fn demo(room_id: &str) -> Result<(), ChatError> {
    let ice = IceConfig::from_env()?;
    let store = MemoryStore::new();

    let mut alice = ChatClient::new(store.clone(), ice.clone(), User::with_name("alice", "Alice"));
    let mut bob = ChatClient::new(store, ice, User::with_name("bob", "Bob"));

    println!("{}", format!("joining room {room_id}...").dimmed());
    let (alice_role, bob_role) = try_join!(alice.join(room_id), bob.join(room_id))?;
    println!("alice is {:?}, bob is {:?}", alice_role, bob_role);

    try_join!(wait_connected(&alice), wait_connected(&bob))?;
    println!("{}", "both peers connected".green().bold());

    // Print everything Bob receives over the direct channel
    let bob_session = bob
        .session()
        .ok_or(ChatError::ChannelNotReady)?;
    let mut receipts = bob_session.subscribe_messages();
    tokio::spawn(async move {
        while let Ok(message) = receipts.recv().await {
            println!("{} {}", format!("{}:", message.sender_name).cyan(), message.text);
        }
    });

    println!("{}", "type messages as Alice, ctrl-d to quit".dimmed());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        alice.send_message(&line)?;
    }

    alice.leave().await;
    bob.leave().await;
    Ok(())
}

async fn wait_connected(client: &ChatClient) -> Result<(), ChatError> {
    let mut status = client.watch_status().ok_or(ChatError::ChannelNotReady)?;
    while *status.borrow() != ConnectionStatus::Connected {
        status
            .changed()
            .await
            .map_err(|_| ChatError::TransportFailed("session closed".to_string()))?;
    }
    Ok(())
}
