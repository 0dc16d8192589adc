use std::sync::Arc;

use clap::{Parser, ValueEnum};

use chatgate::backend::memory::MemoryBackend;
use chatgate::backend::supabase::SupabaseClient;
use chatgate::backend::{Backend, MessageStore, StoreError};
use chatgate::config::{AppConfig, ConfigError, SupabaseConfig};
use chatgate::gate::Gate;
use chatgate::shell::Shell;
use chatgate::types::{NewMessage, Profile};

const DEMO_EMAIL: &str = "demo@chatgate.local";
const DEMO_FRIEND_EMAIL: &str = "friend@chatgate.local";
const DEMO_PASSWORD: &str = "demo";

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("backend: {0}")]
    Backend(#[from] StoreError),
    #[error("terminal i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Hosted project from SUPABASE_URL / SUPABASE_ANON_KEY.
    Supabase,
    /// In-process demo data; nothing leaves this process.
    Memory,
}

#[derive(Parser, Debug)]
#[command(name = "chatgate", about = "Terminal messaging client")]
struct Cli {
    #[arg(long, value_enum, env = "CHATGATE_BACKEND", default_value = "supabase")]
    backend: BackendKind,
}

#[tokio::main]
async fn main() -> Result<(), MainError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let (backend, supabase) = match cli.backend {
        BackendKind::Supabase => {
            let client = Arc::new(
                SupabaseClient::connect(SupabaseConfig::from_env()?)?
                    .with_oauth_redirect(config.oauth_redirect_url.clone()),
            );
            client.spawn_token_refresh();
            tracing::info!("using supabase backend");
            (Backend::from_client(client.clone()), Some(client))
        }
        BackendKind::Memory => {
            let memory = Arc::new(MemoryBackend::new());
            seed_demo(&memory).await?;
            tracing::info!(email = DEMO_EMAIL, password = DEMO_PASSWORD, "using memory backend with demo account");
            (Backend::from_client(memory), None)
        }
    };

    let gate = Arc::new(Gate::from_backend(&backend));
    let gate_task = gate.clone().spawn();

    let shell = Shell::new(backend, config, gate, Box::new(std::io::stdout()));
    let result = shell.run(tokio::io::BufReader::new(tokio::io::stdin())).await;

    gate_task.abort();
    if let Some(client) = supabase {
        client.shutdown();
    }
    result?;
    Ok(())
}

/// Two users with complete profiles and one chat between them.
async fn seed_demo(memory: &MemoryBackend) -> Result<(), StoreError> {
    let demo = memory.register(DEMO_EMAIL, DEMO_PASSWORD);
    let friend = memory.register(DEMO_FRIEND_EMAIL, DEMO_PASSWORD);
    for (id, name) in [(demo, "demo"), (friend, "friend")] {
        memory.put_profile(Profile {
            id,
            username: Some(name.to_owned()),
            avatar_url: Some(format!("https://placehold.co/40?text={name}")),
        });
    }
    let chat = memory.create_chat(demo, friend);
    memory
        .insert_message(&NewMessage::text(chat.id, DEMO_FRIEND_EMAIL, "Welcome to chatgate!"))
        .await?;
    tracing::debug!(chat_id = %chat.id, "demo data seeded");
    Ok(())
}
