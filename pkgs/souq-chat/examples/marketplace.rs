use clap::Parser;
use souq_chat::{
    ChatClient, ChatConfig, MemoryDirectory, Profile, ProfileDirectory, SessionEvent,
};
use souq_store::ConversationRepository;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database file to use (defaults to a temp file)
    #[arg(short, long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let args = Args::parse();
    let temp_dir = tempfile::tempdir()?;
    let db_path = args
        .db
        .unwrap_or_else(|| temp_dir.path().join("souq-demo.db"));

    let repository = Arc::new(ConversationRepository::open(db_path).await?);

    let directory = Arc::new(MemoryDirectory::new());
    directory.insert(
        Profile::new("amina", "Amina's Lamps").with_photo("https://cdn.souq.example/amina.png"),
    );
    directory.insert(Profile::new("bilal", "Bilal"));
    let directory: Arc<dyn ProfileDirectory> = directory;

    let bilal = ChatClient::new(
        "bilal",
        repository.clone(),
        directory.clone(),
        ChatConfig::default(),
    );
    let amina = ChatClient::new(
        "amina",
        repository.clone(),
        directory.clone(),
        ChatConfig::default(),
    );
    bilal.start().await?;
    amina.start().await?;

    println!("== Bilal asks about a listing ==");
    let bilal_session = bilal.open_chat("amina").await?;
    bilal_session.set_draft("Is the brass lamp still available?");
    bilal_session.send_draft().await?;

    // Let the change feed reach Amina's client
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("Amina's inbox ({} unread):", amina.unread_count());
    for conversation in amina.conversations() {
        let name = conversation
            .other_participant
            .as_ref()
            .map(|p| p.display_name.as_str())
            .unwrap_or("<unknown>");
        let marker = if conversation.is_unread("amina") { "*" } else { " " };
        println!(
            "  {marker} {name}: {}",
            conversation.last_message_text.as_deref().unwrap_or("(no messages)")
        );
    }

    println!("\n== Amina opens the conversation and replies ==");
    let inbox = amina.conversations();
    let amina_session = amina.open_conversation(&inbox[0].id).await?;
    amina_session.mark_read().await;
    println!("Amina's unread badge is now {}", amina.unread_count());

    let mut bilal_events = bilal_session.subscribe_events();
    amina_session.set_draft("It is! I can hold it until tomorrow.");
    amina_session.send_draft().await?;

    match tokio::time::timeout(Duration::from_secs(2), bilal_events.recv()).await {
        Ok(Ok(SessionEvent::MessageAppended(message))) => {
            println!("Bilal sees the reply live: {:?}", message.content);
        }
        _ => println!("Bilal did not receive the reply in time"),
    }

    println!("\n== Transcript as Bilal sees it ==");
    for message in bilal_session.messages() {
        println!("  [{}] {}", message.sender_id, message.content);
    }

    bilal.close();
    amina.close();
    Ok(())
}
