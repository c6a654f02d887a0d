use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use parley_core::core_store::store::read_journal;
use parley_core::core_store::{
    ConversationId, ConversationSnapshot, ConversationView, ListFilter, SortKey, UserId,
};
use parley_core::{
    init_logging_with_config, ChatEngine, Config, CoreEvent, NotificationSink, NotifyError,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file; PARLEY_* environment variables apply on top
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run a scripted exchange between three users and print a viewer's inbox
    Demo {
        /// Whose conversation list to print
        #[arg(long, default_value = "alice")]
        viewer: String,
    },
    /// Rebuild state from a journal and print a viewer's conversation list
    Replay {
        /// Journal file (defaults to the configured journal path)
        #[arg(long)]
        journal: Option<PathBuf>,

        #[arg(long)]
        viewer: String,

        #[arg(long, value_enum, default_value_t = View::Inbox)]
        view: View,

        /// Case-insensitive match on participant or subject
        #[arg(long)]
        query: Option<String>,
    },
    /// Rebuild state from a journal and print one page of a conversation
    History {
        #[arg(long)]
        journal: Option<PathBuf>,

        #[arg(long)]
        conversation: String,

        /// Only messages after this sequence number
        #[arg(long, default_value_t = 0)]
        since: u64,

        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum View {
    Inbox,
    Unread,
    Pinned,
    Archived,
}

impl From<View> for ConversationView {
    fn from(view: View) -> Self {
        match view {
            View::Inbox => ConversationView::Inbox,
            View::Unread => ConversationView::Unread,
            View::Pinned => ConversationView::Pinned,
            View::Archived => ConversationView::Archived,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InboxReport {
    viewer: UserId,
    total_unread: u64,
    conversations: Vec<ConversationSnapshot>,
}

/// Writes notifications to the log instead of a device
struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, event: &CoreEvent) -> Result<(), NotifyError> {
        info!(
            kind = event.kind(),
            conversation_id = %event.conversation_id(),
            "notification"
        );
        Ok(())
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let base = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    let mut config = base.merge_env(|name| std::env::var(name).ok())?;

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    config.validate()?;
    Ok(config)
}

fn inbox_report(engine: &ChatEngine, viewer: &UserId, filter: ListFilter) -> Result<InboxReport> {
    let store = engine.conversations(viewer)?;
    Ok(InboxReport {
        viewer: viewer.clone(),
        total_unread: store.total_unread()?,
        conversations: store.list(filter, SortKey::LastActivity).collect(),
    })
}

/// Engine holding only what the journal at `path` recorded
fn replayed(config: &Config, path: Option<PathBuf>) -> Result<ChatEngine> {
    let path = path.unwrap_or_else(|| config.journal.path.clone());
    let records = read_journal(&path).with_context(|| format!("reading journal {}", path.display()))?;

    let engine = ChatEngine::new(config.engine.clone());
    let restored = engine.message_log().restore(records)?;
    info!(path = %path.display(), records = restored, "journal replayed");
    Ok(engine)
}

async fn run_demo(config: &Config, viewer: UserId) -> Result<InboxReport> {
    let (engine, journal) = ChatEngine::open(config)?;
    let dispatcher = engine.attach_dispatcher(Arc::new(LogSink));

    let alice = UserId::new("alice".to_string());
    let bob = UserId::new("bob".to_string());
    let carol = UserId::new("carol".to_string());
    for user in [&alice, &bob, &carol] {
        engine.set_online(user);
    }

    let lunch = engine.start_conversation(alice.clone(), bob.clone(), "Lunch")?;
    let release = engine.start_conversation(alice.clone(), carol.clone(), "Release 1.2")?;

    engine.heartbeat_typing(&bob, &lunch.id)?;
    let question = engine.send(&lunch.id, &bob, "Pizza or tacos today?", None)?;
    engine.send(&lunch.id, &bob, "I can book a table for noon", None)?;
    engine.ack_delivered(&question.id)?;
    engine.ack_read(&question.id)?;
    engine.send(&lunch.id, &alice, "Tacos, noon works", Some(question.id.clone()))?;

    engine.send(&release.id, &carol, "Release notes are ready for review", None)?;
    engine.send(&release.id, &carol, "Also the changelog needs a second pair of eyes", None)?;
    engine.pin(&alice, &release.id)?;
    engine.set_offline(&carol);

    let report = inbox_report(&engine, &viewer, ListFilter::inbox())?;

    engine.events().close();
    let stats = dispatcher.join().await;
    info!(delivered = stats.delivered, failed = stats.failed, "notifications dispatched");

    drop(engine);
    if let Some(journal) = journal {
        let written = journal.await.context("journal writer task failed")?;
        info!(written, "journal flushed");
    }

    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging_with_config(config.logging.to_log_config()?)?;
    parley_core::metrics::init_metrics();

    info!("Parley CLI started");

    match args.command {
        Command::Demo { viewer } => {
            let report = run_demo(&config, UserId::new(viewer)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Replay { journal, viewer, view, query } => {
            let engine = replayed(&config, journal)?;
            let mut filter = ListFilter::new(view.into());
            if let Some(query) = query {
                filter = filter.matching(query);
            }
            let report = inbox_report(&engine, &UserId::new(viewer), filter)?;
            if report.conversations.is_empty() {
                warn!(viewer = %report.viewer, "no conversations matched");
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::History { journal, conversation, since, limit } => {
            let engine = replayed(&config, journal)?;
            let page = engine.page(&ConversationId::new(conversation), since, limit)?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    info!("Parley CLI finished");

    Ok(())
}
