// Operator CLI for the dashboard agent.

use std::io::Write;
use std::sync::Arc;

use agent_client::{
    AgentClient, AskRequest, HistoryStore, MemoryHistory, SessionState, SessionSupervisor,
    SessionUpdate, StreamEvent,
};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "agent-cli", about = "Ask the dashboard agent and browse history")]
struct Cli {
    /// Dashboard base URL (overrides AGENT_DASHBOARD_URL).
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question and stream the answer to stdout. Ctrl-C cancels.
    Ask {
        question: String,

        /// Continue an existing conversation.
        #[arg(long)]
        conversation: Option<String>,

        /// Owning dashboard session id.
        #[arg(long)]
        session: Option<String>,

        /// Tool the agent may use (repeatable).
        #[arg(long = "tool")]
        tools: Vec<String>,

        /// Cap on reasoning rounds.
        #[arg(long, default_value_t = 5)]
        max_rounds: u32,

        #[arg(long)]
        temperature: Option<f32>,

        #[arg(long)]
        max_tokens: Option<u32>,
    },

    /// List conversations, most recently updated first.
    Conversations {
        #[arg(long, default_value_t = 25)]
        limit: usize,

        /// Cursor: only conversations updated strictly before this
        /// millisecond timestamp.
        #[arg(long)]
        before: Option<i64>,

        /// Filter by owning session id.
        #[arg(long)]
        session: Option<String>,
    },

    /// List messages of one conversation in timestamp order.
    Messages {
        conversation_id: String,

        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Cursor: only messages strictly before this millisecond timestamp.
        #[arg(long)]
        before: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,agent_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let client = match &cli.base_url {
        Some(url) => AgentClient::new(url.clone()),
        None => AgentClient::from_env().context("set AGENT_DASHBOARD_URL or pass --base-url")?,
    };

    match cli.command {
        Command::Ask {
            question,
            conversation,
            session,
            tools,
            max_rounds,
            temperature,
            max_tokens,
        } => {
            let mut request = AskRequest::new(question).max_tool_rounds(max_rounds);
            if let Some(id) = conversation {
                request = request.conversation(id);
            }
            if let Some(id) = session {
                request = request.session(id);
            }
            if !tools.is_empty() {
                request = request.tools(tools);
            }
            if let Some(temp) = temperature {
                request = request.temperature(temp);
            }
            if let Some(max) = max_tokens {
                request = request.max_tokens(max);
            }
            ask(client, request).await
        }

        Command::Conversations {
            limit,
            before,
            session,
        } => {
            let page = client
                .list_conversations(session.as_deref(), millis_cursor(before), limit)
                .await?;
            for conversation in &page.items {
                println!(
                    "{}  {}  {}",
                    conversation.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    conversation.id,
                    conversation.title
                );
            }
            if page.has_more {
                if let Some(last) = page.items.last() {
                    println!(
                        "-- more: rerun with --before {}",
                        last.updated_at.timestamp_millis()
                    );
                }
            }
            Ok(())
        }

        Command::Messages {
            conversation_id,
            limit,
            before,
        } => {
            let page = client
                .list_messages(&conversation_id, millis_cursor(before), limit)
                .await?;
            for message in &page.items {
                println!(
                    "[{}] {:?}: {}",
                    message.created_at.format("%H:%M:%S"),
                    message.role,
                    message.content
                );
            }
            Ok(())
        }
    }
}

fn millis_cursor(before: Option<i64>) -> Option<DateTime<Utc>> {
    before.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Stream one answer to stdout, cancelling on Ctrl-C.
async fn ask(client: AgentClient, request: AskRequest) -> Result<()> {
    let history = Arc::new(MemoryHistory::new());
    let mut supervisor =
        SessionSupervisor::new(Arc::new(client), history as Arc<dyn HistoryStore>);

    let mut handle = supervisor.ask(request).await;
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                // Keep draining so the Finished update is observed below.
            }
            update = handle.updates.recv() => match update {
                Some(SessionUpdate::Event(event)) => render_event(&event, &mut stdout)?,
                Some(SessionUpdate::Finished(state)) => {
                    println!();
                    match state {
                        SessionState::Done => {}
                        SessionState::Cancelled => println!("(cancelled)"),
                        state => println!("(stream ended: {:?})", state),
                    }
                    break;
                }
                None => break,
            }
        }
    }

    let transcript = handle.transcript.read().await;
    if let Some(usage) = &transcript.assistant_message().usage {
        println!(
            "tokens: {} prompt + {} completion = {}",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        );
    }
    if let Some(id) = &transcript.conversation_id {
        println!("conversation: {}", id);
    }
    Ok(())
}

fn render_event(event: &StreamEvent, stdout: &mut std::io::Stdout) -> Result<()> {
    match event {
        StreamEvent::Token { content, .. } => {
            write!(stdout, "{}", content)?;
            stdout.flush()?;
        }
        StreamEvent::ToolCall {
            tool_name,
            tool_args,
            ..
        } => {
            println!("→ {} {}", tool_name, tool_args);
        }
        StreamEvent::ToolResult { tool_name, .. } => {
            println!("← {} returned", tool_name);
        }
        StreamEvent::Error { error, .. } => {
            println!("\nerror: {}", error);
        }
        StreamEvent::Done { .. } | StreamEvent::Other { .. } => {}
    }
    Ok(())
}
