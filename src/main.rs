//! Duet CLI entry point.
//!
//! Drives the relationship engine against a local SQLite database. Every
//! subcommand acts on behalf of the party given with `--as` and prints its
//! result as JSON on stdout.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::debug;

use duet::config::DuetConfig;
use duet::delivery::presence::PresenceRegistry;
use duet::delivery::{DeliveryRouter, LogPushDispatcher, LogRealtimeSink};
use duet::directory::InviteeRef;
use duet::messages::{MessageBody, MessageKind};
use duet::relations::engine::RelationEngine;
use duet::types::{ConversationId, InvitationId, PartyId};

/// Duet: direct 1-to-1 conversation relationships.
#[derive(Parser)]
#[command(name = "duet", version, about)]
struct Cli {
    /// Party performing the action.
    #[arg(long = "as", value_name = "PARTY_ID", global = true)]
    acting: Option<PartyId>,

    /// Also write JSON logs to the configured logs directory.
    #[arg(long, global = true)]
    log_file: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Invite a party to a direct conversation.
    Invite {
        /// Party id of the invitee.
        #[arg(long, conflicts_with_all = ["phone", "login"])]
        to: Option<PartyId>,
        /// Phone number of the invitee, resolved through `[directory]`.
        #[arg(long, conflicts_with = "login")]
        phone: Option<String>,
        /// Login identity of the invitee, resolved through `[directory]`.
        #[arg(long)]
        login: Option<String>,
        /// Greeting stored as the conversation's first message.
        #[arg(long)]
        message: Option<String>,
    },
    /// Accept a pending invitation.
    Accept {
        /// Invitation id.
        invitation: InvitationId,
    },
    /// Decline a pending invitation.
    Decline {
        /// Invitation id.
        invitation: InvitationId,
    },
    /// List pending invitations addressed to the acting party.
    Pending,
    /// Block a party.
    Block {
        /// Party to block.
        party: PartyId,
    },
    /// Lift a block.
    Unblock {
        /// Party to unblock.
        party: PartyId,
    },
    /// Send a message.
    Send {
        /// Conversation id.
        conversation: ConversationId,
        /// Text, or a storage reference for media kinds.
        content: String,
        /// Payload kind.
        #[arg(long, value_enum, default_value_t = KindArg::Text)]
        kind: KindArg,
    },
    /// Hide a conversation and delete your own messages in it.
    Hide {
        /// Conversation id.
        conversation: ConversationId,
    },
    /// Mute notifications for a conversation.
    Mute {
        /// Conversation id.
        conversation: ConversationId,
        /// Mute duration in hours; omit to mute indefinitely.
        #[arg(long)]
        hours: Option<u32>,
    },
    /// Unmute a conversation.
    Unmute {
        /// Conversation id.
        conversation: ConversationId,
    },
    /// Mark a conversation as read.
    Read {
        /// Conversation id.
        conversation: ConversationId,
    },
    /// List your visible conversations.
    List,
    /// Show the messages you can see in a conversation.
    History {
        /// Conversation id.
        conversation: ConversationId,
    },
}

/// Message payload kinds accepted on the command line.
#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Text,
    Image,
    Audio,
    File,
}

impl From<KindArg> for MessageKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Text => MessageKind::Text,
            KindArg::Image => MessageKind::Image,
            KindArg::Audio => MessageKind::Audio,
            KindArg::File => MessageKind::File,
        }
    }
}

/// Acknowledgement printed by commands that return nothing else.
#[derive(Serialize)]
struct Done {
    ok: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = DuetConfig::load().context("failed to load configuration")?;

    let _logging_guard = if cli.log_file {
        Some(duet::logging::init_production(
            &config.logging.logs_dir,
            &config.logging.level,
        )?)
    } else {
        duet::logging::init_cli(&config.logging.level);
        None
    };

    let acting = cli
        .acting
        .context("--as <PARTY_ID> is required to identify the acting party")?;
    let engine = build_engine(&config).await?;
    debug!(%acting, "engine ready");

    run(&engine, acting, cli.command).await
}

/// Open the database and wire the engine's collaborators.
async fn build_engine(config: &DuetConfig) -> anyhow::Result<RelationEngine> {
    let pool = duet::db::open(&config.database.path, config.database.max_connections).await?;

    // A one-shot CLI process never has live sessions, so everything routes to push.
    let presence = Arc::new(PresenceRegistry::new());
    let router = DeliveryRouter::new(
        pool.clone(),
        presence,
        Arc::new(LogPushDispatcher),
        Arc::new(LogRealtimeSink),
    )
    .with_preview_chars(config.delivery.preview_chars);

    Ok(RelationEngine::new(
        pool,
        Arc::new(config.directory.to_directory()),
        router,
        config.engine_settings(),
    ))
}

/// Execute one subcommand and print its result.
async fn run(engine: &RelationEngine, acting: PartyId, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Invite {
            to,
            phone,
            login,
            message,
        } => {
            let invitee = match (to, phone, login) {
                (Some(id), _, _) => InviteeRef::Party(id),
                (None, Some(phone), _) => InviteeRef::Phone(phone),
                (None, None, Some(login)) => InviteeRef::Login(login),
                (None, None, None) => anyhow::bail!("one of --to, --phone or --login is required"),
            };
            let outcome = engine
                .request_invitation(acting, &invitee, message.as_deref())
                .await?;
            print_json(&outcome)
        }
        Command::Accept { invitation } => {
            print_json(&engine.accept_invitation(invitation, acting).await?)
        }
        Command::Decline { invitation } => {
            engine.decline_invitation(invitation, acting).await?;
            print_json(&Done { ok: true })
        }
        Command::Pending => print_json(&engine.list_pending_invitations(acting).await?),
        Command::Block { party } => {
            engine.block(acting, party).await?;
            print_json(&Done { ok: true })
        }
        Command::Unblock { party } => {
            engine.unblock(acting, party).await?;
            print_json(&Done { ok: true })
        }
        Command::Send {
            conversation,
            content,
            kind,
        } => {
            let body = match kind {
                KindArg::Text => MessageBody::text(content),
                other => MessageBody::media(other.into(), content),
            };
            print_json(&engine.send_message(acting, conversation, body).await?)
        }
        Command::Hide { conversation } => {
            print_json(&engine.hide_conversation(acting, conversation).await?)
        }
        Command::Mute {
            conversation,
            hours,
        } => print_json(&engine.mute_conversation(acting, conversation, hours).await?),
        Command::Unmute { conversation } => {
            print_json(&engine.unmute_conversation(acting, conversation).await?)
        }
        Command::Read { conversation } => {
            print_json(&engine.mark_read(acting, conversation).await?)
        }
        Command::List => print_json(&engine.list_conversations(acting).await?),
        Command::History { conversation } => {
            print_json(&engine.history(acting, conversation).await?)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}
