//! patchbot: chat-command-triggered rebuild and hotpatch orchestrator.
//!
//! Connects to the chat server as a bot and listens for private messages:
//!
//!   $hotpatch              — rebuild the client and hotpatch the server
//!   $addhotpatch <name>    — grant hotpatch rights (admin only)
//!   $removehotpatch <name> — revoke hotpatch rights (admin only)
//!   $toggle                — enable/disable hotpatching (admin only)
//!
//! Progress streams into the operations channel as one status box that
//! updates in place.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use patchbot::buildstep::ScriptBuild;
use patchbot::client::{self, ConnectConfig, Event};
use patchbot::commands;
use patchbot::ident::to_id;
use patchbot::rebuild::{Orchestrator, OrchestratorConfig};
use patchbot::roles::RoleStore;

#[derive(Parser)]
#[command(name = "patchbot", about = "Chat-driven rebuild and hotpatch orchestrator")]
struct Args {
    /// Chat server address (host:port)
    #[arg(long, default_value = "127.0.0.1:8000")]
    server: String,

    /// Bot nick
    #[arg(long, default_value = "patchbot")]
    nick: String,

    /// Operations channel for status boxes and reload directives
    #[arg(long, default_value = "lobby")]
    channel: String,

    /// Display name of the hotpatch administrator
    #[arg(long, env = "PATCHBOT_ADMIN")]
    admin: String,

    /// Path to the durable role store
    #[arg(long, default_value = "/var/lib/patchbot/roles.json")]
    store: PathBuf,

    /// Path to the client build script
    #[arg(long, default_value = "./build-client.sh")]
    build_script: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "patchbot=info".into()),
        )
        .init();

    let args = Args::parse();

    let roles = RoleStore::load(&args.store)?;
    let (handle, mut events) = client::connect(&ConnectConfig {
        server_addr: args.server.clone(),
        nick: args.nick.clone(),
    })
    .await?;
    handle.join(&args.channel).await?;

    let orch = Arc::new(Orchestrator::new(
        OrchestratorConfig {
            admin_id: to_id(&args.admin),
            channel: args.channel.clone(),
        },
        handle,
        roles,
        Arc::new(ScriptBuild::new(&args.build_script)),
    ));

    tracing::info!(
        server = %args.server,
        nick = %args.nick,
        channel = %args.channel,
        "patchbot running"
    );

    loop {
        match events.recv().await {
            Some(Event::Connected) => tracing::info!("connected"),
            Some(Event::Pm { from, message }) => {
                if let Err(e) = commands::handle_pm(&orch, &from, &message).await {
                    tracing::error!(error = %e, "command handler error");
                }
            }
            Some(Event::Disconnected { reason }) => {
                tracing::warn!(reason = %reason, "disconnected, exiting");
                break;
            }
            None => {
                tracing::warn!("event channel closed, exiting");
                break;
            }
        }
    }

    Ok(())
}
