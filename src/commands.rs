//! Command router: classify private messages and dispatch them.
//!
//! Commands are fixed `$`-prefixed strings, matched case-sensitively in a
//! fixed priority order. Anything else is ignored. Authorization failures
//! are logged and silently dropped; refusals the user should know about
//! (busy, disabled) are the orchestrator's business.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::ident::to_id;
use crate::rebuild::Orchestrator;
use crate::roles::Role;

/// A classified inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hotpatch,
    AddHotpatch(String),
    RemoveHotpatch(String),
    Toggle,
}

/// Pure classifier over PM text. Prefix matching, first hit wins.
pub fn parse_command(message: &str) -> Option<Command> {
    if message.starts_with("$hotpatch") {
        Some(Command::Hotpatch)
    } else if message.starts_with("$addhotpatch") {
        Some(Command::AddHotpatch(argument(message)))
    } else if message.starts_with("$removehotpatch") {
        Some(Command::RemoveHotpatch(argument(message)))
    } else if message.starts_with("$toggle") {
        Some(Command::Toggle)
    } else {
        None
    }
}

/// Everything after the command word: whitespace runs dropped, fragments
/// concatenated, then normalized. `"$addhotpatch Bob  Smith"` → `"bobsmith"`.
fn argument(message: &str) -> String {
    let mut words = message.split_whitespace();
    let _command = words.next();
    to_id(&words.collect::<String>())
}

/// Handle one inbound private message.
pub async fn handle_pm(orch: &Arc<Orchestrator>, sender: &str, message: &str) -> Result<()> {
    let sender_id = to_id(sender);
    let Some(command) = parse_command(message) else {
        return Ok(());
    };

    match command {
        Command::Hotpatch => {
            let role = orch.roles.lock().unwrap().get(&sender_id);
            if matches!(role, Some(Role::Admin | Role::Hotpatch)) {
                // Long-running; run it off the event stream. The in-flight
                // flag inside the orchestrator is the concurrency guard.
                let orch = Arc::clone(orch);
                tokio::spawn(async move {
                    if let Err(e) = orch.attempt_rebuild(&sender_id).await {
                        error!(user = %sender_id, error = %e, "rebuild attempt failed");
                    }
                });
            } else {
                info!(user = %sender_id, "unauthorized hotpatch attempt");
            }
        }

        Command::AddHotpatch(target) => {
            if sender_id != orch.config.admin_id {
                info!(user = %sender_id, "unauthorized attempt to add hotpatcher");
                return Ok(());
            }
            let outcome = orch.roles.lock().unwrap().set(&target, Role::Hotpatch);
            match outcome {
                Ok(true) => {
                    info!(user = %sender_id, target = %target, "added hotpatcher");
                    orch.handle
                        .pm(&sender_id, &format!("Successfully added {target}"))
                        .await?;
                }
                Ok(false) => info!(target = %target, "refused malformed hotpatcher name"),
                Err(e) => {
                    error!(error = %e, "role store write failed");
                    orch.handle
                        .pm(&sender_id, &format!("Failed to save roles: {e}"))
                        .await?;
                }
            }
        }

        Command::RemoveHotpatch(target) => {
            if sender_id != orch.config.admin_id {
                info!(user = %sender_id, "unauthorized attempt to remove hotpatcher");
                return Ok(());
            }
            let outcome = orch.roles.lock().unwrap().clear(&target);
            match outcome {
                Ok(true) => {
                    info!(user = %sender_id, target = %target, "removed hotpatcher");
                    orch.handle
                        .pm(&sender_id, &format!("Successfully removed {target}"))
                        .await?;
                }
                Ok(false) => info!(target = %target, "refused malformed hotpatcher name"),
                Err(e) => {
                    error!(error = %e, "role store write failed");
                    orch.handle
                        .pm(&sender_id, &format!("Failed to save roles: {e}"))
                        .await?;
                }
            }
        }

        Command::Toggle => {
            if sender_id != orch.config.admin_id {
                info!(user = %sender_id, "unauthorized attempt to toggle hotpatching");
                return Ok(());
            }
            let enabled = orch.toggle_enabled();
            info!(user = %sender_id, enabled, "toggled hotpatching");
            let text = if enabled {
                "Hotpatching is enabled"
            } else {
                "Hotpatching is disabled"
            };
            orch.handle.pm(&sender_id, text).await?;
        }
    }

    Ok(())
}
