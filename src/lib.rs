//! patchbot: a chat-command-triggered rebuild and hotpatch orchestrator.
//!
//! Authorized users drive the bot over private messages:
//! - `$hotpatch` rebuilds the client and applies live reloads to the server
//! - `$addhotpatch` / `$removehotpatch` manage who may do that
//! - `$toggle` enables or disables hotpatching globally
//!
//! Progress is streamed into a fixed operations channel as a single status
//! box that updates in place as the rebuild advances.

pub mod buildstep;
pub mod client;
pub mod commands;
pub mod ident;
pub mod rebuild;
pub mod render;
pub mod roles;
