//! Chat transport: a pipe-delimited line protocol over TCP.
//!
//! Outbound lines are either `<room>|<text>` (channel commands) or
//! `|/pm <user>, <text>` (private replies). Inbound private messages arrive
//! as `|pm|<sender>|<receiver>|<text>`; the sender may carry a rank sigil,
//! which id normalization strips.
//!
//! The client manages a single connection: a writer task drains the command
//! channel, a reader task turns server lines into [`Event`]s. Reconnection
//! is the consumer's concern; listen for [`Event::Disconnected`] and retry.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Configuration for connecting to the chat server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    /// Bot nick, announced after connect.
    pub nick: String,
}

/// Commands the consumer can send to the connection.
#[derive(Debug)]
pub enum Command {
    /// Send a raw protocol line.
    Send(String),
    /// Close the connection.
    Quit,
}

/// Events the connection emits to the consumer.
#[derive(Debug, Clone)]
pub enum Event {
    Connected,
    /// A private message addressed to the bot.
    Pm { from: String, message: String },
    Disconnected { reason: String },
}

/// A handle to a running connection. Cloneable; all sends go through the
/// same writer task in order.
#[derive(Clone)]
pub struct ChatHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ChatHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<Command>) -> Self {
        Self { cmd_tx }
    }

    /// Send a raw protocol line.
    pub async fn raw(&self, line: &str) -> Result<()> {
        self.cmd_tx.send(Command::Send(line.to_string())).await?;
        Ok(())
    }

    /// Private reply to a user.
    pub async fn pm(&self, user: &str, text: &str) -> Result<()> {
        self.raw(&format!("|/pm {user}, {text}")).await
    }

    /// Command or message into a room.
    pub async fn room(&self, room: &str, text: &str) -> Result<()> {
        self.raw(&format!("{room}|{text}")).await
    }

    pub async fn join(&self, room: &str) -> Result<()> {
        self.raw(&format!("|/join {room}")).await
    }

    pub async fn quit(&self) -> Result<()> {
        self.cmd_tx.send(Command::Quit).await?;
        Ok(())
    }
}

/// Connect to the server and spawn the reader/writer tasks.
pub async fn connect(config: &ConnectConfig) -> Result<(ChatHandle, mpsc::Receiver<Event>)> {
    let stream = TcpStream::connect(&config.server_addr).await?;
    let (read_half, mut write_half) = stream.into_split();

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(64);
    let (event_tx, event_rx) = mpsc::channel::<Event>(256);

    let handle = ChatHandle::new(cmd_tx);
    handle.raw(&format!("|/nick {}", config.nick)).await?;

    // Writer: drain commands onto the socket.
    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Send(line) => {
                    debug!(line = %line, "send");
                    if let Err(e) = write_half.write_all(line.as_bytes()).await {
                        warn!(error = %e, "write failed, closing connection");
                        break;
                    }
                    if let Err(e) = write_half.write_all(b"\n").await {
                        warn!(error = %e, "write failed, closing connection");
                        break;
                    }
                }
                Command::Quit => break,
            }
        }
        let _ = write_half.shutdown().await;
    });

    // Reader: parse server lines into events.
    tokio::spawn(async move {
        let _ = event_tx.send(Event::Connected).await;
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(event) = parse_line(&line) {
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => {
                    let _ = event_tx
                        .send(Event::Disconnected {
                            reason: "server closed the connection".to_string(),
                        })
                        .await;
                    break;
                }
                Err(e) => {
                    let _ = event_tx
                        .send(Event::Disconnected {
                            reason: e.to_string(),
                        })
                        .await;
                    break;
                }
            }
        }
    });

    Ok((handle, event_rx))
}

/// Parse one server line. Only private messages are interesting to the bot.
fn parse_line(line: &str) -> Option<Event> {
    let rest = line.strip_prefix("|pm|")?;
    let mut parts = rest.splitn(3, '|');
    let from = parts.next()?;
    let _to = parts.next()?;
    let message = parts.next()?;
    Some(Event::Pm {
        from: from.to_string(),
        message: message.to_string(),
    })
}

/// Handle backed by a bare channel, for observing outbound traffic in tests.
#[cfg(test)]
pub(crate) fn test_pair() -> (ChatHandle, mpsc::Receiver<Command>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    (ChatHandle::new(cmd_tx), cmd_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_private_messages() {
        let event = parse_line("|pm|+Bob Smith|patchbot|$hotpatch").unwrap();
        let Event::Pm { from, message } = event else {
            panic!("expected a pm event");
        };
        assert_eq!(from, "+Bob Smith");
        assert_eq!(message, "$hotpatch");
    }

    #[test]
    fn pm_body_may_contain_pipes() {
        let Some(Event::Pm { message, .. }) = parse_line("|pm|a|b|one|two|three") else {
            panic!("expected a pm event");
        };
        assert_eq!(message, "one|two|three");
    }

    #[test]
    fn ignores_other_lines() {
        assert!(parse_line("|c|lobby|hello").is_none());
        assert!(parse_line("random noise").is_none());
        assert!(parse_line("").is_none());
    }

    #[tokio::test]
    async fn handle_formats_outbound_lines() {
        let (handle, mut rx) = test_pair();
        handle.pm("bob", "hi there").await.unwrap();
        handle.room("lobby", "/hotpatch chat,notify").await.unwrap();
        handle.join("lobby").await.unwrap();

        let mut lines = Vec::new();
        while let Ok(Command::Send(line)) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(
            lines,
            vec![
                "|/pm bob, hi there",
                "lobby|/hotpatch chat,notify",
                "|/join lobby",
            ]
        );
    }
}
