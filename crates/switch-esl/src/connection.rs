//! Authenticated event socket connection
//!
//! [`EslConnection::connect`] performs the `auth` handshake and returns a
//! cloneable [`EslHandle`] for commands plus the event receiver. A single
//! reader task owns the read half and matches command replies FIFO against
//! in-flight requests; the switch answers commands in submission order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::codec::{encode_command, parse_event_body, read_frame, EslFrame};
use crate::error::{EslError, Result};
use crate::event::EslEvent;

/// Buffered events before the consumer applies backpressure.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

type PendingReplies = Arc<Mutex<VecDeque<oneshot::Sender<EslFrame>>>>;

/// Connection entry point; see [`EslConnection::connect`].
pub struct EslConnection;

impl EslConnection {
    /// Connect to the switch's event socket and authenticate.
    ///
    /// Returns the command handle and the stream of subscribed events. The
    /// receiver yields `None` once the switch closes the connection; the
    /// caller owns reconnect policy.
    pub async fn connect(
        addr: &str,
        password: &str,
    ) -> Result<(EslHandle, mpsc::Receiver<EslEvent>)> {
        connect(addr, password).await
    }
}

struct Inner {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingReplies,
}

/// Cloneable command side of an established connection.
#[derive(Clone)]
pub struct EslHandle {
    inner: Arc<Inner>,
}

impl EslHandle {
    /// Run a synchronous `api` command and return the response body.
    pub async fn api(&self, command: &str) -> Result<String> {
        let frame = self.send_command(&format!("api {command}")).await?;
        match frame.body {
            Some(body) => Ok(body),
            None => Ok(frame.reply_text().to_string()),
        }
    }

    /// Run a fire-and-forget `bgapi` command and return the reply line.
    ///
    /// A successful submission looks like `+OK Job-UUID: <uuid>`; response
    /// discipline is the caller's concern.
    pub async fn bgapi(&self, command: &str) -> Result<String> {
        let frame = self.send_command(&format!("bgapi {command}")).await?;
        Ok(frame.reply_text().to_string())
    }

    /// Subscribe to the named events in plain format.
    pub async fn subscribe(&self, events: &[&str]) -> Result<()> {
        let frame = self
            .send_command(&format!("event plain {}", events.join(" ")))
            .await?;
        let reply = frame.reply_text();
        if reply.starts_with("+OK") {
            Ok(())
        } else {
            Err(EslError::CommandFailed(reply.to_string()))
        }
    }

    async fn send_command(&self, command: &str) -> Result<EslFrame> {
        let (tx, rx) = oneshot::channel();
        {
            let mut writer = self.inner.writer.lock().await;
            self.inner.pending.lock().unwrap().push_back(tx);
            let written = async {
                writer.write_all(&encode_command(command)).await?;
                writer.flush().await
            }
            .await;
            if let Err(e) = written {
                // Drop the reply slot we just queued so later commands
                // still line up with their replies.
                self.inner.pending.lock().unwrap().pop_back();
                return Err(e.into());
            }
        }
        rx.await.map_err(|_| EslError::ConnectionClosed)
    }
}

/// Connect, authenticate and spawn the reader task. Kept free-standing so
/// the handshake can read frames before the reader task takes ownership of
/// the read half.
async fn connect(addr: &str, password: &str) -> Result<(EslHandle, mpsc::Receiver<EslEvent>)> {
    let stream = TcpStream::connect(addr).await?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    // The switch greets with auth/request before accepting anything.
    loop {
        let frame = read_frame(&mut reader)
            .await?
            .ok_or(EslError::ConnectionClosed)?;
        match frame.content_type() {
            "auth/request" => break,
            other => debug!("ignoring pre-auth frame: {}", other),
        }
    }

    writer
        .write_all(&encode_command(&format!("auth {password}")))
        .await?;
    writer.flush().await?;

    let reply = read_frame(&mut reader)
        .await?
        .ok_or(EslError::ConnectionClosed)?;
    if !reply.reply_text().starts_with("+OK") {
        return Err(EslError::AuthFailed(reply.reply_text().to_string()));
    }
    info!("✅ Authenticated with switch event socket at {}", addr);

    let pending: PendingReplies = Arc::new(Mutex::new(VecDeque::new()));
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let handle = EslHandle {
        inner: Arc::new(Inner {
            writer: tokio::sync::Mutex::new(writer),
            pending: pending.clone(),
        }),
    };

    tokio::spawn(read_loop(reader, pending, event_tx));

    Ok((handle, event_rx))
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    pending: PendingReplies,
    event_tx: mpsc::Sender<EslEvent>,
) {
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("switch closed the event socket");
                break;
            }
            Err(e) => {
                warn!("event socket read failed: {}", e);
                break;
            }
        };

        match frame.content_type() {
            "command/reply" | "api/response" => {
                let slot = pending.lock().unwrap().pop_front();
                match slot {
                    Some(tx) => {
                        let _ = tx.send(frame);
                    }
                    None => warn!("unsolicited reply frame: {:?}", frame.reply_text()),
                }
            }
            "text/event-plain" => {
                let Some(body) = frame.body.as_deref() else {
                    warn!("event frame without body");
                    continue;
                };
                let (headers, event_body) = parse_event_body(body);
                let event = EslEvent::new(headers, event_body);
                if event_tx.send(event).await.is_err() {
                    debug!("event consumer dropped; stopping reader");
                    break;
                }
            }
            "text/disconnect-notice" => {
                info!("switch sent disconnect notice");
                break;
            }
            other => debug!("ignoring frame of type {}", other),
        }
    }

    // Fail every in-flight command so callers see ConnectionClosed.
    pending.lock().unwrap().clear();
}
