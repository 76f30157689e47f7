//! # WebSocket Transport
//!
//! JSON text frames over WebSocket, fed into the simulation executor as
//! posted operations. One thread per connection: it owns the socket,
//! relays inbound frames onto the op channel, and drains the session's
//! outbound channel. The simulation never blocks on a socket; a session
//! whose outbox disappears (terminated or too slow) sees its connection
//! thread shut the socket down.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use meridian_shared::protocol::ServerMessage;
use meridian_shared::SessionId;
use std::net::{TcpListener, TcpStream};
use std::time::Duration;
use tungstenite::{accept, Error as WsError, Message, WebSocket};

/// Capacity of one session's outbound channel. Overflow drops the
/// subscriber's stream (see the chunk manager), never blocks the core.
pub const OUTBOX_CAPACITY: usize = 256;

/// Poll interval for multiplexing reads against outbox drains.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Operations posted to the simulation executor.
#[derive(Debug)]
pub enum ServerOp {
    /// A connection finished its handshake.
    Connect {
        /// The session's outbound channel.
        outbox: Sender<ServerMessage>,
        /// Carries the assigned session id back (None = refused).
        reply: Sender<Option<SessionId>>,
    },
    /// A text frame arrived.
    Frame {
        /// Originating session.
        session: SessionId,
        /// Raw frame text.
        text: String,
    },
    /// The connection went away.
    Disconnect {
        /// The session.
        session: SessionId,
        /// Why.
        reason: String,
    },
}

/// Accept loop: binds the listener and spawns one thread per connection.
///
/// # Errors
///
/// Returns the bind error; accept errors are logged and survived.
pub fn run_listener(bind_address: &str, ops: Sender<ServerOp>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_address)?;
    tracing::info!(%bind_address, "listening");
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let ops = ops.clone();
                std::thread::spawn(move || connection_thread(stream, &ops));
            }
            Err(err) => tracing::warn!(%err, "accept failed"),
        }
    }
    Ok(())
}

/// Owns one socket for its whole life.
fn connection_thread(stream: TcpStream, ops: &Sender<ServerOp>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_owned());
    let mut socket = match accept(stream) {
        Ok(socket) => socket,
        Err(err) => {
            tracing::debug!(%peer, %err, "handshake failed");
            return;
        }
    };
    if let Err(err) = socket.get_ref().set_read_timeout(Some(POLL_INTERVAL)) {
        tracing::debug!(%peer, %err, "cannot set read timeout");
        return;
    }

    let (outbox_tx, outbox_rx) = bounded(OUTBOX_CAPACITY);
    let (reply_tx, reply_rx) = bounded(1);
    if ops
        .send(ServerOp::Connect {
            outbox: outbox_tx,
            reply: reply_tx,
        })
        .is_err()
    {
        return; // executor is gone
    }
    let session = match reply_rx.recv_timeout(Duration::from_secs(5)) {
        Ok(Some(session)) => session,
        _ => {
            tracing::info!(%peer, "connection refused");
            let _ = socket.close(None);
            return;
        }
    };
    tracing::debug!(%peer, %session, "connection up");

    let reason = pump(&mut socket, session, ops, &outbox_rx);
    let _ = ops.send(ServerOp::Disconnect {
        session,
        reason: reason.clone(),
    });
    let _ = socket.close(None);
    tracing::debug!(%peer, %session, reason, "connection down");
}

/// Relays frames both ways until either side ends. Returns the reason.
fn pump(
    socket: &mut WebSocket<TcpStream>,
    session: SessionId,
    ops: &Sender<ServerOp>,
    outbox: &Receiver<ServerMessage>,
) -> String {
    loop {
        // Outbound first: drain whatever the simulation queued.
        loop {
            match outbox.try_recv() {
                Ok(message) => {
                    let Ok(json) = serde_json::to_string(&message) else {
                        continue;
                    };
                    if let Err(err) = socket.send(Message::Text(json)) {
                        return format!("write failed: {err}");
                    }
                }
                Err(TryRecvError::Empty) => break,
                // The executor dropped the outbox: the session is over.
                Err(TryRecvError::Disconnected) => return "session terminated".to_owned(),
            }
        }

        match socket.read() {
            Ok(Message::Text(text)) => {
                if ops
                    .send(ServerOp::Frame { session, text })
                    .is_err()
                {
                    return "executor stopped".to_owned();
                }
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Ok(Message::Binary(_)) => return "binary frames unsupported".to_owned(),
            Ok(Message::Close(_)) => return "client closed".to_owned(),
            Err(WsError::Io(err))
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                // Poll window elapsed; loop back to the outbox.
            }
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                return "connection closed".to_owned();
            }
            Err(err) => return format!("read failed: {err}"),
        }
    }
}
