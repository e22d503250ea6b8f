//! Protocol session over an established channel.
//!
//! Owns the write half plus a spawned reader task. Outbound requests park
//! a oneshot sender in the pending table; the reader routes `reply`/`error`
//! frames back by request kind and forwards unsolicited frames (progress,
//! signals, display messages) as [`ClientEvent`]s. The wire protocol has
//! no request ids, so the pending table is single-slot per kind: a second
//! request of an in-flight kind is rejected, not queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::codec::{FrameReader, FrameWriter};
use crate::error::{ClientError, Result};
use crate::protocol::{self, Hello, IncomingFrame, RequestKind};
use crate::state::{ClientState, StateCell};
use crate::types::ClientEvent;

type PendingMap = Arc<Mutex<HashMap<RequestKind, oneshot::Sender<Result<serde_json::Value>>>>>;
type HelloSlot = Arc<Mutex<Option<oneshot::Sender<Hello>>>>;

pub(crate) struct Connection {
    writer: FrameWriter<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl Drop for Connection {
    /// Abort the reader task with the connection. The reader holds clones
    /// of the shared state cell and event sender; left running after a
    /// teardown it would force `Stopped` onto whatever session replaced
    /// this one once its old channel finally hits EOF.
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

impl Connection {
    /// Wrap an established duplex stream. Spawns the reader task and
    /// returns the connection together with the one-shot hello future.
    ///
    /// The reader forces `state` to `Stopped` when the channel drops, so
    /// a dying server is observable without polling.
    pub fn new<S>(
        stream: S,
        state: StateCell,
        event_tx: mpsc::Sender<ClientEvent>,
    ) -> (Self, oneshot::Receiver<Hello>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (hello_tx, hello_rx) = oneshot::channel();
        let hello_slot: HelloSlot = Arc::new(Mutex::new(Some(hello_tx)));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_pending = pending.clone();
        let reader_closed = closed.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(read_half);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        dispatch_frame(&frame, &reader_pending, &hello_slot, &event_tx).await;
                    }
                    Ok(None) => {
                        tracing::info!("cmake server closed the channel");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "cmake server channel error");
                        break;
                    }
                }
            }
            reader_closed.store(true, Ordering::SeqCst);
            state.set(ClientState::Stopped);
            // Dropping the pending senders rejects every in-flight awaiter.
            reader_pending.lock().await.clear();
            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        let connection = Self {
            writer: FrameWriter::new(Box::new(write_half)),
            pending,
            closed,
            reader_handle,
        };
        (connection, hello_rx)
    }

    /// Issue one request and await its correlated reply.
    ///
    /// Fails fast with [`ClientError::RequestPending`] when a request of
    /// the same kind is already outstanding, and with
    /// [`ClientError::ChannelClosed`] once the channel is gone. A server
    /// `error` frame surfaces as [`ClientError::Server`].
    pub async fn request(
        &mut self,
        kind: RequestKind,
        frame: serde_json::Value,
    ) -> Result<serde_json::Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ChannelClosed);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(&kind) {
                return Err(ClientError::RequestPending(kind));
            }
            pending.insert(kind, tx);
        }

        if let Err(err) = self.writer.write_frame(&frame).await {
            self.pending.lock().await.remove(&kind);
            if self.closed.load(Ordering::SeqCst) {
                return Err(ClientError::ChannelClosed);
            }
            return Err(err);
        }

        match rx.await {
            Ok(result) => result,
            // Reader task dropped the slot: the channel died mid-request.
            Err(_) => Err(ClientError::ChannelClosed),
        }
    }
}

async fn dispatch_frame(
    frame: &serde_json::Value,
    pending: &Mutex<HashMap<RequestKind, oneshot::Sender<Result<serde_json::Value>>>>,
    hello_slot: &Mutex<Option<oneshot::Sender<Hello>>>,
    event_tx: &mpsc::Sender<ClientEvent>,
) {
    let Some(incoming) = protocol::parse_incoming(frame) else {
        tracing::trace!("ignoring unrecognized frame from cmake server");
        return;
    };

    match incoming {
        IncomingFrame::Hello(hello) => {
            let versions = hello.supported_protocol_versions.clone();
            if let Some(tx) = hello_slot.lock().await.take() {
                let _ = tx.send(hello);
            } else {
                tracing::warn!("cmake server sent hello more than once");
            }
            let _ = event_tx.send(ClientEvent::Connected { versions }).await;
        }
        IncomingFrame::Reply { in_reply_to, body } => {
            let sender = pending.lock().await.remove(&in_reply_to);
            if let Some(tx) = sender {
                let _ = tx.send(Ok(body));
            } else {
                tracing::warn!(kind = %in_reply_to, "reply with no pending request");
            }
        }
        IncomingFrame::Error {
            in_reply_to,
            message,
        } => {
            let sender = match in_reply_to {
                Some(kind) => pending.lock().await.remove(&kind),
                None => None,
            };
            if let Some(tx) = sender {
                let _ = tx.send(Err(ClientError::Server { message }));
            } else {
                tracing::warn!(message = %message, "unsolicited error from cmake server");
            }
        }
        IncomingFrame::Progress(progress) => {
            let _ = event_tx.send(ClientEvent::Progress(progress)).await;
        }
        IncomingFrame::Message(msg) => {
            let _ = event_tx
                .send(ClientEvent::ServerMessage {
                    title: msg.title,
                    message: msg.message,
                })
                .await;
        }
        IncomingFrame::Signal(signal) => {
            let _ = event_tx.send(ClientEvent::Signal { name: signal.name }).await;
        }
    }
}
