use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, trace, warn};

use super::{DispatchError, RequesterId};

/// Largest data chunk of a response, in bytes.
pub const MAX_CHUNK: usize = 1024;

/// First message of every response: how many chunks follow and how many
/// bytes they add up to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    pub requester: RequesterId,
    pub parts: usize,
    pub total_bytes: usize,
}

/// One message on a requester's outbound channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseMessage {
    Header(ResponseHeader),
    /// `seq` counts from zero within one response.
    Chunk { seq: usize, data: Vec<u8> },
}

/// Deterministic name of a requester's outbound channel.
pub fn channel_name(requester: RequesterId) -> String {
    format!("/response_{requester}")
}

/// Splits `body` into a header followed by `ceil(len / max_chunk)` chunks of
/// at most `max_chunk` bytes, in offset order.
///
/// An empty body produces a header with `parts = 0` and no chunks.
///
/// ## Example
/// ```text
/// 3000 bytes, max_chunk 1024
///   Header { parts: 3, total_bytes: 3000 }
///   Chunk { seq: 0, 1024 bytes }
///   Chunk { seq: 1, 1024 bytes }
///   Chunk { seq: 2,  952 bytes }
/// ```
pub fn chunk_response(requester: RequesterId, body: &[u8], max_chunk: usize) -> Vec<ResponseMessage> {
    let parts = body.len().div_ceil(max_chunk);
    let mut messages = Vec::with_capacity(parts + 1);
    messages.push(ResponseMessage::Header(ResponseHeader {
        requester,
        parts,
        total_bytes: body.len(),
    }));
    messages.extend(
        body.chunks(max_chunk)
            .enumerate()
            .map(|(seq, data)| ResponseMessage::Chunk {
                seq,
                data: data.to_vec(),
            }),
    );
    messages
}

/// Sending side of one requester's channel, kept by the router.
struct Outbound {
    tx: mpsc::Sender<ResponseMessage>,
    /// Receiver not yet claimed by [`ResponseRouter::subscribe`].
    unclaimed: Option<mpsc::Receiver<ResponseMessage>>,
    /// Held for the whole header-and-chunks sequence of one response.
    delivery: Arc<AsyncMutex<()>>,
}

/// Registry of per-requester outbound channels.
///
/// A channel is created the first time either side names the requester and
/// is reused afterwards; delivering a response never closes it. Channels
/// are bounded, so a requester that stops reading eventually stalls the
/// worker delivering to it.
///
/// Responses for one requester are delivered one at a time, so the chunks
/// of two queries never interleave on the same channel.
pub struct ResponseRouter {
    outbound_capacity: usize,
    max_chunk: usize,
    channels: Mutex<HashMap<RequesterId, Outbound>>,
}

impl ResponseRouter {
    /// A `max_chunk` of zero is raised to one byte.
    pub fn new(outbound_capacity: usize, max_chunk: usize) -> Self {
        Self {
            outbound_capacity,
            max_chunk: max_chunk.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    /// Claims the receiving end of `requester`'s channel, opening it if
    /// needed.
    ///
    /// A channel whose previous inbox was dropped is replaced by a fresh
    /// one, so a reconnecting requester can subscribe again.
    pub fn subscribe(&self, requester: RequesterId) -> Result<Inbox, DispatchError> {
        let mut channels = self.channels.lock();
        if channels
            .get(&requester)
            .is_some_and(|o| o.unclaimed.is_none() && o.tx.is_closed())
        {
            channels.remove(&requester);
        }
        let outbound = channels
            .entry(requester)
            .or_insert_with(|| Self::open(requester, self.outbound_capacity));
        let rx = outbound
            .unclaimed
            .take()
            .ok_or(DispatchError::AlreadySubscribed(requester))?;
        debug!(channel = %channel_name(requester), "requester subscribed");
        Ok(Inbox { requester, rx })
    }

    /// True while someone holds a live [`Inbox`] for `requester`.
    pub fn is_subscribed(&self, requester: RequesterId) -> bool {
        self.channels
            .lock()
            .get(&requester)
            .is_some_and(|o| o.unclaimed.is_none() && !o.tx.is_closed())
    }

    /// Sends `body` to `requester` as a header plus chunks.
    ///
    /// Opens the channel if the requester has not subscribed yet, so the
    /// response waits for a later [`subscribe`](Self::subscribe). If nobody
    /// ever subscribes, a full channel blocks this call; the dispatcher only
    /// delivers to subscribed requesters.
    pub async fn deliver(&self, requester: RequesterId, body: &str) -> Result<(), DispatchError> {
        let (tx, delivery) = {
            let mut channels = self.channels.lock();
            let outbound = channels
                .entry(requester)
                .or_insert_with(|| Self::open(requester, self.outbound_capacity));
            (outbound.tx.clone(), Arc::clone(&outbound.delivery))
        };

        let _turn = delivery.lock().await;
        for message in chunk_response(requester, body.as_bytes(), self.max_chunk) {
            trace!(%requester, ?message, "sending response message");
            if tx.send(message).await.is_err() {
                warn!(%requester, "requester went away before its response was delivered");
                self.close(requester);
                return Err(DispatchError::MailboxClosed(requester));
            }
        }
        Ok(())
    }

    /// Forgets `requester`'s channel.
    pub fn close(&self, requester: RequesterId) {
        if self.channels.lock().remove(&requester).is_some() {
            debug!(channel = %channel_name(requester), "channel closed");
        }
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    fn open(requester: RequesterId, capacity: usize) -> Outbound {
        debug!(channel = %channel_name(requester), capacity, "opening response channel");
        let (tx, rx) = mpsc::channel(capacity);
        Outbound {
            tx,
            unclaimed: Some(rx),
            delivery: Arc::new(AsyncMutex::new(())),
        }
    }
}

/// Receiving end of one requester's channel.
pub struct Inbox {
    requester: RequesterId,
    rx: mpsc::Receiver<ResponseMessage>,
}

impl Inbox {
    pub fn requester(&self) -> RequesterId {
        self.requester
    }

    /// Deterministic channel name, see [`channel_name`].
    pub fn name(&self) -> String {
        channel_name(self.requester)
    }

    /// Next raw message, or `None` once the router dropped the channel.
    pub async fn recv_message(&mut self) -> Option<ResponseMessage> {
        self.rx.recv().await
    }

    /// Receives one complete response and reassembles its text.
    ///
    /// Expects a header followed by exactly `parts` chunks numbered from
    /// zero, whose sizes add up to `total_bytes`.
    pub async fn recv_response(&mut self) -> Result<String, DispatchError> {
        let header = match self.rx.recv().await {
            Some(ResponseMessage::Header(header)) => header,
            Some(ResponseMessage::Chunk { seq, .. }) => {
                return Err(DispatchError::Protocol(format!(
                    "chunk {seq} arrived before a header"
                )))
            }
            None => return Err(DispatchError::MailboxClosed(self.requester)),
        };
        if header.requester != self.requester {
            return Err(DispatchError::Protocol(format!(
                "header addressed to requester {}",
                header.requester
            )));
        }

        let mut body = Vec::with_capacity(header.total_bytes);
        for expected in 0..header.parts {
            match self.rx.recv().await {
                Some(ResponseMessage::Chunk { seq, data }) if seq == expected => body.extend(data),
                Some(ResponseMessage::Chunk { seq, .. }) => {
                    return Err(DispatchError::Protocol(format!(
                        "expected chunk {expected}, got {seq}"
                    )))
                }
                Some(ResponseMessage::Header(_)) => {
                    return Err(DispatchError::Protocol(format!(
                        "header arrived while waiting for chunk {expected}"
                    )))
                }
                None => return Err(DispatchError::MailboxClosed(self.requester)),
            }
        }

        if body.len() != header.total_bytes {
            return Err(DispatchError::Protocol(format!(
                "header announced {} bytes, chunks carried {}",
                header.total_bytes,
                body.len()
            )));
        }
        String::from_utf8(body).map_err(|e| DispatchError::Protocol(e.to_string()))
    }
}
