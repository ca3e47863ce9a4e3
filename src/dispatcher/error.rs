use thiserror::Error;

use super::RequesterId;

/// Failures of the intake queue or of the per-requester response channels.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The dispatcher has shut down and accepts no more envelopes.
    #[error("query intake is closed")]
    IntakeClosed,

    /// The requester dropped its inbox before the response was delivered.
    #[error("response channel for requester {0} is closed")]
    MailboxClosed(RequesterId),

    /// The requester has no live inbox to receive its response.
    #[error("requester {0} is not subscribed")]
    NotSubscribed(RequesterId),

    /// Someone already holds the receiving end of this requester's channel.
    #[error("requester {0} already has a subscriber")]
    AlreadySubscribed(RequesterId),

    /// Messages arrived out of the header-then-chunks order, or the
    /// reassembled body does not match its header.
    #[error("response protocol violation: {0}")]
    Protocol(String),
}
