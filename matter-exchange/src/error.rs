use thiserror::Error;

use matter_wire::{ExchangeId, ProtocolId, SessionId};

/// Errors raised by [`crate::exchange::MessageExchange`] (spec §7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("matter flow error: {0}")]
    MatterFlowError(String),
    #[error("underlying session has closed")]
    SessionClosed,
    #[error("retransmission limit reached without receiving an ack")]
    RetransmissionLimitReached,
    #[error("a response arrived where only a standalone ack was expected")]
    UnexpectedMessageError,
    #[error("a send is already awaiting an ack on this exchange")]
    SendAlreadyPending,
    #[error("a timed interaction is already running")]
    InvalidAction,
    #[error("timed out waiting for the next message")]
    Timeout,
    #[error("exchange is closed")]
    ExchangeClosed,
    #[error("invalid send options: {0}")]
    InvalidSendOptions(String),
}

/// Errors raised by [`crate::dispatcher::Dispatcher`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error("no protocol handler registered for protocol {0}")]
    NoHandler(ProtocolId),
    #[error("session {0} is unknown to the dispatcher")]
    UnknownSession(SessionId),
    #[error("message on exchange {0} matches no existing exchange and is not an initial message")]
    UnknownExchange(ExchangeId),
}
