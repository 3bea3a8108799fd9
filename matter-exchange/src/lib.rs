pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod exchange;
pub mod message;
pub mod protocol;
pub mod timer;

pub use channel::{Channel, ChannelError, Session, SessionKind, SessionParameters};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, ExchangeError};
pub use exchange::{
    ExchangeContext, MessageExchange, SendOptions, MAX_TRANSMISSIONS, STANDALONE_ACK_TIMEOUT,
};
pub use message::{Message, STANDALONE_ACK_MESSAGE_TYPE};
pub use protocol::ProtocolHandler;
pub use timer::Timer;
