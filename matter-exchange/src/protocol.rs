use std::sync::Arc;

use crate::exchange::MessageExchange;

/// The consumer of a [`MessageExchange`]'s application-layer traffic (spec
/// §1: "protocol handlers" are out-of-scope clusters/BDX/DCL; this is the
/// seam they plug into). Dispatched exactly once per newly-created exchange;
/// the handler is responsible for servicing the exchange's lifetime,
/// typically by pulling from `exchange.next_message()` on its own thread.
pub trait ProtocolHandler: Send + Sync {
    fn on_new_exchange(&self, exchange: Arc<MessageExchange>);
}
