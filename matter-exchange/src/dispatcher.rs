//! Fabric-scoped session/exchange dispatch (spec §2, §5).
//!
//! The dispatcher is the sole producer of [`MessageExchange`] instances: it
//! routes an inbound message to an existing exchange by `(session, exchangeId,
//! initiator)`, or — for an unsolicited initial message — creates one and
//! hands it to the [`ProtocolHandler`] registered for its `protocolId`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use matter_fabric::FabricManager;
use matter_wire::{ExchangeId, ProtocolId, SessionId};
use tracing::{debug, warn};

use crate::channel::{Channel, Session};
use crate::error::DispatchError;
use crate::exchange::{ExchangeContext, MessageExchange};
use crate::message::Message;
use crate::protocol::ProtocolHandler;

/// Exchanges are keyed by the session they live on, the wire `exchangeId`,
/// and which side allocated it — two peers can legitimately pick the same
/// `exchangeId` independently (spec §2: "matching (session, exchangeId,
/// peerInitiator)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ExchangeKey {
    session_id: SessionId,
    exchange_id: ExchangeId,
    initiated_here: bool,
}

struct SessionEntry {
    session: Arc<dyn Session>,
    channel: Arc<dyn Channel>,
    exchanges: Vec<ExchangeKey>,
}

/// Routes inbound messages to the exchange they belong to, creating new
/// exchanges for unsolicited initial messages and tying exchange lifetime to
/// the owning session (spec §5: "a session owns the set of exchanges it
/// hosts and removes them on close").
type ExchangeTable = Arc<RwLock<HashMap<ExchangeKey, Arc<MessageExchange>>>>;

pub struct Dispatcher {
    fabrics: Option<Arc<FabricManager>>,
    handlers: RwLock<HashMap<u32, Arc<dyn ProtocolHandler>>>,
    exchanges: ExchangeTable,
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            fabrics: None,
            handlers: RwLock::new(HashMap::new()),
            exchanges: Arc::new(RwLock::new(HashMap::new())),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Scopes dispatch decisions to a fabric table, so a session whose
    /// `accessing_fabric_index` no longer resolves in the table can be
    /// rejected (component 3: "fabric-scoped session/exchange dispatch").
    pub fn with_fabrics(mut self, fabrics: Arc<FabricManager>) -> Self {
        self.fabrics = Some(fabrics);
        self
    }

    pub fn register_handler(&self, protocol_id: ProtocolId, handler: Arc<dyn ProtocolHandler>) {
        self.handlers
            .write()
            .expect("handler registry lock poisoned")
            .insert(protocol_id.get(), handler);
    }

    /// Registers a session as a dispatch target. Must be called before any
    /// message on that session is dispatched.
    pub fn register_session(&self, session: Arc<dyn Session>, channel: Arc<dyn Channel>) {
        let session_id = session.id();
        self.sessions.write().expect("session table lock poisoned").insert(
            session_id,
            SessionEntry {
                session,
                channel,
                exchanges: Vec::new(),
            },
        );
    }

    /// Tears down every exchange hosted on `session_id`, then forgets the
    /// session (spec §5).
    pub fn close_session(&self, session_id: SessionId) {
        let keys = {
            let mut sessions = self.sessions.write().expect("session table lock poisoned");
            match sessions.remove(&session_id) {
                Some(entry) => entry.exchanges,
                None => return,
            }
        };
        let mut exchanges = self.exchanges.write().expect("exchange table lock poisoned");
        for key in keys {
            if let Some(exchange) = exchanges.remove(&key) {
                exchange.destroy();
            }
        }
    }

    /// Routes one inbound, already session-decrypted message (spec §4.4.1's
    /// entry point, applied per-session by the dispatcher).
    pub fn dispatch(&self, session_id: SessionId, message: Message) -> Result<(), DispatchError> {
        let initiated_here = !message.is_initiator_message;
        let key = ExchangeKey {
            session_id,
            exchange_id: message.exchange_id,
            initiated_here,
        };

        if let Some(exchange) = self.exchanges.read().expect("exchange table lock poisoned").get(&key)
        {
            let duplicate = self.is_duplicate(session_id, message.message_id);
            return exchange
                .on_message_received(message, duplicate)
                .map_err(DispatchError::from);
        }

        if !message.is_initiator_message {
            return Err(DispatchError::UnknownExchange(message.exchange_id));
        }

        self.create_responder_exchange(session_id, key, message)
    }

    fn is_duplicate(&self, session_id: SessionId, message_id: matter_wire::MessageId) -> bool {
        self.sessions
            .read()
            .expect("session table lock poisoned")
            .get(&session_id)
            .map(|entry| entry.session.is_duplicate(message_id))
            .unwrap_or(false)
    }

    fn create_responder_exchange(
        &self,
        session_id: SessionId,
        key: ExchangeKey,
        message: Message,
    ) -> Result<(), DispatchError> {
        let handler = self
            .handlers
            .read()
            .expect("handler registry lock poisoned")
            .get(&message.protocol_id.get())
            .cloned()
            .ok_or(DispatchError::NoHandler(message.protocol_id))?;

        let (session, channel) = {
            let sessions = self.sessions.read().expect("session table lock poisoned");
            let entry = sessions
                .get(&session_id)
                .ok_or(DispatchError::UnknownSession(session_id))?;
            (Arc::clone(&entry.session), Arc::clone(&entry.channel))
        };

        if let Some(fabrics) = &self.fabrics {
            if let Some(index) = session.accessing_fabric_index() {
                if fabrics.for_index(index).is_err() {
                    warn!(%index, "rejecting exchange on session scoped to an unknown fabric");
                    return Err(DispatchError::UnknownSession(session_id));
                }
            }
        }

        let exchange = MessageExchange::from_initial_message(
            ExchangeContext {
                session,
                channel,
                retry_hook: None,
            },
            &message,
        );

        self.exchanges
            .write()
            .expect("exchange table lock poisoned")
            .insert(key, Arc::clone(&exchange));
        if let Some(entry) = self
            .sessions
            .write()
            .expect("session table lock poisoned")
            .get_mut(&session_id)
        {
            entry.exchanges.push(key);
        }

        {
            let exchanges = Arc::clone(&self.exchanges);
            exchange.on_closed(move || {
                exchanges.write().expect("exchange table lock poisoned").remove(&key);
            });
        }

        debug!(exchange_id = %message.exchange_id, protocol_id = %message.protocol_id, "created exchange for initial message");
        exchange.on_message_received(message, false)?;
        handler.on_new_exchange(exchange);
        Ok(())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
