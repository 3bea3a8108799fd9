//! The per-interaction MRP state machine (spec §3 `MessageExchange`, §4.4).
//!
//! Mirrors the teacher's concurrency idiom throughout the rest of this
//! workspace: no async runtime, a single `Mutex`-guarded mutable-state
//! struct, and background threads (here, [`crate::timer::Timer`]) for
//! anything that must fire later. A blocking `send()` stands in for the
//! spec's awaited promise: the retransmission timer resolves or rejects a
//! oneshot channel that `send()` blocks on.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use matter_wire::{
    Destination, ExchangeId, MessageId, PacketHeader, PayloadHeader, ProtocolId, SessionType,
    MATTER_MESSAGE_OVERHEAD,
};

use crate::channel::{Channel, ChannelError, Session, SessionKind};
use crate::error::ExchangeError;
use crate::message::{Message, STANDALONE_ACK_MESSAGE_TYPE};
use crate::timer::Timer;

/// Total wire transmissions permitted for one outstanding message, including
/// the initial send (spec §4.4.3: "typically 5 total attempts").
pub const MAX_TRANSMISSIONS: u8 = 5;

/// Standalone-ack deferral window (spec §4.4.4).
pub const STANDALONE_ACK_TIMEOUT: Duration = Duration::from_millis(200);

const INBOUND_QUEUE_CAPACITY: usize = 8;

/// Constructor inputs shared by [`MessageExchange::from_initial_message`] and
/// [`MessageExchange::initiate`].
pub struct ExchangeContext {
    pub session: Arc<dyn Session>,
    pub channel: Arc<dyn Channel>,
    /// Invoked with the current retransmission counter on every retry (spec
    /// §9: "the context's `retry(counter)` callback").
    pub retry_hook: Option<Arc<dyn Fn(u8) + Send + Sync>>,
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub requires_ack: Option<bool>,
    pub include_acknowledge_message_id: Option<MessageId>,
    pub is_standalone_ack: bool,
    pub expect_ack_only: bool,
    pub expected_processing_time: Option<Duration>,
}

enum AckOutcome {
    Acked(Option<Message>),
    LimitReached,
    Closed,
}

struct OutstandingSend {
    message_id: MessageId,
    acked_message_id: Option<MessageId>,
    packet_header: PacketHeader,
    payload_header: PayloadHeader,
    payload: Vec<u8>,
    expect_ack_only: bool,
    expected_processing_time: Option<Duration>,
    extra_wait_used: bool,
    waiter: mpsc::Sender<AckOutcome>,
}

#[derive(Default)]
struct MutableState {
    used: bool,
    closing: bool,
    closed: bool,
    retransmission_counter: u8,
    received_message_to_ack: Option<MessageId>,
    outstanding_send: Option<OutstandingSend>,
    timed_interaction_expired: bool,
}

/// One exchange: a short-lived, ordered message conversation on a session,
/// identified by `(session, exchangeId, initiator)` (GLOSSARY).
pub struct MessageExchange {
    session: Arc<dyn Session>,
    channel: Arc<dyn Channel>,
    retry_hook: Option<Arc<dyn Fn(u8) + Send + Sync>>,

    exchange_id: ExchangeId,
    protocol_id: ProtocolId,
    is_initiator: bool,
    peer_node_id: Option<matter_wire::NodeId>,

    state: Mutex<MutableState>,

    retransmission_timer: Timer,
    standalone_ack_timer: Timer,
    close_timer: Timer,
    timed_interaction_timer: Timer,

    inbound_tx: mpsc::SyncSender<Message>,
    inbound_rx: Mutex<mpsc::Receiver<Message>>,

    on_closed: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl MessageExchange {
    /// Responder-side constructor (spec §4.4): binds to the inbound
    /// message's `exchangeId`/`protocolId`.
    pub fn from_initial_message(ctx: ExchangeContext, message: &Message) -> Arc<Self> {
        Self::new(ctx, message.exchange_id, message.protocol_id, false)
    }

    /// Initiator-side constructor (spec §4.4): caller allocates `exchangeId`.
    pub fn initiate(
        ctx: ExchangeContext,
        exchange_id: ExchangeId,
        protocol_id: ProtocolId,
    ) -> Arc<Self> {
        Self::new(ctx, exchange_id, protocol_id, true)
    }

    fn new(
        ctx: ExchangeContext,
        exchange_id: ExchangeId,
        protocol_id: ProtocolId,
        is_initiator: bool,
    ) -> Arc<Self> {
        let peer_node_id = ctx.session.peer_node_id();
        let (inbound_tx, inbound_rx) = mpsc::sync_channel(INBOUND_QUEUE_CAPACITY);
        Arc::new(Self {
            session: ctx.session,
            channel: ctx.channel,
            retry_hook: ctx.retry_hook,
            exchange_id,
            protocol_id,
            is_initiator,
            peer_node_id,
            state: Mutex::new(MutableState::default()),
            retransmission_timer: Timer::new(),
            standalone_ack_timer: Timer::new(),
            close_timer: Timer::new(),
            timed_interaction_timer: Timer::new(),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            on_closed: Mutex::new(None),
        })
    }

    pub fn exchange_id(&self) -> ExchangeId {
        self.exchange_id
    }

    pub fn protocol_id(&self) -> ProtocolId {
        self.protocol_id
    }

    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    pub fn is_closing(&self) -> bool {
        self.state.lock().expect("exchange state lock poisoned").closing
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("exchange state lock poisoned").closed
    }

    /// `channel.maxPayloadSize - MATTER_MESSAGE_OVERHEAD` (spec §4.4.7).
    pub fn max_payload_size(&self) -> usize {
        self.channel
            .max_payload_size()
            .saturating_sub(MATTER_MESSAGE_OVERHEAD)
    }

    /// Registers the dispatcher's hook to be run exactly once, when this
    /// exchange transitions to closed (spec §5: "a session... removes
    /// [exchanges] on close").
    pub fn on_closed(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_closed.lock().expect("on_closed lock poisoned") = Some(Box::new(hook));
    }

    // ---- 4.4.1 Inbound handling ------------------------------------------------

    pub fn on_message_received(
        self: &Arc<Self>,
        mut message: Message,
        duplicate: bool,
    ) -> Result<(), ExchangeError> {
        // Rule 1
        if message.requires_ack && !self.session.uses_mrp() {
            message.requires_ack = false;
        }

        // Rule 2
        let is_standalone_ack_on_secure_channel =
            message.protocol_id == ProtocolId::SECURE_CHANNEL && message.is_standalone_ack();
        if message.protocol_id != self.protocol_id && !is_standalone_ack_on_secure_channel {
            return Err(ExchangeError::MatterFlowError(format!(
                "message on protocol {} does not match exchange protocol {}",
                message.protocol_id, self.protocol_id
            )));
        }

        // Rule 3
        self.session.mark_activity();

        // Rule 4
        if duplicate {
            if message.requires_ack {
                self.send_standalone_ack(message.message_id);
            }
            return Ok(());
        }

        let mut state = self.state.lock().expect("exchange state lock poisoned");

        // Rule 5: peer is retransmitting a reply we've already acked and sent.
        if let Some(outstanding) = state.outstanding_send.as_ref() {
            if outstanding.acked_message_id == Some(message.message_id) {
                let packet_header = outstanding.packet_header;
                let payload_header = outstanding.payload_header;
                let payload = outstanding.payload.clone();
                drop(state);
                let _ = self.channel.send(&packet_header, &payload_header, &payload);
                return Ok(());
            }
        }

        // Rule 6: match the inbound ack against our outstanding send.
        if let Some(outstanding) = state.outstanding_send.take() {
            match message.acked_message_id {
                None => {
                    state.outstanding_send = Some(outstanding);
                    return Err(ExchangeError::MatterFlowError(
                        "Previous message ack is missing".into(),
                    ));
                }
                Some(acked_id) if acked_id == outstanding.message_id => {
                    self.retransmission_timer.stop();
                    state.retransmission_counter = 0;
                    let standalone = message.is_standalone_ack();
                    let _ = outstanding.waiter.send(AckOutcome::Acked(if standalone {
                        None
                    } else {
                        Some(message.clone())
                    }));
                    if standalone && state.closing && self.close_timer.is_running() {
                        drop(state);
                        self.finish_close();
                        return Ok(());
                    }
                }
                Some(_) if message.is_standalone_ack() => {
                    // Standalone ack mismatches are silently ignored.
                    state.outstanding_send = Some(outstanding);
                }
                Some(_) => {
                    state.outstanding_send = Some(outstanding);
                    return Err(ExchangeError::MatterFlowError(
                        "Incorrect ack received".into(),
                    ));
                }
            }
        }

        // Rule 7
        if message.is_standalone_ack() {
            return Ok(());
        }

        // Rule 8
        if message.requires_ack {
            if let Some(pending) = state.received_message_to_ack.take() {
                self.standalone_ack_timer.stop();
                drop(state);
                self.send_standalone_ack(pending);
                state = self.state.lock().expect("exchange state lock poisoned");
            }
            state.received_message_to_ack = Some(message.message_id);
            drop(state);
            self.standalone_ack_timer.start(STANDALONE_ACK_TIMEOUT, {
                let weak = Arc::downgrade(self);
                move || {
                    if let Some(exchange) = weak.upgrade() {
                        exchange.on_standalone_ack_timer_fired();
                    }
                }
            });
        } else {
            drop(state);
        }

        // Rule 9
        let _ = self.inbound_tx.send(message);
        Ok(())
    }

    fn on_standalone_ack_timer_fired(self: &Arc<Self>) {
        let pending = {
            let mut state = self.state.lock().expect("exchange state lock poisoned");
            state.received_message_to_ack.take()
        };
        if let Some(message_id) = pending {
            self.send_standalone_ack(message_id);
        }
    }

    fn send_standalone_ack(self: &Arc<Self>, acked_message_id: MessageId) {
        let message_id = self.session.next_message_id();
        let Ok(packet_header) = self.build_packet_header(message_id) else {
            return;
        };
        let payload_header = PayloadHeader {
            exchange_id: self.exchange_id,
            protocol_id: ProtocolId::SECURE_CHANNEL,
            message_type: STANDALONE_ACK_MESSAGE_TYPE,
            is_initiator_message: self.is_initiator,
            requires_ack: false,
            has_secured_extension: false,
            acked_message_id: Some(acked_message_id),
        };
        let _ = self.channel.send(&packet_header, &payload_header, &[]);
    }

    // ---- 4.4.2 Outbound handling ------------------------------------------------

    pub fn send(
        self: &Arc<Self>,
        message_type: u8,
        payload: Vec<u8>,
        options: SendOptions,
    ) -> Result<Option<Message>, ExchangeError> {
        if !self.session.uses_mrp() {
            if options.include_acknowledge_message_id.is_some() {
                return Err(ExchangeError::InvalidSendOptions(
                    "cannot piggyback an ack when MRP is disabled".into(),
                ));
            }
            if options.is_standalone_ack {
                return Ok(None);
            }
        }
        if options.is_standalone_ack && options.requires_ack == Some(true) {
            return Err(ExchangeError::MatterFlowError(
                "a standalone ack cannot itself require an ack".into(),
            ));
        }

        let (waiter_tx, waiter_rx) = mpsc::channel();
        let (packet_header, payload_header, requires_ack) = {
            let mut state = self.state.lock().expect("exchange state lock poisoned");
            if state.closed {
                return Err(ExchangeError::ExchangeClosed);
            }
            if state.outstanding_send.is_some() {
                return Err(ExchangeError::SendAlreadyPending);
            }

            let acked_message_id = match options.include_acknowledge_message_id {
                Some(id) => Some(id),
                None => {
                    let pending = state.received_message_to_ack.take();
                    if pending.is_some() {
                        self.standalone_ack_timer.stop();
                    }
                    pending
                }
            };

            let requires_ack = options
                .requires_ack
                .unwrap_or(self.session.uses_mrp() && !options.is_standalone_ack);

            let message_id = self.session.next_message_id();
            let packet_header = self.build_packet_header(message_id)?;
            let payload_header = PayloadHeader {
                exchange_id: self.exchange_id,
                protocol_id: self.protocol_id,
                message_type,
                is_initiator_message: self.is_initiator,
                requires_ack,
                has_secured_extension: false,
                acked_message_id,
            };

            state.used = true;

            if requires_ack {
                state.retransmission_counter = 1;
                state.outstanding_send = Some(OutstandingSend {
                    message_id,
                    acked_message_id,
                    packet_header,
                    payload_header,
                    payload: payload.clone(),
                    expect_ack_only: options.expect_ack_only,
                    expected_processing_time: options.expected_processing_time,
                    extra_wait_used: false,
                    waiter: waiter_tx,
                });
            }

            (packet_header, payload_header, requires_ack)
        };

        self.channel
            .send(&packet_header, &payload_header, &payload)
            .map_err(|err| self.handle_send_error(err))?;

        if !requires_ack {
            return Ok(None);
        }

        self.retransmission_timer
            .start(self.channel.mrp_resubmission_backoff(0), {
                let weak = Arc::downgrade(self);
                move || {
                    if let Some(exchange) = weak.upgrade() {
                        exchange.on_retransmission_timer_fired();
                    }
                }
            });

        match waiter_rx.recv() {
            Ok(AckOutcome::Acked(reply)) => {
                if options.expect_ack_only && reply.is_some() {
                    return Err(ExchangeError::UnexpectedMessageError);
                }
                Ok(reply)
            }
            Ok(AckOutcome::LimitReached) => Err(ExchangeError::RetransmissionLimitReached),
            Ok(AckOutcome::Closed) | Err(_) => Err(ExchangeError::SessionClosed),
        }
    }

    fn handle_send_error(self: &Arc<Self>, err: ChannelError) -> ExchangeError {
        if matches!(err, ChannelError::SessionClosed) {
            self.close_immediately();
            ExchangeError::SessionClosed
        } else {
            ExchangeError::MatterFlowError(format!("channel send failed: {err}"))
        }
    }

    fn build_packet_header(&self, message_id: MessageId) -> Result<PacketHeader, ExchangeError> {
        let peer_node_id = self.peer_node_id.ok_or_else(|| {
            ExchangeError::MatterFlowError("session has no peer node id".into())
        })?;
        let destination = match self.session.kind() {
            SessionKind::Unicast => Destination::Node(peer_node_id),
            SessionKind::Group => {
                let group = self
                    .session
                    .group_id_for(peer_node_id)
                    .map_err(|err| ExchangeError::MatterFlowError(err.to_string()))?;
                Destination::Group(group)
            }
        };
        Ok(PacketHeader {
            session_id: self.session.peer_session_id(),
            session_type: match self.session.kind() {
                SessionKind::Unicast => SessionType::Unicast,
                SessionKind::Group => SessionType::Group,
            },
            message_id,
            source_node_id: self.session.node_id(),
            destination,
            has_privacy_enhancements: false,
            is_control_message: false,
            has_message_extensions: false,
        })
    }

    // ---- 4.4.3 Retransmission ------------------------------------------------

    fn on_retransmission_timer_fired(self: &Arc<Self>) {
        let mut state = self.state.lock().expect("exchange state lock poisoned");
        if state.outstanding_send.is_none() {
            return;
        }

        if state.closing || state.retransmission_counter >= MAX_TRANSMISSIONS {
            let expected_processing_time = state
                .outstanding_send
                .as_ref()
                .and_then(|outstanding| outstanding.expected_processing_time);
            let extra_wait_used = state
                .outstanding_send
                .as_ref()
                .map(|outstanding| outstanding.extra_wait_used)
                .unwrap_or(true);

            if let Some(expected) = expected_processing_time {
                if !extra_wait_used {
                    if let Some(outstanding) = state.outstanding_send.as_mut() {
                        outstanding.extra_wait_used = true;
                    }
                    state.retransmission_counter = state.retransmission_counter.saturating_sub(1);
                    drop(state);
                    self.retransmission_timer.start(expected, {
                        let weak = Arc::downgrade(self);
                        move || {
                            if let Some(exchange) = weak.upgrade() {
                                exchange.on_retransmission_timer_fired();
                            }
                        }
                    });
                    return;
                }
            }

            let outstanding = state.outstanding_send.take();
            let closing = state.closing;
            drop(state);
            if let Some(outstanding) = outstanding {
                let _ = outstanding.waiter.send(AckOutcome::LimitReached);
            }
            if closing && self.close_timer.is_running() {
                self.finish_close();
            }
            return;
        }

        state.retransmission_counter += 1;
        let counter = state.retransmission_counter;
        let outstanding = state.outstanding_send.as_ref().expect("checked above");
        let packet_header = outstanding.packet_header;
        let payload_header = outstanding.payload_header;
        let payload = outstanding.payload.clone();
        drop(state);

        self.session.mark_activity();
        if let Some(hook) = &self.retry_hook {
            hook(counter);
        }

        let backoff = self.channel.mrp_resubmission_backoff(counter);
        match self.channel.send(&packet_header, &payload_header, &payload) {
            Ok(()) => {
                self.retransmission_timer.start(backoff, {
                    let weak = Arc::downgrade(self);
                    move || {
                        if let Some(exchange) = weak.upgrade() {
                            exchange.on_retransmission_timer_fired();
                        }
                    }
                });
            }
            Err(ChannelError::SessionClosed) => {
                self.close_immediately();
            }
            Err(_) => {
                self.retransmission_timer.start(backoff, {
                    let weak = Arc::downgrade(self);
                    move || {
                        if let Some(exchange) = weak.upgrade() {
                            exchange.on_retransmission_timer_fired();
                        }
                    }
                });
            }
        }
    }

    // ---- 4.4.5 Timed interaction window ------------------------------------------------

    pub fn start_timed_interaction(self: &Arc<Self>, timeout: Duration) -> Result<(), ExchangeError> {
        if self.timed_interaction_timer.is_running() {
            return Err(ExchangeError::InvalidAction);
        }
        self.state
            .lock()
            .expect("exchange state lock poisoned")
            .timed_interaction_expired = false;
        self.timed_interaction_timer.start(timeout, {
            let weak = Arc::downgrade(self);
            move || {
                if let Some(exchange) = weak.upgrade() {
                    exchange
                        .state
                        .lock()
                        .expect("exchange state lock poisoned")
                        .timed_interaction_expired = true;
                }
            }
        });
        Ok(())
    }

    pub fn has_active_timed_interaction(&self) -> bool {
        self.timed_interaction_timer.is_running()
    }

    pub fn has_expired_timed_interaction(&self) -> bool {
        self.state
            .lock()
            .expect("exchange state lock poisoned")
            .timed_interaction_expired
    }

    // ---- 4.4.6 Close ------------------------------------------------

    pub fn close(self: &Arc<Self>, force: bool) {
        let mut state = self.state.lock().expect("exchange state lock poisoned");
        if state.closed {
            return;
        }
        state.closing = true;

        if !state.used {
            drop(state);
            self.finish_close();
            return;
        }

        if let Some(pending) = state.received_message_to_ack.take() {
            self.standalone_ack_timer.stop();
            drop(state);
            self.send_standalone_ack(pending);
            if force {
                self.finish_close();
                return;
            }
            state = self.state.lock().expect("exchange state lock poisoned");
        }

        if force {
            let outstanding = state.outstanding_send.take();
            drop(state);
            if let Some(outstanding) = outstanding {
                let _ = outstanding.waiter.send(AckOutcome::Closed);
            }
            self.finish_close();
            return;
        }

        if state.outstanding_send.is_some() {
            let counter = state.retransmission_counter;
            drop(state);
            let remaining: Duration = (counter..MAX_TRANSMISSIONS)
                .map(|i| self.channel.mrp_resubmission_backoff(i))
                .sum();
            self.close_timer.start(remaining, {
                let weak = Arc::downgrade(self);
                move || {
                    if let Some(exchange) = weak.upgrade() {
                        exchange.close(true);
                    }
                }
            });
            return;
        }

        drop(state);
        self.finish_close();
    }

    /// Idempotent hard close: flushes a pending ack, then transitions to
    /// closed (spec §4.4.6).
    pub fn destroy(self: &Arc<Self>) {
        let pending = {
            let mut state = self.state.lock().expect("exchange state lock poisoned");
            if state.closed {
                return;
            }
            state.received_message_to_ack.take()
        };
        if let Some(message_id) = pending {
            self.standalone_ack_timer.stop();
            self.send_standalone_ack(message_id);
        }
        self.finish_close();
    }

    fn close_immediately(self: &Arc<Self>) {
        self.finish_close();
    }

    fn finish_close(self: &Arc<Self>) {
        let outstanding = {
            let mut state = self.state.lock().expect("exchange state lock poisoned");
            if state.closed {
                return;
            }
            state.closed = true;
            state.closing = true;
            state.outstanding_send.take()
        };
        self.retransmission_timer.stop();
        self.standalone_ack_timer.stop();
        self.close_timer.stop();
        self.timed_interaction_timer.stop();
        if let Some(outstanding) = outstanding {
            let _ = outstanding.waiter.send(AckOutcome::Closed);
        }
        if let Some(hook) = self.on_closed.lock().expect("on_closed lock poisoned").take() {
            hook();
        }
    }

    // ---- Inbound application queue ------------------------------------------------

    /// Reads the next application message, blocking at most `timeout` (or a
    /// session-derived maximum peer response time) if none is already
    /// buffered (spec §5: `nextMessage`).
    pub fn next_message(
        &self,
        timeout: Option<Duration>,
        expected_processing_time: Option<Duration>,
    ) -> Result<Message, ExchangeError> {
        let rx = self.inbound_rx.lock().expect("inbound queue lock poisoned");
        if let Ok(message) = rx.try_recv() {
            return Ok(message);
        }
        let effective = timeout.unwrap_or_else(|| {
            let params = self.session.parameters();
            params.session_active_interval + expected_processing_time.unwrap_or_default()
        });
        rx.recv_timeout(effective).map_err(|_| ExchangeError::Timeout)
    }
}


#[cfg(test)]
mod tests {
    use super::tests_support::*;
    use super::*;
    use matter_wire::ExchangeId;
    use std::thread;

    fn test_exchange() -> (Arc<MessageExchange>, Arc<FakeChannel>) {
        let session: Arc<dyn Session> = Arc::new(FakeSession::unicast(1, 2));
        let channel = Arc::new(FakeChannel::new());
        let exchange = MessageExchange::initiate(
            context(session, channel.clone()),
            ExchangeId(10),
            ProtocolId(0x0001),
        );
        (exchange, channel)
    }

    #[test]
    fn send_without_ack_does_not_start_retransmission_timer() {
        let (exchange, channel) = test_exchange();
        let result = exchange.send(
            0x01,
            vec![1, 2, 3],
            SendOptions {
                requires_ack: Some(false),
                ..Default::default()
            },
        );
        assert_eq!(result, Ok(None));
        assert_eq!(channel.sent_count(), 1);
    }

    /// Builds an exchange whose channel's real MRP back-off is long enough
    /// that the background retransmission timer cannot fire during the test,
    /// so `on_retransmission_timer_fired` can be driven by hand for a
    /// deterministic attempt count (spec §8 scenarios 5 and 6).
    fn test_exchange_with_suppressed_timer() -> (Arc<MessageExchange>, Arc<FakeChannel>) {
        let session: Arc<dyn Session> = Arc::new(FakeSession::unicast(1, 2));
        let channel = Arc::new(FakeChannel::new());
        channel.backoff_override(Duration::from_secs(3600));
        let exchange = MessageExchange::initiate(
            context(session, channel.clone()),
            ExchangeId(10),
            ProtocolId(0x0001),
        );
        (exchange, channel)
    }

    /// Scenario 5 (MRP retransmission): ack arrives on the 3rd attempt -> 3
    /// total wire sends, counter resets, no further retransmission.
    #[test]
    fn mrp_retransmission_scenario_ack_on_third_attempt() {
        let (exchange, channel) = test_exchange_with_suppressed_timer();
        let exchange_for_thread = Arc::clone(&exchange);
        let handle = thread::spawn(move || {
            exchange_for_thread.send(0x01, vec![9, 9, 9], SendOptions::default())
        });

        thread::sleep(Duration::from_millis(30));
        assert_eq!(channel.sent_count(), 1);

        exchange.on_retransmission_timer_fired();
        assert_eq!(channel.sent_count(), 2);
        exchange.on_retransmission_timer_fired();
        assert_eq!(channel.sent_count(), 3);

        let ack = Message {
            message_id: MessageId(100),
            exchange_id: ExchangeId(10),
            protocol_id: ProtocolId(0x0001),
            message_type: 0x40,
            is_initiator_message: false,
            requires_ack: false,
            acked_message_id: Some(MessageId(1)),
            payload: vec![],
        };
        exchange.on_message_received(ack, false).unwrap();

        assert_eq!(handle.join().unwrap(), Ok(None));
        assert_eq!(channel.sent_count(), 3, "no further retransmission after the ack");
    }

    /// Scenario 6 (exchange close tail / give-up): no ack ever arrives ->
    /// exactly `MAX_TRANSMISSIONS` total wire sends, then
    /// `RetransmissionLimitReached`.
    #[test]
    fn mrp_retransmission_scenario_gives_up_after_max_transmissions() {
        let (exchange, channel) = test_exchange_with_suppressed_timer();
        let exchange_for_thread = Arc::clone(&exchange);
        let handle = thread::spawn(move || {
            exchange_for_thread.send(0x01, vec![1], SendOptions::default())
        });

        thread::sleep(Duration::from_millis(30));
        assert_eq!(channel.sent_count(), 1);

        for expected_sends in 2..=MAX_TRANSMISSIONS {
            exchange.on_retransmission_timer_fired();
            assert_eq!(channel.sent_count(), expected_sends as usize);
        }

        // One more fire: counter has reached MAX_TRANSMISSIONS, give up.
        exchange.on_retransmission_timer_fired();
        assert_eq!(
            channel.sent_count(),
            MAX_TRANSMISSIONS as usize,
            "give-up must not emit another wire send"
        );
        assert_eq!(handle.join().unwrap(), Err(ExchangeError::RetransmissionLimitReached));
    }

    #[test]
    fn acks_match_by_message_id_and_resolve_the_waiting_send() {
        let (exchange, _channel) = test_exchange();
        let exchange_for_thread = Arc::clone(&exchange);
        let handle = thread::spawn(move || {
            exchange_for_thread.send(0x01, vec![1], SendOptions::default())
        });

        thread::sleep(Duration::from_millis(30));

        let ack = Message {
            message_id: MessageId(500),
            exchange_id: ExchangeId(10),
            protocol_id: ProtocolId(0x0001),
            message_type: STANDALONE_ACK_MESSAGE_TYPE,
            is_initiator_message: false,
            requires_ack: false,
            acked_message_id: Some(MessageId(1)),
            payload: vec![],
        };
        exchange.on_message_received(ack, false).unwrap();

        let result = handle.join().unwrap();
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn incorrect_ack_is_reported_as_flow_error() {
        let (exchange, _channel) = test_exchange();
        let exchange_for_thread = Arc::clone(&exchange);
        let handle = thread::spawn(move || {
            exchange_for_thread.send(0x01, vec![1], SendOptions::default())
        });

        thread::sleep(Duration::from_millis(30));

        let wrong_ack = Message {
            message_id: MessageId(501),
            exchange_id: ExchangeId(10),
            protocol_id: ProtocolId(0x0001),
            message_type: 0x40,
            is_initiator_message: false,
            requires_ack: false,
            acked_message_id: Some(MessageId(999)),
            payload: vec![],
        };
        let outcome = exchange.on_message_received(wrong_ack, false);
        assert!(matches!(outcome, Err(ExchangeError::MatterFlowError(_))));

        // Now ack correctly so the spawned `send` can finish.
        let ack = Message {
            message_id: MessageId(502),
            exchange_id: ExchangeId(10),
            protocol_id: ProtocolId(0x0001),
            message_type: STANDALONE_ACK_MESSAGE_TYPE,
            is_initiator_message: false,
            requires_ack: false,
            acked_message_id: Some(MessageId(1)),
            payload: vec![],
        };
        exchange.on_message_received(ack, false).unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn duplicate_message_requiring_ack_gets_a_standalone_ack_without_enqueueing() {
        let (exchange, channel) = test_exchange();
        let message = Message {
            message_id: MessageId(1),
            exchange_id: ExchangeId(10),
            protocol_id: ProtocolId(0x0001),
            message_type: 0x01,
            is_initiator_message: false,
            requires_ack: true,
            acked_message_id: None,
            payload: vec![7],
        };
        exchange.on_message_received(message, true).unwrap();
        assert_eq!(channel.sent_count(), 1);
        assert!(exchange.next_message(Some(Duration::from_millis(10)), None).is_err());
    }

    #[test]
    fn standalone_ack_is_never_enqueued() {
        let (exchange, _channel) = test_exchange();
        let ack = Message {
            message_id: MessageId(1),
            exchange_id: ExchangeId(10),
            protocol_id: ProtocolId(0x0001),
            message_type: STANDALONE_ACK_MESSAGE_TYPE,
            is_initiator_message: false,
            requires_ack: false,
            acked_message_id: None,
            payload: vec![],
        };
        exchange.on_message_received(ack, false).unwrap();
        assert!(exchange.next_message(Some(Duration::from_millis(10)), None).is_err());
    }

    #[test]
    fn close_on_unused_exchange_closes_immediately() {
        let (exchange, _channel) = test_exchange();
        exchange.close(false);
        assert!(exchange.is_closed());
    }

    #[test]
    fn second_close_is_a_no_op() {
        let (exchange, _channel) = test_exchange();
        exchange.close(false);
        assert!(exchange.is_closed());
        exchange.close(false);
        assert!(exchange.is_closed());
    }

    #[test]
    fn timed_interaction_rejects_a_second_start_while_running() {
        let (exchange, _channel) = test_exchange();
        exchange.start_timed_interaction(Duration::from_secs(5)).unwrap();
        assert!(exchange.has_active_timed_interaction());
        assert_eq!(
            exchange.start_timed_interaction(Duration::from_secs(5)),
            Err(ExchangeError::InvalidAction)
        );
    }

    #[test]
    fn max_payload_size_subtracts_matter_overhead() {
        let (exchange, channel) = test_exchange();
        assert_eq!(
            exchange.max_payload_size(),
            channel.max_payload_size - MATTER_MESSAGE_OVERHEAD
        );
    }
}
