//! Session state and packet dispatch.
//!
//! A [`Session`] is a sans-IO state machine. The owner feeds it inbound
//! packets, send completions and timer expiries, and drains the resulting
//! transmissions and events:
//!
//! ```text
//!   handle_packet ──────────┐           ┌──> poll_transmit
//!   handle_send_completed ──┼─> Session ┼──> poll_event
//!   handle_timeout ─────────┘           └──> poll_timeout
//! ```
//!
//! Every method takes `&mut self`; the owner serializes access.

use std::collections::VecDeque;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::core::{ConfigError, MAX_PAYLOAD_SIZE, SendError, SessionError};
use crate::reliability::{
    Acceptance, InFlight, InFlightKind, RetryDecision, RetryEngine, SequenceTracker,
};
use crate::wire::{MacAddr, Packet, PacketHeader};

use super::config::SessionConfig;
use super::event::{
    ConnectionEvent, Destination, MessageStatus, Role, SendStatus, SessionEvent, SessionState,
    SessionStats, Transmit,
};
use super::handshake::Handshake;
use super::timer::{TimerHandle, TimerKind, TimerTable, jittered};

/// Last acknowledgment sent for an inbound Data message.
#[derive(Debug, Clone)]
struct LastAck {
    seq: u8,
    bytes: Vec<u8>,
}

/// One protocol instance pairing with a single peer.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    local_addr: MacAddr,
    state: SessionState,

    handshake: Handshake,
    sequence: SequenceTracker,
    retry: RetryEngine,
    timers: TimerTable,
    /// Deadline of the running handshake attempt.
    handshake_timer: Option<TimerHandle>,

    /// Payload to piggyback on the next acknowledgment.
    reply_payload: Option<Vec<u8>>,
    /// Replayed when the peer retries the same Data message.
    last_ack: Option<LastAck>,

    transmits: VecDeque<Transmit>,
    events: VecDeque<SessionEvent>,
    stats: SessionStats,
}

impl Session {
    /// Create a session for the device at `local_addr`.
    pub fn new(config: SessionConfig, local_addr: MacAddr) -> Result<Self, ConfigError> {
        config.validate()?;
        if local_addr.is_multicast() {
            return Err(ConfigError::InvalidLocalAddress(local_addr.to_string()));
        }

        Ok(Self {
            retry: RetryEngine::new(config.max_retries),
            config,
            local_addr,
            state: SessionState::Unconnected,
            handshake: Handshake::new(),
            sequence: SequenceTracker::new(),
            timers: TimerTable::new(),
            handshake_timer: None,
            reply_payload: None,
            last_ack: None,
            transmits: VecDeque::new(),
            events: VecDeque::new(),
            stats: SessionStats::default(),
        })
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Address of this device.
    pub fn local_addr(&self) -> MacAddr {
        self.local_addr
    }

    /// Lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Role assigned by the last successful handshake.
    pub fn role(&self) -> Role {
        self.handshake.role()
    }

    /// Peer address, once a handshake packet has been exchanged.
    pub fn peer(&self) -> Option<MacAddr> {
        self.handshake.peer()
    }

    /// Check if the session is paired.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Check if a message is awaiting acknowledgment.
    pub fn has_in_flight(&self) -> bool {
        self.retry.is_busy()
    }

    /// Counters.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Accept `incoming_mode_id` on receive instead of the own mode id.
    pub fn set_asymmetric_mode(&mut self, incoming_mode_id: u8) {
        self.config.incoming_mode_id = Some(incoming_mode_id);
    }

    // =========================================================================
    // Caller operations
    // =========================================================================

    /// Start broadcasting for a peer.
    pub fn begin_connecting(&mut self, now: Instant) -> Result<(), SessionError> {
        match self.state {
            SessionState::Closed => Err(SessionError::Closed),
            SessionState::Connecting => Err(SessionError::AlreadyConnecting),
            SessionState::Connected => Err(SessionError::AlreadyConnected),
            SessionState::Unconnected | SessionState::Lost => {
                self.start_handshake(now);
                Ok(())
            }
        }
    }

    /// Send an application message to the peer.
    ///
    /// The outcome arrives later as [`SessionEvent::MessageResult`]. Only one
    /// message may be awaiting acknowledgment at a time.
    pub fn send_message(
        &mut self,
        now: Instant,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), SendError> {
        let payload = payload.into();
        match self.state {
            SessionState::Closed => return Err(SendError::Closed),
            SessionState::Connected => {}
            _ => return Err(SendError::NotConnected),
        }
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(SendError::payload_too_large(payload.len()));
        }
        if self.retry.is_busy() {
            return Err(SendError::Busy);
        }
        let peer = self.handshake.peer().ok_or(SendError::NotConnected)?;

        let seq = self.sequence.next_outgoing();
        let bytes = Packet::Data(self.header(seq), payload.clone())
            .encode()
            .map_err(|_| SendError::payload_too_large(payload.len()))?;

        trace!(seq, len = payload.len(), peer = %peer, "sending message");
        self.push_transmit(Destination::Unicast(peer), bytes.clone());
        self.retry.begin(InFlight::new(
            bytes,
            peer,
            seq,
            InFlightKind::Data(payload),
            now,
        ))?;
        self.arm_retry(now);
        Ok(())
    }

    /// Stage a payload for the next acknowledgment this session sends.
    ///
    /// An empty payload clears any staged one.
    pub fn set_reply_payload(&mut self, payload: impl Into<Vec<u8>>) -> Result<(), SendError> {
        if self.state == SessionState::Closed {
            return Err(SendError::Closed);
        }
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(SendError::payload_too_large(payload.len()));
        }
        self.reply_payload = (!payload.is_empty()).then_some(payload);
        Ok(())
    }

    /// Drop any staged reply payload.
    pub fn clear_reply_payload(&mut self) {
        self.reply_payload = None;
    }

    /// Override the negotiated role.
    ///
    /// Only valid while connected. The peer is not told, so both sides must
    /// apply matching overrides, e.g. when one device has to go first.
    pub fn set_role(&mut self, role: Role) -> Result<(), SessionError> {
        match self.state {
            SessionState::Closed => Err(SessionError::Closed),
            SessionState::Connected => {
                if !self.handshake.override_role(role) {
                    return Err(SessionError::InvalidRole);
                }
                info!(%role, "role overridden");
                Ok(())
            }
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Check if a reply payload is staged.
    pub fn has_reply_payload(&self) -> bool {
        self.reply_payload.is_some()
    }

    /// Tear the session down. No transmit or event is produced afterwards.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        info!(peer = ?self.handshake.peer(), "session closed");

        self.timers.cancel_all();
        self.handshake_timer = None;
        self.retry.abandon();
        self.handshake.reset();
        self.reply_payload = None;
        self.last_ack = None;
        self.transmits.clear();
        self.events.clear();
        self.state = SessionState::Closed;
    }

    // =========================================================================
    // Inputs
    // =========================================================================

    /// Process a packet delivered by the transport.
    pub fn handle_packet(&mut self, now: Instant, from: MacAddr, bytes: &[u8], rssi: i8) {
        if self.state == SessionState::Closed {
            return;
        }
        self.stats.received += 1;

        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.malformed += 1;
                trace!(src = %from, error = %e, "dropping malformed packet");
                return;
            }
        };

        if from == self.local_addr {
            self.drop_foreign(from, "own packet");
            return;
        }
        if packet.mode_id() != self.config.receive_mode_id() {
            self.drop_foreign(from, "mode mismatch");
            return;
        }
        if let Some(header) = packet.header() {
            if header.sender != from {
                self.drop_foreign(from, "sender address mismatch");
                return;
            }
        }

        match packet {
            Packet::Connect { .. } => self.on_connect(now, from, rssi),
            Packet::Start(header) => self.on_start(now, from, header),
            Packet::Ack(header) => self.on_ack(now, from, header, None),
            Packet::DataAck(header, payload) => self.on_ack(now, from, header, Some(payload)),
            Packet::Data(header, payload) => self.on_data(from, header, payload),
        }
    }

    /// Process the transport's report on a physical transmission.
    ///
    /// A failed send of the in-flight packet counts as a retry expiry. Other
    /// failures, acknowledgments included, are only logged.
    pub fn handle_send_completed(&mut self, now: Instant, transmit: &Transmit, status: SendStatus) {
        if self.state == SessionState::Closed || status == SendStatus::Success {
            return;
        }

        let is_in_flight = self.retry.in_flight().is_some_and(|in_flight| {
            transmit.destination == Destination::Unicast(in_flight.destination)
                && transmit.bytes == in_flight.bytes
        });
        if is_in_flight {
            debug!(dest = ?transmit.destination, "send failed, retrying early");
            self.timers.cancel_kind(TimerKind::Retry);
            self.on_retry_due(now);
        } else {
            trace!(dest = ?transmit.destination, "send failed");
        }
    }

    /// Fire every timer whose deadline has passed.
    pub fn handle_timeout(&mut self, now: Instant) {
        if self.state == SessionState::Closed {
            return;
        }

        for kind in self.timers.expire(now) {
            match kind {
                TimerKind::Retry => self.on_retry_due(now),
                TimerKind::RetriesExhausted => {
                    if let Some(in_flight) = self.retry.abandon() {
                        self.on_exhausted(now, in_flight);
                    }
                }
                TimerKind::Broadcast => {
                    if self.state == SessionState::Connecting && self.handshake.is_broadcasting()
                    {
                        self.broadcast_connect(now);
                    }
                }
                TimerKind::HandshakeTimeout => {
                    if self.state == SessionState::Connecting {
                        warn!("handshake timed out");
                        self.lose(now);
                    }
                }
                TimerKind::Reinit => {
                    let backing_off =
                        self.state == SessionState::Connecting && !self.handshake.is_active();
                    if self.state == SessionState::Lost || backing_off {
                        debug!("restarting handshake");
                        self.start_handshake(now);
                    }
                }
            }
        }
    }

    // =========================================================================
    // Outputs
    // =========================================================================

    /// Next packet to hand to the transport.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    /// Next event for the owner.
    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    /// Deadline at which [`handle_timeout`](Self::handle_timeout) must be called.
    pub fn poll_timeout(&self) -> Option<Instant> {
        if self.state == SessionState::Closed {
            return None;
        }
        self.timers.next_deadline()
    }

    // =========================================================================
    // Handshake
    // =========================================================================

    fn start_handshake(&mut self, now: Instant) {
        self.handshake.begin();
        self.state = SessionState::Connecting;
        debug!(mode_id = self.config.mode_id, "handshake started");
        self.emit_connection(ConnectionEvent::HandshakeStarted);

        self.handshake_timer = Some(self.timers.schedule(
            TimerKind::HandshakeTimeout,
            self.config.handshake_timeout,
            now,
        ));
        self.broadcast_connect(now);
    }

    fn broadcast_connect(&mut self, now: Instant) {
        let packet = Packet::Connect {
            mode_id: self.config.mode_id,
        };
        self.queue(Destination::Broadcast, &packet);
        self.timers.schedule(
            TimerKind::Broadcast,
            jittered(self.config.broadcast_interval, self.config.retry_jitter),
            now,
        );
    }

    fn on_connect(&mut self, now: Instant, from: MacAddr, rssi: i8) {
        if self.state == SessionState::Connected && self.handshake.peer() == Some(from) {
            info!(peer = %from, "peer is searching again");
            self.lose(now);
            return;
        }
        if self.state != SessionState::Connecting || !self.handshake.accepts_connect() {
            self.drop_foreign(from, "connect while engaged");
            return;
        }
        if rssi < self.config.min_rssi {
            self.drop_foreign(from, "weak signal");
            return;
        }

        let seq = self.sequence.next_outgoing();
        let Some(bytes) = self.queue(Destination::Unicast(from), &Packet::Start(self.header(seq)))
        else {
            return;
        };

        debug!(src = %from, seq, rssi, "connect received, sending start");
        self.handshake.on_connect_answered(from, seq);
        self.timers.cancel_kind(TimerKind::Broadcast);

        if let Err(e) = self
            .retry
            .begin(InFlight::new(bytes, from, seq, InFlightKind::Start, now))
        {
            warn!(error = %e, "start not tracked for retry");
            return;
        }
        self.arm_retry(now);
    }

    fn on_start(&mut self, now: Instant, from: MacAddr, header: PacketHeader) {
        match self.state {
            SessionState::Connecting
                if self.handshake.is_active() && self.handshake.accepts_from(from) => {}
            SessionState::Connected if self.handshake.peer() == Some(from) => {
                if self.sequence.last_accepted(&from) == Some(header.seq) {
                    // Our ack got lost; the peer is still retrying.
                    self.stats.duplicates += 1;
                    debug!(src = %from, seq = header.seq, "duplicate start, re-acking");
                    self.send_ack(from, header.seq);
                } else {
                    info!(peer = %from, seq = header.seq, "peer restarted its handshake");
                    self.lose(now);
                }
                return;
            }
            _ => {
                self.drop_foreign(from, "unexpected start");
                return;
            }
        }

        if self.handshake.start_crossed() {
            debug!(src = %from, seq = header.seq, "starts crossed, backing off");
            self.back_off(now);
            return;
        }

        let acceptance = self.sequence.accept(from, header.seq);
        self.send_ack(from, header.seq);

        if acceptance == Acceptance::Duplicate {
            self.stats.duplicates += 1;
            debug!(src = %from, seq = header.seq, "duplicate start, re-acking");
            return;
        }

        self.timers.cancel_kind(TimerKind::Broadcast);
        let assigned = self.handshake.on_peer_start(from);
        debug!(src = %from, seq = header.seq, assigned, "peer start received");
        self.emit_connection(ConnectionEvent::PeerStartReceived);
        self.check_connected();
    }

    fn check_connected(&mut self) {
        if self.state != SessionState::Connecting || !self.handshake.is_complete() {
            return;
        }

        self.state = SessionState::Connected;
        self.timers.cancel_kind(TimerKind::Broadcast);
        if let Some(handle) = self.handshake_timer.take() {
            self.timers.cancel(handle);
        }

        let role = self.handshake.role();
        info!(peer = ?self.handshake.peer(), %role, "connected");
        self.emit_connection(ConnectionEvent::Connected(role));
    }

    /// Give up a handshake that timed out or whose Start went unacknowledged,
    /// or a pairing the peer has walked away from.
    fn lose(&mut self, now: Instant) {
        if !matches!(
            self.state,
            SessionState::Connecting | SessionState::Connected
        ) {
            return;
        }
        let (rx_broadcast, rx_start_msg, rx_start_ack) = self.handshake.flags();
        info!(
            peer = ?self.handshake.peer(),
            state = ?self.state,
            rx_broadcast,
            rx_start_msg,
            rx_start_ack,
            "connection lost"
        );

        self.timers.cancel_all();
        self.handshake_timer = None;
        if let Some(InFlight {
            kind: InFlightKind::Data(payload),
            ..
        }) = self.retry.abandon()
        {
            self.stats.failed += 1;
            self.events.push_back(SessionEvent::MessageResult {
                status: MessageStatus::Failed,
                payload,
            });
        }
        self.handshake.reset();
        self.sequence.forget_peers();
        self.last_ack = None;
        self.state = SessionState::Lost;
        self.emit_connection(ConnectionEvent::Lost);

        if self.config.reconnect_on_lost {
            self.timers
                .schedule(TimerKind::Reinit, self.config.reinit_delay, now);
        }
    }

    /// Abandon an attempt whose Starts crossed and retry after a random delay.
    ///
    /// Neither crossed Start is acknowledged, so the peer backs off as well.
    /// The random delay lets one side broadcast while the other listens.
    fn back_off(&mut self, now: Instant) {
        self.timers.cancel_all();
        self.handshake_timer = None;
        self.retry.abandon();
        self.handshake.reset();
        self.timers.schedule(
            TimerKind::Reinit,
            jittered(self.config.reinit_delay, self.config.reinit_delay),
            now,
        );
    }

    // =========================================================================
    // Data and acknowledgments
    // =========================================================================

    fn on_data(&mut self, from: MacAddr, header: PacketHeader, payload: Vec<u8>) {
        if self.state != SessionState::Connected || self.handshake.peer() != Some(from) {
            self.drop_foreign(from, "data outside session");
            return;
        }

        match self.sequence.accept(from, header.seq) {
            Acceptance::Accept => {
                let packet = match self.reply_payload.take() {
                    Some(reply) => Packet::DataAck(self.header(header.seq), reply),
                    None => Packet::Ack(self.header(header.seq)),
                };
                if let Some(bytes) = self.queue(Destination::Unicast(from), &packet) {
                    self.last_ack = Some(LastAck {
                        seq: header.seq,
                        bytes,
                    });
                }

                trace!(src = %from, seq = header.seq, len = payload.len(), "message received");
                self.events.push_back(SessionEvent::MessageReceived(payload));
            }
            Acceptance::Duplicate => {
                self.stats.duplicates += 1;
                debug!(src = %from, seq = header.seq, "duplicate message, re-acking");
                match &self.last_ack {
                    Some(last) if last.seq == header.seq => {
                        let bytes = last.bytes.clone();
                        self.push_transmit(Destination::Unicast(from), bytes);
                    }
                    _ => self.send_ack(from, header.seq),
                }
            }
        }
    }

    fn on_ack(
        &mut self,
        now: Instant,
        from: MacAddr,
        header: PacketHeader,
        reply: Option<Vec<u8>>,
    ) {
        let Some(completed) = self.retry.on_ack(from, header.seq) else {
            self.drop_foreign(from, "unmatched ack");
            return;
        };

        self.timers.cancel_kind(TimerKind::Retry);
        self.timers.cancel_kind(TimerKind::RetriesExhausted);
        if let Some(rtt) = RetryEngine::rtt_sample(&completed, now) {
            self.stats.last_rtt = Some(rtt);
        }

        match completed.kind {
            InFlightKind::Start => {
                let assigned = self.handshake.on_start_acked();
                debug!(src = %from, seq = header.seq, assigned, "start acknowledged");
                self.emit_connection(ConnectionEvent::LocalStartAcked);
                self.check_connected();
            }
            InFlightKind::Data(payload) => {
                self.stats.acked += 1;
                trace!(
                    seq = header.seq,
                    retries = completed.retries,
                    reply = reply.is_some(),
                    "message acknowledged"
                );
                self.events.push_back(SessionEvent::MessageResult {
                    status: MessageStatus::Acked(reply),
                    payload,
                });
            }
        }
    }

    fn on_retry_due(&mut self, now: Instant) {
        match self.retry.on_retry_due() {
            None => {}
            Some(RetryDecision::Retransmit {
                bytes,
                destination,
                retries,
            }) => {
                self.stats.retransmissions += 1;
                debug!(dest = %destination, retries, "retransmitting");
                self.push_transmit(Destination::Unicast(destination), bytes);
                self.timers.schedule(
                    TimerKind::Retry,
                    jittered(self.config.retry_interval, self.config.retry_jitter),
                    now,
                );
            }
            Some(RetryDecision::Exhausted(in_flight)) => self.on_exhausted(now, in_flight),
        }
    }

    fn on_exhausted(&mut self, now: Instant, in_flight: InFlight) {
        self.timers.cancel_kind(TimerKind::Retry);
        self.timers.cancel_kind(TimerKind::RetriesExhausted);

        match in_flight.kind {
            InFlightKind::Start => {
                warn!(dest = %in_flight.destination, seq = in_flight.seq, "start never acknowledged");
                self.lose(now);
            }
            InFlightKind::Data(payload) => {
                self.stats.failed += 1;
                warn!(
                    dest = %in_flight.destination,
                    seq = in_flight.seq,
                    retries = in_flight.retries,
                    "message never acknowledged"
                );
                self.events.push_back(SessionEvent::MessageResult {
                    status: MessageStatus::Failed,
                    payload,
                });
            }
        }
    }

    fn arm_retry(&mut self, now: Instant) {
        self.timers.schedule(
            TimerKind::Retry,
            jittered(self.config.retry_interval, self.config.retry_jitter),
            now,
        );
        self.timers.schedule(
            TimerKind::RetriesExhausted,
            self.config.all_retries_timeout(),
            now,
        );
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn header(&self, seq: u8) -> PacketHeader {
        PacketHeader::new(self.config.mode_id, seq, self.local_addr)
    }

    fn send_ack(&mut self, to: MacAddr, seq: u8) {
        self.queue(Destination::Unicast(to), &Packet::Ack(self.header(seq)));
    }

    /// Encode and queue a packet, returning the bytes sent.
    fn queue(&mut self, destination: Destination, packet: &Packet) -> Option<Vec<u8>> {
        match packet.encode() {
            Ok(bytes) => {
                self.push_transmit(destination, bytes.clone());
                Some(bytes)
            }
            Err(e) => {
                warn!(error = %e, kind = ?packet.message_type(), "failed to encode packet");
                None
            }
        }
    }

    fn push_transmit(&mut self, destination: Destination, bytes: Vec<u8>) {
        self.stats.sent += 1;
        self.transmits.push_back(Transmit { destination, bytes });
    }

    fn emit_connection(&mut self, event: ConnectionEvent) {
        self.events.push_back(SessionEvent::Connection(event));
    }

    fn drop_foreign(&mut self, from: MacAddr, reason: &'static str) {
        self.stats.foreign += 1;
        trace!(src = %from, reason, "dropping packet");
    }
}
