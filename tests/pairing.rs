//! Two sessions talking over an in-memory broadcast medium.
//!
//! The medium moves every queued transmission to the other session, through
//! a filter that may drop it. Time only advances to the next session deadline,
//! so runs are fast and independent of the wall clock.

use std::time::{Duration, Instant};

use p2p_link::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MODE: u8 = b'd';
const RSSI: i8 = -40;
const ADDR_A: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 0x0A]);
const ADDR_B: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 0x0B]);

// ---------------------------------------------------------------------------
// Medium
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

impl Side {
    fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    fn addr(self) -> MacAddr {
        match self {
            Side::A => ADDR_A,
            Side::B => ADDR_B,
        }
    }
}

type Filter<'a> = &'a mut dyn FnMut(Side, &Transmit) -> bool;

fn keep_all(_: Side, _: &Transmit) -> bool {
    true
}

fn is_broadcast(t: &Transmit) -> bool {
    t.destination == Destination::Broadcast
}

fn decode(t: &Transmit) -> Packet {
    Packet::decode(&t.bytes).expect("session produced a malformed packet")
}

struct Medium {
    a: Session,
    b: Session,
    now: Instant,
    events_a: Vec<SessionEvent>,
    events_b: Vec<SessionEvent>,
    /// Transmissions seen on the medium, dropped or not.
    log: Vec<(Side, Transmit)>,
}

impl Medium {
    fn new(config: SessionConfig) -> Self {
        Self {
            a: Session::new(config.clone(), ADDR_A).unwrap(),
            b: Session::new(config, ADDR_B).unwrap(),
            now: Instant::now(),
            events_a: Vec::new(),
            events_b: Vec::new(),
            log: Vec::new(),
        }
    }

    fn session(&mut self, side: Side) -> &mut Session {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }

    fn events(&self, side: Side) -> &[SessionEvent] {
        match side {
            Side::A => &self.events_a,
            Side::B => &self.events_b,
        }
    }

    /// Move queued transmissions until both sides are quiet.
    fn exchange(&mut self, keep: Filter<'_>) {
        loop {
            let mut moved = false;
            for side in [Side::A, Side::B] {
                while let Some(transmit) = self.session(side).poll_transmit() {
                    moved = true;
                    let now = self.now;
                    self.session(side)
                        .handle_send_completed(now, &transmit, SendStatus::Success);
                    self.log.push((side, transmit.clone()));

                    let receiver = side.other();
                    let addressed = match transmit.destination {
                        Destination::Broadcast => true,
                        Destination::Unicast(addr) => addr == receiver.addr(),
                    };
                    if addressed && keep(side, &transmit) {
                        self.session(receiver)
                            .handle_packet(now, side.addr(), &transmit.bytes, RSSI);
                    }
                }
            }
            self.collect_events();
            if !moved {
                break;
            }
        }
    }

    /// Exchange packets and fire timers until nothing is scheduled within `limit`.
    fn run_for(&mut self, limit: Duration, keep: Filter<'_>) {
        let end = self.now + limit;
        loop {
            self.exchange(keep);
            let next = [self.a.poll_timeout(), self.b.poll_timeout()]
                .into_iter()
                .flatten()
                .min();
            match next {
                Some(deadline) if deadline <= end => {
                    self.now = self.now.max(deadline);
                    let now = self.now;
                    self.a.handle_timeout(now);
                    self.b.handle_timeout(now);
                }
                _ => break,
            }
        }
        self.collect_events();
    }

    fn collect_events(&mut self) {
        while let Some(event) = self.a.poll_event() {
            self.events_a.push(event);
        }
        while let Some(event) = self.b.poll_event() {
            self.events_b.push(event);
        }
    }

    fn clear_events(&mut self) {
        self.events_a.clear();
        self.events_b.clear();
        self.log.clear();
    }

    /// Send a message from `side` over a lossless medium, returning its seq.
    fn send_acked(&mut self, side: Side, payload: &[u8]) -> u8 {
        let now = self.now;
        self.session(side).send_message(now, payload.to_vec()).unwrap();
        let seq = self.peek_seq(side);
        self.run_for(Duration::from_secs(1), &mut keep_all);
        assert!(!self.session(side).has_in_flight());
        seq
    }

    /// Sequence number of the Data packet `side` just queued.
    fn peek_seq(&mut self, side: Side) -> u8 {
        let transmit = self.session(side).poll_transmit().unwrap();
        let seq = decode(&transmit).header().unwrap().seq;
        // Put it back on the medium by delivering it now.
        let now = self.now;
        self.session(side)
            .handle_send_completed(now, &transmit, SendStatus::Success);
        self.session(side.other())
            .handle_packet(now, side.addr(), &transmit.bytes, RSSI);
        seq
    }
}

fn config() -> SessionConfig {
    SessionConfig::builder(MODE)
        .reconnect_on_lost(false)
        .build()
        .unwrap()
}

fn connected_role(events: &[SessionEvent]) -> Option<Role> {
    events.iter().rev().find_map(|e| match e {
        SessionEvent::Connection(ConnectionEvent::Connected(role)) => Some(*role),
        _ => None,
    })
}

fn count_received(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::MessageReceived(_)))
        .count()
}

fn results(events: &[SessionEvent]) -> Vec<&MessageStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::MessageResult { status, .. } => Some(status),
            _ => None,
        })
        .collect()
}

/// A broadcasts, B answers: B ends up First, A Second.
fn paired() -> Medium {
    let mut m = Medium::new(config());
    let now = m.now;
    m.a.begin_connecting(now).unwrap();
    m.b.begin_connecting(now).unwrap();

    m.run_for(Duration::from_secs(1), &mut |side, t| {
        !(side == Side::B && is_broadcast(t))
    });
    assert_eq!(m.a.state(), SessionState::Connected);
    assert_eq!(m.b.state(), SessionState::Connected);
    m.clear_events();
    m
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[test]
fn broadcaster_becomes_second_when_answerer_is_acked_first() {
    let mut m = Medium::new(config());
    let now = m.now;
    m.a.begin_connecting(now).unwrap();
    m.b.begin_connecting(now).unwrap();

    m.run_for(Duration::from_secs(1), &mut |side, t| {
        !(side == Side::B && is_broadcast(t))
    });

    // B answered A's broadcast with Start(seq=0).
    let start = m
        .log
        .iter()
        .find(|(side, t)| *side == Side::B && matches!(decode(t), Packet::Start(_)))
        .map(|(_, t)| decode(t))
        .unwrap();
    assert_eq!(start, Packet::Start(PacketHeader::new(MODE, 0, ADDR_B)));

    assert_eq!(m.b.role(), Role::First);
    assert_eq!(m.a.role(), Role::Second);
    assert!(
        m.events(Side::B)
            .contains(&SessionEvent::Connection(ConnectionEvent::Connected(Role::First)))
    );
    assert!(
        m.events(Side::A)
            .contains(&SessionEvent::Connection(ConnectionEvent::Connected(Role::Second)))
    );
    assert_eq!(m.a.peer(), Some(ADDR_B));
    assert_eq!(m.b.peer(), Some(ADDR_A));
}

#[test]
fn lost_start_ack_is_recovered_by_retry() {
    let mut m = Medium::new(config());
    let now = m.now;
    m.a.begin_connecting(now).unwrap();
    m.b.begin_connecting(now).unwrap();

    let mut acks_dropped = 0;
    m.run_for(Duration::from_secs(1), &mut |side, t| {
        if side == Side::B && is_broadcast(t) {
            return false;
        }
        if side == Side::A && matches!(decode(t), Packet::Ack(_)) && acks_dropped < 2 {
            acks_dropped += 1;
            return false;
        }
        true
    });

    assert_eq!(acks_dropped, 2);
    assert_eq!(m.b.role(), Role::First);
    assert_eq!(m.a.role(), Role::Second);
    assert!(m.b.stats().retransmissions >= 2);
    // A saw the retried Start but reported it once.
    let starts = m
        .events(Side::A)
        .iter()
        .filter(|e| **e == SessionEvent::Connection(ConnectionEvent::PeerStartReceived))
        .count();
    assert_eq!(starts, 1);
}

#[test]
fn lossy_handshakes_never_agree_on_role() {
    for seed in 0..200u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut m = Medium::new(config());
        let now = m.now;
        m.a.begin_connecting(now).unwrap();
        m.b.begin_connecting(now).unwrap();

        // B only listens; everything else is lost 30% of the time.
        m.run_for(Duration::from_secs(10), &mut |side, t| {
            if side == Side::B && is_broadcast(t) {
                return false;
            }
            rng.gen_bool(0.7)
        });

        assert!(
            !(m.a.role() == Role::First && m.b.role() == Role::First),
            "seed {seed}: both sides First"
        );
        if m.a.is_connected() && m.b.is_connected() {
            assert_ne!(m.a.role(), m.b.role(), "seed {seed}: roles agree");
            assert!(m.a.role().is_assigned(), "seed {seed}: no role");
        }
    }
}

#[test]
fn both_broadcasting_pair_with_opposite_roles() {
    for _ in 0..20 {
        let mut m = Medium::new(config());
        let now = m.now;
        m.a.begin_connecting(now).unwrap();
        m.b.begin_connecting(now).unwrap();

        m.run_for(Duration::from_secs(10), &mut keep_all);

        assert!(m.a.is_connected(), "A state {:?}", m.a.state());
        assert!(m.b.is_connected(), "B state {:?}", m.b.state());
        assert!(m.a.role().is_assigned());
        assert_ne!(m.a.role(), m.b.role());
        assert_eq!(connected_role(m.events(Side::A)), Some(m.a.role()));
        assert_eq!(connected_role(m.events(Side::B)), Some(m.b.role()));

        // The crossed Starts were never acknowledged.
        let acked_starts = m
            .log
            .iter()
            .filter(|(_, t)| matches!(decode(t), Packet::Ack(_)))
            .count();
        assert_eq!(acked_starts, 1);
    }
}

#[test]
fn pair_recovers_after_one_side_gives_up() {
    let config = SessionConfig::builder(MODE).build().unwrap();
    let mut m = Medium::new(config);
    let now = m.now;
    m.a.begin_connecting(now).unwrap();
    m.b.begin_connecting(now).unwrap();

    // A answers B's Start and is connected, but none of its acks arrive.
    m.run_for(Duration::from_millis(500), &mut |side, t| {
        if side == Side::B && is_broadcast(t) {
            return false;
        }
        !(side == Side::A && matches!(decode(t), Packet::Ack(_)))
    });
    assert_eq!(m.a.state(), SessionState::Connected);
    assert_eq!(m.b.state(), SessionState::Lost);
    m.clear_events();

    // The link is back. B searches again and A notices.
    m.run_for(Duration::from_secs(30), &mut keep_all);

    assert!(
        m.events(Side::A)
            .contains(&SessionEvent::Connection(ConnectionEvent::Lost))
    );
    assert!(m.a.is_connected(), "A state {:?}", m.a.state());
    assert!(m.b.is_connected(), "B state {:?}", m.b.state());
    assert_ne!(m.a.role(), m.b.role());
    assert!(m.a.role().is_assigned());
}

#[test]
fn handshake_times_out_without_a_peer() {
    let mut m = Medium::new(config());
    let now = m.now;
    m.a.begin_connecting(now).unwrap();

    m.run_for(Duration::from_secs(10), &mut keep_all);

    assert_eq!(m.a.state(), SessionState::Lost);
    assert_eq!(
        m.events(Side::A),
        &[
            SessionEvent::Connection(ConnectionEvent::HandshakeStarted),
            SessionEvent::Connection(ConnectionEvent::Lost),
        ]
    );
    // Broadcasts stopped with the handshake.
    let broadcasts = m.log.len();
    m.run_for(Duration::from_secs(10), &mut keep_all);
    assert_eq!(m.log.len(), broadcasts);
}

#[test]
fn foreign_mode_does_not_pair() {
    let mut m = Medium::new(config());
    m.b = Session::new(SessionConfig::builder(b'x').build().unwrap(), ADDR_B).unwrap();
    let now = m.now;
    m.a.begin_connecting(now).unwrap();
    m.b.begin_connecting(now).unwrap();

    m.run_for(Duration::from_secs(1), &mut keep_all);
    assert_eq!(m.a.state(), SessionState::Connecting);
    assert_eq!(m.b.state(), SessionState::Connecting);
    assert!(m.a.stats().foreign > 0);
}

#[test]
fn asymmetric_host_and_client_pair() {
    let host = SessionConfig::builder(b'h')
        .incoming_mode_id(b'c')
        .build()
        .unwrap();
    let client = SessionConfig::builder(b'c')
        .incoming_mode_id(b'h')
        .build()
        .unwrap();

    let mut m = Medium::new(host);
    m.b = Session::new(client, ADDR_B).unwrap();
    let now = m.now;
    m.a.begin_connecting(now).unwrap();
    m.b.begin_connecting(now).unwrap();

    // Only the host's broadcast goes out.
    m.run_for(Duration::from_secs(1), &mut |side, t| {
        !(side == Side::B && is_broadcast(t))
    });
    assert!(m.a.is_connected());
    assert!(m.b.is_connected());
    assert_ne!(m.a.role(), m.b.role());
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

#[test]
fn message_round_trip() {
    let mut m = paired();
    m.send_acked(Side::A, b"ping");

    assert_eq!(
        m.events(Side::B),
        &[SessionEvent::MessageReceived(b"ping".to_vec())]
    );
    assert_eq!(
        m.events(Side::A),
        &[SessionEvent::MessageResult {
            status: MessageStatus::Acked(None),
            payload: b"ping".to_vec(),
        }]
    );
}

#[test]
fn redelivered_data_is_received_once() {
    let mut m = paired();
    let now = m.now;
    m.a.send_message(now, b"once".to_vec()).unwrap();
    let data = m.a.poll_transmit().unwrap();

    m.b.handle_packet(now, ADDR_A, &data.bytes, RSSI);
    m.b.handle_packet(now, ADDR_A, &data.bytes, RSSI);
    m.collect_events();

    assert_eq!(count_received(m.events(Side::B)), 1);
    let acks: Vec<_> = std::iter::from_fn(|| m.b.poll_transmit()).collect();
    assert_eq!(acks.len(), 2);
    assert_eq!(acks[0], acks[1]);
    assert_eq!(m.b.stats().duplicates, 1);
}

#[test]
fn only_one_message_in_flight() {
    let mut m = paired();
    let now = m.now;
    m.a.send_message(now, b"first".to_vec()).unwrap();
    assert_eq!(m.a.send_message(now, b"second".to_vec()), Err(SendError::Busy));

    m.run_for(Duration::from_secs(1), &mut keep_all);
    assert!(!m.a.has_in_flight());
    m.a.send_message(m.now, b"second".to_vec()).unwrap();
}

#[test]
fn unacknowledged_message_fails_once() {
    let mut m = paired();
    // B was acked first, so B's Start used seq 0 and data starts at 1.
    for i in 1..5u8 {
        assert_eq!(m.send_acked(Side::B, &[i]), i);
    }
    m.clear_events();

    let now = m.now;
    m.b.send_message(now, b"lost".to_vec()).unwrap();
    m.run_for(Duration::from_secs(5), &mut |side, _| side != Side::B);

    let data: Vec<_> = m
        .log
        .iter()
        .filter(|(side, _)| *side == Side::B)
        .map(|(_, t)| decode(t))
        .collect();
    let max_retries = usize::from(m.b.config().max_retries);
    assert_eq!(data.len(), 1 + max_retries);
    assert!(
        data.iter()
            .all(|p| *p == Packet::Data(PacketHeader::new(MODE, 5, ADDR_B), b"lost".to_vec()))
    );

    assert_eq!(results(m.events(Side::B)), vec![&MessageStatus::Failed]);
    assert!(!m.b.has_in_flight());
    assert_eq!(m.b.stats().failed, 1);

    // Nothing more is sent, and a late ack changes nothing.
    let sent = m.log.len();
    m.run_for(Duration::from_secs(5), &mut keep_all);
    assert_eq!(m.log.len(), sent);

    let late_ack = Packet::Ack(PacketHeader::new(MODE, 5, ADDR_A)).encode().unwrap();
    m.b.handle_packet(m.now, ADDR_A, &late_ack, RSSI);
    m.collect_events();
    assert_eq!(results(m.events(Side::B)).len(), 1);
}

#[test]
fn reply_payload_rides_on_the_ack() {
    let mut m = paired();
    for i in 1..7u8 {
        assert_eq!(m.send_acked(Side::B, &[i]), i);
    }
    m.clear_events();

    m.a.set_reply_payload(b"pong".to_vec()).unwrap();
    let seq = m.send_acked(Side::B, b"ping");
    assert_eq!(seq, 7);

    let reply = m
        .log
        .iter()
        .find(|(side, _)| *side == Side::A)
        .map(|(_, t)| decode(t))
        .unwrap();
    assert_eq!(
        reply,
        Packet::DataAck(PacketHeader::new(MODE, 7, ADDR_A), b"pong".to_vec())
    );
    assert_eq!(
        results(m.events(Side::B)),
        vec![&MessageStatus::Acked(Some(b"pong".to_vec()))]
    );

    // The staged reply is used once.
    m.clear_events();
    m.send_acked(Side::B, b"again");
    assert_eq!(
        results(m.events(Side::B)),
        vec![&MessageStatus::Acked(None)]
    );
}

#[test]
fn lost_data_ack_is_replayed() {
    let mut m = paired();
    m.a.set_reply_payload(b"pong".to_vec()).unwrap();

    let now = m.now;
    m.b.send_message(now, b"ping".to_vec()).unwrap();
    let mut dropped = false;
    m.run_for(Duration::from_secs(1), &mut |side, _| {
        if side == Side::A && !dropped {
            dropped = true;
            return false;
        }
        true
    });

    assert!(dropped);
    assert_eq!(count_received(m.events(Side::A)), 1);
    assert_eq!(
        results(m.events(Side::B)),
        vec![&MessageStatus::Acked(Some(b"pong".to_vec()))]
    );
    assert_eq!(m.a.stats().duplicates, 1);
}

#[test]
fn lossy_exchange_delivers_each_message_at_most_once() {
    let mut m = paired();
    let mut rng = StdRng::seed_from_u64(7);

    let mut acked = 0;
    for i in 0..50u8 {
        let now = m.now;
        m.a.send_message(now, vec![i]).unwrap();
        m.run_for(Duration::from_secs(2), &mut |_, _| rng.gen_bool(0.75));
        assert!(!m.a.has_in_flight());
        if let Some(MessageStatus::Acked(_)) = results(m.events(Side::A)).last() {
            acked += 1;
        }
    }

    let received: Vec<_> = m
        .events(Side::B)
        .iter()
        .filter_map(|e| match e {
            SessionEvent::MessageReceived(p) => Some(p[0]),
            _ => None,
        })
        .collect();

    // Every acked message arrived; nothing arrived twice.
    assert!(received.len() >= acked);
    let mut unique = received.clone();
    unique.dedup();
    assert_eq!(unique, received);
    assert_eq!(results(m.events(Side::A)).len(), 50);
}

#[test]
fn close_silences_the_session() {
    let mut m = paired();
    let now = m.now;
    m.a.send_message(now, b"bye".to_vec()).unwrap();
    m.a.close();

    m.run_for(Duration::from_secs(5), &mut keep_all);
    assert!(m.events(Side::A).is_empty());
    assert!(m.log.iter().all(|(side, _)| *side == Side::B));
}
