//! Handshake state machine.
//!
//! Tracks pairing progress and decides the session role. It performs no I/O;
//! [`Session`](super::Session) sends the packets and raises the events.
//!
//! Role rule: the side whose Start is acknowledged becomes First, the side
//! that received it becomes Second. Only one Start may be outstanding between
//! the two devices: when the peer's Start arrives while ours still awaits its
//! acknowledgment and no role is fixed, the Starts crossed and the attempt is
//! abandoned (see [`Handshake::start_crossed`]).

use crate::wire::MacAddr;

use super::event::Role;

/// Coarse handshake phase, derived from the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Not started.
    Idle,
    /// Broadcasting Connect, no peer yet.
    Broadcasting,
    /// Peer chosen, waiting for the Start exchange to finish.
    AwaitingAck,
    /// Role fixed and nothing outstanding.
    Complete,
}

/// Handshake progress flags.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    active: bool,
    peer: Option<MacAddr>,
    role: Role,
    /// A matching Connect broadcast was answered.
    rx_broadcast: bool,
    /// The peer's Start arrived.
    rx_start_msg: bool,
    /// Our Start was acknowledged.
    rx_start_ack: bool,
    /// Sequence number of our Start while it awaits acknowledgment.
    own_start: Option<u8>,
}

impl Handshake {
    /// Create an idle handshake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all progress and start broadcasting.
    pub fn begin(&mut self) {
        *self = Self {
            active: true,
            ..Self::default()
        };
    }

    /// Clear all progress and go idle.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Current phase.
    pub fn phase(&self) -> HandshakePhase {
        if !self.active {
            HandshakePhase::Idle
        } else if self.is_complete() {
            HandshakePhase::Complete
        } else if self.peer.is_none() {
            HandshakePhase::Broadcasting
        } else {
            HandshakePhase::AwaitingAck
        }
    }

    /// Peer address once learned.
    pub fn peer(&self) -> Option<MacAddr> {
        self.peer
    }

    /// Assigned role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Check if a handshake attempt is running.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Check if Connect broadcasts are still being sent.
    pub fn is_broadcasting(&self) -> bool {
        self.phase() == HandshakePhase::Broadcasting
    }

    /// Check if packets from `from` belong to this handshake.
    ///
    /// Before a peer is known any sender qualifies.
    pub fn accepts_from(&self, from: MacAddr) -> bool {
        self.peer.is_none_or(|peer| peer == from)
    }

    /// Check if a Connect broadcast should be answered with a Start.
    pub fn accepts_connect(&self) -> bool {
        self.active && self.peer.is_none() && self.own_start.is_none()
    }

    /// A Connect from `from` was accepted; our Start goes out as `seq`.
    pub fn on_connect_answered(&mut self, from: MacAddr, seq: u8) {
        self.rx_broadcast = true;
        self.peer = Some(from);
        self.own_start = Some(seq);
    }

    /// Check if a Start arriving now would cross our own.
    ///
    /// Both sides answered each other's Connect. Accepting either Start would
    /// leave both sides Second, so neither may be acknowledged.
    pub fn start_crossed(&self) -> bool {
        self.own_start.is_some() && !self.role.is_assigned()
    }

    /// The peer's Start arrived.
    ///
    /// Returns `true` if this assigned the role.
    pub fn on_peer_start(&mut self, from: MacAddr) -> bool {
        self.peer = Some(from);
        self.rx_start_msg = true;
        self.assign(Role::Second)
    }

    /// Our Start was acknowledged.
    ///
    /// Returns `true` if this assigned the role.
    pub fn on_start_acked(&mut self) -> bool {
        self.own_start = None;
        self.rx_start_ack = true;
        self.assign(Role::First)
    }

    /// Check if the handshake has converged.
    pub fn is_complete(&self) -> bool {
        self.active && self.role.is_assigned() && self.own_start.is_none()
    }

    /// Flags as `(rx_broadcast, rx_start_msg, rx_start_ack)`.
    pub fn flags(&self) -> (bool, bool, bool) {
        (self.rx_broadcast, self.rx_start_msg, self.rx_start_ack)
    }

    /// Replace the negotiated role of a completed handshake.
    ///
    /// Returns `false` and changes nothing unless the handshake is complete
    /// and `role` is First or Second.
    pub fn override_role(&mut self, role: Role) -> bool {
        if !self.is_complete() || !role.is_assigned() {
            return false;
        }
        self.role = role;
        true
    }

    fn assign(&mut self, role: Role) -> bool {
        if self.role.is_assigned() {
            return false;
        }
        self.role = role;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: MacAddr = MacAddr::new([2, 0, 0, 0, 0, 2]);
    const OTHER: MacAddr = MacAddr::new([2, 0, 0, 0, 0, 3]);

    #[test]
    fn test_phases() {
        let mut hs = Handshake::new();
        assert_eq!(hs.phase(), HandshakePhase::Idle);
        assert!(!hs.accepts_connect());

        hs.begin();
        assert!(hs.is_active());
        assert_eq!(hs.phase(), HandshakePhase::Broadcasting);
        assert!(hs.accepts_connect());
        assert!(hs.accepts_from(OTHER));

        hs.on_connect_answered(PEER, 0);
        assert_eq!(hs.phase(), HandshakePhase::AwaitingAck);
        assert!(!hs.accepts_connect());
        assert!(!hs.accepts_from(OTHER));

        assert!(hs.on_start_acked());
        assert_eq!(hs.phase(), HandshakePhase::Complete);
        assert_eq!(hs.role(), Role::First);
    }

    #[test]
    fn test_passive_side_completes_on_start() {
        let mut hs = Handshake::new();
        hs.begin();

        assert!(hs.on_peer_start(PEER));
        assert_eq!(hs.role(), Role::Second);
        assert_eq!(hs.peer(), Some(PEER));
        assert!(hs.is_complete());
        assert_eq!(hs.flags(), (false, true, false));
    }

    #[test]
    fn test_first_event_fixes_role() {
        // Our Start acked first, then the peer's Start arrives.
        let mut hs = Handshake::new();
        hs.begin();
        hs.on_connect_answered(PEER, 4);
        assert!(hs.on_start_acked());
        assert!(!hs.on_peer_start(PEER));
        assert_eq!(hs.role(), Role::First);
        assert_eq!(hs.flags(), (true, true, true));
    }

    #[test]
    fn test_crossed_starts() {
        let mut hs = Handshake::new();
        hs.begin();
        assert!(!hs.start_crossed());

        // Our Start is out and unacknowledged.
        hs.on_connect_answered(PEER, 4);
        assert!(hs.start_crossed());

        // Once acknowledged, a late peer Start no longer crosses.
        hs.on_start_acked();
        assert!(!hs.start_crossed());
    }

    #[test]
    fn test_override_role() {
        let mut hs = Handshake::new();
        hs.begin();
        assert!(!hs.override_role(Role::First));

        hs.on_peer_start(PEER);
        assert_eq!(hs.role(), Role::Second);
        assert!(!hs.override_role(Role::Unassigned));
        assert!(hs.override_role(Role::First));
        assert_eq!(hs.role(), Role::First);
        assert!(hs.is_complete());
    }

    #[test]
    fn test_reset() {
        let mut hs = Handshake::new();
        hs.begin();
        hs.on_peer_start(PEER);
        hs.reset();

        assert!(!hs.is_active());
        assert_eq!(hs.phase(), HandshakePhase::Idle);
        assert_eq!(hs.peer(), None);
        assert_eq!(hs.role(), Role::Unassigned);
        assert_eq!(hs.flags(), (false, false, false));
    }
}
