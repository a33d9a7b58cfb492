//! Drives the lobby TCP/TLS session: state machine, reconnect/backoff,
//! liveness pings, and redirect handling (§4.B, component B).
//!
//! The socket framing itself lives behind `LobbyTransport` (§1 non-goal:
//! "the lobby wire-protocol byte format"); this module only owns the state
//! transitions and timers, so it can be unit tested without a real socket.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use rand::Rng;

/// The total order from §3 invariant 4: only forward transitions are
/// spontaneous; regressions happen only through disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LobbyState {
    Disconnected,
    Connecting,
    Connected,
    LoggedIn,
    Synchronized,
    OpeningBattle,
    BattleOpened,
}

impl LobbyState {
    /// Any regression must go all the way back to `Disconnected` per the
    /// invariant; there is no partial-rollback transition.
    pub fn disconnect(self) -> Self {
        LobbyState::Disconnected
    }
}

/// `lobbyReconnectDelay` as either a fixed wait or a uniform range picked
/// fresh each cycle (§4.B).
#[derive(Debug, Clone, Copy)]
pub enum ReconnectPolicy {
    Fixed(Duration),
    Range { min: Duration, max: Duration },
    /// `0`: never reconnect; a connect attempt having already happened
    /// once makes any further failure fatal (§4.B).
    Never,
}

impl ReconnectPolicy {
    pub fn parse(spec: &str) -> Option<Self> {
        if let Some((a, b)) = spec.split_once('-') {
            let a: u64 = a.trim().parse().ok()?;
            let b: u64 = b.trim().parse().ok()?;
            return Some(ReconnectPolicy::Range { min: Duration::from_secs(a), max: Duration::from_secs(b) });
        }
        let n: u64 = spec.trim().parse().ok()?;
        if n == 0 {
            Some(ReconnectPolicy::Never)
        } else {
            Some(ReconnectPolicy::Fixed(Duration::from_secs(n)))
        }
    }

    /// Picks the delay for the next reconnect attempt. `rand` is reused
    /// through an injected RNG so the delay-picking logic is deterministic
    /// under test.
    pub fn next_delay(&self, rng: &mut impl Rng) -> Option<Duration> {
        match self {
            ReconnectPolicy::Fixed(d) => Some(*d),
            ReconnectPolicy::Range { min, max } => {
                let lo = min.as_secs();
                let hi = max.as_secs().max(lo);
                Some(Duration::from_secs(rng.gen_range(lo..=hi)))
            }
            ReconnectPolicy::Never => None,
        }
    }
}

/// Tracks send/recv timestamps to decide when to ping or declare the
/// connection broken (§4.B liveness rule).
#[derive(Debug, Clone, Copy)]
pub struct LivenessTracker {
    connected_at: Instant,
    last_send: Instant,
    last_recv: Instant,
    last_ping: Instant,
}

impl LivenessTracker {
    pub fn new(now: Instant) -> Self {
        Self { connected_at: now, last_send: now, last_recv: now, last_ping: now }
    }

    pub fn on_send(&mut self, now: Instant) {
        self.last_send = now;
    }

    pub fn on_recv(&mut self, now: Instant) {
        self.last_recv = now;
    }

    pub fn on_ping(&mut self, now: Instant) {
        self.last_ping = now;
        self.last_send = now;
    }

    /// Send a `PING` if no send in 5s and the last ping was also >5s ago.
    pub fn should_ping(&self, now: Instant) -> bool {
        now.duration_since(self.last_send) > Duration::from_secs(5) && now.duration_since(self.last_ping) > Duration::from_secs(5)
    }

    /// No recv in 28s and last ping >28s ago also calls for a ping (§4.B:
    /// "or no recv in 28s and last ping >28s").
    pub fn should_ping_for_silence(&self, now: Instant) -> bool {
        now.duration_since(self.last_recv) > Duration::from_secs(28) && now.duration_since(self.last_ping) > Duration::from_secs(28)
    }

    /// Treat the connection as broken once 30s have passed since connect
    /// and 60s since the last recv.
    pub fn is_broken(&self, now: Instant) -> bool {
        now.duration_since(self.connected_at) > Duration::from_secs(30) && now.duration_since(self.last_recv) > Duration::from_secs(60)
    }
}

/// Outcome of presenting a `REDIRECT` line to the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOutcome {
    Ignored,
    Retarget { ip: Ipv4Addr, port: u16 },
}

/// Decides whether to honor a `REDIRECT` (§4.B): only when
/// `lobbyFollowRedirect` is enabled and the arguments parsed to a valid
/// IPv4 address and port (the parsing itself lives in
/// `lobby_protocol::parse_inbound`, which already rejects malformed
/// arguments by never producing `InboundEvent::Redirect` for them).
pub fn decide_redirect(follow: bool, ip: Ipv4Addr, port: u16) -> RedirectOutcome {
    if follow {
        RedirectOutcome::Retarget { ip, port }
    } else {
        RedirectOutcome::Ignored
    }
}

/// Login-denial retry policy (§4.B): "already logged in" is retried up to
/// 3 times before giving up; any other denial reason is immediately fatal.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginRetry {
    attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginDenialOutcome {
    RetryLogin,
    Fatal,
}

impl LoginRetry {
    pub const MAX_ATTEMPTS: u32 = 3;

    pub fn on_denied(&mut self, reason: &str) -> LoginDenialOutcome {
        if reason.eq_ignore_ascii_case("already logged in") && self.attempts < Self::MAX_ATTEMPTS {
            self.attempts += 1;
            LoginDenialOutcome::RetryLogin
        } else {
            LoginDenialOutcome::Fatal
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Owns the lobby connection's state and timers. The actual socket I/O is
/// driven by the caller (the main event loop in `crate::frameworks::runtime`)
/// through the `LobbyTransport` trait; this struct is the pure state
/// machine so its transitions are exhaustively unit testable.
pub struct ConnectionManager {
    pub state: LobbyState,
    pub reconnect_policy: ReconnectPolicy,
    pub liveness: Option<LivenessTracker>,
    pub login_retry: LoginRetry,
    connect_attempts: u64,
}

impl ConnectionManager {
    pub fn new(reconnect_policy: ReconnectPolicy) -> Self {
        Self {
            state: LobbyState::Disconnected,
            reconnect_policy,
            liveness: None,
            login_retry: LoginRetry::default(),
            connect_attempts: 0,
        }
    }

    pub fn on_connecting(&mut self) {
        self.connect_attempts += 1;
        self.state = LobbyState::Connecting;
    }

    pub fn on_connected(&mut self, now: Instant) {
        self.state = LobbyState::Connected;
        self.liveness = Some(LivenessTracker::new(now));
    }

    pub fn on_logged_in(&mut self) {
        self.state = LobbyState::LoggedIn;
        self.login_retry.reset();
    }

    pub fn on_synchronized(&mut self) {
        self.state = LobbyState::Synchronized;
    }

    pub fn on_battle_opened(&mut self) {
        self.state = LobbyState::BattleOpened;
    }

    /// Any failure or explicit disconnect regresses all the way to
    /// `Disconnected` (§3 invariant 4).
    pub fn on_disconnected(&mut self) {
        self.state = LobbyState::Disconnected;
        self.liveness = None;
    }

    /// `lobbyReconnectDelay == 0` and at least one connect attempt already
    /// made: surface a fatal network intent instead of waiting forever.
    pub fn connect_exhausted(&self) -> bool {
        matches!(self.reconnect_policy, ReconnectPolicy::Never) && self.connect_attempts >= 1
    }

    pub fn next_reconnect_delay(&self, rng: &mut impl Rng) -> Option<Duration> {
        self.reconnect_policy.next_delay(rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_order_is_total() {
        assert!(LobbyState::Disconnected < LobbyState::Connecting);
        assert!(LobbyState::Connecting < LobbyState::Connected);
        assert!(LobbyState::BattleOpened > LobbyState::Synchronized);
    }

    #[test]
    fn disconnect_always_regresses_to_disconnected() {
        assert_eq!(LobbyState::BattleOpened.disconnect(), LobbyState::Disconnected);
    }

    #[test]
    fn reconnect_policy_parses_fixed_and_range() {
        assert!(matches!(ReconnectPolicy::parse("10").unwrap(), ReconnectPolicy::Fixed(d) if d.as_secs() == 10));
        assert!(matches!(ReconnectPolicy::parse("5-15").unwrap(), ReconnectPolicy::Range { min, max } if min.as_secs() == 5 && max.as_secs() == 15));
        assert!(matches!(ReconnectPolicy::parse("0").unwrap(), ReconnectPolicy::Never));
    }

    #[test]
    fn never_policy_yields_no_delay() {
        let mut rng = rand::thread_rng();
        assert!(ReconnectPolicy::Never.next_delay(&mut rng).is_none());
    }

    #[test]
    fn connect_exhausted_only_after_an_attempt_with_never_policy() {
        let mut mgr = ConnectionManager::new(ReconnectPolicy::Never);
        assert!(!mgr.connect_exhausted());
        mgr.on_connecting();
        assert!(mgr.connect_exhausted());
    }

    #[test]
    fn login_retry_allows_three_already_logged_in_denials() {
        let mut retry = LoginRetry::default();
        for _ in 0..3 {
            assert_eq!(retry.on_denied("already logged in"), LoginDenialOutcome::RetryLogin);
        }
        assert_eq!(retry.on_denied("already logged in"), LoginDenialOutcome::Fatal);
    }

    #[test]
    fn login_retry_is_immediately_fatal_for_other_reasons() {
        let mut retry = LoginRetry::default();
        assert_eq!(retry.on_denied("banned"), LoginDenialOutcome::Fatal);
    }

    #[test]
    fn liveness_pings_after_five_seconds_idle() {
        let t0 = Instant::now();
        let tracker = LivenessTracker::new(t0);
        assert!(!tracker.should_ping(t0));
    }

    #[test]
    fn redirect_is_ignored_when_not_following() {
        assert_eq!(decide_redirect(false, Ipv4Addr::new(1, 2, 3, 4), 80), RedirectOutcome::Ignored);
        assert_eq!(decide_redirect(true, Ipv4Addr::new(1, 2, 3, 4), 80), RedirectOutcome::Retarget { ip: Ipv4Addr::new(1, 2, 3, 4), port: 80 });
    }
}
