//! Per-user preferences and sliding-window flood counters (§4.D,
//! component D).

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use base64::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteMode {
    Normal,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankMode {
    Account,
    Ip,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillMode {
    Rank,
    TrueSkill,
    Plugin,
}

/// One user's preferences (§3: "(name, key, value) with a configured
/// default falling back to a global setting"). Fields the spec names
/// explicitly are kept as typed slots; anything else would fall through to
/// the generic settings tree, which isn't needed for the preferences this
/// spec calls out.
#[derive(Debug, Clone)]
pub struct UserPrefs {
    pub password_hash: Option<String>,
    pub vote_mode: VoteMode,
    pub auto_set_vote_mode: bool,
    pub ring_delay: Duration,
    pub spoof_protection: SpoofProtection,
    pub clan: Option<String>,
    pub share_id: Option<String>,
    pub rank_mode: RankMode,
    pub skill_mode: SkillMode,
    pub irc_colors: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoofProtection {
    Off,
    Warn,
    Kick,
}

impl Default for UserPrefs {
    fn default() -> Self {
        Self {
            password_hash: None,
            vote_mode: VoteMode::Normal,
            auto_set_vote_mode: false,
            ring_delay: Duration::from_secs(0),
            spoof_protection: SpoofProtection::Warn,
            clan: None,
            share_id: None,
            rank_mode: RankMode::Account,
            skill_mode: SkillMode::Rank,
            irc_colors: true,
        }
    }
}

/// `auth <pw>` hashes with base64(MD5) per §4.D — a lobby-protocol
/// compatibility format, not a security boundary.
pub fn hash_password(cleartext: &str) -> String {
    let digest = md5::compute(cleartext.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(digest.0)
}

/// A single sliding-window flood counter (§4.D: "threshold/window").
#[derive(Debug, Clone)]
pub struct FloodCounter {
    threshold: u32,
    window: Duration,
    events: VecDeque<Instant>,
}

impl FloodCounter {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self { threshold, window, events: VecDeque::new() }
    }

    /// Records one event and returns true iff the threshold was just
    /// crossed (the caller applies the counter-specific penalty).
    pub fn record(&mut self, now: Instant) -> bool {
        self.events.push_back(now);
        while let Some(front) = self.events.front() {
            if now.duration_since(*front) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
        self.events.len() as u32 > self.threshold
    }

    /// Purged every 3600s per §4.D regardless of activity, bounding memory
    /// for counters that never fire.
    pub fn purge_stale(&mut self, now: Instant) {
        while let Some(front) = self.events.front() {
            if now.duration_since(*front) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

/// The four independent flood counters from §4.D, plus the JSON-RPC
/// one-shot limiter.
#[derive(Debug, Clone)]
pub struct FloodState {
    pub msg: FloodCounter,
    pub status: FloodCounter,
    pub kicks: FloodCounter,
    pub cmd: FloodCounter,
    pub jsonrpc: FloodCounter,
    pub ignored_until: Option<Instant>,
    pub battle_banned_until: Option<Instant>,
    pub jsonrpc_ignored_until: Option<Instant>,
}

impl FloodState {
    pub fn new(cfg: &FloodConfig) -> Self {
        Self {
            msg: FloodCounter::new(cfg.msg_threshold, cfg.msg_window),
            status: FloodCounter::new(cfg.status_threshold, cfg.status_window),
            kicks: FloodCounter::new(cfg.kicks_threshold, cfg.kicks_window),
            cmd: FloodCounter::new(cfg.cmd_threshold, cfg.cmd_window),
            jsonrpc: FloodCounter::new(cfg.jsonrpc_threshold, cfg.jsonrpc_window),
            ignored_until: None,
            battle_banned_until: None,
            jsonrpc_ignored_until: None,
        }
    }

    pub fn is_ignored(&self, now: Instant) -> bool {
        self.ignored_until.map(|t| now < t).unwrap_or(false)
    }

    pub fn is_jsonrpc_ignored(&self, now: Instant) -> bool {
        self.jsonrpc_ignored_until.map(|t| now < t).unwrap_or(false)
    }

    pub fn is_battle_banned(&self, now: Instant) -> bool {
        self.battle_banned_until.map(|t| now < t).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FloodConfig {
    pub msg_threshold: u32,
    pub msg_window: Duration,
    pub status_threshold: u32,
    pub status_window: Duration,
    pub kicks_threshold: u32,
    pub kicks_window: Duration,
    pub cmd_threshold: u32,
    pub cmd_window: Duration,
    pub jsonrpc_threshold: u32,
    pub jsonrpc_window: Duration,
    pub auto_ban_minutes: u32,
    pub ignore_minutes: u32,
}

pub enum FloodVerdict {
    Ok,
    KickFromBattle,
    BattleBan { minutes: u32 },
    Ignore { minutes: u32 },
}

/// Central store for preferences + flood counters, keyed by the latest
/// observed `accountId` per §4.D ("identity for preference storage is the
/// latest observed accountId").
pub struct PreferenceStore {
    prefs: HashMap<u32, UserPrefs>,
    flood: HashMap<u32, FloodState>,
    flood_config: FloodConfig,
    authenticated: HashMap<u32, bool>,
}

impl PreferenceStore {
    pub fn new(flood_config: FloodConfig) -> Self {
        Self { prefs: HashMap::new(), flood: HashMap::new(), flood_config, authenticated: HashMap::new() }
    }

    pub fn prefs(&mut self, account_id: u32) -> &mut UserPrefs {
        self.prefs.entry(account_id).or_insert_with(UserPrefs::default)
    }

    pub fn prefs_ref(&self, account_id: u32) -> Option<&UserPrefs> {
        self.prefs.get(&account_id)
    }

    fn flood_mut(&mut self, account_id: u32) -> &mut FloodState {
        let cfg = self.flood_config;
        self.flood.entry(account_id).or_insert_with(|| FloodState::new(&cfg))
    }

    pub fn flood_ref(&self, account_id: u32) -> Option<&FloodState> {
        self.flood.get(&account_id)
    }

    pub fn record_message(&mut self, account_id: u32, now: Instant) -> FloodVerdict {
        let state = self.flood_mut(account_id);
        if state.msg.record(now) { FloodVerdict::KickFromBattle } else { FloodVerdict::Ok }
    }

    pub fn record_status_change(&mut self, account_id: u32, now: Instant) -> FloodVerdict {
        let state = self.flood_mut(account_id);
        if state.status.record(now) { FloodVerdict::KickFromBattle } else { FloodVerdict::Ok }
    }

    /// Records a kick; consecutive kicks within the window escalate to a
    /// battle-ban for `autoBanMinutes` (§4.D).
    pub fn record_kick(&mut self, account_id: u32, now: Instant) -> FloodVerdict {
        let minutes = self.flood_config.auto_ban_minutes;
        let state = self.flood_mut(account_id);
        if state.kicks.record(now) {
            state.battle_banned_until = Some(now + Duration::from_secs(minutes as u64 * 60));
            FloodVerdict::BattleBan { minutes }
        } else {
            FloodVerdict::Ok
        }
    }

    pub fn record_command(&mut self, account_id: u32, now: Instant) -> FloodVerdict {
        let minutes = self.flood_config.ignore_minutes;
        let state = self.flood_mut(account_id);
        if state.cmd.record(now) {
            state.ignored_until = Some(now + Duration::from_secs(minutes as u64 * 60));
            FloodVerdict::Ignore { minutes }
        } else {
            FloodVerdict::Ok
        }
    }

    /// One-shot transition for JSON-RPC relayed calls (§4.D): once the
    /// threshold is crossed the user moves to `ignored` for the window and
    /// further calls are rejected without executing until the window's
    /// ignore timer lapses.
    pub fn record_jsonrpc_call(&mut self, account_id: u32, now: Instant) -> FloodVerdict {
        if self.flood_mut(account_id).is_jsonrpc_ignored(now) {
            return FloodVerdict::Ignore { minutes: 0 };
        }
        let window_minutes = (self.flood_config.jsonrpc_window.as_secs() / 60).max(1) as u32;
        let state = self.flood_mut(account_id);
        if state.jsonrpc.record(now) {
            state.jsonrpc_ignored_until = Some(now + self.flood_config.jsonrpc_window);
            FloodVerdict::Ignore { minutes: window_minutes }
        } else {
            FloodVerdict::Ok
        }
    }

    pub fn is_ignored(&self, account_id: u32, now: Instant) -> bool {
        self.flood.get(&account_id).map(|f| f.is_ignored(now)).unwrap_or(false)
    }

    pub fn is_battle_banned(&self, account_id: u32, now: Instant) -> bool {
        self.flood.get(&account_id).map(|f| f.is_battle_banned(now)).unwrap_or(false)
    }

    pub fn is_jsonrpc_ignored(&self, account_id: u32, now: Instant) -> bool {
        self.flood.get(&account_id).map(|f| f.is_jsonrpc_ignored(now)).unwrap_or(false)
    }

    /// `auth <pw>`: stores the hash in the per-process authenticated map
    /// and returns whether authentication just changed (§4.D).
    pub fn authenticate(&mut self, account_id: u32, cleartext: &str) -> bool {
        let hash = hash_password(cleartext);
        let matches = self.prefs_ref(account_id).and_then(|p| p.password_hash.clone()).as_deref() == Some(hash.as_str());
        let was_authenticated = self.authenticated.get(&account_id).copied().unwrap_or(false);
        self.authenticated.insert(account_id, matches);
        matches && !was_authenticated
    }

    pub fn is_authenticated(&self, account_id: u32) -> bool {
        self.authenticated.get(&account_id).copied().unwrap_or(false)
    }

    /// Sweeps every tracked user's counters; the main loop calls this every
    /// 3600s (§4.D).
    pub fn purge_stale_counters(&mut self, now: Instant) {
        for state in self.flood.values_mut() {
            state.msg.purge_stale(now);
            state.status.purge_stale(now);
            state.kicks.purge_stale(now);
            state.cmd.purge_stale(now);
            state.jsonrpc.purge_stale(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flood_counter_trips_after_threshold() {
        let mut counter = FloodCounter::new(3, Duration::from_secs(10));
        let now = Instant::now();
        assert!(!counter.record(now));
        assert!(!counter.record(now));
        assert!(!counter.record(now));
        assert!(counter.record(now));
    }

    #[test]
    fn jsonrpc_counter_is_one_shot() {
        let cfg = FloodConfig {
            msg_threshold: 100,
            msg_window: Duration::from_secs(10),
            status_threshold: 100,
            status_window: Duration::from_secs(10),
            kicks_threshold: 100,
            kicks_window: Duration::from_secs(10),
            cmd_threshold: 100,
            cmd_window: Duration::from_secs(10),
            jsonrpc_threshold: 2,
            jsonrpc_window: Duration::from_secs(60),
            auto_ban_minutes: 5,
            ignore_minutes: 5,
        };
        let mut store = PreferenceStore::new(cfg);
        let now = Instant::now();
        assert!(matches!(store.record_jsonrpc_call(1, now), FloodVerdict::Ok));
        assert!(matches!(store.record_jsonrpc_call(1, now), FloodVerdict::Ok));
        assert!(matches!(store.record_jsonrpc_call(1, now), FloodVerdict::Ignore { .. }));
        assert!(store.is_jsonrpc_ignored(1, now));
    }

    #[test]
    fn password_hash_round_trips_for_auth_matching() {
        let mut store = PreferenceStore::new(FloodConfig {
            msg_threshold: 1,
            msg_window: Duration::from_secs(1),
            status_threshold: 1,
            status_window: Duration::from_secs(1),
            kicks_threshold: 1,
            kicks_window: Duration::from_secs(1),
            cmd_threshold: 1,
            cmd_window: Duration::from_secs(1),
            jsonrpc_threshold: 1,
            jsonrpc_window: Duration::from_secs(1),
            auto_ban_minutes: 1,
            ignore_minutes: 1,
        });
        store.prefs(7).password_hash = Some(hash_password("hunter2"));
        assert!(store.authenticate(7, "hunter2"));
        assert!(store.is_authenticated(7));
        assert!(!store.authenticate(7, "hunter2"));
    }
}
