//! Async RPC bridge to the skill-bot user (§4.G, component G).
//!
//! The bridge never opens its own connection: it composes private-message
//! lines for the connection manager to send and parses the skill-bot's
//! reply lines handed back to it. Timeouts degrade to a rank-derived value
//! rather than blocking the room.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::domain::{GameType, SkillOrigin, SkillTuple, RANK_TRUESKILL};

pub const SKILL_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct PendingRequest {
    account_id: u32,
    sent_at: Instant,
}

/// Per-player outcome of a completed (or timed out) skill request.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillReply {
    pub name: String,
    pub origin: SkillOrigin,
    pub tuples: [Option<SkillTuple>; 4],
}

/// Tracks outstanding `!#getSkill` requests keyed by the player name that
/// triggered them, and owns the skill-bot's configured username.
pub struct SkillBridge {
    bot_name: String,
    pending: HashMap<String, PendingRequest>,
}

impl SkillBridge {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self { bot_name: bot_name.into(), pending: HashMap::new() }
    }

    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    /// Builds the outbound private-message line and registers the pending
    /// request, per §4.G: `!#getSkill 3 <accountId>[|<ip>]`.
    pub fn request(&mut self, name: &str, account_id: u32, ip: Option<&str>, now: Instant) -> String {
        self.pending.insert(name.to_string(), PendingRequest { account_id, sent_at: now });
        match ip {
            Some(ip) => format!("!#getSkill 3 {account_id}|{ip}"),
            None => format!("!#getSkill 3 {account_id}"),
        }
    }

    /// Parses a skill-bot reply line of the form
    /// `<accountId>|<status>|<privacy>|<duel>,<sigma>,<class>|<ffa>...|<team>...|<teamffa>...`
    /// and matches it to the player who triggered the corresponding
    /// pending request. Returns `None` if the account id has no pending
    /// request or the line is malformed.
    pub fn handle_reply(&mut self, line: &str) -> Option<SkillReply> {
        let mut fields = line.split('|');
        let account_id: u32 = fields.next()?.parse().ok()?;
        let status = fields.next()?;
        if status != "OK" {
            self.fail_account(account_id);
            return None;
        }
        let _privacy = fields.next();

        let name = self.pending.iter().find(|(_, p)| p.account_id == account_id).map(|(n, _)| n.clone())?;
        self.pending.remove(&name);

        let mut tuples = [None; 4];
        for (idx, part) in fields.enumerate().take(4) {
            if let Some(tuple) = parse_skill_tuple(part) {
                tuples[idx] = Some(tuple);
            }
        }

        Some(SkillReply { name, origin: SkillOrigin::TrueSkill, tuples })
    }

    fn fail_account(&mut self, account_id: u32) {
        self.pending.retain(|_, p| p.account_id != account_id);
    }

    /// Players whose request has been outstanding past
    /// `SKILL_REQUEST_TIMEOUT`; callers should degrade these to
    /// `TrueSkillDegraded` and remove them from `pending`.
    pub fn timed_out(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.sent_at) >= SKILL_REQUEST_TIMEOUT)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &expired {
            self.pending.remove(name);
        }
        expired
    }

    pub fn has_pending(&self, name: &str) -> bool {
        self.pending.contains_key(name)
    }
}

fn parse_skill_tuple(part: &str) -> Option<SkillTuple> {
    let mut it = part.split(',');
    let skill: f64 = it.next()?.parse().ok()?;
    let sigma: f64 = it.next()?.parse().ok()?;
    Some(SkillTuple { skill, sigma: Some(sigma) })
}

/// Rank-derived degrade value for `TrueSkillDegraded` origin (§4.G: "degrade
/// to `TrueSkillDegraded` (= rank-to-trueskill table)").
pub fn degraded_skill(rank: u8) -> f64 {
    RANK_TRUESKILL[rank.min(31) as usize]
}

pub fn game_type_scripttag_index(game_type: GameType) -> &'static str {
    match game_type {
        GameType::Duel => "duel",
        GameType::Ffa => "ffa",
        GameType::Team => "team",
        GameType::TeamFfa => "teamffa",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_then_reply_resolves_by_account_id() {
        let mut bridge = SkillBridge::new("SLDB");
        let now = Instant::now();
        let line = bridge.request("alice", 42, None, now);
        assert_eq!(line, "!#getSkill 3 42");
        assert!(bridge.has_pending("alice"));

        let reply = bridge.handle_reply("42|OK|public|25.0,3.0,0").unwrap();
        assert_eq!(reply.name, "alice");
        assert_eq!(reply.origin, SkillOrigin::TrueSkill);
        assert_eq!(reply.tuples[0].unwrap().skill, 25.0);
        assert!(!bridge.has_pending("alice"));
    }

    #[test]
    fn unmatched_account_id_yields_none() {
        let mut bridge = SkillBridge::new("SLDB");
        assert!(bridge.handle_reply("999|OK|public|25.0,3.0,0").is_none());
    }

    #[test]
    fn timeout_after_five_seconds_degrades() {
        let mut bridge = SkillBridge::new("SLDB");
        let t0 = Instant::now();
        bridge.request("bob", 7, None, t0);
        assert!(bridge.timed_out(t0).is_empty());
        let later = t0 + SKILL_REQUEST_TIMEOUT;
        assert_eq!(bridge.timed_out(later), vec!["bob".to_string()]);
        assert!(!bridge.has_pending("bob"));
    }
}
