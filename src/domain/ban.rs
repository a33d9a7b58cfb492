//! Ban filters and the dynamic ban store entity (§3, §4.C).

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BanType {
    Spec = 0,
    Battle = 1,
    Full = 2,
}

/// A comparator over a bounded field, e.g. `rank<bound>` from §3.
#[derive(Debug, Clone, Copy)]
pub enum Bound<T> {
    Exact(T),
    LessThan(T),
    LessOrEqual(T),
    GreaterThan(T),
    GreaterOrEqual(T),
}

impl<T: PartialOrd + Copy> Bound<T> {
    pub fn matches(&self, value: T) -> bool {
        match self {
            Bound::Exact(b) => value == *b,
            Bound::LessThan(b) => value < *b,
            Bound::LessOrEqual(b) => value <= *b,
            Bound::GreaterThan(b) => value > *b,
            Bound::GreaterOrEqual(b) => value >= *b,
        }
    }
}

/// A string field that is either matched literally or, when `~`-prefixed,
/// as a regex (§3).
#[derive(Debug, Clone)]
pub enum StringMatch {
    Literal(String),
    Pattern(Regex),
}

impl StringMatch {
    pub fn parse(raw: &str) -> Self {
        if let Some(pattern) = raw.strip_prefix('~') {
            match Regex::new(pattern) {
                Ok(re) => StringMatch::Pattern(re),
                Err(_) => StringMatch::Literal(raw.to_string()),
            }
        } else {
            StringMatch::Literal(raw.to_string())
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            StringMatch::Literal(s) => s.eq_ignore_ascii_case(value),
            StringMatch::Pattern(re) => re.is_match(value),
        }
    }
}

/// The subject a ban filter is checked against (§3: "filter{accountId?,
/// name?, ip?, country?, rank<bound>?, access<bound>?, bot?, level<bound>?,
/// skill<bound>?}").
#[derive(Debug, Clone, Copy)]
pub struct BanSubject<'a> {
    pub account_id: u32,
    pub name: &'a str,
    pub ip: Option<IpAddr>,
    pub country: &'a str,
    pub rank: u8,
    pub access: u8,
    pub is_bot: bool,
    pub level: u8,
    pub skill: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BanFilter {
    pub account_id: Option<u32>,
    pub name: Option<StringMatch>,
    pub ip: Option<StringMatch>,
    pub country: Option<StringMatch>,
    pub rank: Option<Bound<u8>>,
    pub access: Option<Bound<u8>>,
    pub bot: Option<bool>,
    pub level: Option<Bound<u8>>,
    pub skill: Option<Bound<f64>>,
}

impl BanFilter {
    /// A user matches a filter iff every present field matches (§3).
    pub fn matches(&self, subject: &BanSubject<'_>) -> bool {
        if let Some(id) = self.account_id {
            if id != subject.account_id {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !name.matches(subject.name) {
                return false;
            }
        }
        if let Some(ip_match) = &self.ip {
            match subject.ip {
                Some(ip) if ip_match.matches(&ip.to_string()) => {}
                _ => return false,
            }
        }
        if let Some(country) = &self.country {
            if !country.matches(subject.country) {
                return false;
            }
        }
        if let Some(rank) = self.rank {
            if !rank.matches(subject.rank) {
                return false;
            }
        }
        if let Some(access) = self.access {
            if !access.matches(subject.access) {
                return false;
            }
        }
        if let Some(bot) = self.bot {
            if bot != subject.is_bot {
                return false;
            }
        }
        if let Some(level) = self.level {
            if !level.matches(subject.level) {
                return false;
            }
        }
        if let Some(skill) = self.skill {
            if !skill.matches(subject.skill) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct BanAction {
    pub ban_type: BanType,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub remaining_games: Option<u32>,
    pub reason: Option<String>,
}

impl BanAction {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.end_date {
            Some(end) => now >= end,
            None => self.remaining_games == Some(0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ban {
    pub filter: BanFilter,
    pub action: BanAction,
}

impl Ban {
    /// A short stable hash over filter+action, used as the ban's identity
    /// (§3). We hash the `Debug` rendering: simple, stable for a given
    /// process build, and good enough to identify one ban among many in a
    /// `!banlist`/`!unban` round trip.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{:?}|{:?}", self.filter_debug_key(), self.action.reason).as_bytes());
        let digest = hasher.finalize();
        hex_prefix(&digest, 8)
    }

    fn filter_debug_key(&self) -> String {
        format!("{:?}", self.filter)
    }

    /// Consumes one "remaining game" charge, per the boundary test in §8
    /// ("a ban with remainingGames=1 is consumed exactly once per started
    /// game").
    pub fn consume_game(&mut self) {
        if let Some(remaining) = self.action.remaining_games.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes.iter().take(len).map(|b| format!("{b:02x}")).collect()
}

/// Finds a matching ban whose type is no more severe than `at_most` (e.g.
/// `at_most = Battle` implements "a dynamic ban of type ≤ battle matches"
/// from §4.E's join policy — a `Full` ban already prevented login, so it
/// never reaches this check). Scans `(global list, current specific list,
/// dynamic list)` in the given order; on a match in more than one list,
/// the most restrictive `banType` wins the tie (§4.C).
pub fn find_matching_ban<'a>(
    lists: &[&'a [Ban]],
    subject: &BanSubject<'_>,
    at_most: BanType,
    now: DateTime<Utc>,
) -> Option<&'a Ban> {
    let mut best: Option<&Ban> = None;
    for list in lists {
        for ban in list.iter() {
            if ban.action.is_expired(now) {
                continue;
            }
            if ban.action.ban_type > at_most {
                continue;
            }
            if !ban.filter.matches(subject) {
                continue;
            }
            best = match best {
                Some(current) if current.action.ban_type >= ban.action.ban_type => Some(current),
                _ => Some(ban),
            };
        }
    }
    best
}
