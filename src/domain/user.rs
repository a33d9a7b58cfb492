//! Online user table and persistent account retention (§3, §4.C).

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};

/// An online user, created on `ADDUSER`, destroyed on `REMOVEUSER`.
///
/// Exclusively owned by the account store (§4.C); nothing else mutates it
/// directly, though `crate::use_cases::battle_room` holds a reference via
/// `BattleMember` while the user is in the room.
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub account_id: u32,
    pub country: String,
    pub rank: u8,
    pub is_bot: bool,
    pub ip: Option<IpAddr>,
    pub lobby_client: String,
    pub status: UserStatus,
}

/// Mirrors the lobby `CLIENTSTATUS` bitfield fields the agent cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserStatus {
    pub in_game: bool,
    pub away: bool,
    pub rank: u8,
    pub bot: bool,
}

impl User {
    pub fn new(name: impl Into<String>, account_id: u32) -> Self {
        Self {
            name: name.into(),
            account_id,
            country: String::from("??"),
            rank: 0,
            is_bot: false,
            ip: None,
            lobby_client: String::new(),
            status: UserStatus::default(),
        }
    }

    /// Anonymous/LAN accounts are keyed `0(<name>)` per §4.C.
    pub fn account_key(&self) -> String {
        if self.account_id == 0 {
            format!("0({})", self.name)
        } else {
            self.account_id.to_string()
        }
    }
}

/// Persistent, retained-per-policy account history (§3).
#[derive(Debug, Clone, Default)]
pub struct Account {
    pub account_id: u32,
    pub names: HashMap<String, DateTime<Utc>>,
    pub ips: HashMap<IpAddr, DateTime<Utc>>,
    pub last_rank: u8,
    pub last_country: String,
    pub last_client: String,
    pub last_ts: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(account_id: u32) -> Self {
        Self {
            account_id,
            ..Default::default()
        }
    }

    /// Records a name/IP observation at `now`, learned on every `ADDUSER` or
    /// `CLIENTIPPORT` per §4.C.
    pub fn observe(&mut self, name: &str, ip: Option<IpAddr>, country: &str, rank: u8, client: &str, now: DateTime<Utc>) {
        self.names.insert(name.to_string(), now);
        if let Some(ip) = ip {
            self.ips.insert(ip, now);
        }
        self.last_country = country.to_string();
        self.last_rank = rank;
        self.last_client = client.to_string();
        self.last_ts = Some(now);
    }

    /// Drops name/IP observations older than the retention policy
    /// `(accountRetentionDays; ipRetentionDays)` from §4.C.
    pub fn apply_retention(&mut self, now: DateTime<Utc>, account_retention_days: i64, ip_retention_days: i64) {
        let name_cutoff = now - chrono::Duration::days(account_retention_days);
        let ip_cutoff = now - chrono::Duration::days(ip_retention_days);
        self.names.retain(|_, seen| *seen >= name_cutoff);
        self.ips.retain(|_, seen| *seen >= ip_cutoff);
    }
}
