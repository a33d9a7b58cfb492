//! Online user table, persistent account retention, smurf search, and the
//! dynamic ban store (§4.C, component C).

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::domain::{Account, Ban, BanSubject, BanType, User, find_matching_ban};

pub const MAX_SEARCH_RESULTS: usize = 40;

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub account_retention_days: i64,
    pub ip_retention_days: i64,
}

/// Confidence tiers for the smurf search (§4.C, §8), grounded in the
/// informally specified "100/90/80/60%" brackets of §4.C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SmurfConfidence {
    Pct60 = 60,
    Pct80 = 80,
    Pct90 = 90,
    Pct100 = 100,
}

#[derive(Debug, Clone)]
pub struct SmurfMatch {
    pub account_id: u32,
    pub confidence: SmurfConfidence,
    pub shared_ips: usize,
}

/// Owns the online table and the persistent/dynamic-ban stores. Exclusively
/// owned by the agent's main context; only this module mutates it.
pub struct AccountStore {
    online: HashMap<String, User>,
    accounts: HashMap<u32, Account>,
    dynamic_bans: Vec<Ban>,
    retention: RetentionPolicy,
}

impl AccountStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            online: HashMap::new(),
            accounts: HashMap::new(),
            dynamic_bans: Vec::new(),
            retention,
        }
    }

    /// `ADDUSER`: registers the online user and learns country/rank/client
    /// onto the persistent account (§4.C).
    pub fn add_user(&mut self, user: User, now: DateTime<Utc>) {
        let account = self.accounts.entry(user.account_id).or_insert_with(|| Account::new(user.account_id));
        account.observe(&user.name, user.ip, &user.country, user.rank, &user.lobby_client, now);
        account.apply_retention(now, self.retention.account_retention_days, self.retention.ip_retention_days);
        self.online.insert(user.name.clone(), user);
    }

    /// `REMOVEUSER`.
    pub fn remove_user(&mut self, name: &str) -> Option<User> {
        self.online.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&User> {
        self.online.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut User> {
        self.online.get_mut(name)
    }

    /// `CLIENTIPPORT` / in-game connect: learns IP onto the persistent
    /// account (§4.C).
    pub fn observe_ip(&mut self, name: &str, ip: IpAddr, now: DateTime<Utc>) {
        let Some(user) = self.online.get_mut(name) else { return };
        user.ip = Some(ip);
        let account = self.accounts.entry(user.account_id).or_insert_with(|| Account::new(user.account_id));
        account.observe(&user.name, Some(ip), &user.country, user.rank, &user.lobby_client, now);
    }

    /// Substring search by name or IP, capped at `MAX_SEARCH_RESULTS`
    /// (§4.C).
    pub fn search(&self, query: &str) -> Vec<&Account> {
        let query_lower = query.to_ascii_lowercase();
        self.accounts
            .values()
            .filter(|acc| {
                acc.names.keys().any(|n| n.to_ascii_lowercase().contains(&query_lower))
                    || acc.ips.keys().any(|ip| ip.to_string().contains(&query_lower))
            })
            .take(MAX_SEARCH_RESULTS)
            .collect()
    }

    /// Finds likely alt accounts of `account_id` by shared IP history,
    /// grouped into confidence tiers (§4.C, §8). The exact linkage isn't
    /// fixed by the spec ("implementation is any linkage that produces the
    /// confidence tiers described"); this implementation buckets by how
    /// many distinct IPs the candidate shares with the subject account and
    /// how recently, which is a reasonable, auditable linkage.
    pub fn find_smurfs(&self, account_id: u32, now: DateTime<Utc>) -> Vec<SmurfMatch> {
        let Some(subject) = self.accounts.get(&account_id) else { return Vec::new() };
        let mut matches = Vec::new();
        for (id, candidate) in self.accounts.iter() {
            if *id == account_id {
                continue;
            }
            let shared: Vec<_> = candidate.ips.keys().filter(|ip| subject.ips.contains_key(*ip)).collect();
            if shared.is_empty() {
                continue;
            }
            let recent_shared = shared
                .iter()
                .filter(|ip| {
                    let seen_subject = subject.ips.get(**ip).copied().unwrap_or_default();
                    let seen_candidate = candidate.ips.get(**ip).copied().unwrap_or_default();
                    (now - seen_subject).num_days() < 7 && (now - seen_candidate).num_days() < 7
                })
                .count();

            let confidence = if recent_shared >= 2 {
                SmurfConfidence::Pct100
            } else if recent_shared == 1 {
                SmurfConfidence::Pct90
            } else if shared.len() >= 2 {
                SmurfConfidence::Pct80
            } else {
                SmurfConfidence::Pct60
            };

            matches.push(SmurfMatch { account_id: *id, confidence, shared_ips: shared.len() });
        }
        matches.sort_by(|a, b| b.confidence.cmp(&a.confidence).then(b.shared_ips.cmp(&a.shared_ips)));
        matches
    }

    pub fn add_dynamic_ban(&mut self, ban: Ban) {
        self.dynamic_bans.retain(|existing| existing.hash() != ban.hash());
        self.dynamic_bans.push(ban);
    }

    pub fn remove_dynamic_ban(&mut self, hash: &str) -> bool {
        let before = self.dynamic_bans.len();
        self.dynamic_bans.retain(|ban| ban.hash() != hash);
        self.dynamic_bans.len() != before
    }

    pub fn dynamic_bans(&self) -> &[Ban] {
        &self.dynamic_bans
    }

    pub fn dynamic_bans_mut(&mut self) -> &mut Vec<Ban> {
        &mut self.dynamic_bans
    }

    /// Checks `subject` against `(global, specific, dynamic)` ban lists for
    /// a ban of type at most `at_most` (§4.C join-policy use).
    pub fn find_ban<'a>(
        &'a self,
        global: &'a [Ban],
        specific: &'a [Ban],
        subject: &BanSubject<'_>,
        at_most: BanType,
        now: DateTime<Utc>,
    ) -> Option<&'a Ban> {
        find_matching_ban(&[global, specific, &self.dynamic_bans], subject, at_most, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bound;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    #[test]
    fn smurf_search_groups_by_shared_ip_recency() {
        let mut store = AccountStore::new(RetentionPolicy { account_retention_days: 365, ip_retention_days: 365 });
        let now = Utc::now();
        store.observe_ip_direct(1, "alice", ip(1), now);
        store.observe_ip_direct(2, "alice2", ip(1), now);
        let matches = store.find_smurfs(1, now);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].account_id, 2);
    }

    #[test]
    fn dynamic_ban_is_deduped_by_hash() {
        let mut store = AccountStore::new(RetentionPolicy { account_retention_days: 1, ip_retention_days: 1 });
        let ban = sample_ban();
        store.add_dynamic_ban(ban.clone());
        store.add_dynamic_ban(ban);
        assert_eq!(store.dynamic_bans().len(), 1);
    }

    fn sample_ban() -> Ban {
        use crate::domain::{BanAction, BanFilter, BanType};
        Ban {
            filter: BanFilter { rank: Some(Bound::GreaterOrEqual(5)), ..Default::default() },
            action: BanAction {
                ban_type: BanType::Battle,
                start_date: Utc::now(),
                end_date: None,
                remaining_games: None,
                reason: Some("test".into()),
            },
        }
    }

    impl AccountStore {
        fn observe_ip_direct(&mut self, account_id: u32, name: &str, addr: IpAddr, now: DateTime<Utc>) {
            let account = self.accounts.entry(account_id).or_insert_with(|| Account::new(account_id));
            account.observe(name, Some(addr), "??", 0, "test", now);
        }
    }
}
