//! The vote entity (§3, §4.I). The voting math itself lives in
//! `crate::use_cases::voting`; this module only holds the data shape.

use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteSource {
    PrivateMessage,
    Channel,
    Battle,
    Game,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoterChoice {
    Yes,
    No,
    Blank,
}

#[derive(Debug, Clone, Copy)]
pub struct VoterTimers {
    pub ring_time: Instant,
    pub notify_time: Instant,
}

/// At most one of these exists at a time (§3). Terminal on pass/fail/
/// cancel/timeout; the use case that owns the single slot is
/// `crate::use_cases::voting::VotingEngine`.
#[derive(Debug, Clone)]
pub struct Vote {
    pub initiator: String,
    pub source: VoteSource,
    pub command: Vec<String>,
    pub expire_time: Instant,
    pub away_vote_time: Instant,
    pub remaining_voters: HashMap<String, VoterTimers>,
    pub away_voters: HashMap<String, VoterTimers>,
    pub manual_voters: HashMap<String, VoterChoice>,
    pub yes: u32,
    pub no: u32,
    pub blank: u32,
}

impl Vote {
    pub fn new(
        initiator: impl Into<String>,
        source: VoteSource,
        command: Vec<String>,
        expire_time: Instant,
        away_vote_time: Instant,
        eligible_voters: impl IntoIterator<Item = String>,
    ) -> Self {
        let initiator = initiator.into();
        let remaining_voters = eligible_voters
            .into_iter()
            .filter(|name| name != &initiator)
            .map(|name| {
                let timers = VoterTimers { ring_time: Instant::now(), notify_time: Instant::now() };
                (name, timers)
            })
            .collect();
        // The initiator is excluded from `remainingVoters` (§4.I) because
        // calling the vote already counts as their yes vote, not because
        // they are ineligible to vote at all.
        let mut manual_voters = HashMap::new();
        manual_voters.insert(initiator.clone(), VoterChoice::Yes);
        Self {
            initiator,
            source,
            command,
            expire_time,
            away_vote_time,
            remaining_voters,
            away_voters: HashMap::new(),
            manual_voters,
            yes: 1,
            no: 0,
            blank: 0,
        }
    }

    /// Invariant from §8: `yes + no + blank = manualVoters + awayVoters`,
    /// `remainingVoters ∩ awayVoters = ∅`.
    #[cfg(test)]
    pub fn check_invariants(&self) -> bool {
        let total_votes = self.manual_voters.len() as u32 + self.away_voters.len() as u32;
        let disjoint = self.remaining_voters.keys().all(|n| !self.away_voters.contains_key(n));
        self.yes + self.no + self.blank == total_votes && disjoint
    }
}
