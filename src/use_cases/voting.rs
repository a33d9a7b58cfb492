//! The voting state machine (§4.I, component I).
//!
//! Keeps the integer/float formulas exactly as specified in §9's design
//! note — ceil/floor are explicit, never language-default rounding.

use std::time::Instant;

use crate::domain::{Vote, VoteSource, VoterChoice};

/// `minVoteParticipation` may be a flat percentage or an `"a;b"` pair split
/// on whether a game is currently running (§4.I step 2).
#[derive(Debug, Clone, Copy)]
pub enum MinParticipation {
    Flat(f64),
    Split { idle: f64, running: f64 },
}

impl MinParticipation {
    pub fn value(&self, game_running: bool) -> f64 {
        match *self {
            MinParticipation::Flat(v) => v,
            MinParticipation::Split { idle, running } => if game_running { running } else { idle },
        }
    }
}

/// `majorityMargin`, expressed in percentage points added to 50 (§4.I step
/// 3). `None` means the plain `floor(total/2)+1` form.
pub type MajorityMargin = Option<f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Pending,
    Pass,
    Fail,
}

/// Drives one `Vote` entity's tick/expiry/cast logic. At most one instance
/// is live at a time per §3; the caller (the dispatcher) owns the `Option`.
pub struct VotingEngine {
    pub min_participation: MinParticipation,
    pub majority_margin: MajorityMargin,
    pub ring_re_delay: std::time::Duration,
}

/// A ring/reminder the engine wants the caller to deliver this tick.
#[derive(Debug, Clone)]
pub struct VoterReminder {
    pub voter: String,
    pub ring: bool,
    pub notify: bool,
}

impl VotingEngine {
    pub fn new(min_participation: MinParticipation, majority_margin: MajorityMargin, ring_re_delay: std::time::Duration) -> Self {
        Self { min_participation, majority_margin, ring_re_delay }
    }

    /// Casts a manual vote, updating the tallies. Returns `false` if `voter`
    /// is not eligible (already voted, or not a remaining/away voter).
    pub fn cast(&self, vote: &mut Vote, voter: &str, choice: VoterChoice) -> bool {
        if vote.manual_voters.contains_key(voter) {
            return false;
        }
        if !vote.remaining_voters.contains_key(voter) && !vote.away_voters.contains_key(voter) {
            return false;
        }
        vote.remaining_voters.remove(voter);
        vote.manual_voters.insert(voter.to_string(), choice);
        match choice {
            VoterChoice::Yes => vote.yes += 1,
            VoterChoice::No => vote.no += 1,
            VoterChoice::Blank => vote.blank += 1,
        }
        true
    }

    /// Step 1: moves any remaining voter with `voteMode=away` into
    /// `awayVoters` once `now >= awayVoteTime`, counting as `blank`.
    pub fn apply_away_mode(&self, vote: &mut Vote, now: Instant, is_away_mode: impl Fn(&str) -> bool) {
        if now < vote.away_vote_time {
            return;
        }
        let movers: Vec<String> = vote
            .remaining_voters
            .keys()
            .filter(|name| is_away_mode(name))
            .cloned()
            .collect();
        for name in movers {
            if let Some(timers) = vote.remaining_voters.remove(&name) {
                vote.away_voters.insert(name, timers);
                vote.blank += 1;
            }
        }
    }

    fn total_voters(&self, vote: &Vote) -> u32 {
        vote.manual_voters.len() as u32 + vote.away_voters.len() as u32 + vote.remaining_voters.len() as u32
    }

    /// Step 2/3: whether the vote can terminate right now on a strict
    /// majority with quorum satisfied (checked after every cast, per the
    /// seed test in §8 scenario 3: the decisive vote lands the moment it's
    /// cast, not only at expiry).
    pub fn evaluate(&self, vote: &Vote, game_running: bool) -> VoteOutcome {
        let total = self.total_voters(vote);
        if total == 0 {
            return VoteOutcome::Fail;
        }

        let votes_for_part = match self.majority_margin {
            None => {
                let raw = 2.0 * (vote.yes.max(vote.no) as f64) - 1.0 + vote.blank as f64 - vote.away_voters.len() as f64;
                raw.max(0.0)
            }
            Some(margin) => {
                let margin_votes = (total as f64) * margin / 100.0;
                (vote.yes.max(vote.no) as f64 - margin_votes).max(0.0) + vote.blank as f64
            }
        };
        let total_votes = vote.yes + vote.no + vote.blank;
        let vote_part = if total_votes + vote.away_voters.len() as u32 == 0 {
            0.0
        } else {
            votes_for_part / (total_votes as f64 + vote.away_voters.len() as f64)
        };
        let min_part = self.min_participation.value(game_running) / 100.0;
        let quorum_ok = vote_part >= min_part;

        let required_yes = match self.majority_margin {
            None => total / 2 + 1,
            Some(margin) => ((total as f64) * (50.0 + margin) / 100.0).ceil() as u32,
        };
        let required_no = required_yes;

        if vote.yes >= required_yes && quorum_ok {
            return VoteOutcome::Pass;
        }
        if vote.no >= required_no || vote.remaining_voters.is_empty() && vote.yes < required_yes {
            return VoteOutcome::Fail;
        }
        VoteOutcome::Pending
    }

    /// Step 5: the expiry decision — simple strict majority plus quorum,
    /// irrespective of the `required_yes` margin math used for early exit.
    pub fn evaluate_expiry(&self, vote: &Vote, game_running: bool) -> VoteOutcome {
        let total = vote.yes + vote.no;
        if total == 0 {
            return VoteOutcome::Fail;
        }
        let min_part = self.min_participation.value(game_running) / 100.0;
        let eligible = self.total_voters(vote).max(1);
        let participation = (vote.yes + vote.no + vote.blank) as f64 / eligible as f64;
        if vote.yes > vote.no && participation >= min_part {
            VoteOutcome::Pass
        } else {
            VoteOutcome::Fail
        }
    }

    /// Computes which remaining voters are due a ring/notify reminder this
    /// tick, respecting the per-user minimum re-ring delay. Only online,
    /// not-in-game voters should ever be passed in by the caller.
    pub fn due_reminders(&self, vote: &Vote, now: Instant) -> Vec<VoterReminder> {
        vote.remaining_voters
            .iter()
            .filter_map(|(name, timers)| {
                let ring = now.duration_since(timers.ring_time) >= self.ring_re_delay;
                let notify = now.duration_since(timers.notify_time) >= self.ring_re_delay;
                if ring || notify {
                    Some(VoterReminder { voter: name.clone(), ring, notify })
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn mark_reminded(&self, vote: &mut Vote, voter: &str, now: Instant) {
        if let Some(timers) = vote.remaining_voters.get_mut(voter) {
            timers.ring_time = now;
            timers.notify_time = now;
        }
    }
}

/// Builds the initial eligible-voter set excluding the initiator and host
/// (§3/§4.I: `remainingVoters = users allowed to vote, minus the initiator
/// and the host`).
pub fn eligible_voters(
    all_online: impl IntoIterator<Item = String>,
    initiator: &str,
    host_name: &str,
) -> Vec<String> {
    all_online
        .into_iter()
        .filter(|name| name != initiator && name != host_name)
        .collect()
}

/// Reason string emitted when a direct execution cancels an in-flight vote
/// for the same command (§4.I: "cancel-on-direct-exec").
pub fn cancel_reason(executor: &str) -> String {
    format!("command executed directly by {executor}")
}

#[derive(Debug, Clone, Copy)]
pub struct VoteTiming {
    pub vote_time: std::time::Duration,
    pub away_vote_delay: std::time::Duration,
}

/// Resolves `awayVoteTime` from a possibly-percentage `awayVoteDelay`
/// against `voteTime`, clamped to `<= expireTime` per §4.I.
pub fn resolve_away_vote_time(now: Instant, timing: VoteTiming, away_vote_delay_pct: Option<f64>) -> (Instant, Instant) {
    let expire_time = now + timing.vote_time;
    let away_delay = match away_vote_delay_pct {
        Some(pct) => timing.vote_time.mul_f64((pct / 100.0).clamp(0.0, 1.0)),
        None => timing.away_vote_delay,
    };
    let away_vote_time = (now + away_delay).min(expire_time);
    (expire_time, away_vote_time)
}

pub fn new_vote(
    initiator: impl Into<String>,
    source: VoteSource,
    command: Vec<String>,
    now: Instant,
    timing: VoteTiming,
    away_vote_delay_pct: Option<f64>,
    eligible: impl IntoIterator<Item = String>,
) -> Vote {
    let (expire_time, away_vote_time) = resolve_away_vote_time(now, timing, away_vote_delay_pct);
    Vote::new(initiator, source, command, expire_time, away_vote_time, eligible)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> VotingEngine {
        VotingEngine::new(MinParticipation::Flat(50.0), None, std::time::Duration::from_secs(30))
    }

    #[test]
    fn decisive_yes_passes_immediately() {
        // §8 scenario 3's shape with a single eligible voter: the vote
        // passes the moment that voter says yes, without waiting for
        // expiry.
        let now = Instant::now();
        let timing = VoteTiming { vote_time: std::time::Duration::from_secs(60), away_vote_delay: std::time::Duration::from_secs(30) };
        let mut vote = new_vote("a", VoteSource::Channel, vec!["map".into(), "foo".into()], now, timing, None, ["b".to_string()]);
        let engine = engine();
        assert!(engine.cast(&mut vote, "b", VoterChoice::Yes));
        assert_eq!(engine.evaluate(&vote, false), VoteOutcome::Pass);
    }

    #[test]
    fn invariants_hold_after_casts() {
        let now = Instant::now();
        let timing = VoteTiming { vote_time: std::time::Duration::from_secs(60), away_vote_delay: std::time::Duration::from_secs(30) };
        let mut vote = new_vote("a", VoteSource::Channel, vec!["map".into()], now, timing, None, ["b".to_string(), "c".to_string()]);
        let engine = engine();
        engine.cast(&mut vote, "b", VoterChoice::No);
        assert!(vote.check_invariants());
    }

    #[test]
    fn cancel_reason_names_executor() {
        assert_eq!(cancel_reason("alice"), "command executed directly by alice");
    }
}
