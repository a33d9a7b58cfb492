//! Game launch preflight, start-script assembly, and post-mortem
//! bookkeeping (§4.J, component J).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::domain::{BattleMember, Bot, GameOutcome, IdMappings, RunningGame, TeamStat};

/// Preflight result codes, exactly the `-5..1` range from §4.J.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleState {
    InconsistentTeamId = -5,
    TooManyMembers = -4,
    Unsynced = -3,
    PlayerAlreadyInGame = -2,
    Unready = -1,
    UnevenOrTooFewPlayers = 0,
    Ready = 1,
}

pub const ENGINE_MEMBER_CAP: usize = 251;

#[derive(Debug, Clone)]
pub struct PreflightInput<'a> {
    pub members: &'a [BattleMember],
    pub min_players: u32,
    pub even_teams: bool,
    pub startpostype_choose_in_game: bool,
    pub has_start_rects: bool,
    pub force_start: bool,
}

/// Runs the preflight checks in the exact priority order of §4.J.
pub fn preflight(input: &PreflightInput) -> BattleState {
    if input.members.len() > ENGINE_MEMBER_CAP {
        return BattleState::TooManyMembers;
    }
    if !consistent_team_ids(input.members) {
        return BattleState::InconsistentTeamId;
    }
    if input.members.iter().any(|m| !m.status.is_spectator && !m.status.sync) {
        return BattleState::Unsynced;
    }
    if input.startpostype_choose_in_game && !input.has_start_rects && !input.force_start {
        return BattleState::Unready;
    }
    if input.startpostype_choose_in_game && input.members.iter().any(|m| !m.status.is_spectator && !m.status.ready) {
        return BattleState::Unready;
    }
    let players = input.members.iter().filter(|m| !m.status.is_spectator).count() as u32;
    if players < input.min_players || !input.even_teams {
        return BattleState::UnevenOrTooFewPlayers;
    }
    BattleState::Ready
}

/// Invariant 2 from §3: no two different allyteam values may share the
/// same `id` within the room.
fn consistent_team_ids(members: &[BattleMember]) -> bool {
    let mut id_to_team: HashMap<u8, u8> = HashMap::new();
    for m in members.iter().filter(|m| !m.status.is_spectator) {
        match id_to_team.get(&m.status.id) {
            Some(team) if *team != m.status.ally_team => return false,
            _ => {
                id_to_team.insert(m.status.id, m.status.ally_team);
            }
        }
    }
    true
}

/// Serializes the start script body (members/teams/allyteams/scripttags),
/// per §4.J "launch sequence". The wire/file format for the script itself
/// is external (unitsync-adjacent), so this returns a scoped key→value map
/// the caller writes out via whatever script-writer module it has.
pub fn build_start_script(members: &[BattleMember], bots: &[Bot], host_addr: &str, autohost_port: u16) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    tags.insert("game/hostip".to_string(), host_addr.to_string());
    tags.insert("game/autohostport".to_string(), autohost_port.to_string());
    for (i, m) in members.iter().enumerate() {
        let lc = m.name.to_lowercase();
        tags.insert(format!("game/players/{lc}/team"), m.status.id.to_string());
        tags.insert(format!("game/players/{lc}/allyteam"), m.status.ally_team.to_string());
        tags.insert(format!("game/player{i}/name"), m.name.clone());
        if let Some(pw) = &m.script_password {
            tags.insert(format!("game/players/{lc}/scriptpassword"), pw.clone());
        }
    }
    for (i, b) in bots.iter().enumerate() {
        tags.insert(format!("game/ai{i}/name"), b.name.clone());
        tags.insert(format!("game/ai{i}/host"), b.owner_name.clone());
    }
    tags
}

pub fn snapshot_running_game(members: &[BattleMember], bots: &[Bot], map_name: &str, mod_name: &str, engine_version: &str) -> RunningGame {
    let colors = members
        .iter()
        .map(|m| (m.name.clone(), m.color))
        .chain(bots.iter().map(|b| (b.name.clone(), b.color)))
        .collect();
    let mut mappings = IdMappings::default();
    for m in members.iter().filter(|m| !m.status.is_spectator) {
        mappings.teams_map.insert(m.status.id, m.status.id);
        mappings.ally_teams_map.insert(m.status.ally_team, m.status.ally_team);
    }
    RunningGame {
        started_at: Instant::now(),
        members: members.to_vec(),
        bots: bots.to_vec(),
        colors,
        mappings,
        map_name: map_name.to_string(),
        mod_name: mod_name.to_string(),
        engine_version: engine_version.to_string(),
    }
}

/// Accumulates `GAME_TEAMSTAT` reports into per-team totals, indexed
/// through the frozen `IdMappings` so a reshuffle mid-game can't corrupt
/// the running stats (§4.J).
#[derive(Debug, Clone, Default)]
pub struct TeamStatAccumulator {
    pub by_team: HashMap<u8, TeamStat>,
}

impl TeamStatAccumulator {
    pub fn record(&mut self, mappings: &IdMappings, engine_team_id: u8, damage: u64, resources: u64, units_produced: u32, units_killed: u32) {
        let team_id = mappings.teams_map.get(&engine_team_id).copied().unwrap_or(engine_team_id);
        let entry = self.by_team.entry(team_id).or_default();
        entry.damage_dealt += damage;
        entry.resources_produced += resources;
        entry.units_produced += units_produced;
        entry.units_killed += units_killed;
    }
}

/// Consensus over `SERVER_GAMEOVER` client reports (§4.J): a team wins iff
/// more than half of the reporting clients list it; disagreement among
/// reports is "inconsistent". The host's own report is authoritative when
/// running headless; a dedicated server counts itself as a client.
pub fn resolve_game_outcome(reports: &[Vec<u8>], host_report: Option<&[u8]>, headless: bool) -> GameOutcome {
    if headless {
        if let Some(host) = host_report {
            return GameOutcome::Win { winning_ally_teams: host.to_vec() };
        }
    }
    if reports.is_empty() {
        return GameOutcome::Undecided;
    }
    let mut votes: HashMap<u8, usize> = HashMap::new();
    for report in reports {
        for &team in report {
            *votes.entry(team).or_insert(0) += 1;
        }
    }
    let total = reports.len();
    let winners: Vec<u8> = votes
        .into_iter()
        .filter(|(_, count)| *count * 2 > total)
        .map(|(team, _)| team)
        .collect();

    let all_agree = reports.iter().all(|r| {
        let mut a = r.clone();
        let mut b = reports[0].clone();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    });

    if winners.is_empty() {
        GameOutcome::Draw
    } else if !all_agree {
        GameOutcome::Inconsistent
    } else {
        GameOutcome::Win { winning_ally_teams: winners }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEndClass {
    NormalExit,
    SyncErrors,
    Crash,
}

/// Classifies how the game process ended (§4.J "crash detection"). Exit
/// 255 is "sync errors", other non-zero/signal/core-dump is a crash.
pub fn classify_process_end(exit_code: Option<i32>, signaled: bool, core_dumped: bool) -> ProcessEndClass {
    if signaled || core_dumped {
        return ProcessEndClass::Crash;
    }
    match exit_code {
        Some(0) => ProcessEndClass::NormalExit,
        Some(255) => ProcessEndClass::SyncErrors,
        Some(_) | None => ProcessEndClass::Crash,
    }
}

/// §4.J: "a premature process exit while the autohost socket still
/// reports an active game keeps state in `springPrematureEndData`; 5s
/// later the crash path runs to clean up."
pub const PREMATURE_END_GRACE: Duration = Duration::from_secs(5);

/// Determines whether end-game awards should be computed (§4.J): at
/// least 3 teams, or exactly 2 teams with `endGameAwards >= 2`.
pub fn should_compute_awards(nb_teams: u32, end_game_awards: u32) -> bool {
    nb_teams >= 3 || (nb_teams == 2 && end_game_awards >= 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BattleStatus, Color};

    fn member(name: &str, team: u8, ally: u8, spec: bool) -> BattleMember {
        let mut m = BattleMember::new(name, 1);
        m.status = BattleStatus { is_spectator: spec, ally_team: ally, id: team, ready: true, sync: true, side: Default::default(), bonus: 0 };
        m.color = Color { r: 1, g: 2, b: 3 };
        m
    }

    #[test]
    fn more_than_cap_members_fails_preflight() {
        let members: Vec<_> = (0..252).map(|i| member(&format!("p{i}"), 0, 0, true)).collect();
        let input = PreflightInput {
            members: &members,
            min_players: 2,
            even_teams: true,
            startpostype_choose_in_game: false,
            has_start_rects: true,
            force_start: false,
        };
        assert_eq!(preflight(&input), BattleState::TooManyMembers);
    }

    #[test]
    fn inconsistent_ids_detected() {
        let members = vec![member("a", 0, 0, false), member("b", 0, 1, false)];
        let input = PreflightInput {
            members: &members,
            min_players: 2,
            even_teams: true,
            startpostype_choose_in_game: false,
            has_start_rects: true,
            force_start: false,
        };
        assert_eq!(preflight(&input), BattleState::InconsistentTeamId);
    }

    #[test]
    fn ready_when_all_checks_pass() {
        let members = vec![member("a", 0, 0, false), member("b", 1, 1, false)];
        let input = PreflightInput {
            members: &members,
            min_players: 2,
            even_teams: true,
            startpostype_choose_in_game: false,
            has_start_rects: true,
            force_start: false,
        };
        assert_eq!(preflight(&input), BattleState::Ready);
    }

    #[test]
    fn outcome_consensus_requires_majority() {
        let reports = vec![vec![0], vec![0], vec![1]];
        let outcome = resolve_game_outcome(&reports, None, false);
        assert_eq!(outcome, GameOutcome::Win { winning_ally_teams: vec![0] });
    }

    #[test]
    fn split_reports_with_no_majority_is_a_draw() {
        let reports = vec![vec![0], vec![1]];
        let outcome = resolve_game_outcome(&reports, None, false);
        assert_eq!(outcome, GameOutcome::Draw);
    }

    #[test]
    fn process_end_classification() {
        assert_eq!(classify_process_end(Some(0), false, false), ProcessEndClass::NormalExit);
        assert_eq!(classify_process_end(Some(255), false, false), ProcessEndClass::SyncErrors);
        assert_eq!(classify_process_end(None, true, false), ProcessEndClass::Crash);
        assert_eq!(classify_process_end(Some(1), false, false), ProcessEndClass::Crash);
    }
}
