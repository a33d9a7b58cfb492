//! Hosted battle room lifecycle, membership, and policy enforcement
//! (§3, §4.E, component E).

use std::collections::HashMap;
use std::time::Instant;

use crate::domain::{BattleMember, BattleStatus, Bot, GameType, StartRect};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoLockMode {
    Off,
    On,
    WhenEmpty,
    WhenTeamSizeEven,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoStartMode {
    Off,
    On,
}

/// Settings the membership loop and auto-start check read each tick
/// (§4.E). Kept separate from the generic `crate::domain::Settings` tree
/// because these are hot-path numeric/enum values read every ~2s tick.
#[derive(Debug, Clone)]
pub struct BattleRoomConfig {
    pub max_specs: Option<u32>,
    pub max_bots: Option<u32>,
    pub max_local_bots: Option<u32>,
    pub max_remote_bots: Option<u32>,
    pub auto_spec_extra_players: bool,
    pub auto_lock: AutoLockMode,
    pub auto_lock_clients: Option<u32>,
    pub auto_lock_running_battle: bool,
    pub auto_start: AutoStartMode,
    pub min_players: u32,
    pub max_players: u32,
    pub disabled_units: Vec<String>,
    pub startpostype_start_rects: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDecision {
    Accept,
    Deny,
}

/// The target structure computed by `getTargetBattleStructure` (§4.F step
/// 1, consumed here for the auto-start check and by the balancer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetStructure {
    pub nb_teams: u32,
    pub team_size: u32,
    pub nb_player_by_id: u32,
}

/// Computes `(nbTeams, teamSize, nbPlayerById)`, inflating to fit
/// `nb_players` and preferring to fill `nbPlayerById` slots before growing
/// the number of teams (§4.F step 1).
pub fn target_battle_structure(nb_players: u32, preferred_teams: u32, preferred_team_size: u32) -> TargetStructure {
    let preferred_teams = preferred_teams.max(1);
    let preferred_team_size = preferred_team_size.max(1);
    let capacity = preferred_teams * preferred_team_size;
    if nb_players <= capacity {
        return TargetStructure { nb_teams: preferred_teams, team_size: preferred_team_size, nb_player_by_id: preferred_team_size };
    }
    // Inflate team size first (fill existing ids), then team count.
    let mut team_size = preferred_team_size;
    let mut nb_teams = preferred_teams;
    while nb_teams * team_size < nb_players {
        if team_size * nb_teams < preferred_teams * (team_size + 1) {
            team_size += 1;
        } else {
            nb_teams += 1;
        }
    }
    TargetStructure { nb_teams, team_size, nb_player_by_id: team_size }
}

/// Classifies the room's current game type from the target structure
/// (§4.E "classify current game type").
pub fn classify_game_type(target: TargetStructure) -> GameType {
    match (target.nb_teams, target.team_size) {
        (2, 1) => GameType::Duel,
        (teams, 1) if teams > 2 => GameType::Ffa,
        (2, size) if size > 1 => GameType::Team,
        _ => GameType::TeamFfa,
    }
}

pub struct BattleRoom {
    pub is_open: bool,
    pub is_locked: bool,
    pub members: HashMap<String, BattleMember>,
    pub bots: HashMap<String, Bot>,
    pub start_rects: Vec<StartRect>,
    pub current_map: String,
    pub current_mod: String,
    pub battle_change: Instant,
    pub config: BattleRoomConfig,
    pub game_type: GameType,
    pub host_in_game: bool,
    pub host_name: String,
    next_join_order: u64,
}

impl BattleRoom {
    pub fn new(config: BattleRoomConfig, host_name: impl Into<String>) -> Self {
        Self {
            is_open: false,
            is_locked: false,
            members: HashMap::new(),
            bots: HashMap::new(),
            start_rects: Vec::new(),
            current_map: String::new(),
            current_mod: String::new(),
            battle_change: Instant::now(),
            config,
            game_type: GameType::Duel,
            host_in_game: false,
            host_name: host_name.into(),
            next_join_order: 0,
        }
    }

    fn next_join_order(&mut self) -> u64 {
        let order = self.next_join_order;
        self.next_join_order += 1;
        order
    }

    fn touch(&mut self) {
        self.battle_change = Instant::now();
    }

    pub fn open(&mut self, map: impl Into<String>, modd: impl Into<String>) {
        self.is_open = true;
        self.current_map = map.into();
        self.current_mod = modd.into();
        self.touch();
    }

    pub fn close(&mut self) {
        self.is_open = false;
        self.members.clear();
        self.bots.clear();
        self.start_rects.clear();
        self.touch();
    }

    /// `JOINEDBATTLE`.
    pub fn add_member(&mut self, mut member: BattleMember) {
        member.join_order = self.next_join_order();
        self.members.insert(member.name.clone(), member);
        self.touch();
    }

    /// `LEFTBATTLE`/`KICKFROMBATTLE`.
    pub fn remove_member(&mut self, name: &str) -> Option<BattleMember> {
        let removed = self.members.remove(name);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    pub fn set_member_status(&mut self, name: &str, status: BattleStatus) {
        if let Some(member) = self.members.get_mut(name) {
            member.status = status;
            self.touch();
        }
    }

    pub fn add_bot(&mut self, mut bot: Bot) {
        bot.join_order = self.next_join_order();
        self.bots.insert(bot.name.clone(), bot);
        self.touch();
    }

    pub fn remove_bot(&mut self, name: &str) -> Option<Bot> {
        let removed = self.bots.remove(name);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Clears start-rects en bloc on map change or when the room's
    /// `startpostype` no longer takes manual rects (§3 StartRect
    /// invariant).
    pub fn clear_start_rects_if_needed(&mut self, startpostype_is_choose_in_game: bool) {
        if !startpostype_is_choose_in_game {
            self.start_rects.clear();
        }
    }

    pub fn change_map(&mut self, map: impl Into<String>) {
        self.current_map = map.into();
        self.start_rects.clear();
        self.touch();
    }

    pub fn players(&self) -> impl Iterator<Item = &BattleMember> {
        self.members.values().filter(|m| !m.status.is_spectator)
    }

    pub fn spectators(&self) -> impl Iterator<Item = &BattleMember> {
        self.members.values().filter(|m| m.status.is_spectator)
    }

    pub fn player_count(&self) -> u32 {
        self.players().count() as u32
    }

    pub fn spectator_count(&self) -> u32 {
        self.spectators().count() as u32
    }

    fn local_bots(&self) -> impl Iterator<Item = &Bot> {
        self.bots.values().filter(|b| self.members.contains_key(&b.owner_name))
    }

    fn remote_bot_count(&self) -> u32 {
        self.bots.values().filter(|b| !self.members.contains_key(&b.owner_name)).count() as u32
    }

    /// `(nbNonPlayer, targetLockedStatus, currentMap)` recomputation, the
    /// first step of the §4.E membership loop. Returns `true` when any of
    /// these changed and an `UPDATEBATTLEINFO` should be sent.
    pub fn recompute_battle_info(&mut self, previous_nb_non_player: u32, previous_locked: bool, previous_map: &str) -> bool {
        let nb_non_player = self.spectator_count() + self.bots.len() as u32;
        let locked = self.is_locked;
        let map_changed = self.current_map != previous_map;
        nb_non_player != previous_nb_non_player || locked != previous_locked || map_changed
    }

    /// Enforces `autoSpecExtraPlayers` (§4.E): first strips the newest
    /// auto-added local bots, then force-specs the newest players, until
    /// player count fits `nbTeams*teamSize*nbPlayerById`.
    pub fn enforce_auto_spec_extra_players(&mut self, target: TargetStructure) -> Vec<ModerationAction> {
        if !self.config.auto_spec_extra_players {
            return Vec::new();
        }
        let capacity = target.nb_teams * target.team_size * target.nb_player_by_id.max(1);
        let mut actions = Vec::new();
        while self.player_count() > capacity {
            if let Some(bot_name) = self.newest_local_bot_name() {
                self.remove_bot(&bot_name);
                actions.push(ModerationAction::RemoveBot(bot_name));
                continue;
            }
            if let Some(player_name) = self.newest_player_name() {
                self.force_spectator(&player_name);
                actions.push(ModerationAction::ForceSpectator(player_name));
                continue;
            }
            break;
        }
        actions
    }

    /// Enforces `maxSpecs`: kicks newest spectators below `immunity_level`
    /// until the spectator count is within budget (§4.E).
    pub fn enforce_max_specs(&mut self, immunity_level: impl Fn(&str) -> u8, min_immune_level: u8) -> Vec<ModerationAction> {
        let Some(max_specs) = self.config.max_specs else { return Vec::new() };
        let mut actions = Vec::new();
        while self.spectator_count() > max_specs {
            let candidate = self
                .spectators()
                .filter(|m| immunity_level(&m.name) < min_immune_level)
                .max_by_key(|m| m.join_order)
                .map(|m| m.name.clone());
            let Some(name) = candidate else { break };
            self.remove_member(&name);
            actions.push(ModerationAction::Kick(name));
        }
        actions
    }

    fn bot_class_count(&self, class: BotClass) -> u32 {
        match class {
            BotClass::Any => self.bots.len() as u32,
            BotClass::Local => self.local_bots().count() as u32,
            BotClass::Remote => self.remote_bot_count(),
        }
    }

    /// Enforces `maxBots`/`maxLocalBots`/`maxRemoteBots` by removing newest
    /// bots from whichever class is in violation (§4.E).
    pub fn enforce_max_bots(&mut self) -> Vec<ModerationAction> {
        let mut actions = Vec::new();
        for (limit, class) in [
            (self.config.max_bots, BotClass::Any),
            (self.config.max_local_bots, BotClass::Local),
            (self.config.max_remote_bots, BotClass::Remote),
        ] {
            let Some(limit) = limit else { continue };
            while self.bot_class_count(class) > limit {
                let candidate = match class {
                    BotClass::Any => self.bots.values().max_by_key(|b| b.join_order).map(|b| b.name.clone()),
                    BotClass::Local => self.local_bots().max_by_key(|b| b.join_order).map(|b| b.name.clone()),
                    BotClass::Remote => self
                        .bots
                        .values()
                        .filter(|b| !self.members.contains_key(&b.owner_name))
                        .max_by_key(|b| b.join_order)
                        .map(|b| b.name.clone()),
                };
                let Some(name) = candidate else { break };
                self.remove_bot(&name);
                actions.push(ModerationAction::RemoveBot(name));
            }
        }
        actions
    }

    fn newest_local_bot_name(&self) -> Option<String> {
        self.local_bots().max_by_key(|b| b.join_order).map(|b| b.name.clone())
    }

    fn newest_player_name(&self) -> Option<String> {
        self.players().max_by_key(|m| m.join_order).map(|m| m.name.clone())
    }

    fn force_spectator(&mut self, name: &str) {
        if let Some(member) = self.members.get_mut(name) {
            member.status.is_spectator = true;
            self.touch();
        }
    }

    /// Evaluates `autoLock` (§4.E). `slots_full` means the room's
    /// configured slot count has been reached.
    pub fn evaluate_auto_lock(&mut self, slots_full: bool, connected_clients: u32) -> bool {
        let should_lock = match self.config.auto_lock {
            AutoLockMode::Off => false,
            AutoLockMode::On => slots_full,
            AutoLockMode::WhenEmpty => self.player_count() == 0,
            AutoLockMode::WhenTeamSizeEven => slots_full && self.player_count() % 2 == 0,
        } || self.config.auto_lock_clients.map(|n| connected_clients >= n).unwrap_or(false)
            || (self.config.auto_lock_running_battle && self.host_in_game);

        let should_unlock = self.player_count() < self.config.min_players;

        let changed = if should_unlock {
            !self.is_locked == false
        } else {
            self.is_locked != should_lock
        };

        if should_unlock {
            self.is_locked = false;
        } else {
            self.is_locked = should_lock;
        }
        changed
    }

    /// Auto-start readiness check (§4.E): "balanced-ready" iff the player
    /// count tiles evenly and the minimum is met and at least one non-host
    /// participant exists.
    pub fn is_balanced_ready(&self, target: TargetStructure) -> bool {
        let players = self.player_count();
        if players < self.config.min_players {
            return false;
        }
        let tiles_evenly = if target.team_size == 1 {
            target.nb_teams > 0 && players % target.nb_teams == 0
        } else {
            players % target.team_size == 0
        };
        if !tiles_evenly {
            return false;
        }
        self.members.values().any(|m| !m.status.is_spectator && m.name != self.host_name)
    }

    /// `cbJoinBattleRequest` (§4.E): deny iff a dynamic ban of type <=
    /// battle matches; plugins get to veto after that; otherwise accept.
    /// Plugin veto is modeled as a closure so callers supply the plugin
    /// registry without this module depending on it.
    pub fn join_policy<F>(&self, is_banned: bool, plugin_veto: F) -> (JoinDecision, Option<String>)
    where
        F: FnOnce() -> Option<String>,
    {
        if is_banned {
            return (JoinDecision::Deny, Some("banned".to_string()));
        }
        if let Some(reason) = plugin_veto() {
            return (JoinDecision::Deny, Some(reason));
        }
        (JoinDecision::Accept, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BotClass {
    Any,
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationAction {
    Kick(String),
    ForceSpectator(String),
    RemoveBot(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BattleRoomConfig {
        BattleRoomConfig {
            max_specs: Some(2),
            max_bots: Some(2),
            max_local_bots: None,
            max_remote_bots: None,
            auto_spec_extra_players: true,
            auto_lock: AutoLockMode::On,
            auto_lock_clients: None,
            auto_lock_running_battle: false,
            auto_start: AutoStartMode::On,
            min_players: 2,
            max_players: 16,
            disabled_units: Vec::new(),
            startpostype_start_rects: false,
        }
    }

    #[test]
    fn target_structure_inflates_to_fit_players() {
        let target = target_battle_structure(5, 2, 2);
        assert!(target.nb_teams * target.team_size >= 5);
    }

    #[test]
    fn max_specs_kicks_newest_first() {
        let mut room = BattleRoom::new(config(), "host".into());
        room.open("map", "mod");
        for name in ["a", "b", "c"] {
            let mut member = BattleMember::new(name, 1);
            member.status.is_spectator = true;
            room.add_member(member);
        }
        let actions = room.enforce_max_specs(|_| 0, 1);
        assert_eq!(actions, vec![ModerationAction::Kick("c".to_string())]);
        assert_eq!(room.spectator_count(), 2);
    }

    #[test]
    fn enforce_max_bots_removes_most_recently_added_bot() {
        let mut room = BattleRoom::new(config(), "host".into());
        room.open("map", "mod");
        for name in ["bot1", "bot2", "bot3"] {
            room.add_bot(Bot {
                name: name.to_string(),
                owner_name: "host".to_string(),
                ai_spec: "ai".to_string(),
                status: Default::default(),
                color: Default::default(),
                join_order: 0,
            });
        }
        let actions = room.enforce_max_bots();
        assert_eq!(actions, vec![ModerationAction::RemoveBot("bot3".to_string())]);
    }

    #[test]
    fn auto_spec_extra_players_specs_newest_players_over_capacity() {
        let mut room = BattleRoom::new(config(), "host".into());
        room.open("map", "mod");
        for name in ["p1", "p2", "p3"] {
            let member = BattleMember::new(name, 1);
            room.add_member(member);
        }
        let target = TargetStructure { nb_teams: 2, team_size: 1, nb_player_by_id: 1 };
        let actions = room.enforce_auto_spec_extra_players(target);
        assert_eq!(actions, vec![ModerationAction::ForceSpectator("p3".to_string())]);
        assert_eq!(room.player_count(), 2);
    }

    #[test]
    fn balanced_ready_requires_even_tiling_and_minimum() {
        let mut room = BattleRoom::new(config(), "host".into());
        room.open("map", "mod");
        room.add_member(BattleMember::new("p1", 1));
        let target = TargetStructure { nb_teams: 2, team_size: 1, nb_player_by_id: 1 };
        assert!(!room.is_balanced_ready(target));
        room.add_member(BattleMember::new("p2", 2));
        assert!(room.is_balanced_ready(target));
    }
}
