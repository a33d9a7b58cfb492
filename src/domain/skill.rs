//! Per-user, per-game-type skill cache (§3, §4.G).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameType {
    Duel,
    Ffa,
    Team,
    TeamFfa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillOrigin {
    Rank,
    TrueSkill,
    TrueSkillDegraded,
    Plugin,
    PluginDegraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankOrigin {
    Account,
    Ip,
    IpManual,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillPrivacy {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy)]
pub struct SkillTuple {
    pub skill: f64,
    pub sigma: Option<f64>,
}

/// The ephemeral per-user skill cache (§3). Holds one tuple per game type so
/// switching `{Duel, FFA, Team, TeamFFA}` (§4.E "classify current game
/// type") doesn't require a fresh round-trip to the skill bot.
#[derive(Debug, Clone)]
pub struct BattleSkill {
    pub by_game_type: [Option<SkillTuple>; 4],
    pub current_game_type: GameType,
    pub rank: u8,
    pub skill_origin: SkillOrigin,
    pub rank_origin: RankOrigin,
    pub skill_privacy: SkillPrivacy,
}

impl BattleSkill {
    pub fn new(rank: u8) -> Self {
        Self {
            by_game_type: [None; 4],
            current_game_type: GameType::Duel,
            rank,
            skill_origin: SkillOrigin::Rank,
            rank_origin: RankOrigin::Account,
            skill_privacy: SkillPrivacy::Public,
        }
    }

    fn index(game_type: GameType) -> usize {
        match game_type {
            GameType::Duel => 0,
            GameType::Ffa => 1,
            GameType::Team => 2,
            GameType::TeamFfa => 3,
        }
    }

    pub fn set_tuple(&mut self, game_type: GameType, tuple: SkillTuple) {
        self.by_game_type[Self::index(game_type)] = Some(tuple);
    }

    /// The skill value used by the balancer for the room's current game
    /// type, falling back to the rank-derived table when no live tuple has
    /// been cached yet (§4.G degrade path).
    pub fn effective_skill(&self, rank_skill_table: &[f64; 32]) -> f64 {
        match self.by_game_type[Self::index(self.current_game_type)] {
            Some(tuple) => tuple.skill,
            None => rank_skill_table[self.rank.min(31) as usize],
        }
    }

    pub fn set_current_game_type(&mut self, game_type: GameType) -> bool {
        let changed = game_type != self.current_game_type;
        self.current_game_type = game_type;
        changed
    }
}

/// Rank-to-TrueSkill degrade table referenced by §8 scenario 6
/// (`RANK_TRUESKILL[rank]`). Ranks run 0..=31 in the lobby protocol; values
/// grow roughly linearly, matching the informal "higher rank, higher
/// skill" mapping the spec assumes without fixing exact numbers.
pub const RANK_TRUESKILL: [f64; 32] = {
    let mut table = [0.0; 32];
    let mut i = 0;
    while i < 32 {
        table[i] = 10.0 + (i as f64) * 2.0;
        i += 1;
    }
    table
};
