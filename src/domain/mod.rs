//! Core entities shared by every use case (§3 of the spec).
//!
//! Nothing in this module talks to a socket, a file, or a child process —
//! that is the job of `interface_adapters` and `frameworks`. Keeping the
//! entities free of I/O lets the use cases in `crate::use_cases` be tested
//! without a running lobby server.

pub mod ban;
pub mod battle;
pub mod errors;
pub mod quit;
pub mod running_game;
pub mod skill;
pub mod user;
pub mod vote;

pub use ban::{Ban, BanAction, BanFilter, BanType};
pub use battle::{
    AllowedValues, Bot, BattleMember, BattleStatus, Color, Settings, Setting, SettingError,
    SettingsScope, ShorthandShape, Side, StartRect,
};
pub use quit::{QuitAction, QuitCondition, QuitIntent};
pub use running_game::{GameOutcome, IdMappings, RunningGame, TeamStat};
pub use skill::{BattleSkill, GameType, RankOrigin, SkillOrigin, SkillPrivacy, SkillTuple, RANK_TRUESKILL};
pub use errors::AutohostError;
pub use user::{Account, User, UserStatus};
pub use vote::{Vote, VoteSource, VoterChoice, VoterTimers};
pub use ban::{BanSubject, Bound, StringMatch, find_matching_ban};
