//! The single core context struct (§9 design note: "Global mutable
//! state ... represent as a single core context struct owned by the
//! event loop; pass by reference to handlers").
//!
//! `AgentContext` owns every subsystem from §2's component table. Nothing
//! outside `crate::frameworks::runtime`'s main loop holds a `&mut` to it
//! for longer than one tick.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::domain::{Ban, QuitIntent, RunningGame};
use crate::frameworks::config::Config;
use crate::interface_adapters::{CertTrustStore, ConnectionManager, ReconnectPolicy};
use crate::use_cases::accounts::{AccountStore, RetentionPolicy};
use crate::use_cases::battle_room::{AutoLockMode, AutoStartMode, BattleRoom, BattleRoomConfig};
use crate::use_cases::dispatcher::RightsMatrix;
use crate::use_cases::prefs::{FloodConfig, PreferenceStore};
use crate::use_cases::queue::CommandQueue;
use crate::use_cases::skill_bridge::SkillBridge;
use crate::use_cases::voting::{MinParticipation, VotingEngine};

/// Everything the main loop needs to drive one tick: the lobby/autohost
/// connection, the hosted room, the moderation subsystems, and the
/// process-lifetime quit lattice.
pub struct AgentContext {
    pub config: Config,
    pub connection: ConnectionManager,
    pub trust_store: CertTrustStore,
    pub queue: CommandQueue,
    pub battle_room: BattleRoom,
    pub accounts: AccountStore,
    pub prefs: PreferenceStore,
    pub rights: RightsMatrix,
    pub voting_engine: VotingEngine,
    pub active_vote: Option<crate::domain::Vote>,
    pub skill_bridge: SkillBridge,
    pub quit_intent: QuitIntent,
    pub running_game: Option<RunningGame>,
    pub boss_set: HashSet<String>,
    pub global_bans: Vec<Ban>,
    pub started_at: Instant,
}

impl AgentContext {
    pub fn new(config: Config) -> Self {
        let reconnect_policy = ReconnectPolicy::parse(&config.lobby.reconnect_delay).unwrap_or(ReconnectPolicy::Fixed(Duration::from_secs(10)));

        let room_config = BattleRoomConfig {
            max_specs: None,
            max_bots: None,
            max_local_bots: None,
            max_remote_bots: None,
            auto_spec_extra_players: false,
            auto_lock: AutoLockMode::Off,
            auto_lock_clients: None,
            auto_lock_running_battle: false,
            auto_start: AutoStartMode::Off,
            min_players: config.battle.min_players,
            max_players: config.battle.max_players,
            disabled_units: config.battle.disabled_units.clone(),
            startpostype_start_rects: true,
        };

        let flood_config = FloodConfig {
            msg_threshold: 10,
            msg_window: Duration::from_secs(5),
            status_threshold: 20,
            status_window: Duration::from_secs(5),
            kicks_threshold: 3,
            kicks_window: Duration::from_secs(300),
            cmd_threshold: 6,
            cmd_window: Duration::from_secs(5),
            jsonrpc_threshold: 10,
            jsonrpc_window: Duration::from_secs(60),
            auto_ban_minutes: 30,
            ignore_minutes: 5,
        };

        let retention = RetentionPolicy { account_retention_days: 180, ip_retention_days: 90 };

        Self {
            connection: ConnectionManager::new(reconnect_policy),
            trust_store: CertTrustStore::new(),
            queue: CommandQueue::new(
                Duration::from_secs(config.queue.send_record_period_secs),
                config.queue.max_bytes_sent,
                config.queue.max_low_prio_bytes_sent,
            ),
            battle_room: BattleRoom::new(room_config, config.lobby.username.clone()),
            accounts: AccountStore::new(retention),
            prefs: PreferenceStore::new(flood_config),
            rights: default_rights_matrix(),
            voting_engine: VotingEngine::new(MinParticipation::Flat(50.0), None, Duration::from_secs(60)),
            active_vote: None,
            skill_bridge: SkillBridge::new(config.instance.skill_bot_name.clone().unwrap_or_else(|| "SLDB".to_string())),
            quit_intent: QuitIntent::default(),
            running_game: None,
            boss_set: HashSet::new(),
            global_bans: Vec::new(),
            started_at: Instant::now(),
            config,
        }
    }

    /// §4.E "Boss mode": while `boss_set` is non-empty, every non-boss user
    /// has effective access level 0 except for boss-override commands.
    pub fn is_boss_override(&self, cmd: &str) -> bool {
        matches!(cmd, "boss" | "endvote")
    }
}

/// Seeds the built-in command set from SPEC_FULL §4.H ambient note with
/// conservative default access levels: read-only/self-service commands are
/// open to anyone in the room, moderation commands default to a direct
/// level that only a trusted user tier reaches, and a handful are
/// vote-only for an ordinary player.
fn default_rights_matrix() -> RightsMatrix {
    let mut matrix = RightsMatrix::new();
    let open = crate::use_cases::dispatcher::AccessLevels { direct: 0, vote: 0 };
    let player_vote_only = crate::use_cases::dispatcher::AccessLevels { direct: 20, vote: 0 };
    let moderator = crate::use_cases::dispatcher::AccessLevels { direct: 20, vote: 0 };
    let admin = crate::use_cases::dispatcher::AccessLevels { direct: 60, vote: 0 };

    for cmd in ["help", "list", "whoami", "status", "say"] {
        matrix.define_default(cmd, open);
    }
    for cmd in ["callvote", "vote", "endvote"] {
        matrix.define_default(cmd, player_vote_only);
    }
    for cmd in ["kick", "force", "fixcolors", "balance", "start", "forcestart", "lock", "unlock", "map", "preset"] {
        matrix.define_default(cmd, moderator);
    }
    for cmd in ["ban", "unban", "banlist", "set", "hset", "bset", "pset", "boss", "stop", "rehost", "quit", "restart", "json"] {
        matrix.define_default(cmd, admin);
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frameworks::config::{BattleConfig, Config, InstanceConfig, LobbyConfig, QueueConfig};
    use std::collections::HashMap;

    fn test_config() -> Config {
        Config {
            lobby: LobbyConfig {
                host: "lobby.example".into(),
                port: 8200,
                tls: false,
                username: "autohostd".into(),
                password: "pw".into(),
                reconnect_delay: "10-30".into(),
                follow_redirect: true,
                lobby_client: "autohostd 0.1.0".into(),
            },
            battle: BattleConfig {
                engine_version: "105.1.1".into(),
                mod_archive: "Balanced Annihilation".into(),
                map_name: "Comet Catcher".into(),
                password: None,
                max_players: 16,
                min_players: 2,
                disabled_units: Vec::new(),
            },
            queue: QueueConfig::default(),
            instance: InstanceConfig { instance_dir: "/tmp/autohostd-test".into(), skill_bot_name: None },
            macros: HashMap::new(),
        }
    }

    #[test]
    fn boss_override_commands_bypass_boss_mode() {
        let ctx = AgentContext::new(test_config());
        assert!(ctx.is_boss_override("boss"));
        assert!(ctx.is_boss_override("endvote"));
        assert!(!ctx.is_boss_override("kick"));
    }

    #[test]
    fn default_rights_matrix_opens_read_only_commands() {
        let ctx = AgentContext::new(test_config());
        let levels = ctx.rights.lookup(
            "status",
            crate::use_cases::dispatcher::Source::Channel,
            crate::use_cases::dispatcher::PlayerStatus::Outside,
            crate::use_cases::dispatcher::GameState::Stopped,
        );
        assert_eq!(levels.direct, 0);
    }
}
