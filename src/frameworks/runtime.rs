//! The main event loop (§5 "SpadsMainLoop"): the only place that owns a
//! live `LobbyTransport`, drives `AgentContext` through one tick at a
//! time, and turns CLI one-shot flags into standalone operations. This is
//! the teacher's `head_server::frameworks::server::run` shape — accept a
//! config, build the core, `tokio::select!` over the socket and a timer
//! — generalized from one lobby room to this crate's battle room.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::time::interval;

use crate::domain::{AutohostError, BattleMember, BattleStatus, Bot, QuitAction, QuitCondition};
use crate::frameworks::cli::{split_host_hash, Cli};
use crate::frameworks::commands;
use crate::frameworks::config::Config;
use crate::frameworks::context::AgentContext;
use crate::frameworks::lobby_socket::LobbySocket;
use crate::frameworks::locks::InstanceLock;
use crate::interface_adapters::tls::CertTrustStore;
use crate::interface_adapters::{InboundEvent, LobbyTransport, OutboundCommand};
use crate::use_cases::dispatcher::{self, GameState, PlayerStatus, Source};
use crate::use_cases::prefs::hash_password;
use crate::use_cases::quit::{self, BlockingGate};

const TICK_PERIOD: Duration = Duration::from_millis(500);
const BATTLE_ROOM_ENFORCE_PERIOD: Duration = Duration::from_secs(2);

/// Entry point called from `main`: parses the config, handles any
/// one-shot CLI flag, then runs the connect/login/serve loop until a
/// quit decision or a fatal error ends the process.
pub async fn run(cli: Cli) -> Result<(), AutohostError> {
    let config = Config::load(Path::new(&cli.config_file), &cli.macros)?;
    let instance_dir = PathBuf::from(&config.instance.instance_dir);
    let trust_path = instance_dir.join("tls_trust.txt");

    if cli.doc {
        print_doc(&config);
        return Ok(());
    }
    if let Some(arg) = &cli.tls_cert_trust {
        return one_shot_trust(&trust_path, arg, &config.lobby.host, true).await;
    }
    if let Some(arg) = &cli.tls_cert_revoke {
        return one_shot_trust(&trust_path, arg, &config.lobby.host, false).await;
    }
    if let Some(host_filter) = &cli.tls_cert_list {
        return one_shot_list(&trust_path, host_filter.as_deref(), &config.lobby.host).await;
    }

    let _instance_lock = InstanceLock::acquire(&instance_dir).await?;
    let mut ctx = AgentContext::new(config);
    ctx.trust_store = load_trust_store(&trust_path).await;
    let trust_store = Arc::new(Mutex::new(ctx.trust_store.clone()));

    serve(&mut ctx, trust_store, &trust_path).await
}

fn print_doc(config: &Config) {
    println!("lobby.host = {}", config.lobby.host);
    println!("lobby.port = {}", config.lobby.port);
    println!("lobby.tls = {}", config.lobby.tls);
    println!("battle.mod_archive = {}", config.battle.mod_archive);
    println!("battle.map_name = {}", config.battle.map_name);
    println!("instance.instance_dir = {}", config.instance.instance_dir);
}

async fn load_trust_store(path: &Path) -> CertTrustStore {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => CertTrustStore::from_lines(text.lines()),
        Err(_) => CertTrustStore::new(),
    }
}

async fn save_trust_store(path: &Path, store: &CertTrustStore) -> Result<(), AutohostError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AutohostError::System(format!("creating {}: {e}", parent.display())))?;
    }
    let body = store.to_lines().join("\n");
    tokio::fs::write(path, body).await.map_err(|e| AutohostError::System(format!("writing {}: {e}", path.display())))
}

async fn one_shot_trust(trust_path: &Path, arg: &str, fallback_host: &str, trust: bool) -> Result<(), AutohostError> {
    let (host, hash) = split_host_hash(arg, fallback_host);
    let mut store = load_trust_store(trust_path).await;
    if trust {
        store.trust(&host, hash);
    } else {
        store.revoke(&host, &hash);
    }
    save_trust_store(trust_path, &store).await?;
    Ok(())
}

async fn one_shot_list(trust_path: &Path, host_filter: Option<&str>, fallback_host: &str) -> Result<(), AutohostError> {
    let store = load_trust_store(trust_path).await;
    let host = host_filter.unwrap_or(fallback_host);
    for hash in store.list(host) {
        println!("{host} {hash}");
    }
    Ok(())
}

/// Connects, logs in, and drives inbound/outbound traffic until the quit
/// lattice resolves to a terminal decision or the connection is
/// irrecoverably exhausted (§4.B/§4.K).
async fn serve(ctx: &mut AgentContext, trust_store: Arc<Mutex<CertTrustStore>>, trust_path: &Path) -> Result<(), AutohostError> {
    loop {
        ctx.connection.on_connecting();
        let connect_result = LobbySocket::connect(&ctx.config.lobby.host, ctx.config.lobby.port, ctx.config.lobby.tls, trust_store.clone()).await;

        let mut transport = match connect_result {
            Ok(t) => t,
            Err(e) => {
                if ctx.connection.connect_exhausted() {
                    return Err(e);
                }
                tracing::warn!(error = %e, "lobby connect failed, will retry");
                let mut rng = rand::thread_rng();
                match ctx.connection.next_reconnect_delay(&mut rng) {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    None => return Err(e),
                }
            }
        };
        ctx.connection.on_connected(Instant::now());

        match run_session(ctx, &mut transport).await {
            SessionEnd::Shutdown { exit_code } => {
                let snapshot = trust_store.lock().expect("trust store mutex poisoned").clone();
                save_trust_store(trust_path, &snapshot).await?;
                if exit_code == 0 {
                    return Ok(());
                }
                std::process::exit(exit_code as i32);
            }
            SessionEnd::Restart { exit_code } => {
                let snapshot = trust_store.lock().expect("trust store mutex poisoned").clone();
                save_trust_store(trust_path, &snapshot).await?;
                std::process::exit(exit_code as i32);
            }
            SessionEnd::Disconnected => {
                ctx.connection.on_disconnected();
                if ctx.connection.connect_exhausted() {
                    return Err(AutohostError::Network("lobby connection lost and reconnect is disabled".into()));
                }
                let mut rng = rand::thread_rng();
                if let Some(delay) = ctx.connection.next_reconnect_delay(&mut rng) {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

enum SessionEnd {
    Disconnected,
    Shutdown { exit_code: u8 },
    Restart { exit_code: u8 },
}

/// One connected lobby session: login handshake, then the
/// `tokio::select!` loop over inbound lines and the periodic tick, until
/// the peer closes the socket, ctrl-c arrives, or quit/restart resolves.
async fn run_session(ctx: &mut AgentContext, transport: &mut LobbySocket) -> SessionEnd {
    let login = OutboundCommand::Login {
        username: ctx.config.lobby.username.clone(),
        password_hash: hash_password(&ctx.config.lobby.password),
        lobby_client: ctx.config.lobby.lobby_client.clone(),
        compat_flags: "b sp".to_string(),
    };

    let mut tick = interval(TICK_PERIOD);
    let mut since_room_enforce = Duration::ZERO;

    loop {
        tokio::select! {
            line = transport.recv_line() => {
                match line {
                    Ok(Some(line)) => {
                        let event = crate::interface_adapters::lobby_protocol::parse_inbound(&line);
                        if let Some(end) = handle_inbound(ctx, transport, event, &login).await {
                            return end;
                        }
                    }
                    Ok(None) => return SessionEnd::Disconnected,
                    Err(e) => {
                        tracing::warn!(error = %e, "lobby recv failed");
                        return SessionEnd::Disconnected;
                    }
                }
            }
            _ = tick.tick() => {
                since_room_enforce += TICK_PERIOD;
                if let Some(end) = on_tick(ctx, transport, since_room_enforce >= BATTLE_ROOM_ENFORCE_PERIOD).await {
                    return end;
                }
                if since_room_enforce >= BATTLE_ROOM_ENFORCE_PERIOD {
                    since_room_enforce = Duration::ZERO;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                ctx.quit_intent.merge(Some(QuitAction::Shutdown), Some(QuitCondition::Empty), 0);
            }
        }
    }
}

async fn handle_inbound(ctx: &mut AgentContext, transport: &mut LobbySocket, event: InboundEvent, login: &OutboundCommand) -> Option<SessionEnd> {
    match event {
        InboundEvent::TaServer { .. } => {
            let _ = transport.send_line(&login.to_string()).await;
        }
        InboundEvent::Accepted { .. } => {
            ctx.connection.on_logged_in();
        }
        InboundEvent::Denied { reason } => {
            use crate::interface_adapters::connection::LoginDenialOutcome;
            match ctx.connection.login_retry.on_denied(&reason) {
                LoginDenialOutcome::RetryLogin => {
                    let _ = transport.send_line(&login.to_string()).await;
                }
                LoginDenialOutcome::Fatal => return Some(SessionEnd::Disconnected),
            }
        }
        InboundEvent::LoginInfoEnd => {
            ctx.connection.on_synchronized();
            let open = OutboundCommand::OpenBattle {
                battle_type: 0,
                nat_type: 0,
                password: ctx.config.battle.password.clone().unwrap_or_else(|| "*".to_string()),
                port: ctx.config.lobby.port,
                max_players: ctx.config.battle.max_players,
                game_hash: "0".to_string(),
                rank: 0,
                map_hash: "0".to_string(),
                engine: ctx.config.battle.engine_version.clone(),
                map_name: ctx.config.battle.map_name.clone(),
                mod_name: ctx.config.battle.mod_archive.clone(),
            };
            let _ = transport.send_line(&open.to_string()).await;
        }
        InboundEvent::BattleOpened { founder, .. } if founder == ctx.config.lobby.username => {
            ctx.connection.on_battle_opened();
            ctx.battle_room.open(ctx.config.battle.map_name.clone(), ctx.config.battle.mod_archive.clone());
        }
        InboundEvent::Redirect { ip, port } => {
            use crate::interface_adapters::connection::{decide_redirect, RedirectOutcome};
            if let RedirectOutcome::Retarget { ip, port } = decide_redirect(ctx.config.lobby.follow_redirect, ip, port) {
                ctx.config.lobby.host = ip.to_string();
                ctx.config.lobby.port = port;
                return Some(SessionEnd::Disconnected);
            }
            let _ = (ip, port);
        }
        InboundEvent::AddUser { name, account_id, .. } => {
            ctx.accounts.add_user(crate::domain::User::new(name, account_id), chrono::Utc::now());
        }
        InboundEvent::RemoveUser { name } => {
            ctx.accounts.remove_user(&name);
        }
        InboundEvent::JoinBattleRequest { name, .. } => {
            let subject = crate::domain::BanSubject {
                account_id: ctx.accounts.get(&name).map(|u| u.account_id).unwrap_or(0),
                name: &name,
                ip: None,
                country: "",
                rank: 0,
                access: 0,
                is_bot: false,
                level: 0,
                skill: 0.0,
            };
            let banned = crate::domain::find_matching_ban(
                &[&ctx.global_bans, ctx.accounts.dynamic_bans()],
                &subject,
                crate::domain::BanType::Full,
                chrono::Utc::now(),
            )
            .is_some();
            let (decision, reason) = ctx.battle_room.join_policy(banned, || None);
            let reply = match decision {
                crate::use_cases::battle_room::JoinDecision::Accept => OutboundCommand::JoinBattleAccept { name: name.clone() },
                crate::use_cases::battle_room::JoinDecision::Deny => {
                    OutboundCommand::JoinBattleDeny { name: name.clone(), reason: reason.unwrap_or_default() }
                }
            };
            ctx.queue.push_normal(reply.to_string());
            if matches!(decision, crate::use_cases::battle_room::JoinDecision::Accept) {
                ctx.battle_room.add_member(BattleMember::new(name, 0).with_generated_script_password());
            }
        }
        InboundEvent::LeftBattle { name, .. } => {
            ctx.battle_room.remove_member(&name);
        }
        InboundEvent::ClientBattleStatus { name, status_bits, color } => {
            let status = decode_battle_status(status_bits);
            ctx.battle_room.set_member_status(&name, status);
            if let Some(member) = ctx.battle_room.members.get_mut(&name) {
                member.color = decode_color(color);
            }
        }
        InboundEvent::AddBot { name, owner, ai_spec, .. } => {
            ctx.battle_room.add_bot(Bot { name, owner_name: owner, ai_spec, status: Default::default(), color: Default::default(), join_order: 0 });
        }
        InboundEvent::RemoveBot { name, .. } => {
            ctx.battle_room.remove_bot(&name);
        }
        InboundEvent::Said { name, message, .. } => {
            if let Some(end) = handle_chat(ctx, transport, &name, &message, Source::Channel).await {
                return Some(end);
            }
        }
        InboundEvent::SaidBattle { name, message } => {
            if let Some(end) = handle_chat(ctx, transport, &name, &message, Source::Battle).await {
                return Some(end);
            }
        }
        InboundEvent::SaidPrivate { name, message } => {
            if let Some(end) = handle_chat(ctx, transport, &name, &message, Source::PrivateMessage).await {
                return Some(end);
            }
        }
        InboundEvent::KickFromBattle { .. } => {
            return Some(SessionEnd::Disconnected);
        }
        _ => {}
    }
    None
}

fn decode_battle_status(status_bits: u32) -> BattleStatus {
    BattleStatus {
        is_spectator: (status_bits & 0b10) != 0,
        ally_team: ((status_bits >> 6) & 0xf) as u8,
        id: ((status_bits >> 2) & 0xf) as u8,
        ready: (status_bits & 0b1) != 0,
        sync: ((status_bits >> 22) & 0b11) != 0,
        side: crate::domain::Side(((status_bits >> 24) & 0xf) as u8),
        bonus: ((status_bits >> 16) & 0x7f) as u8,
    }
}

fn decode_color(color: u32) -> crate::domain::Color {
    crate::domain::Color { r: (color & 0xff) as u8, g: ((color >> 8) & 0xff) as u8, b: ((color >> 16) & 0xff) as u8 }
}

/// Runs a `!`-prefixed chat line through tokenizing, access resolution,
/// and the built-in handler registry (§4.H "Invocation"). Non-command
/// chat is ignored; the content filter and flood responses live in
/// `use_cases::prefs` and are applied before dispatch.
async fn handle_chat(ctx: &mut AgentContext, _transport: &mut LobbySocket, user: &str, message: &str, source: Source) -> Option<SessionEnd> {
    let Some((cmd, params)) = dispatcher::tokenize(message, &["say", "sayex"]) else { return None };

    let account_id = ctx.accounts.get(user).map(|u| u.account_id).unwrap_or(0);
    if ctx.prefs.is_ignored(account_id, Instant::now()) {
        return None;
    }
    ctx.prefs.record_command(account_id, Instant::now());

    let levels = ctx.rights.lookup(&cmd, source, PlayerStatus::Player, GameState::Stopped);
    let boss_set: Vec<String> = ctx.boss_set.iter().cloned().collect();
    let access = dispatcher::effective_access_level(levels.direct, None, user, &boss_set, ctx.is_boss_override(&cmd));

    let (exec_cmd, exec_params): (String, Vec<String>) = if access > 0 {
        (cmd, params)
    } else if levels.vote > 0 && commands::lookup(&cmd).is_some() {
        let mut callvote_params = vec![cmd];
        callvote_params.extend(params);
        ("callvote".to_string(), callvote_params)
    } else {
        ctx.queue.push_normal(OutboundCommand::SayPrivate { name: user.to_string(), text: "not allowed".to_string() }.to_string());
        return None;
    };

    let Some(handler) = commands::lookup(&exec_cmd) else {
        ctx.queue.push_normal(OutboundCommand::SayPrivate { name: user.to_string(), text: format!("unknown command: {cmd}") }.to_string());
        return None;
    };

    let outcome = handler(ctx, user, &exec_params, false);
    reply_outcome(ctx, user, &exec_cmd, &outcome);

    if ctx.quit_intent.is_pending() {
        let gate = BlockingGate::default();
        let game_running = ctx.running_game.is_some();
        let decision = quit::evaluate(&ctx.quit_intent, game_running, ctx.battle_room.players().count() == 0, ctx.battle_room.player_count() == 0, gate);
        match decision {
            crate::use_cases::quit::QuitDecision::Shutdown { exit_code } => return Some(SessionEnd::Shutdown { exit_code }),
            crate::use_cases::quit::QuitDecision::Restart { exit_code } => return Some(SessionEnd::Restart { exit_code }),
            crate::use_cases::quit::QuitDecision::Continue => {}
        }
    }
    None
}

fn reply_outcome(ctx: &mut AgentContext, user: &str, cmd: &str, outcome: &crate::use_cases::dispatcher::CommandOutcome) {
    if let Some(reason) = &outcome.deny_reason {
        ctx.queue.push_normal(OutboundCommand::SayPrivate { name: user.to_string(), text: reason.clone() }.to_string());
        return;
    }
    if let Some(form) = &outcome.canonical_form {
        tracing::debug!(cmd, ?form, "command accepted");
    }
}

/// The periodic tick (§5): drains the outbound queue, enforces the
/// battle-room invariants on a slower cadence, advances the voting
/// engine, and evaluates the quit lattice once the game isn't running.
async fn on_tick(ctx: &mut AgentContext, transport: &mut LobbySocket, enforce_room: bool) -> Option<SessionEnd> {
    let ready = ctx.queue.drain_ready(Instant::now());
    for line in ready {
        if transport.send_line(&line).await.is_err() {
            return Some(SessionEnd::Disconnected);
        }
    }

    if enforce_room {
        let target = crate::use_cases::battle_room::target_battle_structure(ctx.battle_room.player_count(), 2, 0);
        for action in ctx.battle_room.enforce_max_specs(|_| 0, 20) {
            apply_moderation(ctx, action);
        }
        for action in ctx.battle_room.enforce_max_bots() {
            apply_moderation(ctx, action);
        }
        for action in ctx.battle_room.enforce_auto_spec_extra_players(target) {
            apply_moderation(ctx, action);
        }
    }

    if let Some(vote) = ctx.active_vote.clone() {
        let game_running = ctx.running_game.is_some();
        let outcome = ctx.voting_engine.evaluate(&vote, game_running);
        if !matches!(outcome, crate::use_cases::voting::VoteOutcome::Pending) {
            ctx.active_vote = None;
            let text = match outcome {
                crate::use_cases::voting::VoteOutcome::Pass => "vote passed",
                crate::use_cases::voting::VoteOutcome::Fail => "vote failed",
                crate::use_cases::voting::VoteOutcome::Pending => unreachable!(),
            };
            ctx.queue.push_normal(OutboundCommand::SayBattle { text: text.to_string() }.to_string());
        }
    }

    let gate = BlockingGate::default();
    let decision = quit::evaluate(&ctx.quit_intent, ctx.running_game.is_some(), ctx.battle_room.players().count() == 0, ctx.battle_room.player_count() == 0, gate);
    match decision {
        crate::use_cases::quit::QuitDecision::Continue => None,
        crate::use_cases::quit::QuitDecision::Shutdown { exit_code } => Some(SessionEnd::Shutdown { exit_code }),
        crate::use_cases::quit::QuitDecision::Restart { exit_code } => Some(SessionEnd::Restart { exit_code }),
    }
}

fn apply_moderation(ctx: &mut AgentContext, action: crate::use_cases::battle_room::ModerationAction) {
    use crate::use_cases::battle_room::ModerationAction::*;
    match action {
        Kick(name) => ctx.queue.push_normal(OutboundCommand::KickFromBattle { name }.to_string()),
        ForceSpectator(name) => ctx.queue.push_normal(OutboundCommand::ForceSpectatorMode { name }.to_string()),
        RemoveBot(name) => ctx.queue.push_normal(OutboundCommand::RemoveBot { name }.to_string()),
    }
}
