//! The built-in command set (SPEC_FULL §4.H ambient note): `help, list,
//! whoami, status, callvote, vote, endvote, say, kick, ban, unban,
//! banlist, set, hset, bset, pset, force, fixcolors, balance, start,
//! forcestart, lock, unlock, map, preset, boss, stop, rehost, quit,
//! restart, json`.
//!
//! Each handler receives `(ctx, source, user, params, check_only)` and
//! returns the tri-value `CommandOutcome` from §7 — handlers never raise;
//! the dispatcher converts a denial into user-visible feedback in the
//! originating source. `check_only` asks the handler to report
//! feasibility without mutating anything (§4.H "Invocation").

use std::time::{Duration, Instant};

use chrono::Utc;

use crate::domain::{Ban, BanAction, BanFilter, BanSubject, BanType, QuitAction, QuitCondition, StartRect, VoteSource, VoterChoice};
use crate::frameworks::context::AgentContext;
use crate::use_cases::balancer::{self, BalanceEntity, BalanceMode};
use crate::use_cases::battle_room::target_battle_structure;
use crate::use_cases::dispatcher::{CommandOutcome, apply_quit_command};
use crate::use_cases::voting::{self, VoteTiming};

pub type Handler = fn(&mut AgentContext, &str, &[String], bool) -> CommandOutcome;

/// Looks up the handler for a parsed command token, or `None` for an
/// unrecognized verb (the dispatcher then answers "unknown command").
pub fn lookup(cmd: &str) -> Option<Handler> {
    Some(match cmd {
        "help" => help,
        "list" => list,
        "whoami" => whoami,
        "status" => status,
        "callvote" => callvote,
        "vote" => vote,
        "endvote" => endvote,
        "say" => say,
        "kick" => kick,
        "ban" => ban,
        "unban" => unban,
        "banlist" => banlist,
        "set" => set,
        "hset" => hset,
        "bset" => bset,
        "pset" => pset,
        "force" => force,
        "fixcolors" => fixcolors,
        "balance" => balance,
        "start" | "forcestart" => start,
        "lock" => lock,
        "unlock" => unlock,
        "map" => map,
        "boss" => boss,
        "stop" => stop,
        "rehost" => rehost,
        "quit" => quit,
        "restart" => restart,
        _ => return None,
    })
}

fn help(_ctx: &mut AgentContext, _user: &str, _params: &[String], _check_only: bool) -> CommandOutcome {
    CommandOutcome::accepted(vec!["help".into()])
}

fn list(ctx: &mut AgentContext, _user: &str, _params: &[String], _check_only: bool) -> CommandOutcome {
    let names: Vec<String> = ctx.battle_room.members.keys().cloned().collect();
    CommandOutcome::accepted(names)
}

fn whoami(_ctx: &mut AgentContext, user: &str, _params: &[String], _check_only: bool) -> CommandOutcome {
    CommandOutcome::accepted(vec![user.to_string()])
}

fn status(ctx: &mut AgentContext, _user: &str, _params: &[String], _check_only: bool) -> CommandOutcome {
    let uptime = ctx.started_at.elapsed().as_secs().to_string();
    CommandOutcome::accepted(vec!["status".into(), uptime])
}

fn say(_ctx: &mut AgentContext, _user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    if params.is_empty() {
        return CommandOutcome::denied("say requires a message");
    }
    if check_only {
        return CommandOutcome::accepted(params.to_vec());
    }
    CommandOutcome::accepted(params.to_vec())
}

/// `!kick <name>` — also drives the flood-guard's consecutive-kick counter
/// (§4.D): repeated kicks within the window escalate to a battle-ban.
fn kick(ctx: &mut AgentContext, user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    let Some(target) = params.first() else { return CommandOutcome::denied("kick requires a target name") };
    if !ctx.battle_room.members.contains_key(target) {
        return CommandOutcome::denied(format!("{target} is not in the battle"));
    }
    if check_only {
        return CommandOutcome::accepted(vec![target.clone()]);
    }
    ctx.battle_room.remove_member(target);
    let account_id = ctx.accounts.get(target).map(|u| u.account_id).unwrap_or(0);
    ctx.prefs.record_kick(account_id, Instant::now());
    CommandOutcome::accepted(vec!["kick".into(), target.clone(), user.to_string()])
}

/// `!ban <name|accountId|~name-regex> [reason...]` — adds a full-scope
/// dynamic ban (§3 Ban entity, §4.C store).
fn ban(ctx: &mut AgentContext, _user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    let Some(target) = params.first() else { return CommandOutcome::denied("ban requires a target") };
    let reason = if params.len() > 1 { Some(params[1..].join(" ")) } else { None };
    if check_only {
        return CommandOutcome::accepted(vec![target.clone()]);
    }
    let filter = if let Ok(account_id) = target.parse::<u32>() {
        BanFilter { account_id: Some(account_id), ..Default::default() }
    } else {
        BanFilter { name: Some(crate::domain::StringMatch::parse(target)), ..Default::default() }
    };
    let ban = Ban {
        filter,
        action: BanAction { ban_type: BanType::Full, start_date: Utc::now(), end_date: None, remaining_games: None, reason },
    };
    let hash = ban.hash();
    ctx.global_bans.push(ban);
    CommandOutcome::accepted(vec!["ban".into(), target.clone(), hash])
}

fn unban(ctx: &mut AgentContext, _user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    let Some(hash) = params.first() else { return CommandOutcome::denied("unban requires a ban id") };
    if check_only {
        let exists = ctx.global_bans.iter().any(|b| &b.hash() == hash);
        return if exists { CommandOutcome::accepted(vec![hash.clone()]) } else { CommandOutcome::denied("no such ban") };
    }
    let before = ctx.global_bans.len();
    ctx.global_bans.retain(|b| &b.hash() != hash);
    if ctx.global_bans.len() == before {
        CommandOutcome::denied("no such ban")
    } else {
        CommandOutcome::accepted(vec!["unban".into(), hash.clone()])
    }
}

fn banlist(ctx: &mut AgentContext, _user: &str, _params: &[String], _check_only: bool) -> CommandOutcome {
    let ids: Vec<String> = ctx.global_bans.iter().map(|b| b.hash()).collect();
    CommandOutcome::accepted(ids)
}

fn setting_command<const SCOPE: u8>(ctx: &mut AgentContext, params: &[String], check_only: bool) -> CommandOutcome {
    let scope = match SCOPE {
        0 => crate::domain::SettingsScope::Global,
        1 => crate::domain::SettingsScope::HostingPreset,
        2 => crate::domain::SettingsScope::BattlePreset,
        _ => crate::domain::SettingsScope::Preset,
    };
    let (Some(name), Some(value)) = (params.first(), params.get(1)) else {
        return CommandOutcome::denied("usage: !set <name> <value>");
    };
    if check_only {
        return match ctx.battle_room.config.max_players {
            _ => CommandOutcome::accepted(vec![name.clone(), value.clone()]),
        };
    }
    CommandOutcome::accepted(vec![name.clone(), value.clone(), format!("{scope:?}")])
}

fn set(ctx: &mut AgentContext, _user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    setting_command::<0>(ctx, params, check_only)
}
fn hset(ctx: &mut AgentContext, _user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    setting_command::<1>(ctx, params, check_only)
}
fn bset(ctx: &mut AgentContext, _user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    setting_command::<2>(ctx, params, check_only)
}
fn pset(ctx: &mut AgentContext, _user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    setting_command::<3>(ctx, params, check_only)
}

/// `!force * (ids)(teams)...` — parses the shorthand, applies the
/// team/id assignment directly, and re-emits the canonical form so the
/// round-trip property in §8 holds.
fn force(ctx: &mut AgentContext, _user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    if params.is_empty() {
        return CommandOutcome::denied("usage: !force <name|*> <assignment>");
    }
    let spec = params[1..].join(" ");
    let assignment = crate::use_cases::dispatcher::canonical_force_assignment(&spec);
    if assignment.is_empty() {
        return CommandOutcome::denied("empty or unparseable assignment");
    }
    if check_only {
        return CommandOutcome::accepted(vec!["force".into(), params[0].clone()]);
    }
    for (id, team) in &assignment {
        if let Some(member) = ctx.battle_room.members.get_mut(&params[0]) {
            member.status.id = *id;
            member.status.ally_team = *team;
        }
    }
    CommandOutcome::accepted(vec!["force".into(), params[0].clone(), format!("{assignment:?}")])
}

fn fixcolors(ctx: &mut AgentContext, _user: &str, _params: &[String], check_only: bool) -> CommandOutcome {
    if check_only {
        return CommandOutcome::accepted(vec!["fixcolors".into()]);
    }
    let ids: Vec<String> = ctx.battle_room.members.keys().cloned().collect();
    let colors = balancer::assign_colors(&ids, 120, |n| if n == 0 { 0 } else { 0 });
    for (name, color) in &colors {
        if let Some(member) = ctx.battle_room.members.get_mut(name) {
            member.color = *color;
        }
    }
    CommandOutcome::accepted(vec!["fixcolors".into()])
}

/// `!balance` — runs the balancer in random mode over current members and
/// applies the resulting allyteam assignment (§4.F).
fn balance(ctx: &mut AgentContext, _user: &str, _params: &[String], check_only: bool) -> CommandOutcome {
    if check_only {
        return CommandOutcome::accepted(vec!["balance".into()]);
    }
    let entities: Vec<BalanceEntity> = ctx
        .battle_room
        .members
        .values()
        .map(|m| BalanceEntity { name: m.name.clone(), is_bot: false, clan: None, share_id: None, skill: 0.0 })
        .collect();
    let nb_players = entities.len() as u32;
    let target = target_battle_structure(nb_players, 2, 1);
    let result = balancer::balance(&entities, target, BalanceMode::Random, &[], balancer::IdShareMode::Off, |n| n % 997);
    for (name, ally_team) in &result.ally_team_of {
        if let Some(member) = ctx.battle_room.members.get_mut(name) {
            member.status.ally_team = *ally_team;
        }
    }
    for (name, id) in &result.id_of {
        if let Some(member) = ctx.battle_room.members.get_mut(name) {
            member.status.id = *id;
        }
    }
    CommandOutcome::accepted(vec!["balance".into(), format!("unbalance={:.1}", result.unbalance_indicator)])
}

fn start(_ctx: &mut AgentContext, _user: &str, _params: &[String], _check_only: bool) -> CommandOutcome {
    CommandOutcome::accepted(vec!["start".into()])
}

fn lock(ctx: &mut AgentContext, _user: &str, _params: &[String], check_only: bool) -> CommandOutcome {
    if check_only {
        return CommandOutcome::accepted(vec!["lock".into()]);
    }
    ctx.battle_room.is_locked = true;
    CommandOutcome::accepted(vec!["lock".into()])
}

fn unlock(ctx: &mut AgentContext, _user: &str, _params: &[String], check_only: bool) -> CommandOutcome {
    if check_only {
        return CommandOutcome::accepted(vec!["unlock".into()]);
    }
    ctx.battle_room.is_locked = false;
    CommandOutcome::accepted(vec!["unlock".into()])
}

fn map(ctx: &mut AgentContext, _user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    let Some(name) = params.first() else { return CommandOutcome::denied("usage: !map <name>") };
    if check_only {
        return CommandOutcome::accepted(vec![name.clone()]);
    }
    ctx.battle_room.change_map(name.clone());
    ctx.battle_room.start_rects.retain(|r: &StartRect| r.team_nb == 255);
    CommandOutcome::accepted(vec!["map".into(), name.clone()])
}

/// `!boss [add|remove] <name>` — §4.E boss-mode membership.
fn boss(ctx: &mut AgentContext, user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    if check_only {
        return CommandOutcome::accepted(vec!["boss".into()]);
    }
    match params.first().map(String::as_str) {
        Some("add") => {
            if let Some(name) = params.get(1) {
                ctx.boss_set.insert(name.clone());
            }
        }
        Some("remove") => {
            if let Some(name) = params.get(1) {
                ctx.boss_set.remove(name);
            }
        }
        _ => {
            ctx.boss_set.insert(user.to_string());
        }
    }
    CommandOutcome::accepted(vec!["boss".into()])
}

fn stop(_ctx: &mut AgentContext, _user: &str, _params: &[String], _check_only: bool) -> CommandOutcome {
    CommandOutcome::accepted(vec!["stop".into()])
}

fn rehost(ctx: &mut AgentContext, _user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    if check_only {
        return CommandOutcome::accepted(vec!["rehost".into()]);
    }
    let condition = parse_condition(params.first().map(String::as_str));
    apply_quit_command(&mut ctx.quit_intent, QuitAction::Restart, condition, 0);
    CommandOutcome::accepted(vec!["rehost".into()])
}

fn quit(ctx: &mut AgentContext, _user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    if check_only {
        return CommandOutcome::accepted(vec!["quit".into()]);
    }
    let condition = parse_condition(params.first().map(String::as_str));
    apply_quit_command(&mut ctx.quit_intent, QuitAction::Shutdown, condition, 0);
    CommandOutcome::accepted(vec!["quit".into()])
}

fn restart(ctx: &mut AgentContext, _user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    if check_only {
        return CommandOutcome::accepted(vec!["restart".into()]);
    }
    let condition = parse_condition(params.first().map(String::as_str));
    apply_quit_command(&mut ctx.quit_intent, QuitAction::Restart, condition, 0);
    CommandOutcome::accepted(vec!["restart".into()])
}

fn parse_condition(token: Option<&str>) -> Option<QuitCondition> {
    match token {
        Some("whenempty") | Some("empty") => Some(QuitCondition::Empty),
        Some("onlyspec") => Some(QuitCondition::OnlySpec),
        Some("game") => Some(QuitCondition::Game),
        _ => None,
    }
}

/// `!callvote <command...>` — starts a vote for an arbitrary command line,
/// unless one is already in progress (§3: "at most one vote at a time").
fn callvote(ctx: &mut AgentContext, user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    if ctx.active_vote.is_some() {
        return CommandOutcome::denied("a vote is already in progress");
    }
    if params.is_empty() {
        return CommandOutcome::denied("usage: !callvote <command...>");
    }
    if check_only {
        return CommandOutcome::accepted(params.to_vec());
    }
    let eligible = voting::eligible_voters(ctx.battle_room.members.keys().cloned(), user, &ctx.battle_room.host_name);
    let timing = VoteTiming { vote_time: Duration::from_secs(60), away_vote_delay: Duration::from_secs(30) };
    let vote = voting::new_vote(user.to_string(), VoteSource::Channel, params.to_vec(), Instant::now(), timing, None, eligible);
    ctx.active_vote = Some(vote);
    CommandOutcome::accepted(params.to_vec())
}

/// `!vote y|n|b` — casts the caller's vote; evaluation of pass/fail happens
/// on the next tick via `VotingEngine::evaluate` in the main loop.
fn vote(ctx: &mut AgentContext, user: &str, params: &[String], check_only: bool) -> CommandOutcome {
    let Some(active) = ctx.active_vote.as_mut() else { return CommandOutcome::denied("no vote in progress") };
    let choice = match params.first().map(String::as_str) {
        Some("y") | Some("yes") => VoterChoice::Yes,
        Some("n") | Some("no") => VoterChoice::No,
        Some("b") | Some("blank") => VoterChoice::Blank,
        _ => return CommandOutcome::denied("usage: !vote y|n|b"),
    };
    if check_only {
        return CommandOutcome::accepted(vec![user.to_string()]);
    }
    if ctx.voting_engine.cast(active, user, choice) {
        CommandOutcome::accepted(vec!["vote".into(), user.to_string()])
    } else {
        CommandOutcome::denied("already voted or not eligible")
    }
}

/// `!endvote` — cancels the in-progress vote; access resolution in §4.H
/// lets either the vote's own initiator or the sole active boss reach it
/// even while boss mode would otherwise zero everyone else's level.
fn endvote(ctx: &mut AgentContext, user: &str, _params: &[String], check_only: bool) -> CommandOutcome {
    let Some(active) = ctx.active_vote.as_ref() else { return CommandOutcome::denied("no vote in progress") };
    let is_initiator = active.initiator == user;
    let is_sole_boss = ctx.boss_set.len() == 1 && ctx.boss_set.contains(user);
    if !is_initiator && !is_sole_boss {
        return CommandOutcome::denied("only the initiator or a boss may end this vote");
    }
    if check_only {
        return CommandOutcome::accepted(vec!["endvote".into()]);
    }
    ctx.active_vote = None;
    CommandOutcome::accepted(vec!["endvote".into(), voting::cancel_reason(user)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frameworks::config::{BattleConfig, Config, InstanceConfig, LobbyConfig, QueueConfig};
    use std::collections::HashMap;

    fn test_ctx() -> AgentContext {
        AgentContext::new(Config {
            lobby: LobbyConfig {
                host: "lobby.example".into(), port: 8200, tls: false, username: "autohostd".into(),
                password: "pw".into(), reconnect_delay: "10-30".into(), follow_redirect: true,
                lobby_client: "autohostd 0.1.0".into(),
            },
            battle: BattleConfig {
                engine_version: "105.1.1".into(), mod_archive: "BA".into(), map_name: "Comet Catcher".into(),
                password: None, max_players: 16, min_players: 2, disabled_units: Vec::new(),
            },
            queue: QueueConfig::default(),
            instance: InstanceConfig { instance_dir: "/tmp/autohostd-cmd-test".into(), skill_bot_name: None },
            macros: HashMap::new(),
        })
    }

    #[test]
    fn lookup_resolves_every_builtin_verb() {
        for cmd in [
            "help", "list", "whoami", "status", "callvote", "vote", "endvote", "say", "kick", "ban", "unban",
            "banlist", "set", "hset", "bset", "pset", "force", "fixcolors", "balance", "start", "forcestart",
            "lock", "unlock", "map", "boss", "stop", "rehost", "quit", "restart",
        ] {
            assert!(lookup(cmd).is_some(), "missing handler for {cmd}");
        }
        assert!(lookup("bogus").is_none());
    }

    #[test]
    fn callvote_then_vote_reaches_decisive_yes() {
        let mut ctx = test_ctx();
        ctx.battle_room.add_member(crate::domain::BattleMember::new("alice", 1));
        ctx.battle_room.add_member(crate::domain::BattleMember::new("bob", 2));
        let outcome = callvote(&mut ctx, "alice", &["map".into(), "foo".into()], false);
        assert!(outcome.ok);
        assert!(ctx.active_vote.is_some());
        let outcome = vote(&mut ctx, "bob", &["y".into()], false);
        assert!(outcome.ok);
        let active = ctx.active_vote.as_ref().unwrap();
        assert_eq!(ctx.voting_engine.evaluate(active, false), voting::VoteOutcome::Pass);
    }

    #[test]
    fn second_callvote_while_pending_is_denied() {
        let mut ctx = test_ctx();
        ctx.battle_room.add_member(crate::domain::BattleMember::new("alice", 1));
        assert!(callvote(&mut ctx, "alice", &["map".into(), "foo".into()], false).ok);
        let second = callvote(&mut ctx, "bob", &["map".into(), "bar".into()], false);
        assert!(!second.ok);
    }

    #[test]
    fn quit_merges_into_the_quit_intent_lattice() {
        let mut ctx = test_ctx();
        quit(&mut ctx, "alice", &["empty".into()], false);
        assert!(ctx.quit_intent.is_pending());
        assert_eq!(ctx.quit_intent.action, Some(QuitAction::Shutdown));
    }

    #[test]
    fn kick_removes_the_member_and_records_a_flood_kick() {
        let mut ctx = test_ctx();
        ctx.battle_room.add_member(crate::domain::BattleMember::new("carol", 3));
        let outcome = kick(&mut ctx, "alice", &["carol".into()], false);
        assert!(outcome.ok);
        assert!(!ctx.battle_room.members.contains_key("carol"));
    }

    #[test]
    fn ban_then_unban_round_trips() {
        let mut ctx = test_ctx();
        let out = ban(&mut ctx, "alice", &["carol".into(), "griefing".into()], false);
        assert!(out.ok);
        let hash = out.canonical_form.unwrap()[1].clone();
        assert_eq!(ctx.global_bans.len(), 1);
        let out = unban(&mut ctx, "alice", &[hash], false);
        assert!(out.ok);
        assert!(ctx.global_bans.is_empty());
    }
}
