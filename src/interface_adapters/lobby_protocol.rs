//! Lobby TCP/TLS session: line transport and the verb set from §6.
//!
//! The exact escaping/quoting grammar of the wire protocol is an external
//! collaborator (§1 non-goal: "the lobby wire-protocol byte format"); this
//! module only needs to split a line into a verb and whitespace-separated
//! arguments, which is enough to recognize every verb §6 names without
//! reimplementing the upstream grammar.

use std::net::Ipv4Addr;

use async_trait::async_trait;

/// One line read off the lobby socket, decoded into the verb set §6
/// requires the core to consume.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    TaServer { version: String },
    Accepted { username: String },
    Denied { reason: String },
    AgreementEnd,
    LoginInfoEnd,
    Redirect { ip: Ipv4Addr, port: u16 },
    AddUser { name: String, country: String, account_id: u32, lobby_client: String },
    RemoveUser { name: String },
    ClientStatus { name: String, status_bits: u32 },
    ClientIpPort { name: String, ip: String, port: u16 },
    Join { channel: String },
    Left { channel: String, name: String },
    Joined { channel: String, name: String },
    JoinFailed { channel: String, reason: String },
    Said { channel: String, name: String, message: String },
    SaidEx { channel: String, name: String, message: String },
    SaidPrivate { name: String, message: String },
    SaidPrivateEx { name: String, message: String },
    SaidBattle { name: String, message: String },
    SaidBattleEx { name: String, message: String },
    ChannelTopic { channel: String, author: String, text: String },
    ChannelMessage { channel: String, text: String },
    ServerMsg { text: String },
    BattleOpened { battle_id: u32, founder: String },
    BattleClosed { battle_id: u32 },
    UpdateBattleInfo { battle_id: u32, spectators: u32, locked: bool, map_hash: String, map_name: String },
    JoinBattleRequest { name: String, ip: String },
    JoinedBattle { battle_id: u32, name: String },
    LeftBattle { battle_id: u32, name: String },
    ClientBattleStatus { name: String, status_bits: u32, color: u32 },
    UpdateBot { battle_id: u32, name: String, status_bits: u32, color: u32 },
    AddBot { battle_id: u32, name: String, owner: String, status_bits: u32, color: u32, ai_spec: String },
    RemoveBot { battle_id: u32, name: String },
    KickFromBattle { name: String },
    Broadcast { text: String },
    /// Any verb not listed above; kept so the dispatcher never has to
    /// discard an unparseable line silently.
    Unknown { verb: String, args: Vec<String> },
}

fn split_verb(line: &str) -> (&str, Vec<&str>) {
    let mut parts = line.trim_end().splitn(2, ' ');
    let verb = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("");
    (verb, rest.split(' ').filter(|s| !s.is_empty()).collect())
}

/// The trailing field of several verbs (`SAID`, `CHANNELMESSAGE`, …) is
/// "rest of line", so these are re-split manually with a field count cap.
fn split_n(rest: &str, n: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = rest;
    for _ in 0..n.saturating_sub(1) {
        let Some((head, tail)) = remaining.split_once(' ') else { break };
        out.push(head.to_string());
        remaining = tail;
    }
    out.push(remaining.to_string());
    out
}

pub fn parse_inbound(line: &str) -> InboundEvent {
    let (verb, args) = split_verb(line);
    let rest = line.trim_end().splitn(2, ' ').nth(1).unwrap_or("");
    match verb {
        "TASSERVER" => InboundEvent::TaServer { version: args.first().map(|s| s.to_string()).unwrap_or_default() },
        "ACCEPTED" => InboundEvent::Accepted { username: args.first().map(|s| s.to_string()).unwrap_or_default() },
        "DENIED" => InboundEvent::Denied { reason: rest.to_string() },
        "AGREEMENTEND" => InboundEvent::AgreementEnd,
        "LOGININFOEND" => InboundEvent::LoginInfoEnd,
        "REDIRECT" => {
            let fields = split_n(rest, 2);
            match (fields.first().and_then(|s| s.parse::<Ipv4Addr>().ok()), fields.get(1).and_then(|s| s.parse::<u16>().ok())) {
                (Some(ip), Some(port)) => InboundEvent::Redirect { ip, port },
                _ => InboundEvent::Unknown { verb: verb.to_string(), args: args.into_iter().map(str::to_string).collect() },
            }
        }
        "ADDUSER" => {
            let fields = split_n(rest, 4);
            InboundEvent::AddUser {
                name: fields.first().cloned().unwrap_or_default(),
                country: fields.get(1).cloned().unwrap_or_default(),
                account_id: fields.get(2).and_then(|s| s.parse().ok()).unwrap_or(0),
                lobby_client: fields.get(3).cloned().unwrap_or_default(),
            }
        }
        "REMOVEUSER" => InboundEvent::RemoveUser { name: args.first().map(|s| s.to_string()).unwrap_or_default() },
        "CLIENTSTATUS" => {
            let fields = split_n(rest, 2);
            InboundEvent::ClientStatus {
                name: fields.first().cloned().unwrap_or_default(),
                status_bits: fields.get(1).and_then(|s| s.parse().ok()).unwrap_or(0),
            }
        }
        "CLIENTIPPORT" => {
            let fields = split_n(rest, 3);
            InboundEvent::ClientIpPort {
                name: fields.first().cloned().unwrap_or_default(),
                ip: fields.get(1).cloned().unwrap_or_default(),
                port: fields.get(2).and_then(|s| s.parse().ok()).unwrap_or(0),
            }
        }
        "JOIN" => InboundEvent::Join { channel: rest.to_string() },
        "LEFT" => {
            let fields = split_n(rest, 2);
            InboundEvent::Left { channel: fields.first().cloned().unwrap_or_default(), name: fields.get(1).cloned().unwrap_or_default() }
        }
        "JOINED" => {
            let fields = split_n(rest, 2);
            InboundEvent::Joined { channel: fields.first().cloned().unwrap_or_default(), name: fields.get(1).cloned().unwrap_or_default() }
        }
        "JOINFAILED" => {
            let fields = split_n(rest, 2);
            InboundEvent::JoinFailed { channel: fields.first().cloned().unwrap_or_default(), reason: fields.get(1).cloned().unwrap_or_default() }
        }
        "SAID" => {
            let fields = split_n(rest, 3);
            InboundEvent::Said { channel: fields.first().cloned().unwrap_or_default(), name: fields.get(1).cloned().unwrap_or_default(), message: fields.get(2).cloned().unwrap_or_default() }
        }
        "SAIDEX" => {
            let fields = split_n(rest, 3);
            InboundEvent::SaidEx { channel: fields.first().cloned().unwrap_or_default(), name: fields.get(1).cloned().unwrap_or_default(), message: fields.get(2).cloned().unwrap_or_default() }
        }
        "SAIDPRIVATE" => {
            let fields = split_n(rest, 2);
            InboundEvent::SaidPrivate { name: fields.first().cloned().unwrap_or_default(), message: fields.get(1).cloned().unwrap_or_default() }
        }
        "SAIDPRIVATEEX" => {
            let fields = split_n(rest, 2);
            InboundEvent::SaidPrivateEx { name: fields.first().cloned().unwrap_or_default(), message: fields.get(1).cloned().unwrap_or_default() }
        }
        "SAIDBATTLE" => {
            let fields = split_n(rest, 2);
            InboundEvent::SaidBattle { name: fields.first().cloned().unwrap_or_default(), message: fields.get(1).cloned().unwrap_or_default() }
        }
        "SAIDBATTLEEX" => {
            let fields = split_n(rest, 2);
            InboundEvent::SaidBattleEx { name: fields.first().cloned().unwrap_or_default(), message: fields.get(1).cloned().unwrap_or_default() }
        }
        "CHANNELTOPIC" => {
            let fields = split_n(rest, 3);
            InboundEvent::ChannelTopic { channel: fields.first().cloned().unwrap_or_default(), author: fields.get(1).cloned().unwrap_or_default(), text: fields.get(2).cloned().unwrap_or_default() }
        }
        "CHANNELMESSAGE" => {
            let fields = split_n(rest, 2);
            InboundEvent::ChannelMessage { channel: fields.first().cloned().unwrap_or_default(), text: fields.get(1).cloned().unwrap_or_default() }
        }
        "SERVERMSG" => InboundEvent::ServerMsg { text: rest.to_string() },
        "BATTLEOPENED" => {
            let fields = split_n(rest, 2);
            InboundEvent::BattleOpened {
                battle_id: fields.first().and_then(|s| s.parse().ok()).unwrap_or(0),
                founder: fields.get(1).cloned().unwrap_or_default(),
            }
        }
        "BATTLECLOSED" => InboundEvent::BattleClosed { battle_id: args.first().and_then(|s| s.parse().ok()).unwrap_or(0) },
        "UPDATEBATTLEINFO" => {
            let fields = split_n(rest, 5);
            InboundEvent::UpdateBattleInfo {
                battle_id: fields.first().and_then(|s| s.parse().ok()).unwrap_or(0),
                spectators: fields.get(1).and_then(|s| s.parse().ok()).unwrap_or(0),
                locked: fields.get(2).map(|s| s == "1").unwrap_or(false),
                map_hash: fields.get(3).cloned().unwrap_or_default(),
                map_name: fields.get(4).cloned().unwrap_or_default(),
            }
        }
        "JOINBATTLEREQUEST" => {
            let fields = split_n(rest, 2);
            InboundEvent::JoinBattleRequest { name: fields.first().cloned().unwrap_or_default(), ip: fields.get(1).cloned().unwrap_or_default() }
        }
        "JOINEDBATTLE" => {
            let fields = split_n(rest, 2);
            InboundEvent::JoinedBattle { battle_id: fields.first().and_then(|s| s.parse().ok()).unwrap_or(0), name: fields.get(1).cloned().unwrap_or_default() }
        }
        "LEFTBATTLE" => {
            let fields = split_n(rest, 2);
            InboundEvent::LeftBattle { battle_id: fields.first().and_then(|s| s.parse().ok()).unwrap_or(0), name: fields.get(1).cloned().unwrap_or_default() }
        }
        "CLIENTBATTLESTATUS" => {
            let fields = split_n(rest, 3);
            InboundEvent::ClientBattleStatus {
                name: fields.first().cloned().unwrap_or_default(),
                status_bits: fields.get(1).and_then(|s| s.parse().ok()).unwrap_or(0),
                color: fields.get(2).and_then(|s| s.parse().ok()).unwrap_or(0),
            }
        }
        "UPDATEBOT" => {
            let fields = split_n(rest, 4);
            InboundEvent::UpdateBot {
                battle_id: fields.first().and_then(|s| s.parse().ok()).unwrap_or(0),
                name: fields.get(1).cloned().unwrap_or_default(),
                status_bits: fields.get(2).and_then(|s| s.parse().ok()).unwrap_or(0),
                color: fields.get(3).and_then(|s| s.parse().ok()).unwrap_or(0),
            }
        }
        "ADDBOT" => {
            let fields = split_n(rest, 6);
            InboundEvent::AddBot {
                battle_id: fields.first().and_then(|s| s.parse().ok()).unwrap_or(0),
                name: fields.get(1).cloned().unwrap_or_default(),
                owner: fields.get(2).cloned().unwrap_or_default(),
                status_bits: fields.get(3).and_then(|s| s.parse().ok()).unwrap_or(0),
                color: fields.get(4).and_then(|s| s.parse().ok()).unwrap_or(0),
                ai_spec: fields.get(5).cloned().unwrap_or_default(),
            }
        }
        "REMOVEBOT" => {
            let fields = split_n(rest, 2);
            InboundEvent::RemoveBot { battle_id: fields.first().and_then(|s| s.parse().ok()).unwrap_or(0), name: fields.get(1).cloned().unwrap_or_default() }
        }
        "KICKFROMBATTLE" => InboundEvent::KickFromBattle { name: args.first().map(|s| s.to_string()).unwrap_or_default() },
        "BROADCAST" => InboundEvent::Broadcast { text: rest.to_string() },
        other => InboundEvent::Unknown { verb: other.to_string(), args: args.into_iter().map(str::to_string).collect() },
    }
}

/// Outbound verbs §6 lists. `Display` renders the wire line; the exact
/// escaping of embedded whitespace in the trailing free-text field is left
/// to the external framing module per §1's non-goal.
#[derive(Debug, Clone)]
pub enum OutboundCommand {
    Login { username: String, password_hash: String, lobby_client: String, compat_flags: String },
    Ping,
    Exit,
    Join { channel: String },
    Leave { channel: String },
    OpenBattle { battle_type: u8, nat_type: u8, password: String, port: u16, max_players: u32, game_hash: String, rank: u8, map_hash: String, engine: String, map_name: String, mod_name: String },
    LeaveBattle,
    UpdateBattleInfo { spectators: u32, locked: bool, map_hash: String, map_name: String },
    Say { channel: String, text: String },
    SayEx { channel: String, text: String },
    SayPrivate { name: String, text: String },
    SayBattle { text: String },
    SayBattlePrivateEx { name: String, text: String },
    MyStatus { status_bits: u32 },
    MyBattleStatus { status_bits: u32, color: u32 },
    AddStartRect { team_nb: u8, left: u16, top: u16, right: u16, bottom: u16 },
    RemoveStartRect { team_nb: u8 },
    SetScriptTags { tags: Vec<(String, String)> },
    RemoveScriptTags { keys: Vec<String> },
    EnableAllUnits,
    DisableUnits { units: Vec<String> },
    ForceAllyNo { name: String, ally_team: u8 },
    ForceTeamNo { name: String, team: u8 },
    ForceSpectatorMode { name: String },
    ForceTeamColor { name: String, color: u32 },
    Handicap { name: String, value: u8 },
    AddBot { name: String, status_bits: u32, color: u32, ai_spec: String },
    RemoveBot { name: String },
    UpdateBot { name: String, status_bits: u32, color: u32 },
    KickFromBattle { name: String },
    Ring { name: String },
    JoinBattleAccept { name: String },
    JoinBattleDeny { name: String, reason: String },
    GetUserInfo { name: String },
}

impl std::fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboundCommand::Login { username, password_hash, lobby_client, compat_flags } => {
                write!(f, "LOGIN {username} {password_hash} 0 * {lobby_client}\t0\t{compat_flags}")
            }
            OutboundCommand::Ping => write!(f, "PING"),
            OutboundCommand::Exit => write!(f, "EXIT"),
            OutboundCommand::Join { channel } => write!(f, "JOIN {channel}"),
            OutboundCommand::Leave { channel } => write!(f, "LEAVE {channel}"),
            OutboundCommand::OpenBattle { battle_type, nat_type, password, port, max_players, game_hash, rank, map_hash, engine, map_name, mod_name } => {
                write!(f, "OPENBATTLE {battle_type} {nat_type} {password} {port} {max_players} {game_hash} {rank} {map_hash} {engine}\t{map_name}\t{mod_name}")
            }
            OutboundCommand::LeaveBattle => write!(f, "LEAVEBATTLE"),
            OutboundCommand::UpdateBattleInfo { spectators, locked, map_hash, map_name } => {
                write!(f, "UPDATEBATTLEINFO {spectators} {} {map_hash} {map_name}", *locked as u8)
            }
            OutboundCommand::Say { channel, text } => write!(f, "SAY {channel} {text}"),
            OutboundCommand::SayEx { channel, text } => write!(f, "SAYEX {channel} {text}"),
            OutboundCommand::SayPrivate { name, text } => write!(f, "SAYPRIVATE {name} {text}"),
            OutboundCommand::SayBattle { text } => write!(f, "SAYBATTLE {text}"),
            OutboundCommand::SayBattlePrivateEx { name, text } => write!(f, "SAYBATTLEPRIVATEEX {name} {text}"),
            OutboundCommand::MyStatus { status_bits } => write!(f, "MYSTATUS {status_bits}"),
            OutboundCommand::MyBattleStatus { status_bits, color } => write!(f, "MYBATTLESTATUS {status_bits} {color}"),
            OutboundCommand::AddStartRect { team_nb, left, top, right, bottom } => write!(f, "ADDSTARTRECT {team_nb} {left} {top} {right} {bottom}"),
            OutboundCommand::RemoveStartRect { team_nb } => write!(f, "REMOVESTARTRECT {team_nb}"),
            OutboundCommand::SetScriptTags { tags } => {
                write!(f, "SETSCRIPTTAGS ")?;
                let rendered: Vec<String> = tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "{}", rendered.join("\t"))
            }
            OutboundCommand::RemoveScriptTags { keys } => write!(f, "REMOVESCRIPTTAGS {}", keys.join("\t")),
            OutboundCommand::EnableAllUnits => write!(f, "ENABLEALLUNITS"),
            OutboundCommand::DisableUnits { units } => write!(f, "DISABLEUNITS {}", units.join("\t")),
            OutboundCommand::ForceAllyNo { name, ally_team } => write!(f, "FORCEALLYNO {name} {ally_team}"),
            OutboundCommand::ForceTeamNo { name, team } => write!(f, "FORCETEAMNO {name} {team}"),
            OutboundCommand::ForceSpectatorMode { name } => write!(f, "FORCESPECTATORMODE {name}"),
            OutboundCommand::ForceTeamColor { name, color } => write!(f, "FORCETEAMCOLOR {name} {color}"),
            OutboundCommand::Handicap { name, value } => write!(f, "HANDICAP {name} {value}"),
            OutboundCommand::AddBot { name, status_bits, color, ai_spec } => write!(f, "ADDBOT {name} {status_bits} {color} {ai_spec}"),
            OutboundCommand::RemoveBot { name } => write!(f, "REMOVEBOT {name}"),
            OutboundCommand::UpdateBot { name, status_bits, color } => write!(f, "UPDATEBOT {name} {status_bits} {color}"),
            OutboundCommand::KickFromBattle { name } => write!(f, "KICKFROMBATTLE {name}"),
            OutboundCommand::Ring { name } => write!(f, "RING {name}"),
            OutboundCommand::JoinBattleAccept { name } => write!(f, "JOINBATTLEACCEPT {name}"),
            OutboundCommand::JoinBattleDeny { name, reason } => write!(f, "JOINBATTLEDENY {name} {reason}"),
            OutboundCommand::GetUserInfo { name } => write!(f, "GETUSERINFO {name}"),
        }
    }
}

/// The lobby session's transport seam: §5 keeps the core independent of
/// the concrete socket so it can be driven by a fake in tests. A real
/// implementation lives in `crate::frameworks::lobby_socket`.
#[async_trait]
pub trait LobbyTransport: Send {
    async fn send_line(&mut self, line: &str) -> std::io::Result<()>;
    /// `Ok(None)` signals a clean EOF (peer closed the connection).
    async fn recv_line(&mut self) -> std::io::Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_adduser() {
        let ev = parse_inbound("ADDUSER alice US 1234 SpringLobby 0.1");
        assert_eq!(ev, InboundEvent::AddUser { name: "alice".into(), country: "US".into(), account_id: 1234, lobby_client: "SpringLobby".into() });
    }

    #[test]
    fn parses_redirect_with_valid_ipv4_and_port() {
        let ev = parse_inbound("REDIRECT 203.0.113.9 8200");
        assert_eq!(ev, InboundEvent::Redirect { ip: "203.0.113.9".parse().unwrap(), port: 8200 });
    }

    #[test]
    fn said_keeps_message_with_embedded_spaces() {
        let ev = parse_inbound("SAID main alice hello there friend");
        assert_eq!(ev, InboundEvent::Said { channel: "main".into(), name: "alice".into(), message: "hello there friend".into() });
    }

    #[test]
    fn unknown_verb_is_preserved_rather_than_dropped() {
        let ev = parse_inbound("SOMETHINGNEW a b c");
        assert_eq!(ev, InboundEvent::Unknown { verb: "SOMETHINGNEW".into(), args: vec!["a".into(), "b".into(), "c".into()] });
    }

    #[test]
    fn outbound_open_battle_renders_expected_verb_order() {
        let cmd = OutboundCommand::OpenBattle {
            battle_type: 0, nat_type: 0, password: "*".into(), port: 8452, max_players: 8,
            game_hash: "0".into(), rank: 0, map_hash: "abc".into(), engine: "105.1".into(),
            map_name: "Comet Catcher".into(), mod_name: "Balanced Annihilation".into(),
        };
        assert!(cmd.to_string().starts_with("OPENBATTLE 0 0 * 8452 8 0 0 abc 105.1"));
    }
}
