//! The autohost UDP channel the spawned engine process talks back over
//! (§4.J, component J). The wire encoding is a single-byte command tag
//! followed by packed fields (the engine's `AutohostInterface`); this
//! module only decodes the tags the core acts on and leaves anything else
//! as an opaque `Unknown` so a protocol addition upstream can't panic us.

use async_trait::async_trait;

/// Decoded datagrams from the spawned engine process.
#[derive(Debug, Clone, PartialEq)]
pub enum AutohostEvent {
    ServerStarted,
    ServerStartPlaying { game_id: [u8; 16] },
    ServerQuit,
    ServerStartPlayingFromDemo,
    ServerGameOver { player_num: u8, winning_ally_teams: Vec<u8> },
    ServerMessage { text: String },
    ServerWarning { text: String },
    PlayerJoined { player_num: u8, name: String },
    PlayerLeft { player_num: u8, reason: PlayerLeftReason },
    PlayerReady { player_num: u8, ready_state: bool },
    PlayerChat { player_num: u8, destination: u8, message: String },
    PlayerDefeated { player_num: u8 },
    GameTeamStat { team_num: u8, stats: Vec<u8> },
    GameLuaMsg { player_num: u8, script: u16, mode: u8, payload: Vec<u8> },
    Unknown { tag: u8, payload: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerLeftReason {
    Lost,
    Kicked,
    LeftVoluntarily,
    Unknown(u8),
}

impl From<u8> for PlayerLeftReason {
    fn from(value: u8) -> Self {
        match value {
            0 => PlayerLeftReason::Lost,
            1 => PlayerLeftReason::Kicked,
            2 => PlayerLeftReason::LeftVoluntarily,
            other => PlayerLeftReason::Unknown(other),
        }
    }
}

/// The tag byte values the engine's autohost interface uses. Kept as
/// plain constants rather than a `TryFrom`-derived enum since several
/// unused legacy tags sit in the middle of the range and this module
/// only needs to recognize the ones the core consumes.
mod tag {
    pub const SERVER_STARTED: u8 = 0;
    pub const SERVER_QUIT: u8 = 1;
    pub const SERVER_STARTPLAYING: u8 = 2;
    pub const SERVER_GAMEOVER: u8 = 3;
    pub const SERVER_MESSAGE: u8 = 4;
    pub const SERVER_WARNING: u8 = 5;
    pub const PLAYER_JOINED: u8 = 6;
    pub const PLAYER_LEFT: u8 = 7;
    pub const PLAYER_READY: u8 = 8;
    pub const PLAYER_CHAT: u8 = 9;
    pub const PLAYER_DEFEATED: u8 = 10;
    pub const GAME_TEAMSTAT: u8 = 11;
    pub const GAME_LUAMSG: u8 = 12;
    pub const SERVER_STARTPLAYING_DEMO: u8 = 13;
}

/// Parses one UDP datagram from the spawned engine into an `AutohostEvent`.
/// Malformed payloads (too short for their tag's fixed fields) degrade to
/// `Unknown` rather than being dropped, so a caller logging unexpected
/// traffic still sees the raw bytes.
pub fn parse_datagram(bytes: &[u8]) -> AutohostEvent {
    let Some((&tag_byte, rest)) = bytes.split_first() else {
        return AutohostEvent::Unknown { tag: 0, payload: Vec::new() };
    };
    match tag_byte {
        tag::SERVER_STARTED => AutohostEvent::ServerStarted,
        tag::SERVER_QUIT => AutohostEvent::ServerQuit,
        tag::SERVER_STARTPLAYING_DEMO => AutohostEvent::ServerStartPlayingFromDemo,
        tag::SERVER_STARTPLAYING => {
            let mut game_id = [0u8; 16];
            if rest.len() >= 16 {
                game_id.copy_from_slice(&rest[..16]);
            }
            AutohostEvent::ServerStartPlaying { game_id }
        }
        tag::SERVER_GAMEOVER => {
            let Some((&player_num, teams)) = rest.split_first() else {
                return AutohostEvent::Unknown { tag: tag_byte, payload: rest.to_vec() };
            };
            AutohostEvent::ServerGameOver { player_num, winning_ally_teams: teams.to_vec() }
        }
        tag::SERVER_MESSAGE => AutohostEvent::ServerMessage { text: String::from_utf8_lossy(rest).into_owned() },
        tag::SERVER_WARNING => AutohostEvent::ServerWarning { text: String::from_utf8_lossy(rest).into_owned() },
        tag::PLAYER_JOINED => {
            let Some((&player_num, name)) = rest.split_first() else {
                return AutohostEvent::Unknown { tag: tag_byte, payload: rest.to_vec() };
            };
            AutohostEvent::PlayerJoined { player_num, name: String::from_utf8_lossy(name).into_owned() }
        }
        tag::PLAYER_LEFT => {
            if rest.len() < 2 {
                return AutohostEvent::Unknown { tag: tag_byte, payload: rest.to_vec() };
            }
            AutohostEvent::PlayerLeft { player_num: rest[0], reason: PlayerLeftReason::from(rest[1]) }
        }
        tag::PLAYER_READY => {
            if rest.len() < 2 {
                return AutohostEvent::Unknown { tag: tag_byte, payload: rest.to_vec() };
            }
            AutohostEvent::PlayerReady { player_num: rest[0], ready_state: rest[1] != 0 }
        }
        tag::PLAYER_CHAT => {
            if rest.len() < 2 {
                return AutohostEvent::Unknown { tag: tag_byte, payload: rest.to_vec() };
            }
            AutohostEvent::PlayerChat {
                player_num: rest[0],
                destination: rest[1],
                message: String::from_utf8_lossy(&rest[2..]).into_owned(),
            }
        }
        tag::PLAYER_DEFEATED => {
            let Some((&player_num, _)) = rest.split_first() else {
                return AutohostEvent::Unknown { tag: tag_byte, payload: rest.to_vec() };
            };
            AutohostEvent::PlayerDefeated { player_num }
        }
        tag::GAME_TEAMSTAT => {
            let Some((&team_num, stats)) = rest.split_first() else {
                return AutohostEvent::Unknown { tag: tag_byte, payload: rest.to_vec() };
            };
            AutohostEvent::GameTeamStat { team_num, stats: stats.to_vec() }
        }
        tag::GAME_LUAMSG => {
            if rest.len() < 4 {
                return AutohostEvent::Unknown { tag: tag_byte, payload: rest.to_vec() };
            }
            let player_num = rest[0];
            let mode = rest[1];
            let script = u16::from_le_bytes([rest[2], rest[3]]);
            AutohostEvent::GameLuaMsg { player_num, script, mode, payload: rest[4..].to_vec() }
        }
        other => AutohostEvent::Unknown { tag: other, payload: rest.to_vec() },
    }
}

/// The autohost channel's transport seam, mirroring `LobbyTransport`: the
/// datagram socket is swapped for a fake in tests so `use_cases::launch`
/// never needs a real UDP socket to be exercised.
#[async_trait]
pub trait AutohostChannel: Send {
    async fn recv_datagram(&mut self) -> std::io::Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_server_started() {
        assert_eq!(parse_datagram(&[tag::SERVER_STARTED]), AutohostEvent::ServerStarted);
    }

    #[test]
    fn decodes_player_joined_with_name() {
        let mut bytes = vec![tag::PLAYER_JOINED, 3];
        bytes.extend_from_slice(b"alice");
        assert_eq!(parse_datagram(&bytes), AutohostEvent::PlayerJoined { player_num: 3, name: "alice".into() });
    }

    #[test]
    fn decodes_game_over_with_winning_teams() {
        let bytes = vec![tag::SERVER_GAMEOVER, 0, 1, 2];
        assert_eq!(parse_datagram(&bytes), AutohostEvent::ServerGameOver { player_num: 0, winning_ally_teams: vec![1, 2] });
    }

    #[test]
    fn decodes_player_left_reason() {
        let bytes = vec![tag::PLAYER_LEFT, 1, 1];
        assert_eq!(parse_datagram(&bytes), AutohostEvent::PlayerLeft { player_num: 1, reason: PlayerLeftReason::Kicked });
    }

    #[test]
    fn truncated_payload_degrades_to_unknown_rather_than_panicking() {
        let bytes = vec![tag::PLAYER_CHAT, 1];
        assert_eq!(parse_datagram(&bytes), AutohostEvent::Unknown { tag: tag::PLAYER_CHAT, payload: vec![1] });
    }

    #[test]
    fn empty_datagram_is_unknown() {
        assert_eq!(parse_datagram(&[]), AutohostEvent::Unknown { tag: 0, payload: Vec::new() });
    }
}
