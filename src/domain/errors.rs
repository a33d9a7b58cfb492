//! Error taxonomy (§7, component O). Kept free of I/O so use cases and
//! interface adapters can return it without depending on `frameworks`.

use thiserror::Error;

/// The error kinds from §7, each carrying enough context to log and to
/// answer the user (for `InputData`/`GameProcess`) without the caller
/// needing to re-derive it.
#[derive(Debug, Error)]
pub enum AutohostError {
    #[error("usage: {0}")]
    Usage(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing dependency: {0}")]
    Dependency(String),

    #[error("instance conflict: pid {pid} holds the lock")]
    Conflict { pid: u32 },

    /// Surfaced to the caller (chat answer or JSON-RPC error); never exits
    /// the process.
    #[error("invalid input: {0}")]
    InputData(String),

    #[error("system error: {0}")]
    System(String),

    /// An invariant violation. Logged at level 0 with the call site; the
    /// process keeps running only when `recoverable` holds.
    #[error("software fault at {call_site}: {detail}")]
    Software { call_site: &'static str, detail: String, recoverable: bool },

    #[error("network error: {0}")]
    Network(String),

    #[error("untrusted certificate for {host}")]
    Certificate { host: String },

    #[error("login failed: {0}")]
    Login(String),

    /// Reported to the room, never fatal to the agent process itself.
    #[error("game process error: {0}")]
    GameProcess(String),
}

/// Maps an error to the stable exit code table in §6. Errors that are
/// never fatal (`InputData`, `GameProcess`, and a recoverable `Software`)
/// have no process-level exit code.
impl AutohostError {
    pub fn exit_code(&self) -> Option<u8> {
        match self {
            AutohostError::Usage(_) => Some(2),
            AutohostError::Configuration(_) => Some(3),
            AutohostError::Dependency(_) => Some(4),
            AutohostError::Conflict { .. } => Some(16),
            AutohostError::InputData(_) => None,
            AutohostError::System(_) => Some(32),
            AutohostError::Software { recoverable, .. } => if *recoverable { None } else { Some(33) },
            AutohostError::Network(_) => Some(48),
            AutohostError::Certificate { .. } => Some(49),
            AutohostError::Login(_) => Some(50),
            AutohostError::GameProcess(_) => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.exit_code().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_the_stable_table() {
        assert_eq!(AutohostError::Usage("bad flag".into()).exit_code(), Some(2));
        assert_eq!(AutohostError::Configuration("missing field".into()).exit_code(), Some(3));
        assert_eq!(AutohostError::Conflict { pid: 123 }.exit_code(), Some(16));
        assert_eq!(AutohostError::Certificate { host: "lobby".into() }.exit_code(), Some(49));
        assert_eq!(AutohostError::Login("denied".into()).exit_code(), Some(50));
    }

    #[test]
    fn input_data_and_game_process_never_exit() {
        assert!(AutohostError::InputData("bad ban filter".into()).exit_code().is_none());
        assert!(AutohostError::GameProcess("crash".into()).exit_code().is_none());
    }

    #[test]
    fn recoverable_software_fault_does_not_exit() {
        let e = AutohostError::Software { call_site: "balancer::balance", detail: "unreachable arm".into(), recoverable: true };
        assert!(e.exit_code().is_none());
        let e = AutohostError::Software { call_site: "balancer::balance", detail: "unreachable arm".into(), recoverable: false };
        assert_eq!(e.exit_code(), Some(33));
    }
}
