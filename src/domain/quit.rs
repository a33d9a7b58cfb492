//! The quit/rehost lattice (§3, §4.K).

/// `shutdown` trumps `restart` — modeled so the smaller discriminant wins
/// under `min()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QuitAction {
    Shutdown = 0,
    Restart = 1,
}

/// `game` trumps `onlySpec` trumps `empty` — same "smaller discriminant
/// wins" encoding as `QuitAction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QuitCondition {
    Game = 0,
    OnlySpec = 1,
    Empty = 2,
}

/// A reducible request to end the process, combining the most urgent
/// action/condition seen so far plus a sticky non-success exit code (§4.K:
/// "a non-success exit code, once set, is preserved").
#[derive(Debug, Clone, Default)]
pub struct QuitIntent {
    pub action: Option<QuitAction>,
    pub condition: Option<QuitCondition>,
    pub exit_code: Option<u8>,
}

impl QuitIntent {
    /// Merges an incoming request into the lattice: `action` reduces to the
    /// minimum (`shutdown` beats `restart`), `condition` reduces to the
    /// minimum (`game` beats `onlySpec` beats `empty`), and a non-zero
    /// `exit_code`, once set, is never overwritten by a later zero.
    ///
    /// Example from §4.K: a `quit` (shutdown, no condition = "now") issued
    /// while a `restart whenEmpty` (restart/empty) is pending yields
    /// `shutdown/empty` — the stronger action wins but the already-pending
    /// condition still has to hold, i.e. "quit after this game ends".
    pub fn merge(&mut self, action: Option<QuitAction>, condition: Option<QuitCondition>, exit_code: u8) {
        if let Some(action) = action {
            self.action = Some(match self.action {
                Some(current) => current.min(action),
                None => action,
            });
        }
        if let Some(condition) = condition {
            self.condition = Some(match self.condition {
                Some(current) => current.min(condition),
                None => condition,
            });
        }
        if exit_code != 0 {
            self.exit_code.get_or_insert(exit_code);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.action.is_some()
    }

    /// Evaluates whether the held condition is satisfied given current room
    /// facts, per the main-loop check in §4.K.
    pub fn condition_met(&self, game_running: bool, only_specs_present: bool, room_empty: bool) -> bool {
        match self.condition {
            None => true,
            Some(QuitCondition::Game) => !game_running,
            Some(QuitCondition::OnlySpec) => !game_running && only_specs_present,
            Some(QuitCondition::Empty) => !game_running && room_empty,
        }
    }

    pub fn clear(&mut self) {
        *self = QuitIntent::default();
    }
}
