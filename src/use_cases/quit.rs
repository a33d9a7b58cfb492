//! Quit/rehost main-loop evaluation (§4.K, component K).
//!
//! `crate::domain::quit` holds the lattice itself; this module is the
//! "whenever the game is not running and the autohost is idle, evaluate
//! whether the condition holds" check from §4.K, plus the blocking-I/O
//! gate that must clear before the process actually stops.

use crate::domain::QuitIntent;

/// Blocking operations that must finish before the main loop is allowed
/// to stop, per §4.K / §5 "Cancellation & timeouts".
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingGate {
    pub archive_load_in_flight: bool,
    pub plugin_shutdown_delay: bool,
    pub engine_auto_management: bool,
}

impl BlockingGate {
    pub fn clear(&self) -> bool {
        !self.archive_load_in_flight && !self.plugin_shutdown_delay && !self.engine_auto_management
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitDecision {
    /// Nothing pending, or pending but condition/gate not satisfied.
    Continue,
    Shutdown { exit_code: u8 },
    /// Re-exec with the original macro args preserved (§4.K).
    Restart { exit_code: u8 },
}

/// Evaluates `intent` against current room facts and the blocking gate.
/// Called once per tick whenever the game is not running and the autohost
/// is idle (§4.K).
pub fn evaluate(
    intent: &QuitIntent,
    game_running: bool,
    only_specs_present: bool,
    room_empty: bool,
    gate: BlockingGate,
) -> QuitDecision {
    if !intent.is_pending() || !gate.clear() {
        return QuitDecision::Continue;
    }
    if !intent.condition_met(game_running, only_specs_present, room_empty) {
        return QuitDecision::Continue;
    }
    let exit_code = intent.exit_code.unwrap_or(0);
    match intent.action {
        Some(crate::domain::QuitAction::Shutdown) => QuitDecision::Shutdown { exit_code },
        Some(crate::domain::QuitAction::Restart) => QuitDecision::Restart { exit_code },
        None => QuitDecision::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QuitAction, QuitCondition};

    #[test]
    fn blocked_by_archive_load_even_when_condition_met() {
        let mut intent = QuitIntent::default();
        intent.merge(Some(QuitAction::Shutdown), Some(QuitCondition::Empty), 0);
        let gate = BlockingGate { archive_load_in_flight: true, ..Default::default() };
        assert_eq!(evaluate(&intent, false, false, true, gate), QuitDecision::Continue);
    }

    #[test]
    fn shuts_down_once_condition_and_gate_clear() {
        let mut intent = QuitIntent::default();
        intent.merge(Some(QuitAction::Shutdown), Some(QuitCondition::Empty), 0);
        let gate = BlockingGate::default();
        assert_eq!(evaluate(&intent, false, false, true, gate), QuitDecision::Shutdown { exit_code: 0 });
    }

    #[test]
    fn quit_during_pending_restart_whenempty_becomes_shutdown_after_game() {
        let mut intent = QuitIntent::default();
        intent.merge(Some(QuitAction::Restart), Some(QuitCondition::Empty), 0);
        intent.merge(Some(QuitAction::Shutdown), Some(QuitCondition::Game), 0);
        assert_eq!(intent.action, Some(QuitAction::Shutdown));
        assert_eq!(intent.condition, Some(QuitCondition::Game));
        let gate = BlockingGate::default();
        assert_eq!(evaluate(&intent, true, false, false, gate), QuitDecision::Continue);
        assert_eq!(evaluate(&intent, false, false, false, gate), QuitDecision::Shutdown { exit_code: 0 });
    }
}
