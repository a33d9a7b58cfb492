//! Shared fixtures for integration tests — no real socket, no real
//! archive cache. Mirrors the teacher's `tests/support/mod.rs` role of
//! giving every test file a cheap, shared way to get a ready subject.

/// Simulates "executing the canonical vote command" without actually
/// reaching a lobby connection — the integration test only needs to
/// observe that the dispatcher/voting seam agrees on what command won.
pub fn execute_canonical(command: &[String]) -> String {
    command.join(" ")
}
