//! The outermost layer: process entry point, configuration, logging,
//! file locks, and the concrete socket/process adapters the
//! `interface_adapters` traits are implemented against.

pub mod autohost_socket;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod game_process;
pub mod lobby_socket;
pub mod locks;
pub mod logging;
pub mod runtime;

pub use context::AgentContext;
