//! Autonomous hosting agent for a real-time strategy battle-lobby
//! ecosystem. The module layout follows the component table: `domain`
//! holds pure entities and invariants, `use_cases` the business logic
//! that operates on them, `interface_adapters` the seams to the outside
//! world, and `frameworks` the concrete I/O, wiring, and the main loop.

pub mod domain;
pub mod frameworks;
pub mod interface_adapters;
pub mod use_cases;
