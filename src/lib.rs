//! The core of a runtime for a logic/functional language: memory zones,
//! the abstract machine's registers and stacks, run-time type
//! descriptors, type-driven copy, unify and compare, exceptions, solution
//! collection and stack introspection.

#[macro_use]
extern crate static_assertions;

#[macro_use]
pub(crate) mod macros;

pub mod label;
pub mod layout;
pub mod machine;
pub mod trace_base;
pub mod type_info;
pub mod type_tables;
pub mod types;

// Re-exports
pub use machine::config::*;
pub use machine::labels;
pub use machine::machine_errors::{
    fatal_error, set_fatal_policy, ConfigError, FatalPolicy, IntrospectionError,
};
pub use machine::{ControlState, Engine, HeapKind};
pub use types::{Addr, CodeAddr, Word};
