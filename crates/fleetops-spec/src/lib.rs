//! fleetops-spec — task spec mutation.
//!
//! Turns a task spec plus a set of per-container overrides into a new
//! task spec without touching the input. Overrides are explicit
//! `Set(value)` / `Delete` instructions rather than magic empty strings;
//! the command line maps empty values onto `Delete`.
//!
//! # Components
//!
//! - **`overrides`** — Override instructions (entries, drivers, role)
//! - **`mutator`** — Image, environment, secret and role mutation
//! - **`logsink`** — Log-sink mutation with atomic driver switches

pub mod logsink;
pub mod mutator;
pub mod overrides;

pub use logsink::{alter_log_sink, alter_log_sinks, SinkPass};
pub use mutator::{mutate, unknown_containers};
pub use overrides::{
    DriverOverrides, EntryOverrides, Override, RoleOverride, SpecOverrides, DRIVER_KNOCKOUT_KEY,
    ROLE_KNOCKOUT,
};
