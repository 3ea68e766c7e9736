//! Core types shared across all NexusShell crates.
//!
//! Defines the tagged [`Value`] model, the [`NexusError`] taxonomy, parsed
//! input plans, command contexts, capabilities, configuration, and the
//! mutable shell state used by the engine, bridge, and transaction manager.

pub mod cancel;
pub mod capability;
pub mod config;
pub mod config_loader;
pub mod context;
pub mod error;
pub mod plan;
pub mod state;
pub mod value;

pub use cancel::CancelToken;
pub use capability::Capability;
pub use config::{
    parse_byte_spec, PerformanceSection, PolicyName, SecuritySection, ShellConfig, ShellSection,
    Thresholds,
};
pub use config_loader::load_config;
pub use context::{AllowAllGate, CapabilityGate, CommandContext, DenyAllGate};
pub use error::{ErrorKind, NexusError};
pub use plan::{FlagValue, InputMode, ParsedCommand, ParsedInput};
pub use state::{ShellState, StateSnapshot};
pub use value::{monotonic_ns, next_object_id, Value, ValueMeta};

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, NexusError>;
