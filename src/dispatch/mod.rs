//! The dispatch engine: work assignment (hook), target resolution (sling),
//! queue claims, wave scheduling, and the anchor gate.

pub mod anchor;
pub mod claim;
pub mod hook;
pub mod sling;
pub mod waves;

pub use anchor::{AnchorGate, AnchorHealth, CmdHealthSource, HealthSource, promote_wisp};
pub use hook::{hook, unhook};
pub use sling::{SlingOptions, Target, sling};
pub use waves::{Wave, compute_waves};
