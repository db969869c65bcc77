/* src/lib.rs */

// Rotating core
pub mod clock;
pub mod error;
pub mod lock;
pub mod policy;
pub mod retention;
pub mod scheduler;
pub mod writer;

// Config, registry and the CLI pieces built on top of it
pub mod control;
pub mod logger;
pub mod parse;
pub mod runtime;
pub mod shell;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, IoFault, Result};
pub use lock::{LockCoordinator, LockMode};
pub use policy::{ExpirationRule, ExpirationScale, RotationPolicy, RotationPolicyBuilder, TimeOfDay, When};
pub use retention::{RetentionEnforcer, RetentionReport};
pub use scheduler::Deadline;
pub use writer::{backup_path, RotatingFileWriter, WriterInfo, WriterOptions, WriterState};
