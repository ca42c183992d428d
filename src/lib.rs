//! Connect3Dp kiosk: keeps a local copy of one machine's AtAGlance state in
//! sync with a Connect3Dp server and derives what the kiosk screen shows.

pub mod config;
pub mod display;
pub mod machine_state;
pub mod protocol;
pub mod reconciler;
pub mod session;

pub use config::KioskConfig;
pub use display::{DisplayModel, LinkStats};
pub use machine_state::{
    DisconnectPolicy, MachineState, MachineStatus, PrintJobState, classify_status, label_for,
};
pub use reconciler::{Outcome, StateReconciler, apply_delta, apply_full_snapshot};
pub use session::{KioskCommand, KioskSession, SessionError};
