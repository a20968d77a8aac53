//! `borgtide-probe`: decides which named network environments currently hold.
//!
//! An [`Environment`] passes when all of its gates pass, checked in order:
//!
//! | Gate       | Passes when                                                   |
//! |------------|---------------------------------------------------------------|
//! | wireless   | on wifi with a matching SSID and wifi allowed, or off wifi with other links allowed |
//! | local      | at least one local address matches                            |
//! | global     | no global pattern, or the public address matches              |
//! | hosts      | every required host answers one ping                          |
//!
//! [`EnvironmentProbe::refresh`] evaluates all environments against one
//! snapshot of the [`NetworkSignals`] and returns a fresh [`EnvironmentSet`].

pub mod environment;
pub mod error;
pub mod parse;
pub mod probe;
pub mod set;
pub mod signals;

pub use environment::{Environment, Pattern};
pub use error::{ProbeError, Result};
pub use probe::EnvironmentProbe;
pub use set::EnvironmentSet;
pub use signals::{NetworkSignals, SystemSignals};
