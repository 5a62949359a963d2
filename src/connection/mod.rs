//! Connection identity, raw table entries and the tracked record.

mod identity;
mod record;
mod tcp_state;

pub use identity::*;
pub use record::*;
pub use tcp_state::*;
