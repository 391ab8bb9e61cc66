// ── Domain model ──
//
// Values exchanged between the mapper, the handler, and the host sink.
// Everything here is plain data; nothing talks to the network.

pub mod thing;
pub mod update;
pub mod value;

// ── Re-exports ──────────────────────────────────────────────────────

pub use thing::{DiscoveredDevice, ThingStatus};
pub use update::{ChannelSpec, ChannelUpdate};
pub use value::{ChannelKind, Command, TypedValue};
