//! Polling core between `cloudpoll-api` and a home-automation host.
//!
//! - **[`ThingHandler`]** owns one monitored thing: it logs in, polls on a
//!   fixed-delay schedule, maps vendor payloads to typed channel updates,
//!   dispatches commands and runs bridge discovery. Everything that talks to
//!   the vendor for one thing is serialized on that thing's session.
//!
//! - **[`PollingEngine`]** runs the cancellable periodic tasks. Ticks of one
//!   task never overlap; tasks of different things run in parallel.
//!
//! - **[`ResponseMapper`]** turns JSON or scraped HTML into
//!   [`ChannelUpdate`]s, driven by a per-vendor [`MappingTable`].
//!
//! - **[`Binding`]** is the seam between handler and vendor.
//!   [`HttpBinding`] implements it from a declarative [`BindingProfile`];
//!   built-in profiles live in [`vendors`].
//!
//! - **[`Sink`]** receives everything the host should see: channel states,
//!   status changes, discovered devices and new channels.

pub mod binding;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod handler;
pub mod mapper;
pub mod model;
pub mod sink;
pub mod vendors;

// ── Primary re-exports ──────────────────────────────────────────────
pub use binding::{Binding, HttpBinding};
pub use config::ThingConfig;
pub use discovery::DiscoveryScanner;
pub use engine::{PollTask, PollingEngine, Reschedule};
pub use error::{CoreError, DiscoveryError, MapError, PollError};
pub use handler::{ThingHandler, ThingHandlerBuilder};
pub use mapper::{MappingTable, ResponseMapper, VendorZone};
pub use sink::{BroadcastSink, DiscoveryCallback, NoKnownThings, Sink, SinkEvent};
pub use vendors::{BindingProfile, lookup_profile, profiles};

pub use model::{
    ChannelKind, ChannelSpec, ChannelUpdate, Command, DiscoveredDevice, ThingStatus, TypedValue,
};
