// cloudpoll-api: Session-scoped async HTTP client for vendor cloud APIs

pub mod auth;
pub mod client;
pub mod envelope;
pub mod error;
pub mod extract;
mod login;
pub mod session;
pub mod transport;

pub use auth::{AuthScheme, Credentials, TokenPlacement};
pub use client::VendorClient;
pub use envelope::{Request, lookup};
pub use error::{AuthError, Error, FetchError};
pub use extract::{ExtractError, ExtractionRule, Terminator};
pub use session::{Session, SessionStatus};
pub use transport::{TlsMode, TransportConfig};
