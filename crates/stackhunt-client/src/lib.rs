#[cfg(feature = "browser")]
pub mod browser;
pub mod discovery;
pub mod dom;
pub mod script;

#[cfg(feature = "browser")]
pub use browser::{CdpPage, CdpSession, CdpSessionProvider};
pub use discovery::DebuggerEndpoint;
pub use dom::{BuiltWithParser, ListingExtractor};
