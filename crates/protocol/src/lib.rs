//! Wire types for the otpgate query API.
//!
//! Everything that crosses the API boundary lives here: the opaque
//! [`SessionId`] token, request payloads, reply envelopes, and the
//! [`AccountDetails`] result of a consumed session.
//!
//! Types in this crate are pure data. Behaviour lives in `otpgate`.

pub mod account;
pub mod auth_exchange;
pub mod identifier;

pub use account::*;
pub use auth_exchange::*;
pub use identifier::*;
