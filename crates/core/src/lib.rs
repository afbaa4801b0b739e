//! otpgate: bounded browser-session pool and two-phase OTP login broker
//!
//! A caller submits credentials, the gate logs in on a pooled browser, and
//! when the site asks for a one-time code the live session is parked under an
//! opaque identifier until the code arrives. A verified session is consumed
//! exactly once to read account details, then its browser is torn down and
//! its slot returned.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use otpgate::{Broker, Credentials, GateSettings, PortalScript};
//! use otpgate::cdp::{CdpLauncher, DEFAULT_CALL_TIMEOUT};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = GateSettings::default();
//!     let launcher = Arc::new(CdpLauncher::new(settings.browser.clone(), DEFAULT_CALL_TIMEOUT));
//!     let broker = Broker::new(settings, launcher, Arc::new(PortalScript::default()));
//!
//!     let reply = broker.submit_credentials(Credentials::new("123456", "secret")).await?;
//!     if let Some(id) = reply.identifier {
//!         let code = read_code_from_user();
//!         broker.submit_otp(id.clone(), code).await?;
//!         let account = broker.consume(id).await?;
//!         println!("{} {:?}", account.name, account.balance);
//!     }
//!     broker.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`pool`]: fixed-capacity slots with FIFO hand-off
//! - [`resource`]: per-slot browser launch, connect and teardown
//! - [`store`]: session table with per-entry leases
//! - [`broker`]: the `NEED_OTP → VERIFIED → CONSUMED` protocol
//! - [`portal`]: the member-portal [`SiteScript`]
//! - [`cdp`]: the DevTools backend for [`resource`]

pub mod broker;
pub mod cdp;
pub mod config;
pub mod error;
pub mod pool;
pub mod portal;
pub mod resource;
pub mod script;
pub mod state;
pub mod store;
mod sweeper;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use broker::{Broker, SessionInfo};
pub use config::GateSettings;
pub use error::{BackendError, BackendResult, GateError, Result};
pub use otpgate_protocol::{AccountDetails, AuthReply, GateStatus, OtpReply, OtpState, ResendReply, SessionId};
pub use pool::{Slot, SlotPool};
pub use portal::{PortalScript, PortalSelectors};
pub use resource::{BrowsingContext, ControlChannel, Launcher, PageDriver, ResourceHandle, ResourceLifecycle};
pub use script::{Credentials, LoginOutcome, SiteScript, VerifyOutcome};
pub use state::AuthState;
