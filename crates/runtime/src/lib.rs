//! otpgate runtime - Chromium process, discovery, and DevTools connection
//!
//! This crate owns the concrete backing resource behind one login session:
//!
//! - **Launcher**: locating a Chromium-family executable and spawning it with a
//!   dedicated remote-debugging port and profile directory
//! - **Discovery**: resolving the browser WebSocket URL from `/json/version`
//! - **Connection**: DevTools JSON-RPC request/response correlation over WebSocket
//! - **Browser/Page**: the browsing context, page attachment, and the page
//!   primitives (navigate, wait, fill, click, read) used by login scripts
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   otpgate    │  Resource lifecycle, login scripts
//! └──────┬───────┘
//!        │ implements Launcher / ControlChannel / PageDriver
//! ┌──────▼───────┐
//! │   runtime    │  This crate
//! │  ┌────────┐  │
//! │  │ Page   │  │  Runtime.evaluate / Input.*
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Conn   │  │  JSON-RPC correlation
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │Launcher│  │  Process management
//! │  └────────┘  │
//! └──────────────┘
//! ```

pub mod browser;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod launcher;
pub mod page;

#[cfg(test)]
mod test_support;

pub use browser::{BrowserContext, CdpBrowser, TargetInfo};
pub use connection::{CdpConnection, Event, Incoming, Request, Response};
pub use discovery::{CdpVersionInfo, fetch_cdp_endpoint};
pub use error::{Error, Result};
pub use launcher::{BrowserProcess, LaunchProfile, find_chrome_executable, launch, terminate};
pub use page::CdpPage;
