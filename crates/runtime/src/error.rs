//! Error types for the otpgate runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a browser over DevTools.
#[derive(Debug, Error)]
pub enum Error {
	/// No Chromium-family executable could be located.
	#[error("Could not find a Chrome/Chromium executable. Install one or configure its path.")]
	ExecutableNotFound,

	/// Spawning the browser process failed.
	#[error("Failed to launch browser: {0}")]
	LaunchFailed(String),

	/// The remote-debugging endpoint could not be reached.
	#[error("Failed to connect to DevTools endpoint: {0}")]
	ConnectionFailed(String),

	/// WebSocket-level error.
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Malformed or unexpected DevTools message.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// DevTools returned an error for a command.
	#[error("{method} failed ({code}): {message}")]
	Remote { method: String, code: i64, message: String },

	/// Script evaluated in the page threw.
	#[error("Evaluation failed: {0}")]
	Evaluation(String),

	/// Timeout waiting for an operation.
	#[error("Timeout after {ms}ms waiting for: {condition}")]
	Timeout { ms: u64, condition: String },

	/// Selector could not be parsed.
	#[error("Invalid selector '{selector}': {reason}")]
	InvalidSelector { selector: String, reason: String },

	/// `Page.navigate` reported a network-level failure.
	#[error("Navigation to {url} failed: {reason}")]
	NavigationFailed { url: String, reason: String },

	/// Element not found by selector.
	#[error("Element not found: selector '{0}'")]
	ElementNotFound(String),

	/// Connection closed while a call was pending.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Terminating the browser process failed.
	#[error("Failed to terminate process {pid}: {message}")]
	TerminateFailed { pid: u32, message: String },

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout { .. })
	}

	/// Returns true when the browser side went away.
	pub fn is_closed(&self) -> bool {
		matches!(self, Error::ChannelClosed | Error::TransportError(_))
	}
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
	fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
		Error::TransportError(err.to_string())
	}
}
