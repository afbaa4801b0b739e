//! Browser and context handles over a DevTools connection.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::connection::CdpConnection;
use crate::error::{Error, Result};
use crate::page::CdpPage;

/// Target description from `Target.getTargets`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
	pub target_id: String,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub attached: bool,
}

/// A connected browser.
#[derive(Clone)]
pub struct CdpBrowser {
	conn: Arc<CdpConnection>,
}

impl CdpBrowser {
	/// Connects to the browser-level DevTools socket at `ws_url`.
	pub async fn connect(ws_url: &str, call_timeout: Duration) -> Result<Self> {
		let conn = CdpConnection::connect(ws_url, call_timeout).await?;
		Ok(Self { conn })
	}

	pub fn from_connection(conn: Arc<CdpConnection>) -> Self {
		Self { conn }
	}

	pub fn connection(&self) -> &Arc<CdpConnection> {
		&self.conn
	}

	/// Returns the default browsing context.
	///
	/// A freshly launched browser with a dedicated profile has exactly one
	/// context, so the default one is reused rather than creating another.
	pub fn context(&self) -> BrowserContext {
		BrowserContext {
			conn: Arc::clone(&self.conn),
		}
	}

	pub async fn targets(&self) -> Result<Vec<TargetInfo>> {
		let reply = self.conn.call("Target.getTargets", json!({})).await?;
		let infos = reply.get("targetInfos").cloned().unwrap_or(Value::Array(Vec::new()));
		Ok(serde_json::from_value(infos)?)
	}

	/// Asks the browser to exit. A dropped socket during close counts as success.
	pub async fn close(&self) -> Result<()> {
		let result = self.conn.call("Browser.close", json!({})).await;
		self.conn.close().await;
		match result {
			Ok(_) => Ok(()),
			Err(err) if err.is_closed() => Ok(()),
			Err(err) => Err(err),
		}
	}
}

/// The browser's default context.
#[derive(Clone)]
pub struct BrowserContext {
	conn: Arc<CdpConnection>,
}

impl BrowserContext {
	/// Returns a page in this context, reusing the first open page target.
	pub async fn page(&self) -> Result<CdpPage> {
		let browser = CdpBrowser::from_connection(Arc::clone(&self.conn));
		let existing = browser.targets().await?.into_iter().find(|t| t.kind == "page");

		let target_id = match existing {
			Some(target) => {
				debug!(target = "otpgate.cdp", target_id = %target.target_id, url = %target.url, "reusing page target");
				target.target_id
			}
			None => {
				let created = self.conn.call("Target.createTarget", json!({ "url": "about:blank" })).await?;
				created
					.get("targetId")
					.and_then(Value::as_str)
					.map(str::to_string)
					.ok_or_else(|| Error::ProtocolError("Target.createTarget returned no targetId".into()))?
			}
		};

		let attached = self
			.conn
			.call("Target.attachToTarget", json!({ "targetId": target_id, "flatten": true }))
			.await?;
		let session_id = attached
			.get("sessionId")
			.and_then(Value::as_str)
			.map(str::to_string)
			.ok_or_else(|| Error::ProtocolError("Target.attachToTarget returned no sessionId".into()))?;

		let page = CdpPage::new(Arc::clone(&self.conn), session_id, target_id);
		page.enable().await?;
		Ok(page)
	}

	/// Clears cookies and web storage so the profile can be reused by the next session.
	pub async fn clear_state(&self, page: Option<&CdpPage>) -> Result<()> {
		self.conn.call("Storage.clearCookies", json!({})).await?;
		if let Some(page) = page {
			page.evaluate("(() => { try { localStorage.clear(); sessionStorage.clear(); } catch (e) {} return true; })()")
				.await?;
		}
		Ok(())
	}
}
