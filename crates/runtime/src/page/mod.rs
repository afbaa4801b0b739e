//! Page primitives over a flattened DevTools target session.

mod selector;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::connection::CdpConnection;
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An attached page.
#[derive(Clone)]
pub struct CdpPage {
	conn: Arc<CdpConnection>,
	session_id: String,
	target_id: String,
}

#[derive(Debug, Deserialize)]
struct Point {
	x: f64,
	y: f64,
}

impl CdpPage {
	pub(crate) fn new(conn: Arc<CdpConnection>, session_id: String, target_id: String) -> Self {
		Self {
			conn,
			session_id,
			target_id,
		}
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	pub fn target_id(&self) -> &str {
		&self.target_id
	}

	async fn call(&self, method: &str, params: Value) -> Result<Value> {
		self.conn.call_session(Some(&self.session_id), method, params).await
	}

	pub(crate) async fn enable(&self) -> Result<()> {
		self.call("Page.enable", json!({})).await?;
		self.call("Runtime.enable", json!({})).await?;
		Ok(())
	}

	/// Closes the page's target. A target that is already gone counts as closed.
	pub async fn close(&self) -> Result<()> {
		match self.conn.call("Target.closeTarget", json!({ "targetId": self.target_id })).await {
			Ok(_) => Ok(()),
			Err(err) if err.is_closed() => Ok(()),
			Err(Error::Remote { message, .. }) if message.contains("No target") => {
				debug!(target = "otpgate.cdp", target_id = %self.target_id, "target already closed");
				Ok(())
			}
			Err(err) => Err(err),
		}
	}

	/// Evaluates `expression` and returns its JSON value (`null` for undefined).
	pub async fn evaluate(&self, expression: &str) -> Result<Value> {
		let reply = self
			.call(
				"Runtime.evaluate",
				json!({
					"expression": expression,
					"returnByValue": true,
					"awaitPromise": true,
				}),
			)
			.await?;

		if let Some(details) = reply.get("exceptionDetails") {
			let message = details
				.pointer("/exception/description")
				.and_then(Value::as_str)
				.or_else(|| details.get("text").and_then(Value::as_str))
				.unwrap_or("uncaught exception");
			return Err(Error::Evaluation(message.to_string()));
		}

		Ok(reply.pointer("/result/value").cloned().unwrap_or(Value::Null))
	}

	/// Navigates and waits until the document is at least interactive.
	pub async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
		debug!(target = "otpgate.cdp", url, "navigating");
		let reply = self.call("Page.navigate", json!({ "url": url })).await?;
		if let Some(reason) = reply.get("errorText").and_then(Value::as_str).filter(|s| !s.is_empty()) {
			return Err(Error::NavigationFailed {
				url: url.to_string(),
				reason: reason.to_string(),
			});
		}
		self.poll(
			timeout,
			&format!("load of {}", url),
			"document.readyState === 'interactive' || document.readyState === 'complete'",
		)
		.await
		.map(|_| ())
	}

	pub async fn url(&self) -> Result<String> {
		Ok(self.evaluate("location.href").await?.as_str().unwrap_or_default().to_string())
	}

	/// Waits until the page URL matches `url`, ignoring query, fragment and trailing slashes.
	pub async fn wait_for_url(&self, url: &str, timeout: Duration) -> Result<()> {
		let target = serde_json::to_string(url)?;
		let expression = format!(
			"(() => {{ const n = (u) => {{ const x = new URL(u, location.href); return (x.origin + x.pathname).replace(/\\/+$/, ''); }}; return n(location.href) === n({target}); }})()"
		);
		self.poll(timeout, &format!("URL {}", url), &expression).await.map(|_| ())
	}

	/// Waits until `selector` resolves to a visible element.
	pub async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
		let expression = selector::script(selector, "return visible(el);")?;
		self.poll(timeout, &format!("selector '{}' to be visible", selector), &expression)
			.await
			.map(|_| ())
	}

	pub async fn is_visible(&self, selector: &str) -> Result<bool> {
		let expression = selector::script(selector, "return visible(el);")?;
		Ok(self.evaluate(&expression).await?.as_bool().unwrap_or(false))
	}

	/// Returns the rendered text of the first match, or `None` when nothing matches.
	pub async fn text(&self, selector: &str) -> Result<Option<String>> {
		let expression = selector::script(
			selector,
			"return el ? (el.innerText !== undefined ? el.innerText : el.textContent) : null;",
		)?;
		Ok(self.evaluate(&expression).await?.as_str().map(|s| s.trim().to_string()))
	}

	/// Replaces the value of an input with `value` using trusted keyboard input.
	pub async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()> {
		self.wait_for(selector, timeout).await?;
		let focus = selector::script(
			selector,
			"if (!el) return false; el.focus(); if ('value' in el) { el.value = ''; el.dispatchEvent(new Event('input', { bubbles: true })); } return true;",
		)?;
		if !self.evaluate(&focus).await?.as_bool().unwrap_or(false) {
			return Err(Error::ElementNotFound(selector.to_string()));
		}
		self.call("Input.insertText", json!({ "text": value })).await?;

		let change = selector::script(
			selector,
			"if (el) el.dispatchEvent(new Event('change', { bubbles: true })); return true;",
		)?;
		self.evaluate(&change).await?;
		trace!(target = "otpgate.cdp", selector, "filled input");
		Ok(())
	}

	/// Clicks the centre of the first visible match, falling back to a DOM click
	/// when the element has no layout box.
	pub async fn click(&self, selector: &str, timeout: Duration) -> Result<()> {
		self.wait_for(selector, timeout).await?;
		let locate = selector::script(
			selector,
			"if (!el) return null; el.scrollIntoView({ block: 'center', inline: 'center' }); const r = el.getBoundingClientRect(); if (r.width === 0 || r.height === 0) { el.click(); return { x: -1, y: -1 }; } return { x: r.left + r.width / 2, y: r.top + r.height / 2 };",
		)?;
		let located = self.evaluate(&locate).await?;
		if located.is_null() {
			return Err(Error::ElementNotFound(selector.to_string()));
		}
		let point: Point = serde_json::from_value(located)?;
		if point.x < 0.0 || point.y < 0.0 {
			trace!(target = "otpgate.cdp", selector, "clicked via DOM fallback");
			return Ok(());
		}

		for kind in ["mouseMoved", "mousePressed", "mouseReleased"] {
			self.call(
				"Input.dispatchMouseEvent",
				json!({
					"type": kind,
					"x": point.x,
					"y": point.y,
					"button": "left",
					"clickCount": 1,
				}),
			)
			.await?;
		}
		trace!(target = "otpgate.cdp", selector, x = point.x, y = point.y, "clicked");
		Ok(())
	}

	/// Re-evaluates `expression` until it yields something other than `false`/`null`.
	///
	/// Evaluation errors are retried since the execution context is replaced
	/// during navigation; a closed connection ends the wait immediately.
	async fn poll(&self, timeout: Duration, condition: &str, expression: &str) -> Result<Value> {
		let deadline = Instant::now() + timeout;
		loop {
			match self.evaluate(expression).await {
				Ok(Value::Null) | Ok(Value::Bool(false)) => {}
				Ok(value) => return Ok(value),
				Err(err) if err.is_closed() => return Err(err),
				Err(err @ Error::InvalidSelector { .. }) => return Err(err),
				Err(err) => trace!(target = "otpgate.cdp", error = %err, condition, "poll evaluation failed"),
			}
			if Instant::now() >= deadline {
				return Err(Error::Timeout {
					ms: timeout.as_millis() as u64,
					condition: condition.to_string(),
				});
			}
			tokio::time::sleep(POLL_INTERVAL).await;
		}
	}
}

#[cfg(test)]
mod tests;
