//! Remote-debugging endpoint discovery.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// `/json/version` response subset from Chrome DevTools Protocol.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpVersionInfo {
	#[serde(rename = "webSocketDebuggerUrl")]
	pub web_socket_debugger_url: String,
	#[serde(rename = "Browser")]
	pub browser: Option<String>,
}

/// Resolves CDP version metadata from `/json/version` on `port`.
///
/// Tries the IPv4 loopback, `localhost`, and the IPv6 loopback in turn with a
/// short per-request timeout. This is a single attempt; callers retry.
pub async fn fetch_cdp_endpoint(port: u16) -> Result<CdpVersionInfo> {
	let client = reqwest::Client::builder()
		.timeout(Duration::from_millis(400))
		.build()
		.map_err(|e| Error::ConnectionFailed(format!("Failed to create HTTP client: {}", e)))?;
	let mut last_error = "no response".to_string();

	for url in [
		format!("http://127.0.0.1:{}/json/version", port),
		format!("http://localhost:{}/json/version", port),
		format!("http://[::1]:{}/json/version", port),
	] {
		let response = match client.get(&url).send().await {
			Ok(r) => r,
			Err(e) => {
				last_error = e.to_string();
				continue;
			}
		};

		if !response.status().is_success() {
			last_error = format!("unexpected status {}", response.status());
			continue;
		}

		return response
			.json::<CdpVersionInfo>()
			.await
			.map_err(|e| Error::ConnectionFailed(format!("Failed to parse CDP response: {}", e)));
	}

	Err(Error::ConnectionFailed(format!("port {}: {}", port, last_error)))
}

#[cfg(test)]
mod tests {
	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::TcpListener;

	use super::*;

	async fn serve_version_once(listener: TcpListener, body: &'static str) {
		let (mut stream, _) = listener.accept().await.unwrap();
		let mut buf = [0u8; 1024];
		let _ = stream.read(&mut buf).await.unwrap();
		let response = format!(
			"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
			body.len(),
			body
		);
		stream.write_all(response.as_bytes()).await.unwrap();
		stream.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn fetch_parses_version_payload() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();
		let server = tokio::spawn(serve_version_once(
			listener,
			r#"{"Browser":"Chrome/126.0","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/browser/abc"}"#,
		));

		let info = fetch_cdp_endpoint(port).await.unwrap();
		assert_eq!(info.web_socket_debugger_url, "ws://127.0.0.1:9222/devtools/browser/abc");
		assert_eq!(info.browser.as_deref(), Some("Chrome/126.0"));
		server.await.unwrap();
	}
}
