use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use crate::connection::Request;

/// Starts a one-connection DevTools stand-in and returns its WebSocket URL.
///
/// `reply` maps each request to an optional response frame.
pub(crate) async fn fake_devtools<F>(reply: F) -> String
where
	F: Fn(Request) -> Option<Value> + Send + 'static,
{
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		while let Some(Ok(frame)) = ws.next().await {
			let text = match frame {
				Message::Text(text) => text,
				Message::Close(_) => break,
				_ => continue,
			};
			let request: Request = serde_json::from_str(&text).unwrap();
			if let Some(out) = reply(request) {
				if ws.send(Message::Text(out.to_string())).await.is_err() {
					break;
				}
			}
		}
	});
	format!("ws://{}", addr)
}
