//! DevTools JSON-RPC connection over WebSocket
//!
//! This module implements the request/response correlation layer on top of a
//! browser WebSocket. It handles:
//! - Generating unique request IDs
//! - Correlating responses with pending requests
//! - Distinguishing events from responses
//! - Failing pending requests when the socket closes
//!
//! # Message Flow
//!
//! 1. Caller invokes [`CdpConnection::call`] with a method, params and optional session
//! 2. Connection generates a unique ID and registers a oneshot channel
//! 3. Request is serialized and queued for the writer task
//! 4. Reader task receives the response and resolves the oneshot by ID
//! 5. Caller receives the result, or a timeout after `call_timeout`

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Outbound DevTools command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	pub id: u64,
	pub method: String,
	#[serde(default)]
	pub params: Value,
	/// Target session for flattened page sessions; absent for browser-level calls.
	#[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Inbound command response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	pub id: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
}

/// DevTools error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub code: i64,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<String>,
}

/// Inbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	pub method: String,
	#[serde(default)]
	pub params: Value,
	#[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Discriminated union of inbound messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
	/// Response message (has `id` field)
	Response(Response),
	/// Event message (no `id` field)
	Event(Event),
	/// Unknown message type (forward-compatible catch-all)
	Unknown(Value),
}

type CallbackMap = Arc<Mutex<HashMap<u64, PendingCall>>>;

struct PendingCall {
	method: String,
	tx: oneshot::Sender<Result<Value>>,
}

/// RAII guard removing the callback when a call future is dropped early.
struct CancelGuard {
	id: u64,
	callbacks: CallbackMap,
	completed: bool,
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if !self.completed && self.callbacks.lock().remove(&self.id).is_some() {
			trace!(target = "otpgate.cdp", id = self.id, "removed orphaned callback");
		}
	}
}

struct ResponseFuture {
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.completed = true;
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// JSON-RPC connection to a browser's DevTools WebSocket.
pub struct CdpConnection {
	last_id: AtomicU64,
	callbacks: CallbackMap,
	outbound_tx: mpsc::UnboundedSender<Message>,
	closed: Arc<AtomicBool>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
	call_timeout: Duration,
}

impl CdpConnection {
	/// Opens a WebSocket to `ws_url` and starts the reader/writer tasks.
	///
	/// The handshake shares `call_timeout` with every later call.
	pub async fn connect(ws_url: &str, call_timeout: Duration) -> Result<Arc<Self>> {
		let handshake = tokio::time::timeout(call_timeout, tokio_tungstenite::connect_async(ws_url))
			.await
			.map_err(|_| Error::Timeout {
				ms: call_timeout.as_millis() as u64,
				condition: format!("DevTools handshake with {}", ws_url),
			})?;
		let (stream, _) = handshake.map_err(|e| Error::ConnectionFailed(format!("{}: {}", ws_url, e)))?;
		debug!(target = "otpgate.cdp", url = ws_url, "DevTools socket connected");
		Ok(Self::spawn(stream, call_timeout))
	}

	fn spawn<S>(stream: WebSocketStream<S>, call_timeout: Duration) -> Arc<Self>
	where
		S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
	{
		let (mut sink, mut source) = stream.split();
		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
		let callbacks: CallbackMap = Arc::new(Mutex::new(HashMap::new()));
		let closed = Arc::new(AtomicBool::new(false));

		let writer = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				let is_close = matches!(message, Message::Close(_));
				if let Err(e) = sink.send(message).await {
					debug!(target = "otpgate.cdp", error = %e, "DevTools write failed");
					break;
				}
				if is_close {
					break;
				}
			}
		});

		let reader = {
			let callbacks = Arc::clone(&callbacks);
			let closed = Arc::clone(&closed);
			tokio::spawn(async move {
				while let Some(frame) = source.next().await {
					match frame {
						Ok(Message::Text(text)) => match serde_json::from_str::<Incoming>(&text) {
							Ok(message) => dispatch(&callbacks, message),
							Err(e) => warn!(target = "otpgate.cdp", error = %e, "failed to parse DevTools message"),
						},
						Ok(Message::Close(_)) => break,
						Ok(_) => {}
						Err(e) => {
							debug!(target = "otpgate.cdp", error = %e, "DevTools read failed");
							break;
						}
					}
				}
				closed.store(true, Ordering::SeqCst);
				fail_pending(&callbacks);
			})
		};

		Arc::new(Self {
			last_id: AtomicU64::new(1),
			callbacks,
			outbound_tx,
			closed,
			tasks: Mutex::new(vec![reader, writer]),
			call_timeout,
		})
	}

	/// Sends a browser-level command.
	pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
		self.call_session(None, method, params).await
	}

	/// Sends a command, targeting a flattened page session when `session_id` is set.
	pub async fn call_session(&self, session_id: Option<&str>, method: &str, params: Value) -> Result<Value> {
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.callbacks.lock().insert(
			id,
			PendingCall {
				method: method.to_string(),
				tx,
			},
		);
		let guard = CancelGuard {
			id,
			callbacks: Arc::clone(&self.callbacks),
			completed: false,
		};

		let request = Request {
			id,
			method: method.to_string(),
			params,
			session_id: session_id.map(str::to_string),
		};
		let payload = serde_json::to_string(&request)?;
		trace!(target = "otpgate.cdp", id, method, "sending DevTools command");

		if self.outbound_tx.send(Message::Text(payload)).is_err() {
			return Err(Error::ChannelClosed);
		}

		match tokio::time::timeout(self.call_timeout, ResponseFuture { rx, guard }).await {
			Ok(result) => result,
			Err(_) => Err(Error::Timeout {
				ms: self.call_timeout.as_millis() as u64,
				condition: method.to_string(),
			}),
		}
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Sends a close frame and stops the I/O tasks. Safe to call repeatedly.
	pub async fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		let _ = self.outbound_tx.send(Message::Close(None));
		let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
		for mut task in tasks {
			if tokio::time::timeout(Duration::from_millis(500), &mut task).await.is_err() {
				task.abort();
			}
		}
		fail_pending(&self.callbacks);
	}
}

impl Drop for CdpConnection {
	fn drop(&mut self) {
		for task in self.tasks.lock().drain(..) {
			task.abort();
		}
	}
}

fn dispatch(callbacks: &CallbackMap, message: Incoming) {
	match message {
		Incoming::Response(response) => {
			let Some(pending) = callbacks.lock().remove(&response.id) else {
				debug!(target = "otpgate.cdp", id = response.id, "response for unknown request (ignored)");
				return;
			};
			let result = match response.error {
				Some(error) => Err(Error::Remote {
					method: pending.method,
					code: error.code,
					message: error.message,
				}),
				None => Ok(response.result.unwrap_or(Value::Null)),
			};
			let _ = pending.tx.send(result);
		}
		Incoming::Event(event) => {
			trace!(target = "otpgate.cdp", method = %event.method, session = ?event.session_id, "DevTools event (ignored)");
		}
		Incoming::Unknown(value) => {
			debug!(target = "otpgate.cdp", message = %value, "unrecognised DevTools message");
		}
	}
}

fn fail_pending(callbacks: &CallbackMap) {
	let pending: Vec<PendingCall> = callbacks.lock().drain().map(|(_, call)| call).collect();
	for call in pending {
		let _ = call.tx.send(Err(Error::ChannelClosed));
	}
}
