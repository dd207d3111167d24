//! Control socket used by the `gsm` command line.
//!
//! One JSON [`ControlRequest`] per line in, one [`ControlResponse`] per line
//! out. Requests are handed to the event loop as [`ControlCall`]s so that
//! session state is only ever touched from there.

use std::path::{Path, PathBuf};

use gsm::protocol::{ControlRequest, ControlResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connection::{MAX_LINE_LEN, read_line};
use crate::error::{Result, RuntimeError};
use crate::listener::bind_unix;

pub const CONTROL_SOCKET_NAME: &str = "control.sock";

/// A request waiting for the event loop's answer.
#[derive(Debug)]
pub struct ControlCall {
	pub request: ControlRequest,
	reply: oneshot::Sender<ControlResponse>,
}

impl ControlCall {
	pub fn respond(self, response: ControlResponse) {
		if self.reply.send(response).is_err() {
			debug!(target = "gsm.control", "control client went away before the response");
		}
	}
}

#[derive(Debug)]
pub struct ControlServer {
	path: PathBuf,
	calls: mpsc::UnboundedReceiver<ControlCall>,
	accept_task: JoinHandle<()>,
}

impl ControlServer {
	/// Binds `<runtime_dir>/control.sock` and starts accepting.
	pub fn bind(runtime_dir: &Path) -> Result<Self> {
		let path = runtime_dir.join(CONTROL_SOCKET_NAME);
		let listener = bind_unix(&path)?;
		let (calls_tx, calls) = mpsc::unbounded_channel();
		let accept_task = tokio::spawn(accept_loop(listener, calls_tx));
		debug!(target = "gsm.control", path = %path.display(), "control socket ready");
		Ok(Self {
			path,
			calls,
			accept_task,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub async fn recv(&mut self) -> Option<ControlCall> {
		self.calls.recv().await
	}
}

impl Drop for ControlServer {
	fn drop(&mut self) {
		self.accept_task.abort();
		let _ = std::fs::remove_file(&self.path);
	}
}

async fn accept_loop(listener: UnixListener, calls: mpsc::UnboundedSender<ControlCall>) {
	loop {
		match listener.accept().await {
			Ok((stream, _)) => {
				tokio::spawn(serve(stream, calls.clone()));
			}
			Err(err) => {
				warn!(target = "gsm.control", error = %err, "control accept failed");
			}
		}
	}
}

async fn serve(stream: UnixStream, calls: mpsc::UnboundedSender<ControlCall>) {
	let (read_half, mut write_half) = stream.into_split();
	let mut reader = BufReader::new(read_half);

	while let Ok(Some(line)) = read_line(&mut reader, MAX_LINE_LEN).await {
		if line.trim().is_empty() {
			continue;
		}
		let response = match serde_json::from_str::<ControlRequest>(&line) {
			Ok(request) => {
				debug!(target = "gsm.control", ?request, "control request");
				let (reply, response) = oneshot::channel();
				if calls.send(ControlCall { request, reply }).is_err() {
					return;
				}
				match response.await {
					Ok(response) => response,
					Err(_) => return,
				}
			}
			Err(err) => ControlResponse::Error {
				code: "bad_request".into(),
				message: err.to_string(),
			},
		};

		let mut payload = match serde_json::to_string(&response) {
			Ok(payload) => payload,
			Err(err) => {
				warn!(target = "gsm.control", error = %err, "failed to encode control response");
				return;
			}
		};
		payload.push('\n');
		if write_half.write_all(payload.as_bytes()).await.is_err() {
			return;
		}
	}
}

/// Sends one request to the control socket at `path`.
///
/// Returns `Ok(None)` when no session manager is listening there.
pub async fn send_request(path: &Path, request: &ControlRequest) -> Result<Option<ControlResponse>> {
	let stream = match UnixStream::connect(path).await {
		Ok(stream) => stream,
		Err(err) if is_not_running(&err) => return Ok(None),
		Err(err) => return Err(err.into()),
	};
	send_request_stream(stream, request).await.map(Some)
}

fn is_not_running(err: &std::io::Error) -> bool {
	matches!(
		err.kind(),
		std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
	)
}

async fn send_request_stream(mut stream: UnixStream, request: &ControlRequest) -> Result<ControlResponse> {
	let mut payload = serde_json::to_string(request)?;
	payload.push('\n');
	stream.write_all(payload.as_bytes()).await?;
	stream.flush().await?;

	let mut reader = BufReader::new(stream);
	let mut line = String::new();
	if reader.read_line(&mut line).await? == 0 {
		return Err(RuntimeError::NoResponse);
	}
	Ok(serde_json::from_str(line.trim_end())?)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn requests_round_trip_through_the_event_loop() {
		let dir = tempfile::tempdir().unwrap();
		let mut server = ControlServer::bind(dir.path()).unwrap();
		let path = server.path().to_path_buf();

		let responder = tokio::spawn(async move {
			let call = server.recv().await.unwrap();
			assert_eq!(call.request, ControlRequest::Ping);
			call.respond(ControlResponse::Pong);
			server
		});

		let response = send_request(&path, &ControlRequest::Ping).await.unwrap();
		assert_eq!(response, Some(ControlResponse::Pong));

		let server = responder.await.unwrap();
		drop(server);
		assert!(!path.exists());
	}

	#[tokio::test]
	async fn absent_server_is_not_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let response = send_request(&dir.path().join(CONTROL_SOCKET_NAME), &ControlRequest::Status)
			.await
			.unwrap();
		assert_eq!(response, None);
	}

	#[tokio::test]
	async fn malformed_requests_get_an_error_response() {
		let dir = tempfile::tempdir().unwrap();
		let server = ControlServer::bind(dir.path()).unwrap();

		let mut stream = UnixStream::connect(server.path()).await.unwrap();
		stream.write_all(b"{\"type\":\"reboot\"}\n").await.unwrap();
		let mut line = String::new();
		BufReader::new(stream).read_line(&mut line).await.unwrap();

		let response: ControlResponse = serde_json::from_str(line.trim_end()).unwrap();
		assert!(matches!(response, ControlResponse::Error { ref code, .. } if code == "bad_request"));
	}

	#[tokio::test]
	async fn overlong_requests_drop_the_connection() {
		let dir = tempfile::tempdir().unwrap();
		let server = ControlServer::bind(dir.path()).unwrap();

		let mut stream = UnixStream::connect(server.path()).await.unwrap();
		stream.write_all(&vec![b'x'; MAX_LINE_LEN + 1]).await.unwrap();
		let mut received = String::new();
		let _ = tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut received).await;
		assert!(received.is_empty());
	}
}
