//! Per-connection I/O tasks.
//!
//! Each accepted socket gets a reader task decoding [`ClientMessage`] lines
//! into [`ConnectionEvent`]s and a writer task encoding [`ManagerMessage`]s.
//! One reader per socket keeps a client's messages in order.

use gsm::ClientKey;
use gsm::protocol::{ClientMessage, ManagerMessage};
use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Longest line accepted from a peer, newline excluded.
pub const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug)]
pub enum ConnectionEvent {
	Message { key: ClientKey, message: ClientMessage },
	/// The peer hung up or sent something undecodable.
	Closed { key: ClientKey },
}

/// Handles to a connection's I/O tasks.
#[derive(Debug)]
pub struct Connection {
	reader: JoinHandle<()>,
	writer: JoinHandle<()>,
}

impl Connection {
	/// Starts the I/O tasks for `stream`. Messages queued on the returned
	/// sender are written in order; the socket's write side is shut down
	/// once every sender is dropped.
	pub fn spawn(
		key: ClientKey,
		stream: UnixStream,
		events: mpsc::UnboundedSender<ConnectionEvent>,
	) -> (Self, mpsc::UnboundedSender<ManagerMessage>) {
		let (read_half, write_half) = stream.into_split();
		let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
		let reader = tokio::spawn(read_loop(key, read_half, events));
		let writer = tokio::spawn(write_loop(key, write_half, outgoing_rx));
		(Self { reader, writer }, outgoing)
	}

	/// Stops reading. Pending writes still drain once the sender is gone.
	pub fn close(self) -> JoinHandle<()> {
		self.reader.abort();
		self.writer
	}
}

async fn read_loop(key: ClientKey, read_half: tokio::net::unix::OwnedReadHalf, events: mpsc::UnboundedSender<ConnectionEvent>) {
	let mut reader = BufReader::new(read_half);
	loop {
		match read_line(&mut reader, MAX_LINE_LEN).await {
			Ok(Some(line)) => {
				if line.trim().is_empty() {
					continue;
				}
				match serde_json::from_str::<ClientMessage>(&line) {
					Ok(message) => {
						debug!(target = "gsm.xsmp", key = %key, message = message.name(), "received");
						if events.send(ConnectionEvent::Message { key, message }).is_err() {
							return;
						}
					}
					Err(err) => {
						warn!(target = "gsm.xsmp", key = %key, error = %err, "malformed message, closing connection");
						break;
					}
				}
			}
			Ok(None) => break,
			Err(err) => {
				warn!(target = "gsm.xsmp", key = %key, error = %err, "read failed, closing connection");
				break;
			}
		}
	}
	let _ = events.send(ConnectionEvent::Closed { key });
}

/// Reads one newline-terminated line of at most `limit` bytes.
///
/// Returns `Ok(None)` at end of input. A longer line is an `InvalidData`
/// error and leaves the reader in the middle of it.
pub(crate) async fn read_line<R>(reader: &mut R, limit: usize) -> io::Result<Option<String>>
where
	R: AsyncBufRead + Unpin,
{
	let mut buf = Vec::new();
	let read = (&mut *reader).take(limit as u64 + 1).read_until(b'\n', &mut buf).await?;
	if read == 0 {
		return Ok(None);
	}
	if buf.last() == Some(&b'\n') {
		buf.pop();
		if buf.last() == Some(&b'\r') {
			buf.pop();
		}
	} else if buf.len() > limit {
		return Err(io::Error::new(io::ErrorKind::InvalidData, format!("line exceeds {limit} bytes")));
	}
	String::from_utf8(buf)
		.map(Some)
		.map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

async fn write_loop(
	key: ClientKey,
	mut write_half: tokio::net::unix::OwnedWriteHalf,
	mut outgoing: mpsc::UnboundedReceiver<ManagerMessage>,
) {
	while let Some(message) = outgoing.recv().await {
		let mut payload = match serde_json::to_string(&message) {
			Ok(payload) => payload,
			Err(err) => {
				warn!(target = "gsm.xsmp", key = %key, error = %err, "failed to encode message");
				continue;
			}
		};
		payload.push('\n');
		if let Err(err) = write_half.write_all(payload.as_bytes()).await {
			debug!(target = "gsm.xsmp", key = %key, error = %err, "write failed");
			return;
		}
	}
	let _ = write_half.shutdown().await;
}

#[cfg(test)]
mod tests {
	use super::*;
	use gsm::protocol::SaveType;

	#[tokio::test]
	async fn decodes_lines_and_reports_close() {
		let (ours, mut theirs) = UnixStream::pair().unwrap();
		let (events_tx, mut events) = mpsc::unbounded_channel();
		let key = ClientKey::new(1);
		let (_connection, _outgoing) = Connection::spawn(key, ours, events_tx);

		theirs
			.write_all(b"{\"type\":\"register_client\"}\n\n{\"type\":\"get_properties\"}\n")
			.await
			.unwrap();
		drop(theirs);

		assert!(matches!(
			events.recv().await,
			Some(ConnectionEvent::Message {
				message: ClientMessage::RegisterClient { previous_id: None },
				..
			})
		));
		assert!(matches!(
			events.recv().await,
			Some(ConnectionEvent::Message {
				message: ClientMessage::GetProperties,
				..
			})
		));
		assert!(matches!(events.recv().await, Some(ConnectionEvent::Closed { .. })));
	}

	#[tokio::test]
	async fn malformed_input_closes() {
		let (ours, mut theirs) = UnixStream::pair().unwrap();
		let (events_tx, mut events) = mpsc::unbounded_channel();
		let (_connection, _outgoing) = Connection::spawn(ClientKey::new(2), ours, events_tx);

		theirs.write_all(b"not json\n").await.unwrap();
		assert!(matches!(events.recv().await, Some(ConnectionEvent::Closed { .. })));
	}

	#[tokio::test]
	async fn overlong_line_closes() {
		let (ours, mut theirs) = UnixStream::pair().unwrap();
		let (events_tx, mut events) = mpsc::unbounded_channel();
		let (_connection, _outgoing) = Connection::spawn(ClientKey::new(4), ours, events_tx);

		theirs.write_all(&vec![b'a'; MAX_LINE_LEN + 1]).await.unwrap();
		assert!(matches!(events.recv().await, Some(ConnectionEvent::Closed { .. })));
	}

	#[tokio::test]
	async fn read_line_strips_terminators_and_keeps_a_final_partial_line() {
		let mut input: &[u8] = b"one\r\ntwo";
		assert_eq!(read_line(&mut input, 16).await.unwrap().as_deref(), Some("one"));
		assert_eq!(read_line(&mut input, 16).await.unwrap().as_deref(), Some("two"));
		assert_eq!(read_line(&mut input, 16).await.unwrap(), None);

		let mut long: &[u8] = b"abcdef\n";
		let err = read_line(&mut long, 4).await.unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidData);
	}

	#[tokio::test]
	async fn writes_flush_before_shutdown() {
		let (ours, mut theirs) = UnixStream::pair().unwrap();
		let (events_tx, _events) = mpsc::unbounded_channel();
		let (connection, outgoing) = Connection::spawn(ClientKey::new(3), ours, events_tx);

		outgoing
			.send(ManagerMessage::SaveYourself {
				save_type: SaveType::Local,
				shutdown: false,
				interact_style: Default::default(),
				fast: false,
			})
			.unwrap();
		outgoing.send(ManagerMessage::Die).unwrap();
		drop(outgoing);
		connection.close().await.unwrap();

		let mut received = String::new();
		theirs.read_to_string(&mut received).await.unwrap();
		let messages: Vec<ManagerMessage> = received.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
		assert_eq!(messages.len(), 2);
		assert_eq!(messages[1], ManagerMessage::Die);
	}
}
