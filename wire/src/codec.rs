//! Async length-prefixed framing over any `AsyncRead + AsyncWrite` stream.
//!
//! Every regular message is `tag(1) || len(4, big-endian, includes itself) ||
//! payload(len - 4)`. The startup sequence is the one exception: it has no
//! tag byte, and before the real `StartupMessage` a client may send an
//! `SSLRequest` or `GSSENCRequest` probe that this proxy always refuses.

use crate::error::WireError;
use crate::message::{self, BackendMessage, FrontendMessage};
use bytes::{BufMut, BytesMut};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Initial buffer capacity for a session's read/write buffers.
pub const BUFFER_CAPACITY: usize = 65536;

const SSL_REQUEST_CODE: i32 = 80877103;
const GSS_ENC_REQUEST_CODE: i32 = 80877104;
const CANCEL_REQUEST_CODE: i32 = 80877102;
const PROTOCOL_VERSION_3_0: i32 = 0x0003_0000;

async fn read_exact_into<S>(stream: &mut S, buf: &mut BytesMut, n: usize) -> Result<(), WireError>
where
    S: AsyncRead + Unpin,
{
    buf.clear();
    buf.reserve(n);
    let mut remaining = n;
    let mut chunk = [0u8; 4096];
    while remaining > 0 {
        let want = remaining.min(chunk.len());
        let read = stream.read(&mut chunk[..want]).await?;
        if read == 0 {
            return Err(WireError::Eof);
        }
        buf.put_slice(&chunk[..read]);
        remaining -= read;
    }
    Ok(())
}

/// Outcome of the startup handshake, before authentication.
pub enum StartupOutcome {
    Startup { user: String, database: String, params: HashMap<String, String> },
    CancelRequest { process_id: i32, secret_key: i32 },
}

/// Reads the startup sequence, transparently refusing any number of leading
/// `SSLRequest`/`GSSENCRequest` probes with a single `'N'` byte, per §4.5.
pub async fn read_startup<S>(stream: &mut S) -> Result<StartupOutcome, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut body = BytesMut::with_capacity(BUFFER_CAPACITY);
    loop {
        stream.read_exact(&mut len_buf).await?;
        let len = i32::from_be_bytes(len_buf);
        if len < 8 {
            return Err(WireError::BadLength(len));
        }
        read_exact_into(stream, &mut body, (len - 4) as usize).await?;
        let code = i32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        match code {
            SSL_REQUEST_CODE | GSS_ENC_REQUEST_CODE => {
                stream.write_all(b"N").await?;
                stream.flush().await?;
                continue;
            }
            CANCEL_REQUEST_CODE => {
                if body.len() < 12 {
                    return Err(WireError::BadLength(len));
                }
                let process_id = i32::from_be_bytes([body[4], body[5], body[6], body[7]]);
                let secret_key = i32::from_be_bytes([body[8], body[9], body[10], body[11]]);
                return Ok(StartupOutcome::CancelRequest { process_id, secret_key });
            }
            PROTOCOL_VERSION_3_0 => {
                let params = parse_startup_params(&body[4..])?;
                let user = params.get("user").cloned().unwrap_or_default();
                let database = params.get("database").cloned().unwrap_or_else(|| user.clone());
                return Ok(StartupOutcome::Startup { user, database, params });
            }
            other => return Err(WireError::UnsupportedVersion(other)),
        }
    }
}

fn parse_startup_params(buf: &[u8]) -> Result<HashMap<String, String>, WireError> {
    let mut params = HashMap::new();
    let mut pos = 0usize;
    while pos < buf.len() && buf[pos] != 0 {
        let key_end = buf[pos..].iter().position(|&b| b == 0).ok_or(WireError::Eof)? + pos;
        let key = std::str::from_utf8(&buf[pos..key_end])?.to_string();
        pos = key_end + 1;
        let val_end = buf[pos..].iter().position(|&b| b == 0).ok_or(WireError::Eof)? + pos;
        let value = std::str::from_utf8(&buf[pos..val_end])?.to_string();
        pos = val_end + 1;
        params.insert(key, value);
    }
    Ok(params)
}

/// Reads the next regular (tagged) frontend message.
pub async fn read_message<S>(stream: &mut S) -> Result<FrontendMessage, WireError>
where
    S: AsyncRead + Unpin,
{
    let mut tag_buf = [0u8; 1];
    stream.read_exact(&mut tag_buf).await?;
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = i32::from_be_bytes(len_buf);
    if len < 4 {
        return Err(WireError::BadLength(len));
    }
    let mut payload = BytesMut::with_capacity(BUFFER_CAPACITY.min((len as usize).max(16)));
    read_exact_into(stream, &mut payload, (len - 4) as usize).await?;
    message::decode_frontend(tag_buf[0], &payload)
}

/// Writes a backend message with its length prefix.
pub async fn write_message<S>(stream: &mut S, msg: &BackendMessage) -> Result<(), WireError>
where
    S: AsyncWrite + Unpin,
{
    let (tag, payload) = message::encode_backend(msg);
    let mut framed = BytesMut::with_capacity(5 + payload.len());
    framed.put_u8(tag);
    framed.put_i32((payload.len() + 4) as i32);
    framed.put_slice(&payload);
    stream.write_all(&framed).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ErrorFields, TransactionStatus};
    use std::io::Cursor;

    #[tokio::test]
    async fn startup_refuses_ssl_probe_then_reads_startup() {
        let mut wire = BytesMut::new();
        wire.put_i32(8);
        wire.put_i32(SSL_REQUEST_CODE);
        wire.put_i32(37);
        wire.put_i32(PROTOCOL_VERSION_3_0);
        wire.put_slice(b"user\0alice\0database\0proxydb\0\0");

        let mut stream = DuplexHarness::new(wire.to_vec());
        let outcome = read_startup(&mut stream).await.unwrap();
        assert_eq!(stream.written, b"N");
        match outcome {
            StartupOutcome::Startup { user, database, .. } => {
                assert_eq!(user, "alice");
                assert_eq!(database, "proxydb");
            }
            _ => panic!("expected Startup outcome"),
        }
    }

    #[tokio::test]
    async fn cancel_request_is_recognized() {
        let mut wire = BytesMut::new();
        wire.put_i32(16);
        wire.put_i32(CANCEL_REQUEST_CODE);
        wire.put_i32(4321);
        wire.put_i32(9999);

        let mut stream = DuplexHarness::new(wire.to_vec());
        let outcome = read_startup(&mut stream).await.unwrap();
        match outcome {
            StartupOutcome::CancelRequest { process_id, secret_key } => {
                assert_eq!(process_id, 4321);
                assert_eq!(secret_key, 9999);
            }
            _ => panic!("expected CancelRequest outcome"),
        }
    }

    #[tokio::test]
    async fn short_cancel_request_is_rejected() {
        let mut wire = BytesMut::new();
        wire.put_i32(9);
        wire.put_i32(CANCEL_REQUEST_CODE);
        wire.put_u8(0);

        let mut stream = DuplexHarness::new(wire.to_vec());
        assert!(matches!(read_startup(&mut stream).await, Err(WireError::BadLength(_))));
    }

    #[tokio::test]
    async fn write_then_read_error_response() {
        let mut harness = DuplexHarness::new(Vec::new());
        let fields = ErrorFields::new("ERROR", "57014", "query canceled");
        write_message(&mut harness, &BackendMessage::ErrorResponse(fields.clone())).await.unwrap();
        write_message(&mut harness, &BackendMessage::ReadyForQuery(TransactionStatus::Idle)).await.unwrap();

        assert_eq!(harness.written[0], b'E');
        let mut cursor = Cursor::new(harness.written);
        let mut tag = [0u8; 1];
        tokio::io::AsyncReadExt::read_exact(&mut cursor, &mut tag).await.unwrap();
        assert_eq!(tag[0], b'E');
    }

    struct DuplexHarness {
        read_buf: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl DuplexHarness {
        fn new(data: Vec<u8>) -> Self {
            Self { read_buf: Cursor::new(data), written: Vec::new() }
        }
    }

    impl AsyncRead for DuplexHarness {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.read_buf).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for DuplexHarness {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<Result<usize, std::io::Error>> {
            self.written.extend_from_slice(buf);
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), std::io::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), std::io::Error>> {
            std::task::Poll::Ready(Ok(()))
        }
    }
}
