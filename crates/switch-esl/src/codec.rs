//! Wire framing for the event socket protocol
//!
//! Every frame the switch sends is a block of `Key: value` header lines
//! terminated by an empty line; when a `Content-Length` header is present
//! the frame carries that many bytes of body after the blank line. Commands
//! travel in the other direction as a single line (or small header block)
//! terminated by a double newline.

use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;

use crate::error::{EslError, Result};

/// One decoded frame off the socket: the header block plus optional body.
#[derive(Debug, Clone, Default)]
pub struct EslFrame {
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl EslFrame {
    /// Header lookup by exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|v| v.as_str())
    }

    /// The frame's `Content-Type`, empty string when absent.
    pub fn content_type(&self) -> &str {
        self.header("Content-Type").unwrap_or("")
    }

    /// The `Reply-Text` line of a command/reply frame.
    pub fn reply_text(&self) -> &str {
        self.header("Reply-Text").unwrap_or("")
    }
}

/// Read one frame from the buffered read half.
///
/// Returns `Ok(None)` on a clean EOF between frames; EOF inside a frame is
/// a protocol error.
pub async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Result<Option<EslFrame>> {
    let mut frame = EslFrame::default();
    let mut saw_any = false;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if saw_any {
                return Err(EslError::Protocol("EOF inside frame header block".into()));
            }
            return Ok(None);
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if !saw_any {
                // Stray blank line between frames; keep scanning.
                continue;
            }
            break;
        }

        saw_any = true;
        match line.split_once(':') {
            Some((name, value)) => {
                frame
                    .headers
                    .insert(name.trim().to_string(), value.trim().to_string());
            }
            None => {
                return Err(EslError::Protocol(format!("malformed header line: {line}")));
            }
        }
    }

    if let Some(len) = frame.header("Content-Length") {
        let len: usize = len
            .parse()
            .map_err(|_| EslError::Protocol(format!("bad Content-Length: {len}")))?;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        frame.body = Some(String::from_utf8_lossy(&body).into_owned());
    }

    Ok(Some(frame))
}

/// Encode an outbound command; the protocol terminator is a double newline.
pub fn encode_command(command: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(command.len() + 2);
    out.extend_from_slice(command.as_bytes());
    out.extend_from_slice(b"\n\n");
    out
}

/// Parse the header-line block of a `text/event-plain` body.
///
/// Event header values are URL-encoded on the wire; they are decoded here.
/// When the event itself carries a body (its own `Content-Length`), the
/// remainder of the block is returned verbatim.
pub fn parse_event_body(body: &str) -> (HashMap<String, String>, Option<String>) {
    let mut headers = HashMap::new();
    let mut rest = None;

    let mut lines = body.split('\n');
    for line in lines.by_ref() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let decoded = percent_encoding::percent_decode_str(value.trim())
                .decode_utf8_lossy()
                .into_owned();
            headers.insert(name.trim().to_string(), decoded);
        }
    }

    if headers.contains_key("Content-Length") {
        let remainder: String = lines.collect::<Vec<_>>().join("\n");
        if !remainder.is_empty() {
            rest = Some(remainder);
        }
    }

    (headers, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_headers_and_decodes_values() {
        let body = "Event-Name: CHANNEL_ANSWER\n\
                    Unique-ID: abc-123\n\
                    Caller-Caller-ID-Name: John%20Doe\n\
                    variable_sip_h_X-agent_id: 42\n\n";
        let (headers, rest) = parse_event_body(body);
        assert_eq!(headers.get("Event-Name").map(String::as_str), Some("CHANNEL_ANSWER"));
        assert_eq!(headers.get("Caller-Caller-ID-Name").map(String::as_str), Some("John Doe"));
        assert_eq!(headers.get("variable_sip_h_X-agent_id").map(String::as_str), Some("42"));
        assert!(rest.is_none());
    }

    #[test]
    fn keeps_event_body_after_header_block() {
        let body = "Event-Name: BACKGROUND_JOB\nContent-Length: 14\n\n+OK some reply";
        let (headers, rest) = parse_event_body(body);
        assert_eq!(headers.get("Event-Name").map(String::as_str), Some("BACKGROUND_JOB"));
        assert_eq!(rest.as_deref(), Some("+OK some reply"));
    }

    #[test]
    fn encodes_commands_with_double_newline() {
        assert_eq!(encode_command("api status"), b"api status\n\n");
    }

    async fn socket_pair() -> (tokio::net::TcpStream, tokio::net::TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn reads_frames_from_a_socket() {
        use tokio::io::AsyncWriteExt;

        let (mut writer, reader) = socket_pair().await;
        let (read_half, _write_half) = reader.into_split();
        let mut reader = BufReader::new(read_half);

        writer
            .write_all(b"Content-Type: auth/request\n\nContent-Type: command/reply\nReply-Text: +OK accepted\n\n")
            .await
            .unwrap();

        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.content_type(), "auth/request");

        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.content_type(), "command/reply");
        assert_eq!(frame.reply_text(), "+OK accepted");

        drop(writer);
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_body_per_content_length() {
        use tokio::io::AsyncWriteExt;

        let (mut writer, reader) = socket_pair().await;
        let (read_half, _write_half) = reader.into_split();
        let mut reader = BufReader::new(read_half);

        writer
            .write_all(b"Content-Type: api/response\nContent-Length: 9\n\n+OK ready")
            .await
            .unwrap();

        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.content_type(), "api/response");
        assert_eq!(frame.body.as_deref(), Some("+OK ready"));
    }
}
