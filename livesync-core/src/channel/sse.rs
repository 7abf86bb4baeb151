//! Server-Sent Events transport
//!
//! Streams `text/event-stream` over a reqwest GET and incrementally parses
//! SSE frames (`event:`, `data:`, `id:`, `retry:` and comment keepalives)
//! from the body chunks. The connection URL carries the `channels` and
//! `token` query parameters, plus `lastEventId` when resuming.

use async_trait::async_trait;
use bytes::BytesMut;
use futures::stream::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::{ChannelMessage, MessageStream, Transport, UrlBuilder};
use crate::error::{Error, Result};

/// SSE push-channel transport.
#[derive(Debug, Clone, Default)]
pub struct SseTransport {
    client: reqwest::Client,
}

impl SseTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a shared reqwest client (connection pooling across sessions).
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&self, url: &str) -> Result<MessageStream> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "push channel open failed: HTTP {status}"
            )));
        }

        let body = Box::pin(response.bytes_stream());
        let parser = SseParser::new();
        let ready: VecDeque<ChannelMessage> = VecDeque::new();

        let stream = futures::stream::unfold(
            (body, parser, ready),
            |(mut body, mut parser, mut ready)| async move {
                loop {
                    if let Some(message) = ready.pop_front() {
                        return Some((Ok(message), (body, parser, ready)));
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => ready.extend(parser.push(&chunk)),
                        Some(Err(err)) => {
                            return Some((
                                Err(Error::Transport(err.to_string())),
                                (body, parser, ready),
                            ))
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

/// Incremental SSE frame parser. Chunk boundaries may fall anywhere,
/// including inside a UTF-8 sequence, so lines are split at the byte level.
#[derive(Debug, Default)]
struct SseParser {
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
    last_event_id: Option<String>,
}

impl SseParser {
    fn new() -> Self {
        Self::default()
    }

    /// Feed a body chunk; returns every message completed by it.
    fn push(&mut self, chunk: &[u8]) -> Vec<ChannelMessage> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(line) = self.take_line() {
            if let Some(message) = self.handle_line(&line) {
                messages.push(message);
            }
        }
        messages
    }

    fn take_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|&byte| byte == b'\n')?;
        let raw = self.buffer.split_to(newline + 1);
        let mut line = raw.as_ref().get(..newline).unwrap_or_default();
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        Some(String::from_utf8_lossy(line).into_owned())
    }

    fn handle_line(&mut self, line: &str) -> Option<ChannelMessage> {
        // Blank line dispatches the accumulated event.
        if line.is_empty() {
            return self.flush();
        }
        // Comment lines are keepalives.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => {
                // Ids containing NUL must be ignored per the SSE spec.
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            }
            "retry" => {
                // Our backoff policy governs reconnect spacing.
                if let Ok(retry_ms) = value.parse::<u64>() {
                    debug!(retry_ms, "Ignoring server-suggested retry interval");
                }
            }
            other => debug!(field = %other, "Ignoring unknown SSE field"),
        }
        None
    }

    fn flush(&mut self) -> Option<ChannelMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(ChannelMessage {
            event,
            data,
            id: self.last_event_id.clone(),
        })
    }
}

/// Push-channel URL: `channels` (opaque channel id), `token` (auth), and
/// `lastEventId` when resuming from a previous connection.
#[derive(Debug, Clone)]
pub struct PushChannelUrl {
    endpoint: Url,
    channels: String,
    token: String,
}

impl PushChannelUrl {
    pub fn new(
        endpoint: &str,
        channels: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            channels: channels.into(),
            token: token.into(),
        })
    }

    #[must_use]
    pub fn build(&self, last_event_id: Option<&str>) -> String {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("channels", &self.channels);
            pairs.append_pair("token", &self.token);
            if let Some(id) = last_event_id {
                pairs.append_pair("lastEventId", id);
            }
        }
        url.into()
    }

    #[must_use]
    pub fn into_builder(self) -> UrlBuilder {
        Arc::new(move |last_event_id| self.build(last_event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(parser: &mut SseParser, input: &str) -> Vec<ChannelMessage> {
        parser.push(input.as_bytes())
    }

    #[test]
    fn parses_named_event_with_single_data_line() {
        let mut parser = SseParser::new();
        let messages = parse_all(
            &mut parser,
            "event: webinar:session:update\ndata: {\"status\":\"live\"}\n\n",
        );

        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].event.as_deref(),
            Some("webinar:session:update")
        );
        assert_eq!(messages[0].data, r#"{"status":"live"}"#);
        assert_eq!(messages[0].id, None);
    }

    #[test]
    fn joins_multi_line_data_with_newlines() {
        let mut parser = SseParser::new();
        let messages = parse_all(&mut parser, "data: first\ndata: second\n\n");

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event, None);
        assert_eq!(messages[0].data, "first\nsecond");
    }

    #[test]
    fn id_persists_across_subsequent_messages() {
        let mut parser = SseParser::new();
        let messages = parse_all(
            &mut parser,
            "id: 12\ndata: a\n\ndata: b\n\nid: 13\ndata: c\n\n",
        );

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].id.as_deref(), Some("12"));
        assert_eq!(messages[1].id.as_deref(), Some("12"));
        assert_eq!(messages[2].id.as_deref(), Some("13"));
    }

    #[test]
    fn comments_and_retry_lines_produce_no_messages() {
        let mut parser = SseParser::new();
        let messages = parse_all(&mut parser, ": keepalive\nretry: 3000\n\n");
        assert!(messages.is_empty());
    }

    #[test]
    fn event_name_without_data_is_not_dispatched() {
        let mut parser = SseParser::new();
        let messages = parse_all(&mut parser, "event: ghost\n\ndata: real\n\n");

        assert_eq!(messages.len(), 1);
        // The dangling event name was consumed by the empty dispatch.
        assert_eq!(messages[0].event, None);
        assert_eq!(messages[0].data, "real");
    }

    #[test]
    fn handles_chunks_split_mid_line_and_crlf() {
        let mut parser = SseParser::new();
        let mut messages = parser.push(b"data: hel");
        assert!(messages.is_empty());

        messages = parser.push(b"lo\r\n\r\n");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data, "hello");
    }

    #[test]
    fn url_carries_channels_token_and_optional_last_event_id() {
        let url = PushChannelUrl::new("https://push.example.com/v1/stream", "webinar:42", "tok")
            .expect("should parse");

        let fresh = url.build(None);
        assert_eq!(
            fresh,
            "https://push.example.com/v1/stream?channels=webinar%3A42&token=tok"
        );

        let resumed = url.build(Some("99"));
        assert_eq!(
            resumed,
            "https://push.example.com/v1/stream?channels=webinar%3A42&token=tok&lastEventId=99"
        );
    }
}
