use serde_json::Value;

use crate::events::CodexStreamEvent;

const DONE_SENTINEL: &str = "[DONE]";

/// Incremental decoder for `event:`/`data:` blocks separated by blank lines.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across chunks decode correctly. Blocks whose data is not
/// JSON, or that fail event validation, are logged and counted in
/// [`SseStreamParser::skipped`].
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: Vec<u8>,
    event_name: Option<String>,
    data: Option<String>,
    skipped: usize,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<CodexStreamEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            self.process_line(&line, &mut events);
        }

        events
    }

    /// Flushes a block left open when the stream ends without a blank line.
    pub fn finish(&mut self) -> Vec<CodexStreamEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r').to_owned();
            self.process_line(&line, &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<CodexStreamEvent> {
        let mut parser = Self::default();
        let mut events = parser.feed(input.as_bytes());
        events.extend(parser.finish());
        events
    }

    /// Number of blocks dropped because they failed to decode.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace) && self.data.is_none()
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<CodexStreamEvent>) {
        if line.trim().is_empty() {
            self.dispatch(events);
            return;
        }

        let Some((field, value)) = line.split_once(':') else {
            return;
        };
        let value = value.trim();
        match field {
            "event" => self.event_name = Some(value.to_owned()),
            "data" => match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_owned()),
            },
            _ => {}
        }
    }

    fn dispatch(&mut self, events: &mut Vec<CodexStreamEvent>) {
        let event_name = self.event_name.take();
        let Some(data) = self.data.take() else {
            return;
        };
        if data == DONE_SENTINEL {
            return;
        }

        let decoded = serde_json::from_str::<Value>(&data)
            .map_err(|error| format!("invalid JSON: {error}"))
            .and_then(CodexStreamEvent::from_value);
        match decoded {
            Ok(event) => events.push(event),
            Err(error) => {
                self.skipped += 1;
                tracing::warn!(
                    event = event_name.as_deref().unwrap_or(""),
                    %error,
                    "skipping malformed SSE block"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SseStreamParser;
    use crate::events::CodexStreamEvent;

    #[test]
    fn parse_sse_frames_incrementally() {
        let mut parser = SseStreamParser::default();
        let mut events = Vec::new();

        events.extend(parser.feed(b"event: response.in_progress\ndata: {\"type\":\"response.in_"));
        assert!(events.is_empty());
        events.extend(parser.feed(b"progress\",\"sequence_number\":1}\n\n"));
        assert_eq!(events, vec![CodexStreamEvent::ResponseInProgress { sequence_number: 1 }]);

        events.extend(parser.feed(b"data: [DONE]\n\n"));
        assert_eq!(events.len(), 1);
        assert!(parser.is_empty_buffer());
        assert_eq!(parser.skipped(), 0);
    }

    #[test]
    fn multi_line_data_is_joined_with_newlines() {
        let events = SseStreamParser::parse_frames(
            "data: {\"type\":\"response.in_progress\",\ndata: \"sequence_number\":4}\n\n",
        );
        assert_eq!(events, vec![CodexStreamEvent::ResponseInProgress { sequence_number: 4 }]);
    }
}
