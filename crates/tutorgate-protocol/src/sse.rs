use bytes::Bytes;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Network chunks can end in the middle of a line or of a multi-byte UTF-8
/// sequence, so raw bytes are buffered until a full line is available.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        self.push_slice(chunk)
    }

    pub fn push_slice(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let mut line = &self.pending[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let line = String::from_utf8_lossy(line).into_owned();
            start = end + 1;
            if let Some(event) = self.take_line(&line) {
                events.push(event);
            }
        }
        self.pending.drain(..start);

        events
    }

    /// Flush whatever is buffered once the byte stream has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r').to_string();
            if let Some(event) = self.take_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn take_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => {
                self.event = (!value.is_empty()).then(|| value.to_string());
            }
            "data" => self.data_lines.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data_lines.is_empty() {
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(SseEvent {
            event: self.event.take(),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_split_across_chunks_are_reassembled() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push_slice(b"data: {\"a\":").is_empty());
        let events = decoder.push_slice(b"1}\r\n\r\ndata: two\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: None,
                    data: "{\"a\":1}".to_string()
                },
                SseEvent {
                    event: None,
                    data: "two".to_string()
                },
            ]
        );
    }

    #[test]
    fn multibyte_text_split_mid_character_is_not_lost() {
        let payload = "data: 句話。\n\n".as_bytes();
        // Cut inside the first three-byte character.
        let (head, tail) = payload.split_at(7);
        let mut decoder = SseDecoder::new();
        assert!(decoder.push_slice(head).is_empty());
        let events = decoder.push_slice(tail);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "句話。");
    }

    #[test]
    fn comments_are_ignored_and_multiline_data_is_joined() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push_slice(b": keep-alive\nevent: error\ndata: a\ndata: b\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("error"));
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn finish_flushes_an_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push_slice(b"data: tail").is_empty());
        let event = decoder.finish().expect("trailing event");
        assert_eq!(event.data, "tail");
        assert!(decoder.finish().is_none());
    }
}
