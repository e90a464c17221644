//! Server-sent event framing for the watch stream.
//!
//! The server writes one `data:` frame per event and a `:keepalive` comment
//! frame while idle. Frames end with a blank line. The decoder is fed raw
//! bytes as they arrive and yields one result per completed frame; comment
//! frames and frames without data produce nothing.

use crate::error::FrameError;
use crate::event::WatchEvent;

/// Comment text sent as a keepalive.
pub const KEEPALIVE: &str = "keepalive";

/// Encode an event as a complete `data:` frame.
pub fn encode_event(event: &WatchEvent) -> Result<String, FrameError> {
    let json = serde_json::to_string(event)?;
    Ok(format!("data: {json}\n\n"))
}

/// A complete keepalive frame.
pub fn encode_keepalive() -> String {
    format!(":{KEEPALIVE}\n\n")
}

/// Incremental decoder for the watch stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes of the current, not yet terminated line.
    partial: Vec<u8>,
    /// `data:` lines of the current frame.
    data: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<WatchEvent, FrameError>> {
        let mut out = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];

            let line = std::mem::take(&mut self.partial);
            let line = String::from_utf8_lossy(&line);
            if let Some(result) = self.push_line(&line) {
                out.push(result);
            }
        }
        self.partial.extend_from_slice(rest);

        out
    }

    /// Feed one line without its terminator.
    pub fn push_line(&mut self, line: &str) -> Option<Result<WatchEvent, FrameError>> {
        let line = line.strip_suffix('\r').unwrap_or(line);

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
        // `event`, `id` and `retry` are valid SSE fields but carry nothing we route on.
        if field == "data" {
            self.data.push(value.to_string());
        }

        None
    }

    /// Flush a frame left unterminated when the stream ended.
    pub fn finish(&mut self) -> Option<Result<WatchEvent, FrameError>> {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            let line = String::from_utf8_lossy(&line).into_owned();
            self.push_line(&line);
        }
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<Result<WatchEvent, FrameError>> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        Some(serde_json::from_str(&payload).map_err(FrameError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::types::{Pod, PodSpec};
    use proptest::prelude::*;

    fn event(node: &str) -> WatchEvent {
        WatchEvent::pod(EventKind::Add, Pod::new(node, PodSpec::default()))
    }

    #[test]
    fn test_decodes_single_frame() {
        let ev = event("node-1");
        let frame = encode_event(&ev).unwrap();
        let mut decoder = FrameDecoder::new();

        let out = decoder.push(frame.as_bytes());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), &ev);
    }

    #[test]
    fn test_keepalive_yields_nothing() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(encode_keepalive().as_bytes()).is_empty());
        assert!(decoder.push(b": keepalive\n\n").is_empty());
        assert!(decoder.push(b"\n\n\n").is_empty());
    }

    #[test]
    fn test_malformed_frame_is_an_error_and_stream_continues() {
        let ev = event("node-1");
        let mut input = b"data: {not json}\n\n".to_vec();
        input.extend_from_slice(encode_event(&ev).unwrap().as_bytes());

        let mut decoder = FrameDecoder::new();
        let out = decoder.push(&input);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(FrameError::InvalidPayload(_))));
        assert_eq!(out[1].as_ref().unwrap(), &ev);
    }

    #[test]
    fn test_crlf_and_other_fields() {
        let ev = event("node-2");
        let json = serde_json::to_string(&ev).unwrap();
        let input = format!("event: pod\r\nid: 7\r\ndata: {json}\r\n\r\n");

        let mut decoder = FrameDecoder::new();
        let out = decoder.push(input.as_bytes());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), &ev);
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let ev = event("node-3");
        let pretty = serde_json::to_string_pretty(&ev).unwrap();
        let mut input = String::new();
        for line in pretty.lines() {
            input.push_str("data: ");
            input.push_str(line);
            input.push('\n');
        }
        input.push('\n');

        let out = FrameDecoder::new().push(input.as_bytes());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), &ev);
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let ev = event("node-4");
        let json = serde_json::to_string(&ev).unwrap();
        let mut decoder = FrameDecoder::new();

        assert!(decoder.push(format!("data: {json}").as_bytes()).is_empty());
        let last = decoder.finish().unwrap();
        assert_eq!(last.unwrap(), ev);
        assert!(decoder.finish().is_none());
    }

    proptest! {
        #[test]
        fn chunk_boundaries_do_not_change_output(split in 1usize..64) {
            let events = vec![event("a"), event("b"), event("c")];
            let mut input = String::new();
            for ev in &events {
                input.push_str(&encode_keepalive());
                input.push_str(&encode_event(ev).unwrap());
            }

            let mut decoder = FrameDecoder::new();
            let mut decoded = Vec::new();
            for chunk in input.as_bytes().chunks(split) {
                decoded.extend(decoder.push(chunk).into_iter().map(|r| r.unwrap()));
            }
            prop_assert_eq!(decoded, events);
        }
    }
}
