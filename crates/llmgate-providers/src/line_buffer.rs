/// Buffers raw byte chunks from a streaming HTTP body into complete lines.
///
/// Network reads split on arbitrary byte boundaries, not line boundaries;
/// upstream SSE/JSONL framing is line-oriented, so every adapter needs this
/// before it can apply its own parsing.
#[derive(Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds newly-received bytes and returns every complete line found so
    /// far (without the trailing `\n`). Incomplete trailing data is held
    /// for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line = self.pending[..pos].trim_end_matches('\r').to_string();
            self.pending.drain(..=pos);
            lines.push(line);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_a_line_split_across_two_feeds() {
        let mut buf = LineBuffer::new();
        assert!(buf.feed(b"data: hel").is_empty());
        let lines = buf.feed(b"lo\n");
        assert_eq!(lines, vec!["data: hello".to_string()]);
    }

    #[test]
    fn strips_carriage_returns() {
        let mut buf = LineBuffer::new();
        let lines = buf.feed(b"data: hi\r\n");
        assert_eq!(lines, vec!["data: hi".to_string()]);
    }
}
