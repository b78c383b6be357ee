
use serde::Deserialize;
use std::io::BufRead;
use tracing::{debug, warn};

use crate::{RagError, Result};

/// Lazy, finite sequence of completion fragments
pub type FragmentStream = Box<dyn Iterator<Item = Result<String>>>;

const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Reads a chat completion event stream line by line and yields the content
/// deltas. Ends at `[DONE]`, at end of input, or after the first error.
pub struct SseFragments<R> {
    reader: R,
    line: String,
    finished: bool,
}

impl<R: BufRead> SseFragments<R> {
    #[inline]
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            finished: false,
        }
    }

    fn next_fragment(&mut self) -> Result<Option<String>> {
        loop {
            self.line.clear();
            let read = self.reader.read_line(&mut self.line)?;
            if read == 0 {
                warn!("Completion stream ended without a done marker");
                return Ok(None);
            }

            let Some(data) = parse_sse_line(&self.line) else {
                continue;
            };

            if data == DONE_MARKER {
                debug!("Completion stream finished");
                return Ok(None);
            }

            let chunk: ChatChunk =
                serde_json::from_str(data).map_err(|e| RagError::Service {
                    service: "chat service",
                    message: format!("Malformed stream event: {}", e),
                })?;

            let content: String = chunk
                .choices
                .into_iter()
                .filter_map(|choice| choice.delta.and_then(|delta| delta.content))
                .collect();

            // role announcements and content filter results carry no text
            if !content.is_empty() {
                return Ok(Some(content));
            }
        }
    }
}

impl<R: BufRead> Iterator for SseFragments<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.next_fragment() {
            Ok(Some(fragment)) => Some(Ok(fragment)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn parse_sse_line(line: &str) -> Option<&str> {
    line.trim_end_matches(['\r', '\n'])
        .strip_prefix("data:")
        .map(str::trim_start)
}
