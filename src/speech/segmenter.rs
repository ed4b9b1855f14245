//! Streaming reply segmentation
//!
//! [`SentenceSplitter`] is a pure fold over text fragments. [`ResponseSegmenter`]
//! drives it from a live generator stream and feeds the speech sink.

use std::sync::LazyLock;

use futures::{Stream, StreamExt};
use regex::Regex;

use super::sink::OrderedSpeechSink;
use crate::voice::VoiceParams;
use crate::{Error, Result};

/// Characters that end a sentence
const BOUNDARIES: [char; 3] = ['.', '?', '!'];

static MARKDOWN_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\[\]]*)\]\([^()]*\)").unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

/// A sentence (or the final remainder) of generated text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceSegment {
    /// Position in discovery order, starting at 0
    pub seq: u64,
    /// Raw text, uncleaned
    pub text: String,
}

/// Incremental sentence splitter
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    display: String,
    working: String,
    next_seq: u64,
}

impl SentenceSplitter {
    /// Create an empty splitter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return every sentence it completes
    pub fn push(&mut self, fragment: &str) -> Vec<SentenceSegment> {
        self.display.push_str(fragment);
        self.working.push_str(fragment);

        let mut segments = Vec::new();
        while let Some(end) = self.working.find(BOUNDARIES) {
            // Boundary chars are ASCII, so end + 1 is a char boundary
            let rest = self.working.split_off(end + 1);
            let text = std::mem::replace(&mut self.working, rest);
            segments.push(self.segment(text));
        }
        segments
    }

    /// Flush the unterminated remainder and return the verbatim text
    #[must_use]
    pub fn finish(mut self) -> (Option<SentenceSegment>, String) {
        let rest = std::mem::take(&mut self.working);
        let last = (!rest.is_empty()).then(|| self.segment(rest));
        (last, self.display)
    }

    /// Verbatim text received so far
    #[must_use]
    pub fn display_text(&self) -> &str {
        &self.display
    }

    fn segment(&mut self, text: String) -> SentenceSegment {
        let seq = self.next_seq;
        self.next_seq += 1;
        SentenceSegment { seq, text }
    }
}

/// Strip display-only markup from text bound for speech
///
/// Removes `*` and `#`, collapses `[text](url)` to `text` and trims.
/// Idempotent.
#[must_use]
pub fn clean_for_speech(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let stripped: String = current.chars().filter(|c| !matches!(c, '*' | '#')).collect();
        let collapsed = MARKDOWN_LINK.replace_all(&stripped, "$1").into_owned();
        if collapsed == current {
            break;
        }
        current = collapsed;
    }
    current.trim().to_string()
}

/// Everything a reply stream produced
#[derive(Debug)]
pub struct SpokenReply {
    /// Verbatim reply text, cut short if the stream failed
    pub text: String,
    /// The error that ended the stream early, if any
    pub error: Option<Error>,
}

impl SpokenReply {
    /// The full reply text, or the stream error
    ///
    /// # Errors
    ///
    /// Returns the error that ended the stream early
    pub fn into_result(self) -> Result<String> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.text),
        }
    }
}

/// Drives a generator stream into the speech sink
pub struct ResponseSegmenter {
    sink: OrderedSpeechSink,
    voice: VoiceParams,
}

impl ResponseSegmenter {
    /// Create a segmenter speaking with `voice`
    #[must_use]
    pub const fn new(sink: OrderedSpeechSink, voice: VoiceParams) -> Self {
        Self { sink, voice }
    }

    /// Consume `stream`, speaking each sentence as soon as it completes
    ///
    /// A stream error ends the reply early; whatever arrived before it is
    /// still spoken, and the error is handed back alongside the text.
    pub async fn run<S>(&self, stream: S) -> SpokenReply
    where
        S: Stream<Item = Result<String>> + Send,
    {
        let mut splitter = SentenceSplitter::new();
        let mut stream = std::pin::pin!(stream);
        let mut error = None;

        while let Some(fragment) = stream.next().await {
            match fragment {
                Ok(fragment) => {
                    for segment in splitter.push(&fragment) {
                        self.emit(&segment);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "reply stream failed, flushing partial reply");
                    error = Some(e);
                    break;
                }
            }
        }

        let (last, text) = splitter.finish();
        if let Some(segment) = last {
            self.emit(&segment);
        }

        SpokenReply { text, error }
    }

    fn emit(&self, segment: &SentenceSegment) {
        let speech = clean_for_speech(&segment.text);
        if speech.is_empty() {
            tracing::trace!(seq = segment.seq, "segment empty after cleaning, skipped");
            return;
        }

        tracing::debug!(seq = segment.seq, text = %speech, "queueing sentence");
        if let Err(e) = self.sink.submit(speech, self.voice.clone()) {
            tracing::warn!(error = %e, seq = segment.seq, "speech sink unavailable");
        }
    }
}
