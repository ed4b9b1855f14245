//! Reply speech: sentence segmentation and ordered playback

mod segmenter;
mod sink;

pub use segmenter::{
    ResponseSegmenter, SentenceSegment, SentenceSplitter, SpokenReply, clean_for_speech,
};
pub use sink::OrderedSpeechSink;
