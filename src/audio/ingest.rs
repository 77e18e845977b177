//! Utterance accumulation buffer

use super::AudioFormat;
use crate::{Error, Result};

/// One sealed span of user speech, ready for transcription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Raw PCM16LE bytes, chunks concatenated in append order
    pub audio: Vec<u8>,
    /// Sample format of `audio`
    pub format: AudioFormat,
}

impl Utterance {
    /// Duration of the sealed audio in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        let samples = (self.audio.len() / 2) as u64;
        let per_second = u64::from(self.format.sample_rate) * u64::from(self.format.channels);
        if per_second == 0 {
            return 0;
        }
        samples * 1000 / per_second
    }
}

/// Accumulates raw audio chunks for the one open utterance per connection.
///
/// At most one utterance is open at a time; callers must seal or discard
/// the open one before opening another.
#[derive(Debug)]
pub struct AudioIngestBuffer {
    format: AudioFormat,
    chunks: Option<Vec<Vec<u8>>>,
}

impl AudioIngestBuffer {
    /// Create a buffer for the given inbound format
    #[must_use]
    pub const fn new(format: AudioFormat) -> Self {
        Self {
            format,
            chunks: None,
        }
    }

    /// Open a new utterance
    ///
    /// # Errors
    ///
    /// Returns [`Error::UtteranceAlreadyOpen`] if one is already open.
    pub fn open(&mut self) -> Result<()> {
        if self.chunks.is_some() {
            return Err(Error::UtteranceAlreadyOpen);
        }
        self.chunks = Some(Vec::new());
        Ok(())
    }

    /// Append a chunk to the open utterance
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoOpenUtterance`] if no utterance is open.
    pub fn append(&mut self, chunk: &[u8]) -> Result<()> {
        match self.chunks.as_mut() {
            Some(chunks) => {
                chunks.push(chunk.to_vec());
                Ok(())
            }
            None => Err(Error::NoOpenUtterance),
        }
    }

    /// Seal the open utterance and drain its audio in append order
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoOpenUtterance`] if no utterance is open, or
    /// [`Error::EmptyUtterance`] if zero chunks were appended (the
    /// utterance stays open in that case so the caller can discard it).
    pub fn seal_and_drain(&mut self) -> Result<Utterance> {
        let Some(chunks) = self.chunks.as_mut() else {
            return Err(Error::NoOpenUtterance);
        };
        if chunks.is_empty() {
            return Err(Error::EmptyUtterance);
        }

        let chunks = std::mem::take(chunks);
        self.chunks = None;

        let audio = chunks.concat();
        tracing::debug!(
            chunks = chunks.len(),
            bytes = audio.len(),
            "utterance sealed"
        );

        Ok(Utterance {
            audio,
            format: self.format,
        })
    }

    /// Drop an open utterance without sealing it
    pub fn discard(&mut self) {
        if self.chunks.take().is_some() {
            tracing::debug!("open utterance discarded");
        }
    }

    /// Whether an utterance is currently open
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.chunks.is_some()
    }
}
