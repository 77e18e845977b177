//! Audio ingest and endpointing
//!
//! Raw PCM arrives from the transport layer, accumulates in an
//! [`AudioIngestBuffer`] while the [`EndpointDetector`] decides utterance
//! boundaries. Sealed utterances are handed to the transcription stage.

mod endpoint;
mod ingest;

pub use endpoint::{EndpointConfig, EndpointDetector, EndpointEvent, EndpointState};
pub use ingest::{AudioIngestBuffer, Utterance};

use crate::{Error, Result};

/// Default sample rate for inbound speech audio (16kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Sample format metadata carried alongside utterance audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Samples per second
    pub sample_rate: u32,
    /// Channel count (inbound speech is mono)
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// Decode little-endian PCM16 bytes into samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm16_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Wrap raw PCM16 bytes in a WAV container for STT upload
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn pcm_to_wav(pcm: &[u8], format: AudioFormat) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for sample in pcm16_samples(pcm) {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
