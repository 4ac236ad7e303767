//! Asynchronous decoding of encoded audio into an [`AudioBuffer`].
//!
//! Container and codec support is a collaborator behind [`AudioDecoder`];
//! the built-in [`WavDecoder`] reads RIFF/WAVE through `hound`. Decoding runs
//! on its own thread, never on the render path.

use crate::buffer::AudioBuffer;
use crate::error::{Error, Result};
use std::io::Cursor;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Turns encoded bytes into planar float samples.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<AudioBuffer>;
}

/// WAV decoder for integer PCM and 32-bit float files.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<AudioBuffer> {
        let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        let channels = spec.channels as usize;
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };
        if channels == 0 || interleaved.is_empty() {
            return Err(Error::Decode("no audio frames".into()));
        }
        let frames = interleaved.len() / channels;
        let mut planar = vec![Vec::with_capacity(frames); channels];
        for frame in interleaved.chunks_exact(channels) {
            for (channel, &sample) in planar.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        AudioBuffer::from_channels(planar, spec.sample_rate as f32)
    }
}

/// A decode in progress.
#[derive(Debug)]
pub struct DecodeHandle {
    handle: JoinHandle<Result<AudioBuffer>>,
}

impl DecodeHandle {
    /// Decode `bytes` with `decoder` on a background thread.
    pub fn spawn(bytes: Vec<u8>, decoder: Arc<dyn AudioDecoder>) -> Result<Self> {
        let handle = std::thread::Builder::new()
            .name("auxgraph-decode".into())
            .spawn(move || decoder.decode(&bytes))
            .map_err(|e| Error::Decode(format!("could not start decoder thread: {}", e)))?;
        Ok(Self { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until decoding completes.
    pub fn wait(self) -> Result<AudioBuffer> {
        self.handle
            .join()
            .map_err(|_| Error::Decode("decoder thread panicked".into()))?
    }
}
