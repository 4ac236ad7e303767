//! Context configuration.

use crate::error::{Error, Result};

/// Frames per render block unless configured otherwise.
pub const RENDER_QUANTUM_FRAMES: usize = 128;

/// Upper bound on channels per bus, buffer or merger/splitter fan.
pub const MAX_CHANNELS: usize = 32;

/// Lowest supported sample rate.
pub const MIN_SAMPLE_RATE: f32 = 3000.0;

/// Highest supported sample rate.
pub const MAX_SAMPLE_RATE: f32 = 384_000.0;

/// Configuration for a [`Context`](crate::context::Context).
#[derive(Debug, Clone, PartialEq)]
pub struct ContextOptions {
    /// Sample rate in Hz, fixed for the lifetime of the context.
    pub sample_rate: f32,
    /// Frames rendered per block.
    pub block_size: usize,
    /// Channel count delivered by the destination.
    pub output_channels: usize,
    /// Channels pre-allocated per bus.
    pub max_channels: usize,
    /// Node slots pre-allocated on the render side.
    pub max_nodes: usize,
    /// Capacity of the control → render queue.
    pub control_queue_capacity: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            block_size: RENDER_QUANTUM_FRAMES,
            output_channels: 2,
            max_channels: 8,
            max_nodes: 1024,
            control_queue_capacity: 4096,
        }
    }
}

impl ContextOptions {
    /// Options with the given sample rate and defaults elsewhere.
    pub fn with_sample_rate(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            ..Self::default()
        }
    }

    /// Builder-style setter for the destination channel count.
    pub fn output_channels(mut self, channels: usize) -> Self {
        self.output_channels = channels;
        self
    }

    /// Builder-style setter for the block size.
    pub fn block_size(mut self, frames: usize) -> Self {
        self.block_size = frames;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} out of range ({}-{} Hz)",
                self.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }
        if self.block_size == 0 || self.block_size > 4096 {
            return Err(Error::InvalidConfig(format!(
                "block_size {} out of range (1-4096 frames)",
                self.block_size
            )));
        }
        if self.max_channels == 0 || self.max_channels > MAX_CHANNELS {
            return Err(Error::InvalidConfig(format!(
                "max_channels {} out of range (1-{})",
                self.max_channels, MAX_CHANNELS
            )));
        }
        if self.output_channels == 0 || self.output_channels > self.max_channels {
            return Err(Error::InvalidConfig(format!(
                "output_channels {} out of range (1-{})",
                self.output_channels, self.max_channels
            )));
        }
        if self.max_nodes == 0 {
            return Err(Error::InvalidConfig("max_nodes must be positive".into()));
        }
        if self.control_queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "control_queue_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Duration of one block in seconds.
    pub fn block_duration(&self) -> f64 {
        self.block_size as f64 / self.sample_rate as f64
    }
}
