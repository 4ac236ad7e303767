//! Sample storage: the shared [`AudioBuffer`] memory asset and the
//! per-block [`AudioBus`] passed between ports during a render pass.

use crate::config::{MAX_CHANNELS, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
use crate::error::{Error, Result};
use crate::node::ChannelInterpretation;

/// Planar multi-channel sample storage.
///
/// Mutable while owned by the host. Once wrapped in an `Arc` and handed to a
/// buffer source it is shared read-only; the last holder frees it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: f32,
    length: usize,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Create a zero-filled buffer.
    pub fn new(number_of_channels: usize, length: usize, sample_rate: f32) -> Result<Self> {
        if number_of_channels == 0 || number_of_channels > MAX_CHANNELS {
            return Err(Error::NotSupported(format!(
                "buffer channel count {} outside 1-{}",
                number_of_channels, MAX_CHANNELS
            )));
        }
        if length == 0 {
            return Err(Error::NotSupported("buffer length must be positive".into()));
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(Error::NotSupported(format!(
                "buffer sample rate {} outside {}-{} Hz",
                sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }
        Ok(Self {
            sample_rate,
            length,
            channels: vec![vec![0.0; length]; number_of_channels],
        })
    }

    /// Build a buffer from planar channel data. All channels must share one length.
    pub fn from_channels(channels: Vec<Vec<f32>>, sample_rate: f32) -> Result<Self> {
        let length = channels.first().map_or(0, Vec::len);
        let mut buffer = Self::new(channels.len(), length, sample_rate)?;
        if channels.iter().any(|c| c.len() != length) {
            return Err(Error::NotSupported(
                "buffer channels must have equal length".into(),
            ));
        }
        buffer.channels = channels;
        Ok(buffer)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Length in sample-frames.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.length as f64 / self.sample_rate as f64
    }

    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn get_channel_data(&self, channel: usize) -> Result<&[f32]> {
        self.check_channel(channel)?;
        Ok(&self.channels[channel])
    }

    pub fn get_channel_data_mut(&mut self, channel: usize) -> Result<&mut [f32]> {
        self.check_channel(channel)?;
        Ok(&mut self.channels[channel])
    }

    /// Copy samples from `channel`, starting at `start_in_channel`, into
    /// `destination`. Copies as many frames as both sides hold.
    pub fn copy_from_channel(
        &self,
        destination: &mut [f32],
        channel: usize,
        start_in_channel: usize,
    ) -> Result<()> {
        self.check_channel(channel)?;
        self.check_start(start_in_channel)?;
        let source = &self.channels[channel][start_in_channel..];
        let frames = source.len().min(destination.len());
        destination[..frames].copy_from_slice(&source[..frames]);
        Ok(())
    }

    /// Copy `source` into `channel`, starting at `start_in_channel`.
    pub fn copy_to_channel(
        &mut self,
        source: &[f32],
        channel: usize,
        start_in_channel: usize,
    ) -> Result<()> {
        self.check_channel(channel)?;
        self.check_start(start_in_channel)?;
        let destination = &mut self.channels[channel][start_in_channel..];
        let frames = source.len().min(destination.len());
        destination[..frames].copy_from_slice(&source[..frames]);
        Ok(())
    }

    /// Linearly interpolated read; `position` in frames, clamped to the buffer.
    pub(crate) fn sample_at(&self, channel: usize, position: f64) -> f32 {
        let data = &self.channels[channel];
        if position <= 0.0 {
            return data[0];
        }
        let index = position.floor() as usize;
        if index + 1 >= self.length {
            return data[self.length - 1];
        }
        let frac = (position - index as f64) as f32;
        data[index] + (data[index + 1] - data[index]) * frac
    }

    fn check_channel(&self, channel: usize) -> Result<()> {
        if channel >= self.channels.len() {
            return Err(Error::IndexSize(format!(
                "channel {} out of range ({} channels)",
                channel,
                self.channels.len()
            )));
        }
        Ok(())
    }

    // Starting exactly at `length` is a valid zero-frame copy.
    fn check_start(&self, start_in_channel: usize) -> Result<()> {
        if start_in_channel > self.length {
            return Err(Error::IndexSize(format!(
                "start {} beyond buffer length {}",
                start_in_channel, self.length
            )));
        }
        Ok(())
    }
}

/// One block of multi-channel audio, pre-allocated to a fixed channel
/// capacity so channel-count changes never allocate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBus {
    channels: Vec<Vec<f32>>,
    count: usize,
}

impl AudioBus {
    /// A silent mono bus with room for `max_channels`.
    pub fn new(max_channels: usize, frames: usize) -> Self {
        Self {
            channels: vec![vec![0.0; frames]; max_channels.max(1)],
            count: 1,
        }
    }

    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn channel_count(&self) -> usize {
        self.count
    }

    pub fn max_channels(&self) -> usize {
        self.channels.len()
    }

    /// Change the active channel count, clamped to capacity. Contents of
    /// newly exposed channels are unspecified until written.
    pub fn set_channel_count(&mut self, count: usize) {
        self.count = count.clamp(1, self.channels.len());
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index]
    }

    /// The active channels.
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels[..self.count]
    }

    pub fn channels_mut(&mut self) -> &mut [Vec<f32>] {
        &mut self.channels[..self.count]
    }

    /// Zero the active channels.
    pub fn silence(&mut self) {
        for channel in &mut self.channels[..self.count] {
            channel.fill(0.0);
        }
    }

    /// Set the channel count and zero it.
    pub fn reset(&mut self, count: usize) {
        self.set_channel_count(count);
        self.silence();
    }

    /// True if every active sample is zero.
    pub fn is_silent(&self) -> bool {
        self.channels().iter().all(|c| c.iter().all(|&s| s == 0.0))
    }

    /// Exact copy of `other`'s active channels and count.
    pub fn copy_from(&mut self, other: &AudioBus) {
        self.set_channel_count(other.count);
        for (dst, src) in self.channels.iter_mut().zip(other.channels()) {
            dst.copy_from_slice(src);
        }
    }

    /// Sum `source` into this bus, up- or down-mixing to this bus's channel
    /// count.
    pub fn sum_from(&mut self, source: &AudioBus, interpretation: ChannelInterpretation) {
        let src_count = source.count;
        let dst_count = self.count;
        if interpretation == ChannelInterpretation::Speakers && src_count != dst_count {
            if src_count == 1 {
                // Mono up-mix feeds left and right.
                for dst in &mut self.channels[..dst_count.min(2)] {
                    add_into(dst, &source.channels[0]);
                }
                return;
            }
            if dst_count == 1 {
                let scale = 1.0 / src_count as f32;
                let dst = &mut self.channels[0];
                for src in source.channels() {
                    for (d, &s) in dst.iter_mut().zip(src) {
                        *d += s * scale;
                    }
                }
                return;
            }
        }
        for (dst, src) in self.channels[..dst_count]
            .iter_mut()
            .zip(source.channels())
        {
            add_into(dst, src);
        }
    }

    /// Down-mix the active channels to mono into `out`.
    pub fn mix_to_mono(&self, out: &mut [f32]) {
        out.copy_from_slice(&self.channels[0][..out.len()]);
        if self.count == 1 {
            return;
        }
        for src in &self.channels[1..self.count] {
            add_into(out, src);
        }
        let scale = 1.0 / self.count as f32;
        for s in out.iter_mut() {
            *s *= scale;
        }
    }
}

fn add_into(dst: &mut [f32], src: &[f32]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}
