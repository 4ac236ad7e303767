//! Variable delay line over a pre-sized ring buffer.

use super::{AudioProcessor, ParamValues, ProcessContext, ProcessStatus};
use crate::buffer::AudioBus;
use crate::error::{Error, Result};

/// Upper bound (exclusive) for a delay node's maximum delay, in seconds.
pub const MAX_DELAY_TIME: f64 = 180.0;

/// Check a requested maximum delay time.
pub fn validate_max_delay(max_delay_time: f64) -> Result<()> {
    if !(max_delay_time > 0.0 && max_delay_time < MAX_DELAY_TIME) {
        return Err(Error::NotSupported(format!(
            "max delay time {} outside (0, {})",
            max_delay_time, MAX_DELAY_TIME
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub struct DelayProcessor {
    ring: Vec<Vec<f32>>,
    write: usize,
    /// Longest delay in frames.
    max_frames: f64,
    channels: usize,
}

impl DelayProcessor {
    /// Room for `max_delay_time` plus one block of feedback compensation.
    pub fn new(max_delay_time: f64, sample_rate: f32, block_size: usize, max_channels: usize) -> Self {
        let max_frames = (max_delay_time * sample_rate as f64).ceil();
        let len = max_frames as usize + block_size + 1;
        Self {
            ring: vec![vec![0.0; len]; max_channels.max(1)],
            write: 0,
            max_frames,
            channels: 1,
        }
    }

    fn read(ring: &[f32], write: usize, delay: f64) -> f32 {
        let len = ring.len();
        let whole = delay.floor();
        let frac = (delay - whole) as f32;
        let back = whole as usize;
        let a = ring[(write + len - back) % len];
        if frac == 0.0 {
            return a;
        }
        let b = ring[(write + len - back - 1) % len];
        a + (b - a) * frac
    }
}

impl AudioProcessor for DelayProcessor {
    fn process(
        &mut self,
        ctx: &ProcessContext,
        inputs: &[AudioBus],
        outputs: &mut [AudioBus],
        params: &ParamValues<'_>,
    ) -> ProcessStatus {
        let input = &inputs[0];
        let out = &mut outputs[0];
        self.channels = self.channels.max(input.channel_count()).min(self.ring.len());
        out.set_channel_count(self.channels);

        let sr = ctx.sample_rate as f64;
        let block = ctx.block_size as f64;
        let delay_time = params.get(0);
        let len = self.ring[0].len();
        for i in 0..ctx.block_size {
            let mut delay = (delay_time[i] as f64 * sr).clamp(0.0, self.max_frames);
            if ctx.in_feedback_cycle {
                // The stale cycle edge already contributes one block.
                delay = delay.max(block) - block;
            }
            for ch in 0..self.channels {
                let sample = if ch < input.channel_count() {
                    input.channel(ch)[i]
                } else {
                    0.0
                };
                self.ring[ch][self.write] = sample;
                out.channel_mut(ch)[i] = Self::read(&self.ring[ch], self.write, delay);
            }
            self.write = (self.write + 1) % len;
        }
        ProcessStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(delay: &mut DelayProcessor, input: &[f32], time: f32, in_cycle: bool, frame: u64) -> Vec<f32> {
        let ctx = ProcessContext {
            sample_rate: 1024.0,
            block_size: 4,
            frame,
            in_feedback_cycle: in_cycle,
        };
        let mut bus = AudioBus::new(1, 4);
        bus.channel_mut(0).copy_from_slice(input);
        let blocks = vec![vec![time; 4]];
        let mut outputs = [AudioBus::new(1, 4)];
        delay.process(&ctx, &[bus], &mut outputs, &ParamValues::new(&blocks));
        outputs[0].channel(0).to_vec()
    }

    #[test]
    fn delays_by_whole_frames() {
        let mut delay = DelayProcessor::new(1.0, 1024.0, 4, 1);
        let first = process(&mut delay, &[1.0, 2.0, 3.0, 4.0], 2.0 / 1024.0, false, 0);
        assert_eq!(first, vec![0.0, 0.0, 1.0, 2.0]);
        let second = process(&mut delay, &[0.0; 4], 2.0 / 1024.0, false, 4);
        assert_eq!(second, vec![3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn feedback_compensation_subtracts_one_block() {
        let mut delay = DelayProcessor::new(1.0, 1024.0, 4, 1);
        // 6 frames total, of which the stale edge supplies 4.
        let first = process(&mut delay, &[1.0, 2.0, 3.0, 4.0], 6.0 / 1024.0, true, 0);
        assert_eq!(first, vec![0.0, 0.0, 1.0, 2.0]);
        // Shorter than a block: the stale edge alone covers it.
        let mut delay = DelayProcessor::new(1.0, 1024.0, 4, 1);
        let out = process(&mut delay, &[1.0, 2.0, 3.0, 4.0], 1.0 / 1024.0, true, 0);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn rejects_out_of_range_max() {
        assert!(validate_max_delay(1.0).is_ok());
        assert!(matches!(validate_max_delay(0.0), Err(Error::NotSupported(_))));
        assert!(matches!(validate_max_delay(180.0), Err(Error::NotSupported(_))));
    }
}
