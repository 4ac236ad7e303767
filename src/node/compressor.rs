//! Feed-forward dynamics compressor with a soft knee.
//!
//! The detector takes the peak across channels, the gain computer maps it
//! through the threshold/knee/ratio curve, and a one-pole envelope follower
//! smooths the resulting reduction with separate attack and release times.
//! The smoothed reduction, in dB, is published for metering.

use super::{AudioProcessor, ParamValues, ProcessContext, ProcessStatus};
use crate::buffer::AudioBus;
use atomic_float::AtomicF32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const FLOOR_DB: f32 = -120.0;

/// Static curve: gain change in dB (zero or negative) for an input level.
pub fn gain_reduction_db(level_db: f32, threshold: f32, knee: f32, ratio: f32) -> f32 {
    let over = level_db - threshold;
    let slope = 1.0 / ratio - 1.0;
    if 2.0 * over < -knee {
        0.0
    } else if knee > 0.0 && 2.0 * over.abs() <= knee {
        let x = over + knee / 2.0;
        slope * x * x / (2.0 * knee)
    } else {
        slope * over
    }
}

fn smoothing_coefficient(seconds: f32, sample_rate: f32) -> f32 {
    if seconds <= 0.0 {
        0.0
    } else {
        (-1.0 / (seconds * sample_rate)).exp()
    }
}

#[derive(Debug)]
pub struct CompressorProcessor {
    envelope: f32,
    reduction: Arc<AtomicF32>,
}

impl CompressorProcessor {
    pub fn new(reduction: Arc<AtomicF32>) -> Self {
        Self {
            envelope: 0.0,
            reduction,
        }
    }
}

impl AudioProcessor for CompressorProcessor {
    fn process(
        &mut self,
        ctx: &ProcessContext,
        inputs: &[AudioBus],
        outputs: &mut [AudioBus],
        params: &ParamValues<'_>,
    ) -> ProcessStatus {
        let threshold = params.first(0);
        let knee = params.first(1);
        let ratio = params.first(2).max(1.0);
        let attack = smoothing_coefficient(params.first(3), ctx.sample_rate);
        let release = smoothing_coefficient(params.first(4), ctx.sample_rate);

        let input = &inputs[0];
        let out = &mut outputs[0];
        let channels = input.channel_count();
        out.set_channel_count(channels);
        for i in 0..ctx.block_size {
            let peak = input
                .channels()
                .iter()
                .fold(0.0f32, |m, c| m.max(c[i].abs()));
            let level = if peak > 0.0 {
                (20.0 * peak.log10()).max(FLOOR_DB)
            } else {
                FLOOR_DB
            };
            let target = gain_reduction_db(level, threshold, knee, ratio);
            let coef = if target < self.envelope { attack } else { release };
            self.envelope = target + coef * (self.envelope - target);
            let gain = 10f32.powf(self.envelope / 20.0);
            for ch in 0..channels {
                out.channel_mut(ch)[i] = input.channel(ch)[i] * gain;
            }
        }
        self.reduction.store(self.envelope, Ordering::Relaxed);
        ProcessStatus::Running
    }
}
