//! Periodic oscillator with a continuous phase accumulator.

use super::{AudioProcessor, NodeCommand, ParamValues, ProcessContext, ProcessStatus, SourceSchedule};
use crate::buffer::AudioBus;
use crate::control::Garbage;
use crate::error::{Error, Result};
use std::f64::consts::TAU;
use std::sync::Arc;

/// Points in a custom wave's lookup table.
pub const PERIODIC_WAVE_TABLE_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OscillatorType {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
    /// Table built from a [`PeriodicWave`]. Selected by assigning a wave.
    Custom,
}

/// One period of a waveform, defined by Fourier coefficients and sampled
/// into a lookup table.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicWave {
    table: Vec<f32>,
}

impl PeriodicWave {
    /// `real[k]` and `imag[k]` are the cosine and sine amplitudes of the
    /// k-th harmonic. Index 0 (DC) is ignored. Unless normalization is
    /// disabled the table is scaled to a peak of 1.
    pub fn new(real: &[f32], imag: &[f32], disable_normalization: bool) -> Result<Self> {
        if real.len() != imag.len() {
            return Err(Error::IndexSize(format!(
                "real and imag lengths differ ({} vs {})",
                real.len(),
                imag.len()
            )));
        }
        if real.len() < 2 {
            return Err(Error::IndexSize(
                "periodic wave needs at least 2 coefficients".into(),
            ));
        }
        let mut table = vec![0.0f32; PERIODIC_WAVE_TABLE_SIZE];
        for (i, sample) in table.iter_mut().enumerate() {
            let x = TAU * i as f64 / PERIODIC_WAVE_TABLE_SIZE as f64;
            let mut acc = 0.0f64;
            for k in 1..real.len() {
                let kx = k as f64 * x;
                acc += real[k] as f64 * kx.cos() + imag[k] as f64 * kx.sin();
            }
            *sample = acc as f32;
        }
        if !disable_normalization {
            let peak = table.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            if peak > 0.0 {
                for sample in &mut table {
                    *sample /= peak;
                }
            }
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &[f32] {
        &self.table
    }

    /// Linearly interpolated lookup; `phase` in cycles, `[0, 1)`.
    fn sample(&self, phase: f64) -> f32 {
        let position = phase * PERIODIC_WAVE_TABLE_SIZE as f64;
        let index = position.floor() as usize % PERIODIC_WAVE_TABLE_SIZE;
        let next = (index + 1) % PERIODIC_WAVE_TABLE_SIZE;
        let frac = (position - position.floor()) as f32;
        self.table[index] + (self.table[next] - self.table[index]) * frac
    }
}

/// Render-side oscillator kernel.
#[derive(Debug, Default)]
pub struct OscillatorProcessor {
    kind: OscillatorType,
    wave: Option<Arc<PeriodicWave>>,
    /// Phase in cycles.
    phase: f64,
    schedule: SourceSchedule,
}

impl OscillatorProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn waveform(&self, phase: f64) -> f32 {
        match self.kind {
            OscillatorType::Sine => (TAU * phase).sin() as f32,
            OscillatorType::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            OscillatorType::Sawtooth => (2.0 * (phase + 0.5).fract() - 1.0) as f32,
            OscillatorType::Triangle => {
                (4.0 * ((phase - 0.25).rem_euclid(1.0) - 0.5).abs() - 1.0) as f32
            }
            OscillatorType::Custom => self.wave.as_ref().map_or(0.0, |w| w.sample(phase)),
        }
    }
}

impl AudioProcessor for OscillatorProcessor {
    fn process(
        &mut self,
        ctx: &ProcessContext,
        _inputs: &[AudioBus],
        outputs: &mut [AudioBus],
        params: &ParamValues<'_>,
    ) -> ProcessStatus {
        let out = &mut outputs[0];
        out.reset(1);
        if let Some((begin, end)) = self.schedule.active_range(ctx.frame, ctx.block_size) {
            let frequency = params.get(0);
            let detune = params.get(1);
            let sr = ctx.sample_rate as f64;
            for i in begin..end {
                let sample = self.waveform(self.phase);
                out.channel_mut(0)[i] = sample;
                let f = frequency[i] as f64 * (detune[i] as f64 / 1200.0).exp2();
                self.phase = (self.phase + f / sr).rem_euclid(1.0);
            }
        }
        if self.schedule.check_stopped(ctx.frame, ctx.block_size) {
            return ProcessStatus::Ended;
        }
        ProcessStatus::Running
    }

    fn handle_command(&mut self, command: NodeCommand) -> Option<Garbage> {
        match command {
            NodeCommand::Start { frame, .. } => self.schedule.start(frame),
            NodeCommand::Stop { frame } => self.schedule.stop(frame),
            NodeCommand::OscillatorType(kind) => {
                self.kind = kind;
                if kind != OscillatorType::Custom {
                    return self.wave.take().map(Garbage::Wave);
                }
            }
            NodeCommand::PeriodicWave(wave) => {
                self.kind = OscillatorType::Custom;
                return self.wave.replace(wave).map(Garbage::Wave);
            }
            other => return Garbage::from_command(other),
        }
        None
    }
}
