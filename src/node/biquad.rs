//! Second-order IIR filter with the cookbook coefficient set.

use super::{AudioProcessor, NodeCommand, ParamValues, ProcessContext, ProcessStatus};
use crate::buffer::AudioBus;
use crate::control::Garbage;
use std::f64::consts::{PI, SQRT_2};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BiquadFilterType {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
    Lowshelf,
    Highshelf,
    Peaking,
    Notch,
    Allpass,
}

/// Normalized coefficients (`a0 == 1`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoefficients {
    /// Coefficients for the given parameter values. Frequency is in Hz
    /// before detune; `q` and `gain_db` are interpreted per filter type.
    pub fn compute(
        kind: BiquadFilterType,
        sample_rate: f32,
        frequency: f32,
        detune: f32,
        q: f32,
        gain_db: f32,
    ) -> Self {
        let nyquist = sample_rate as f64 / 2.0;
        let f = (frequency as f64 * (detune as f64 / 1200.0).exp2()).clamp(0.0, nyquist);
        let w0 = 2.0 * PI * f / sample_rate as f64;
        let (sin, cos) = w0.sin_cos();
        let q = q as f64;
        let a = 10f64.powf(gain_db as f64 / 40.0);
        // Resonance-style alpha in dB for low/high pass, bandwidth-style
        // for the rest.
        let alpha_db = sin / (2.0 * 10f64.powf(q / 20.0));
        let alpha_q = sin / (2.0 * q.max(1e-4));
        let alpha_shelf = sin / 2.0 * SQRT_2;
        let sqrt_a = a.sqrt();

        let (b0, b1, b2, a0, a1, a2) = match kind {
            BiquadFilterType::Lowpass => (
                (1.0 - cos) / 2.0,
                1.0 - cos,
                (1.0 - cos) / 2.0,
                1.0 + alpha_db,
                -2.0 * cos,
                1.0 - alpha_db,
            ),
            BiquadFilterType::Highpass => (
                (1.0 + cos) / 2.0,
                -(1.0 + cos),
                (1.0 + cos) / 2.0,
                1.0 + alpha_db,
                -2.0 * cos,
                1.0 - alpha_db,
            ),
            BiquadFilterType::Bandpass => (
                alpha_q,
                0.0,
                -alpha_q,
                1.0 + alpha_q,
                -2.0 * cos,
                1.0 - alpha_q,
            ),
            BiquadFilterType::Notch => (
                1.0,
                -2.0 * cos,
                1.0,
                1.0 + alpha_q,
                -2.0 * cos,
                1.0 - alpha_q,
            ),
            BiquadFilterType::Allpass => (
                1.0 - alpha_q,
                -2.0 * cos,
                1.0 + alpha_q,
                1.0 + alpha_q,
                -2.0 * cos,
                1.0 - alpha_q,
            ),
            BiquadFilterType::Peaking => (
                1.0 + alpha_q * a,
                -2.0 * cos,
                1.0 - alpha_q * a,
                1.0 + alpha_q / a,
                -2.0 * cos,
                1.0 - alpha_q / a,
            ),
            BiquadFilterType::Lowshelf => (
                a * ((a + 1.0) - (a - 1.0) * cos + 2.0 * sqrt_a * alpha_shelf),
                2.0 * a * ((a - 1.0) - (a + 1.0) * cos),
                a * ((a + 1.0) - (a - 1.0) * cos - 2.0 * sqrt_a * alpha_shelf),
                (a + 1.0) + (a - 1.0) * cos + 2.0 * sqrt_a * alpha_shelf,
                -2.0 * ((a - 1.0) + (a + 1.0) * cos),
                (a + 1.0) + (a - 1.0) * cos - 2.0 * sqrt_a * alpha_shelf,
            ),
            BiquadFilterType::Highshelf => (
                a * ((a + 1.0) + (a - 1.0) * cos + 2.0 * sqrt_a * alpha_shelf),
                -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
                a * ((a + 1.0) + (a - 1.0) * cos - 2.0 * sqrt_a * alpha_shelf),
                (a + 1.0) - (a - 1.0) * cos + 2.0 * sqrt_a * alpha_shelf,
                2.0 * ((a - 1.0) - (a + 1.0) * cos),
                (a + 1.0) - (a - 1.0) * cos - 2.0 * sqrt_a * alpha_shelf,
            ),
        };
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Magnitude and phase (radians) at each frequency in Hz. Frequencies
    /// outside `[0, nyquist]` yield NaN. Output slices shorter than
    /// `frequencies` are filled as far as they go.
    pub fn frequency_response(
        &self,
        sample_rate: f32,
        frequencies: &[f32],
        magnitude: &mut [f32],
        phase: &mut [f32],
    ) {
        let nyquist = sample_rate / 2.0;
        for ((&f, mag), ph) in frequencies.iter().zip(magnitude).zip(phase) {
            if !(0.0..=nyquist).contains(&f) {
                *mag = f32::NAN;
                *ph = f32::NAN;
                continue;
            }
            let w = 2.0 * PI * f as f64 / sample_rate as f64;
            // z^-1 = e^{-jw}
            let (s1, c1) = (-w).sin_cos();
            let (s2, c2) = (-2.0 * w).sin_cos();
            let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
            let num_im = self.b1 * s1 + self.b2 * s2;
            let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
            let den_im = self.a1 * s1 + self.a2 * s2;
            let den = den_re * den_re + den_im * den_im;
            let re = (num_re * den_re + num_im * den_im) / den;
            let im = (num_im * den_re - num_re * den_im) / den;
            *mag = re.hypot(im) as f32;
            *ph = im.atan2(re) as f32;
        }
    }
}

/// Render-side filter: direct-form-II state per channel.
#[derive(Debug)]
pub struct BiquadProcessor {
    kind: BiquadFilterType,
    state: Vec<[f64; 2]>,
}

impl BiquadProcessor {
    pub fn new(max_channels: usize) -> Self {
        Self {
            kind: BiquadFilterType::default(),
            state: vec![[0.0; 2]; max_channels.max(1)],
        }
    }
}

impl AudioProcessor for BiquadProcessor {
    fn process(
        &mut self,
        ctx: &ProcessContext,
        inputs: &[AudioBus],
        outputs: &mut [AudioBus],
        params: &ParamValues<'_>,
    ) -> ProcessStatus {
        let c = BiquadCoefficients::compute(
            self.kind,
            ctx.sample_rate,
            params.first(0),
            params.first(1),
            params.first(2),
            params.first(3),
        );
        let input = &inputs[0];
        let out = &mut outputs[0];
        out.set_channel_count(input.channel_count());
        for ((dst, src), state) in out
            .channels_mut()
            .iter_mut()
            .zip(input.channels())
            .zip(self.state.iter_mut())
        {
            let [mut w1, mut w2] = *state;
            for (d, &x) in dst.iter_mut().zip(src) {
                let w = x as f64 - c.a1 * w1 - c.a2 * w2;
                *d = (c.b0 * w + c.b1 * w1 + c.b2 * w2) as f32;
                w2 = w1;
                w1 = w;
            }
            // Flush denormals.
            if w1.abs() < 1e-30 {
                w1 = 0.0;
            }
            if w2.abs() < 1e-30 {
                w2 = 0.0;
            }
            *state = [w1, w2];
        }
        ProcessStatus::Running
    }

    fn handle_command(&mut self, command: NodeCommand) -> Option<Garbage> {
        match command {
            NodeCommand::FilterType(kind) => {
                self.kind = kind;
                None
            }
            other => Garbage::from_command(other),
        }
    }
}
