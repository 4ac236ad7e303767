//! Passthrough analyser: the render side records a mono tap of its input,
//! the control side reads it back as waveform or spectrum snapshots.

use super::{AudioProcessor, ParamValues, ProcessContext, ProcessStatus};
use crate::buffer::AudioBus;
use crate::error::{Error, Result};
use atomic_float::AtomicF32;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const MIN_FFT_SIZE: usize = 32;
pub const MAX_FFT_SIZE: usize = 2048;

/// Lock-free ring of the most recent `MAX_FFT_SIZE` input samples.
#[derive(Debug)]
pub struct AnalyserTap {
    samples: Box<[AtomicF32]>,
    /// Total samples ever written.
    written: AtomicUsize,
}

impl AnalyserTap {
    pub fn new() -> Self {
        Self {
            samples: (0..MAX_FFT_SIZE).map(|_| AtomicF32::new(0.0)).collect(),
            written: AtomicUsize::new(0),
        }
    }

    fn push(&self, start: usize, index: usize, sample: f32) {
        self.samples[(start + index) % MAX_FFT_SIZE].store(sample, Ordering::Relaxed);
    }

    /// Copy the newest `out.len()` samples, oldest first.
    fn read_latest(&self, out: &mut [f32]) -> usize {
        let written = self.written.load(Ordering::Acquire);
        let n = out.len();
        for (i, sample) in out.iter_mut().enumerate() {
            let index = (written + MAX_FFT_SIZE - n + i) % MAX_FFT_SIZE;
            *sample = self.samples[index].load(Ordering::Relaxed);
        }
        written
    }
}

impl Default for AnalyserTap {
    fn default() -> Self {
        Self::new()
    }
}

/// Render-side kernel: copies input to output and mirrors a mono mix into
/// the tap.
#[derive(Debug)]
pub struct AnalyserProcessor {
    tap: Arc<AnalyserTap>,
}

impl AnalyserProcessor {
    pub fn new(tap: Arc<AnalyserTap>) -> Self {
        Self { tap }
    }
}

impl AudioProcessor for AnalyserProcessor {
    fn process(
        &mut self,
        ctx: &ProcessContext,
        inputs: &[AudioBus],
        outputs: &mut [AudioBus],
        _params: &ParamValues<'_>,
    ) -> ProcessStatus {
        let input = &inputs[0];
        outputs[0].copy_from(input);
        let start = self.tap.written.load(Ordering::Relaxed);
        let scale = 1.0 / input.channel_count() as f32;
        for i in 0..ctx.block_size {
            let sum: f32 = input.channels().iter().map(|c| c[i]).sum();
            self.tap.push(start, i, sum * scale);
        }
        self.tap
            .written
            .store(start.wrapping_add(ctx.block_size), Ordering::Release);
        ProcessStatus::Running
    }
}

/// Control-side view of an analyser: windowed FFT with smoothing over the
/// tapped samples.
pub struct AnalyserReader {
    tap: Arc<AnalyserTap>,
    fft_size: usize,
    min_decibels: f32,
    max_decibels: f32,
    smoothing: f32,
    planner: FftPlanner<f32>,
    fft: Arc<dyn rustfft::Fft<f32>>,
    time: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    /// Tap position the current spectrum was computed at.
    analysed_at: Option<usize>,
}

impl std::fmt::Debug for AnalyserReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyserReader")
            .field("fft_size", &self.fft_size)
            .field("min_decibels", &self.min_decibels)
            .field("max_decibels", &self.max_decibels)
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

impl AnalyserReader {
    pub fn new(tap: Arc<AnalyserTap>) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(MAX_FFT_SIZE);
        Self {
            tap,
            fft_size: MAX_FFT_SIZE,
            min_decibels: -100.0,
            max_decibels: -30.0,
            smoothing: 0.8,
            planner,
            fft,
            time: vec![0.0; MAX_FFT_SIZE],
            spectrum: vec![Complex::new(0.0, 0.0); MAX_FFT_SIZE],
            smoothed: vec![0.0; MAX_FFT_SIZE / 2],
            analysed_at: None,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn set_fft_size(&mut self, size: usize) -> Result<()> {
        if !size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&size) {
            return Err(Error::Range(format!(
                "fft size {} must be a power of two in [{}, {}]",
                size, MIN_FFT_SIZE, MAX_FFT_SIZE
            )));
        }
        if size != self.fft_size {
            self.fft_size = size;
            self.fft = self.planner.plan_fft_forward(size);
            self.time.resize(size, 0.0);
            self.spectrum.resize(size, Complex::new(0.0, 0.0));
            self.smoothed = vec![0.0; size / 2];
            self.analysed_at = None;
        }
        Ok(())
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn min_decibels(&self) -> f32 {
        self.min_decibels
    }

    pub fn max_decibels(&self) -> f32 {
        self.max_decibels
    }

    /// Set the byte-scaling range. `min` must be below `max`.
    pub fn set_decibel_range(&mut self, min: f32, max: f32) -> Result<()> {
        if !(min < max) {
            return Err(Error::Range(format!(
                "min decibels {} must be below max decibels {}",
                min, max
            )));
        }
        self.min_decibels = min;
        self.max_decibels = max;
        Ok(())
    }

    pub fn smoothing_time_constant(&self) -> f32 {
        self.smoothing
    }

    pub fn set_smoothing_time_constant(&mut self, value: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::Range(format!(
                "smoothing time constant {} outside [0, 1]",
                value
            )));
        }
        self.smoothing = value;
        Ok(())
    }

    /// The newest samples as floats. Fills at most `fft_size` values.
    pub fn get_float_time_domain_data(&self, out: &mut [f32]) {
        let n = out.len().min(self.fft_size);
        let mut window = [0.0f32; MAX_FFT_SIZE];
        self.tap.read_latest(&mut window[..self.fft_size]);
        out[..n].copy_from_slice(&window[..n]);
    }

    /// The newest samples mapped to bytes, 128 meaning zero.
    pub fn get_byte_time_domain_data(&self, out: &mut [u8]) {
        let n = out.len().min(self.fft_size);
        let mut window = [0.0f32; MAX_FFT_SIZE];
        self.tap.read_latest(&mut window[..self.fft_size]);
        for (byte, &sample) in out[..n].iter_mut().zip(&window) {
            *byte = (128.0 * (sample + 1.0)).clamp(0.0, 255.0) as u8;
        }
    }

    /// Smoothed spectrum in dB, one value per bin.
    pub fn get_float_frequency_data(&mut self, out: &mut [f32]) {
        self.analyse();
        for (value, &magnitude) in out.iter_mut().zip(&self.smoothed) {
            *value = to_decibels(magnitude);
        }
    }

    /// Smoothed spectrum scaled between the decibel bounds into bytes.
    pub fn get_byte_frequency_data(&mut self, out: &mut [u8]) {
        self.analyse();
        let range = self.max_decibels - self.min_decibels;
        for (byte, &magnitude) in out.iter_mut().zip(&self.smoothed) {
            let db = to_decibels(magnitude);
            *byte = (255.0 / range * (db - self.min_decibels)).clamp(0.0, 255.0) as u8;
        }
    }

    /// Recompute the spectrum if new samples have arrived.
    fn analyse(&mut self) {
        let n = self.fft_size;
        let written = self.tap.read_latest(&mut self.time[..n]);
        if self.analysed_at == Some(written) {
            return;
        }
        self.analysed_at = Some(written);
        for (i, (bin, &sample)) in self.spectrum.iter_mut().zip(&self.time).enumerate() {
            let x = 2.0 * PI * i as f32 / n as f32;
            let w = 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos();
            *bin = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.spectrum[..n]);
        let tau = self.smoothing;
        for (smoothed, bin) in self.smoothed.iter_mut().zip(&self.spectrum) {
            let magnitude = bin.norm() / n as f32;
            let next = tau * *smoothed + (1.0 - tau) * magnitude;
            *smoothed = if next.is_finite() { next } else { 0.0 };
        }
    }
}

fn to_decibels(magnitude: f32) -> f32 {
    if magnitude > 0.0 {
        20.0 * magnitude.log10()
    } else {
        f32::NEG_INFINITY
    }
}
