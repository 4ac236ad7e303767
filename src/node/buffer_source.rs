//! One-shot playback of a shared [`AudioBuffer`].

use super::{AudioProcessor, NodeCommand, ParamValues, ProcessContext, ProcessStatus, SourceSchedule};
use crate::buffer::{AudioBuffer, AudioBus};
use crate::control::Garbage;
use std::sync::Arc;

/// Loop region in seconds. An `end` of zero or less means the end of the
/// buffer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoopSettings {
    pub enabled: bool,
    pub start: f64,
    pub end: f64,
}

impl LoopSettings {
    /// `[start, end)` in frames of `buffer`.
    fn region(&self, buffer: &AudioBuffer) -> (f64, f64) {
        let sr = buffer.sample_rate() as f64;
        let length = buffer.length() as f64;
        let start = (self.start * sr).clamp(0.0, length);
        let end = if self.end > 0.0 {
            (self.end * sr).clamp(0.0, length)
        } else {
            length
        };
        (start, end)
    }
}

#[derive(Debug, Default)]
pub struct BufferSourceProcessor {
    buffer: Option<Arc<AudioBuffer>>,
    looping: LoopSettings,
    schedule: SourceSchedule,
    offset: f64,
    duration: Option<f64>,
    /// Buffer frames left to play, when a duration was given.
    remaining: Option<f64>,
    /// Read position in buffer frames.
    position: f64,
    primed: bool,
}

impl BufferSourceProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read position from the start offset, once the buffer is known.
    fn prime(&mut self, buffer: &AudioBuffer) {
        let length = buffer.length() as f64;
        let mut position = (self.offset * buffer.sample_rate() as f64).max(0.0);
        if self.looping.enabled {
            let (start, end) = self.looping.region(buffer);
            if end > start && position >= end {
                position = start + (position - end) % (end - start);
            }
        }
        self.position = position.min(length);
        self.remaining = self
            .duration
            .map(|d| d * buffer.sample_rate() as f64);
        self.primed = true;
    }

    /// Advance the read position by `step` frames, wrapping inside the loop
    /// region. Returns false when playback has run off the buffer.
    fn advance(&mut self, buffer: &AudioBuffer, step: f64) -> bool {
        self.position += step;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= step.abs();
            if *remaining < 1e-6 {
                return false;
            }
        }
        if self.looping.enabled {
            let (start, end) = self.looping.region(buffer);
            let span = end - start;
            if span <= 0.0 {
                return false;
            }
            if self.position >= end {
                self.position = start + (self.position - end) % span;
            } else if step < 0.0 && self.position < start {
                self.position = end - (start - self.position) % span;
            }
            return true;
        }
        self.position >= 0.0 && self.position < buffer.length() as f64
    }
}

impl AudioProcessor for BufferSourceProcessor {
    fn process(
        &mut self,
        ctx: &ProcessContext,
        _inputs: &[AudioBus],
        outputs: &mut [AudioBus],
        params: &ParamValues<'_>,
    ) -> ProcessStatus {
        let out = &mut outputs[0];
        let Some(buffer) = self.buffer.clone() else {
            out.reset(1);
            return if self.schedule.check_stopped(ctx.frame, ctx.block_size) {
                ProcessStatus::Ended
            } else {
                ProcessStatus::Running
            };
        };
        out.reset(buffer.number_of_channels());

        let Some((begin, end)) = self.schedule.active_range(ctx.frame, ctx.block_size) else {
            return if self.schedule.check_stopped(ctx.frame, ctx.block_size) {
                ProcessStatus::Ended
            } else {
                ProcessStatus::Running
            };
        };
        if !self.primed {
            self.prime(&buffer);
        }
        if self.looping.enabled {
            let (start, end) = self.looping.region(&buffer);
            if end <= start {
                self.schedule.finish();
                return ProcessStatus::Ended;
            }
        }

        let rate = params.first(0) as f64
            * (params.first(1) as f64 / 1200.0).exp2()
            * buffer.sample_rate() as f64
            / ctx.sample_rate as f64;

        let mut finished = false;
        for i in begin..end {
            for (ch, channel) in out.channels_mut().iter_mut().enumerate() {
                channel[i] = buffer.sample_at(ch, self.position);
            }
            if !self.advance(&buffer, rate) {
                finished = true;
                break;
            }
        }
        if finished && self.schedule.finish() {
            return ProcessStatus::Ended;
        }
        if self.schedule.check_stopped(ctx.frame, ctx.block_size) {
            return ProcessStatus::Ended;
        }
        ProcessStatus::Running
    }

    fn handle_command(&mut self, command: NodeCommand) -> Option<Garbage> {
        match command {
            NodeCommand::Start {
                frame,
                offset,
                duration,
            } => {
                self.schedule.start(frame);
                self.offset = offset;
                self.duration = duration;
            }
            NodeCommand::Stop { frame } => self.schedule.stop(frame),
            NodeCommand::Loop(settings) => self.looping = settings,
            NodeCommand::Buffer(buffer) => {
                self.primed = false;
                return self.buffer.replace(buffer).map(Garbage::Buffer);
            }
            other => return Garbage::from_command(other),
        }
        None
    }
}
