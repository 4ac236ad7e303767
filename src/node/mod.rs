//! Processing nodes: the uniform kernel contract and the built-in node types.
//!
//! The control side describes a node with a [`NodeKind`]; the render side
//! owns a boxed [`AudioProcessor`] that does the work. Every processor sees
//! the same inputs: mixed input buses, automation-resolved parameter values
//! for the block, and the block's position on the render timeline.

#![forbid(unsafe_code)]

pub mod analyser;
pub mod biquad;
pub mod buffer_source;
pub mod channels;
pub mod compressor;
pub mod delay;
pub mod gain;
pub mod oscillator;
pub mod wave_shaper;

use crate::buffer::{AudioBuffer, AudioBus};
use crate::control::Garbage;
use crate::error::{Error, Result};
use crate::param::{AutomationRate, ParamDescriptor};
use std::sync::Arc;

use self::biquad::BiquadFilterType;
use self::buffer_source::LoopSettings;
use self::oscillator::{OscillatorType, PeriodicWave};

/// How a node computes the channel count of each input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCountMode {
    /// The largest channel count among connected sources.
    Max,
    /// Like `Max`, but no more than the configured count.
    ClampedMax,
    /// Exactly the configured count.
    Explicit,
}

/// How differing channel counts are mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelInterpretation {
    /// Mono is spread to left/right and multi-channel is averaged to mono.
    Speakers,
    /// Channel `i` feeds channel `i`; extras are dropped, missing are silent.
    Discrete,
}

/// Channel mixing policy of a node's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub count: usize,
    pub mode: ChannelCountMode,
    pub interpretation: ChannelInterpretation,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            count: 2,
            mode: ChannelCountMode::Max,
            interpretation: ChannelInterpretation::Speakers,
        }
    }
}

impl ChannelConfig {
    pub const fn explicit(count: usize, interpretation: ChannelInterpretation) -> Self {
        Self {
            count,
            mode: ChannelCountMode::Explicit,
            interpretation,
        }
    }

    /// Channel count of an input whose widest source has `widest` channels
    /// (`None` when nothing is connected).
    pub fn computed_count(&self, widest: Option<usize>, capacity: usize) -> usize {
        let count = match (self.mode, widest) {
            (ChannelCountMode::Explicit, _) => self.count,
            (ChannelCountMode::Max, Some(w)) => w,
            (ChannelCountMode::ClampedMax, Some(w)) => w.min(self.count),
            (_, None) => 1,
        };
        count.clamp(1, capacity)
    }
}

/// The node types the engine can build.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// The context's single sink.
    Destination,
    Oscillator,
    BufferSource,
    Gain,
    Delay {
        /// Longest delay in seconds the ring buffer holds.
        max_delay_time: f64,
    },
    BiquadFilter,
    DynamicsCompressor,
    Analyser,
    ChannelMerger {
        inputs: usize,
    },
    ChannelSplitter {
        outputs: usize,
    },
    WaveShaper,
    /// A host-supplied kernel.
    Custom {
        name: &'static str,
        inputs: usize,
        outputs: usize,
    },
}

const NO_PARAMS: &[ParamDescriptor] = &[];

pub(crate) const OSCILLATOR_PARAMS: &[ParamDescriptor] = &[
    ParamDescriptor::new("frequency", 440.0, -1.0e5, 1.0e5, AutomationRate::ARate),
    ParamDescriptor::new("detune", 0.0, -153_600.0, 153_600.0, AutomationRate::ARate),
];

pub(crate) const BUFFER_SOURCE_PARAMS: &[ParamDescriptor] = &[
    ParamDescriptor::new("playback_rate", 1.0, -1.0e5, 1.0e5, AutomationRate::KRate),
    ParamDescriptor::new("detune", 0.0, -153_600.0, 153_600.0, AutomationRate::KRate),
];

pub(crate) const GAIN_PARAMS: &[ParamDescriptor] = &[ParamDescriptor::new(
    "gain",
    1.0,
    f32::MIN,
    f32::MAX,
    AutomationRate::ARate,
)];

pub(crate) const DELAY_PARAMS: &[ParamDescriptor] = &[ParamDescriptor::new(
    "delay_time",
    0.0,
    0.0,
    delay::MAX_DELAY_TIME as f32,
    AutomationRate::ARate,
)];

pub(crate) const BIQUAD_PARAMS: &[ParamDescriptor] = &[
    ParamDescriptor::new("frequency", 350.0, 0.0, 192_000.0, AutomationRate::KRate),
    ParamDescriptor::new("detune", 0.0, -153_600.0, 153_600.0, AutomationRate::KRate),
    ParamDescriptor::new("Q", 1.0, f32::MIN, f32::MAX, AutomationRate::KRate),
    ParamDescriptor::new("gain", 0.0, f32::MIN, 1541.0, AutomationRate::KRate),
];

pub(crate) const COMPRESSOR_PARAMS: &[ParamDescriptor] = &[
    ParamDescriptor::new("threshold", -24.0, -100.0, 0.0, AutomationRate::KRate),
    ParamDescriptor::new("knee", 30.0, 0.0, 40.0, AutomationRate::KRate),
    ParamDescriptor::new("ratio", 12.0, 1.0, 20.0, AutomationRate::KRate),
    ParamDescriptor::new("attack", 0.003, 0.0, 1.0, AutomationRate::KRate),
    ParamDescriptor::new("release", 0.25, 0.0, 1.0, AutomationRate::KRate),
];

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Destination => "Destination",
            NodeKind::Oscillator => "Oscillator",
            NodeKind::BufferSource => "BufferSource",
            NodeKind::Gain => "Gain",
            NodeKind::Delay { .. } => "Delay",
            NodeKind::BiquadFilter => "BiquadFilter",
            NodeKind::DynamicsCompressor => "DynamicsCompressor",
            NodeKind::Analyser => "Analyser",
            NodeKind::ChannelMerger { .. } => "ChannelMerger",
            NodeKind::ChannelSplitter { .. } => "ChannelSplitter",
            NodeKind::WaveShaper => "WaveShaper",
            NodeKind::Custom { name, .. } => name,
        }
    }

    pub fn number_of_inputs(&self) -> usize {
        match self {
            NodeKind::Oscillator | NodeKind::BufferSource => 0,
            NodeKind::ChannelMerger { inputs } => *inputs,
            NodeKind::Custom { inputs, .. } => *inputs,
            _ => 1,
        }
    }

    pub fn number_of_outputs(&self) -> usize {
        match self {
            NodeKind::Destination => 0,
            NodeKind::ChannelSplitter { outputs } => *outputs,
            NodeKind::Custom { outputs, .. } => *outputs,
            _ => 1,
        }
    }

    /// The automatable parameters, in index order.
    pub fn params(&self) -> &'static [ParamDescriptor] {
        match self {
            NodeKind::Oscillator => OSCILLATOR_PARAMS,
            NodeKind::BufferSource => BUFFER_SOURCE_PARAMS,
            NodeKind::Gain => GAIN_PARAMS,
            NodeKind::Delay { .. } => DELAY_PARAMS,
            NodeKind::BiquadFilter => BIQUAD_PARAMS,
            NodeKind::DynamicsCompressor => COMPRESSOR_PARAMS,
            _ => NO_PARAMS,
        }
    }

    /// Index of the parameter called `name`.
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params().iter().position(|p| p.name == name)
    }

    /// Whether the node can break a feedback cycle.
    pub fn introduces_delay(&self) -> bool {
        matches!(self, NodeKind::Delay { .. })
    }

    /// Whether the node is started and stopped on the timeline.
    pub fn is_scheduled_source(&self) -> bool {
        matches!(self, NodeKind::Oscillator | NodeKind::BufferSource)
    }

    pub fn default_channel_config(&self, output_channels: usize) -> ChannelConfig {
        match self {
            NodeKind::Destination => {
                ChannelConfig::explicit(output_channels, ChannelInterpretation::Speakers)
            }
            NodeKind::ChannelMerger { .. } => {
                ChannelConfig::explicit(1, ChannelInterpretation::Speakers)
            }
            NodeKind::ChannelSplitter { outputs } => {
                ChannelConfig::explicit(*outputs, ChannelInterpretation::Discrete)
            }
            NodeKind::DynamicsCompressor => ChannelConfig {
                count: 2,
                mode: ChannelCountMode::ClampedMax,
                interpretation: ChannelInterpretation::Speakers,
            },
            _ => ChannelConfig::default(),
        }
    }

    /// Check a requested channel configuration against what the node's
    /// algorithm supports.
    pub fn validate_channel_config(
        &self,
        current: &ChannelConfig,
        requested: &ChannelConfig,
        max_channels: usize,
    ) -> Result<()> {
        if requested.count == 0 || requested.count > max_channels {
            return Err(Error::NotSupported(format!(
                "channel count {} outside 1-{}",
                requested.count, max_channels
            )));
        }
        match self {
            NodeKind::Destination | NodeKind::ChannelSplitter { .. } | NodeKind::ChannelMerger { .. } => {
                if requested.mode != current.mode {
                    return Err(Error::NotSupported(format!(
                        "{} has a fixed channel count mode",
                        self.name()
                    )));
                }
                if requested.count != current.count
                    || requested.interpretation != current.interpretation
                {
                    return Err(Error::InvalidState(format!(
                        "{} has a fixed channel layout",
                        self.name()
                    )));
                }
            }
            NodeKind::DynamicsCompressor => {
                if requested.mode == ChannelCountMode::Max {
                    return Err(Error::NotSupported(
                        "DynamicsCompressor does not support max channel count mode".into(),
                    ));
                }
                if requested.count > 2 {
                    return Err(Error::NotSupported(
                        "DynamicsCompressor handles at most 2 channels".into(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Where a render block sits on the timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessContext {
    pub sample_rate: f32,
    pub block_size: usize,
    /// Index of the block's first frame since the context started.
    pub frame: u64,
    /// Set when the node sits inside a validated feedback cycle and its
    /// inputs are therefore one block stale.
    pub in_feedback_cycle: bool,
}

impl ProcessContext {
    /// Start time of the block in seconds.
    pub fn time(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    /// First frame at or after `time`.
    pub fn frame_at(&self, time: f64) -> u64 {
        frame_at(time, self.sample_rate)
    }
}

pub(crate) fn frame_at(time: f64, sample_rate: f32) -> u64 {
    let exact = time * sample_rate as f64;
    let nearest = exact.round();
    if (exact - nearest).abs() < 1e-6 {
        nearest.max(0.0) as u64
    } else {
        exact.ceil().max(0.0) as u64
    }
}

/// Automation-resolved parameter values for one block, one slice per
/// parameter in descriptor order.
#[derive(Debug, Clone, Copy)]
pub struct ParamValues<'a> {
    blocks: &'a [Vec<f32>],
}

impl<'a> ParamValues<'a> {
    pub fn new(blocks: &'a [Vec<f32>]) -> Self {
        Self { blocks }
    }

    pub fn get(&self, index: usize) -> &'a [f32] {
        &self.blocks[index]
    }

    /// The value at the block's first frame.
    pub fn first(&self, index: usize) -> f32 {
        self.blocks[index][0]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Outcome of one `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    /// The node finished during this block. Reported once.
    Ended,
}

/// Node-specific control changes, applied at the start of a block.
#[derive(Debug, Clone)]
pub enum NodeCommand {
    /// Start at `frame`, reading from `offset` seconds into the source for
    /// at most `duration` seconds.
    Start {
        frame: u64,
        offset: f64,
        duration: Option<f64>,
    },
    Stop {
        frame: u64,
    },
    OscillatorType(OscillatorType),
    PeriodicWave(Arc<PeriodicWave>),
    Buffer(Arc<AudioBuffer>),
    Loop(LoopSettings),
    FilterType(BiquadFilterType),
    Curve(Option<Arc<[f32]>>),
}

/// Object-safe processing kernel. Implement this for custom nodes.
///
/// `process` runs on the render thread: it must not allocate, lock or block.
pub trait AudioProcessor: Send {
    /// Render one block. `outputs` arrive with their previous contents;
    /// the processor sets each output's channel count and writes every
    /// active sample.
    fn process(
        &mut self,
        ctx: &ProcessContext,
        inputs: &[AudioBus],
        outputs: &mut [AudioBus],
        params: &ParamValues<'_>,
    ) -> ProcessStatus;

    /// Apply a control change. Anything the processor lets go of is handed
    /// back so it is freed off the render thread.
    fn handle_command(&mut self, command: NodeCommand) -> Option<Garbage> {
        Garbage::from_command(command)
    }
}

/// The context's sink. The renderer reads its mixed input directly.
#[derive(Debug, Default)]
pub struct DestinationProcessor;

impl AudioProcessor for DestinationProcessor {
    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _inputs: &[AudioBus],
        _outputs: &mut [AudioBus],
        _params: &ParamValues<'_>,
    ) -> ProcessStatus {
        ProcessStatus::Running
    }
}

/// Start/stop bookkeeping shared by scheduled sources.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct SourceSchedule {
    start: Option<u64>,
    stop: Option<u64>,
    ended: bool,
}

impl SourceSchedule {
    pub(crate) fn start(&mut self, frame: u64) {
        self.start = Some(frame);
    }

    pub(crate) fn stop(&mut self, frame: u64) {
        self.stop = Some(frame);
    }

    pub(crate) fn start_frame(&self) -> Option<u64> {
        self.start
    }

    /// Block-relative `[begin, end)` of frames that play in this block.
    pub(crate) fn active_range(&self, block_start: u64, len: usize) -> Option<(usize, usize)> {
        if self.ended {
            return None;
        }
        let start = self.start?;
        let block_end = block_start + len as u64;
        let begin = start.max(block_start);
        let end = self.stop.map_or(block_end, |s| s.min(block_end));
        if begin >= end {
            return None;
        }
        Some(((begin - block_start) as usize, (end - block_start) as usize))
    }

    /// Mark the source ended if its stop frame falls inside this block.
    /// Returns true the one time that happens.
    pub(crate) fn check_stopped(&mut self, block_start: u64, len: usize) -> bool {
        if self.ended || self.start.is_none() {
            return false;
        }
        let stopped = self
            .stop
            .is_some_and(|s| s <= block_start + len as u64);
        if stopped {
            self.ended = true;
        }
        stopped
    }

    /// Mark ended for reasons other than the stop time. True the first time.
    pub(crate) fn finish(&mut self) -> bool {
        !std::mem::replace(&mut self.ended, true)
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_counts_follow_kind() {
        assert_eq!(NodeKind::Oscillator.number_of_inputs(), 0);
        assert_eq!(NodeKind::Oscillator.number_of_outputs(), 1);
        assert_eq!(NodeKind::Destination.number_of_outputs(), 0);
        assert_eq!(NodeKind::ChannelMerger { inputs: 4 }.number_of_inputs(), 4);
        assert_eq!(NodeKind::ChannelSplitter { outputs: 3 }.number_of_outputs(), 3);
    }

    #[test]
    fn compressor_rejects_max_mode() {
        let kind = NodeKind::DynamicsCompressor;
        let current = kind.default_channel_config(2);
        let requested = ChannelConfig {
            mode: ChannelCountMode::Max,
            ..current
        };
        assert!(matches!(
            kind.validate_channel_config(&current, &requested, 8),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn computed_channel_count() {
        let config = ChannelConfig::default();
        assert_eq!(config.computed_count(None, 8), 1);
        assert_eq!(config.computed_count(Some(6), 8), 6);
        let clamped = ChannelConfig {
            mode: ChannelCountMode::ClampedMax,
            ..config
        };
        assert_eq!(clamped.computed_count(Some(6), 8), 2);
    }

    #[test]
    fn schedule_ranges() {
        let mut schedule = SourceSchedule::default();
        assert_eq!(schedule.active_range(0, 128), None);
        schedule.start(100);
        assert_eq!(schedule.active_range(0, 128), Some((100, 128)));
        schedule.stop(200);
        assert_eq!(schedule.active_range(128, 128), Some((0, 72)));
        assert!(schedule.check_stopped(128, 128));
        assert!(!schedule.check_stopped(256, 128));
        assert_eq!(schedule.active_range(256, 128), None);
    }

    #[test]
    fn frame_at_rounds_exact_times() {
        assert_eq!(frame_at(1.0, 48_000.0), 48_000);
        assert_eq!(frame_at(0.1, 48_000.0), 4800);
        assert_eq!(frame_at(1.5 / 48_000.0, 48_000.0), 2);
    }
}
