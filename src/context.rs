//! The control handle: node factories, routing, automation and readback.
//!
//! A [`Context`] owns the authoritative graph and parameter timelines. Every
//! edit is validated synchronously, applied locally and then published to
//! the paired [`Renderer`] as a complete snapshot that takes effect at the
//! start of the next block.

use crate::buffer::AudioBuffer;
use crate::config::{ContextOptions, MAX_CHANNELS};
use crate::control::{new_queues, ControlEnds, ControlMsg, Notification};
use crate::decode::{AudioDecoder, DecodeHandle, WavDecoder};
use crate::error::{Error, Result};
use crate::graph::{DisconnectOptions, Edge, Graph, NodeId, ParamEdge, PortId};
use crate::node::analyser::{AnalyserProcessor, AnalyserReader, AnalyserTap};
use crate::node::biquad::{BiquadCoefficients, BiquadFilterType, BiquadProcessor};
use crate::node::buffer_source::{BufferSourceProcessor, LoopSettings};
use crate::node::channels::{self, MergerProcessor, SplitterProcessor, DEFAULT_CHANNEL_PORTS};
use crate::node::compressor::CompressorProcessor;
use crate::node::delay::{self, DelayProcessor};
use crate::node::gain::GainProcessor;
use crate::node::oscillator::{OscillatorProcessor, OscillatorType, PeriodicWave};
use crate::node::wave_shaper::{self, WaveShaperProcessor};
use crate::node::{
    frame_at, AudioProcessor, ChannelConfig, DestinationProcessor, NodeCommand, NodeKind,
};
use crate::param::{AutomationRate, ParamDescriptor, ParamTimeline};
use crate::plan::Plan;
use crate::rt::{NodeSlot, Renderer};
use crate::states::{NodeExtra, NodeState};
use atomic_float::AtomicF32;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A node parameter: the owning node and the parameter's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamRef {
    pub node: NodeId,
    pub index: usize,
}

/// Ports used by [`Context::connect_with`]. Both default to 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub output: usize,
    pub input: usize,
}

/// When and what a scheduled source plays.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StartOptions {
    /// Context time in seconds; past times start immediately.
    pub when: f64,
    /// Seconds into the source material (buffer sources only).
    pub offset: f64,
    /// Seconds of material to play (buffer sources only).
    pub duration: Option<f64>,
}

macro_rules! node_handle {
    ($(#[$meta:meta])* $name:ident { $($param:ident = $index:expr),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name {
            id: NodeId,
        }

        impl $name {
            pub fn id(&self) -> NodeId {
                self.id
            }

            $(
                pub fn $param(&self) -> ParamRef {
                    ParamRef { node: self.id, index: $index }
                }
            )*
        }

        impl From<$name> for NodeId {
            fn from(node: $name) -> NodeId {
                node.id
            }
        }
    };
}

node_handle!(
    /// Periodic source.
    OscillatorNode { frequency = 0, detune = 1 }
);
node_handle!(
    /// Plays an [`AudioBuffer`].
    BufferSourceNode { playback_rate = 0, detune = 1 }
);
node_handle!(GainNode { gain = 0 });
node_handle!(DelayNode { delay_time = 0 });
node_handle!(BiquadFilterNode { frequency = 0, detune = 1, q = 2, gain = 3 });
node_handle!(DynamicsCompressorNode {
    threshold = 0,
    knee = 1,
    ratio = 2,
    attack = 3,
    release = 4,
});
node_handle!(AnalyserNode {});
node_handle!(ChannelMergerNode {});
node_handle!(ChannelSplitterNode {});
node_handle!(WaveShaperNode {});

/// Control-side handle of an audio graph. Pairs with a [`Renderer`].
pub struct Context {
    options: ContextOptions,
    graph: Graph,
    states: Vec<Option<NodeState>>,
    queues: ControlEnds,
    /// Messages waiting for room in the control queue.
    pending: VecDeque<ControlMsg>,
    clock: Arc<AtomicU64>,
    destination: NodeId,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("options", &self.options)
            .field("nodes", &self.graph.live_nodes().count())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Context {
    /// Create a context and the renderer that plays it.
    pub fn new(options: ContextOptions) -> Result<(Context, Renderer)> {
        options.validate()?;
        let (control, render) = new_queues(options.control_queue_capacity, options.max_nodes);
        let clock = Arc::new(AtomicU64::new(0));
        let destination = NodeId(0, 0);
        let renderer = Renderer::new(
            render,
            options.max_nodes,
            destination,
            options.sample_rate,
            options.block_size,
            options.output_channels,
            Arc::clone(&clock),
        );
        let mut context = Context {
            options,
            graph: Graph::new(),
            states: Vec::new(),
            queues: control,
            pending: VecDeque::new(),
            clock,
            destination,
        };
        let id = context.add_node(
            NodeKind::Destination,
            Box::new(DestinationProcessor),
            NodeExtra::None,
        )?;
        debug_assert_eq!(id, destination);
        tracing::debug!(
            sample_rate = context.options.sample_rate,
            block_size = context.options.block_size,
            channels = context.options.output_channels,
            "context created"
        );
        Ok((context, renderer))
    }

    /// A context with default options at `sample_rate`.
    pub fn with_sample_rate(sample_rate: f32) -> Result<(Context, Renderer)> {
        Self::new(ContextOptions::with_sample_rate(sample_rate))
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn sample_rate(&self) -> f32 {
        self.options.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.options.block_size
    }

    /// Frames the renderer has completed.
    pub fn current_frame(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Seconds rendered so far.
    pub fn current_time(&self) -> f64 {
        self.current_frame() as f64 / self.options.sample_rate as f64
    }

    /// The context's sink.
    pub fn destination(&self) -> NodeId {
        self.destination
    }

    // ---- factories ----

    pub fn create_oscillator(&mut self) -> Result<OscillatorNode> {
        let id = self.add_node(
            NodeKind::Oscillator,
            Box::new(OscillatorProcessor::new()),
            NodeExtra::Oscillator {
                kind: OscillatorType::Sine,
            },
        )?;
        Ok(OscillatorNode { id })
    }

    pub fn create_buffer_source(&mut self) -> Result<BufferSourceNode> {
        let id = self.add_node(
            NodeKind::BufferSource,
            Box::new(BufferSourceProcessor::new()),
            NodeExtra::BufferSource {
                has_buffer: false,
                looping: LoopSettings::default(),
            },
        )?;
        Ok(BufferSourceNode { id })
    }

    pub fn create_gain(&mut self) -> Result<GainNode> {
        let id = self.add_node(NodeKind::Gain, Box::new(GainProcessor), NodeExtra::None)?;
        Ok(GainNode { id })
    }

    /// A delay line holding up to `max_delay_time` seconds, in (0, 180).
    pub fn create_delay(&mut self, max_delay_time: f64) -> Result<DelayNode> {
        delay::validate_max_delay(max_delay_time)?;
        let processor = DelayProcessor::new(
            max_delay_time,
            self.options.sample_rate,
            self.options.block_size,
            self.options.max_channels,
        );
        let id = self.add_node(
            NodeKind::Delay { max_delay_time },
            Box::new(processor),
            NodeExtra::None,
        )?;
        Ok(DelayNode { id })
    }

    pub fn create_biquad_filter(&mut self) -> Result<BiquadFilterNode> {
        let id = self.add_node(
            NodeKind::BiquadFilter,
            Box::new(BiquadProcessor::new(self.options.max_channels)),
            NodeExtra::Biquad {
                kind: BiquadFilterType::Lowpass,
            },
        )?;
        Ok(BiquadFilterNode { id })
    }

    pub fn create_dynamics_compressor(&mut self) -> Result<DynamicsCompressorNode> {
        let reduction = Arc::new(AtomicF32::new(0.0));
        let id = self.add_node(
            NodeKind::DynamicsCompressor,
            Box::new(CompressorProcessor::new(Arc::clone(&reduction))),
            NodeExtra::Compressor { reduction },
        )?;
        Ok(DynamicsCompressorNode { id })
    }

    pub fn create_analyser(&mut self) -> Result<AnalyserNode> {
        let tap = Arc::new(AnalyserTap::new());
        let id = self.add_node(
            NodeKind::Analyser,
            Box::new(AnalyserProcessor::new(Arc::clone(&tap))),
            NodeExtra::Analyser(Box::new(AnalyserReader::new(tap))),
        )?;
        Ok(AnalyserNode { id })
    }

    /// A merger with `inputs` mono inputs (default 6), in [1, 32].
    pub fn create_channel_merger(&mut self, inputs: Option<usize>) -> Result<ChannelMergerNode> {
        let inputs = inputs.unwrap_or(DEFAULT_CHANNEL_PORTS);
        channels::validate_ports(inputs)?;
        let id = self.add_node(
            NodeKind::ChannelMerger { inputs },
            Box::new(MergerProcessor),
            NodeExtra::None,
        )?;
        Ok(ChannelMergerNode { id })
    }

    /// A splitter with `outputs` mono outputs (default 6), in [1, 32].
    pub fn create_channel_splitter(&mut self, outputs: Option<usize>) -> Result<ChannelSplitterNode> {
        let outputs = outputs.unwrap_or(DEFAULT_CHANNEL_PORTS);
        channels::validate_ports(outputs)?;
        let id = self.add_node(
            NodeKind::ChannelSplitter { outputs },
            Box::new(SplitterProcessor),
            NodeExtra::None,
        )?;
        Ok(ChannelSplitterNode { id })
    }

    pub fn create_wave_shaper(&mut self) -> Result<WaveShaperNode> {
        let id = self.add_node(
            NodeKind::WaveShaper,
            Box::new(WaveShaperProcessor::default()),
            NodeExtra::WaveShaper { curve: None },
        )?;
        Ok(WaveShaperNode { id })
    }

    /// Host a custom processing kernel with the given port counts.
    pub fn create_custom(
        &mut self,
        name: &'static str,
        inputs: usize,
        outputs: usize,
        processor: Box<dyn AudioProcessor>,
    ) -> Result<NodeId> {
        if inputs > MAX_CHANNELS || outputs > MAX_CHANNELS || inputs + outputs == 0 {
            return Err(Error::Range(format!(
                "custom node needs 0-{} inputs and outputs, not both zero (got {}/{})",
                MAX_CHANNELS, inputs, outputs
            )));
        }
        self.add_node(
            NodeKind::Custom {
                name,
                inputs,
                outputs,
            },
            processor,
            NodeExtra::None,
        )
    }

    /// A zero-filled buffer.
    pub fn create_buffer(
        &self,
        number_of_channels: usize,
        length: usize,
        sample_rate: f32,
    ) -> Result<AudioBuffer> {
        AudioBuffer::new(number_of_channels, length, sample_rate)
    }

    pub fn create_periodic_wave(
        &self,
        real: &[f32],
        imag: &[f32],
        disable_normalization: bool,
    ) -> Result<Arc<PeriodicWave>> {
        PeriodicWave::new(real, imag, disable_normalization).map(Arc::new)
    }

    /// Decode WAV bytes on a background thread.
    pub fn decode_audio_data(&self, bytes: Vec<u8>) -> Result<DecodeHandle> {
        self.decode_audio_data_with(bytes, Arc::new(WavDecoder))
    }

    /// Decode with a caller-supplied decoder on a background thread.
    pub fn decode_audio_data_with(
        &self,
        bytes: Vec<u8>,
        decoder: Arc<dyn AudioDecoder>,
    ) -> Result<DecodeHandle> {
        DecodeHandle::spawn(bytes, decoder)
    }

    // ---- routing ----

    /// Connect output 0 of `source` to input 0 of `destination`.
    pub fn connect(&mut self, source: impl Into<NodeId>, destination: impl Into<NodeId>) -> Result<()> {
        self.connect_with(source, destination, ConnectOptions::default())
    }

    /// Connect a specific output to a specific input. Fails with
    /// `IndexOutOfRange` if either index exceeds the node's ports.
    pub fn connect_with(
        &mut self,
        source: impl Into<NodeId>,
        destination: impl Into<NodeId>,
        options: ConnectOptions,
    ) -> Result<()> {
        let edge = Edge {
            from_node: source.into(),
            from_port: PortId(options.output),
            to_node: destination.into(),
            to_port: PortId(options.input),
        };
        if self.graph.add_edge(edge)? {
            tracing::debug!(
                from = %edge.from_node,
                output = options.output,
                to = %edge.to_node,
                input = options.input,
                "connected"
            );
            self.publish_plan();
        }
        Ok(())
    }

    /// Connect `output` of `source` to a parameter's modulation input.
    pub fn connect_param(&mut self, source: impl Into<NodeId>, output: usize, param: ParamRef) -> Result<()> {
        let edge = ParamEdge {
            from_node: source.into(),
            from_port: PortId(output),
            to_node: param.node,
            param: param.index,
        };
        if self.graph.add_param_edge(edge)? {
            tracing::debug!(from = %edge.from_node, to = %param.node, param = param.index, "connected to param");
            self.publish_plan();
        }
        Ok(())
    }

    /// Remove every connection leaving `source`.
    pub fn disconnect(&mut self, source: impl Into<NodeId>) -> Result<usize> {
        self.disconnect_with(source, DisconnectOptions::default())
    }

    /// Remove the connections leaving `source` that match `options`.
    pub fn disconnect_with(&mut self, source: impl Into<NodeId>, options: DisconnectOptions) -> Result<usize> {
        let source = source.into();
        let removed = self.graph.disconnect(source, options)?;
        if removed > 0 {
            tracing::debug!(from = %source, removed, "disconnected");
            self.publish_plan();
        }
        Ok(removed)
    }

    pub fn disconnect_param(&mut self, source: impl Into<NodeId>, output: usize, param: ParamRef) -> Result<()> {
        self.graph.disconnect_param(ParamEdge {
            from_node: source.into(),
            from_port: PortId(output),
            to_node: param.node,
            param: param.index,
        })?;
        self.publish_plan();
        Ok(())
    }

    /// Disconnect and release a node. The destination cannot be removed.
    pub fn remove_node(&mut self, node: impl Into<NodeId>) -> Result<()> {
        let id = node.into();
        if id == self.destination {
            return Err(Error::InvalidState("the destination cannot be removed".into()));
        }
        let data = self.graph.remove_node(id)?;
        if let Some(state) = self.states.get_mut(id.0) {
            *state = None;
        }
        tracing::debug!(node = %id, kind = data.kind.name(), "removed node");
        self.publish_plan();
        self.send(ControlMsg::RemoveNode { id });
        Ok(())
    }

    pub fn number_of_inputs(&self, node: impl Into<NodeId>) -> Result<usize> {
        Ok(self.graph.node(node.into())?.inputs)
    }

    pub fn number_of_outputs(&self, node: impl Into<NodeId>) -> Result<usize> {
        Ok(self.graph.node(node.into())?.outputs)
    }

    pub fn channel_config(&self, node: impl Into<NodeId>) -> Result<ChannelConfig> {
        Ok(self.graph.node(node.into())?.channel)
    }

    /// Change how a node mixes its inputs. Nodes whose algorithm fixes the
    /// layout reject changes with `NotSupported` or `InvalidState`.
    pub fn set_channel_config(&mut self, node: impl Into<NodeId>, config: ChannelConfig) -> Result<()> {
        let id = node.into();
        let max_channels = self.options.max_channels;
        let data = self.graph.node_mut(id)?;
        data.kind.validate_channel_config(&data.channel, &config, max_channels)?;
        data.channel = config;
        self.send(ControlMsg::SetChannelConfig { id, config });
        Ok(())
    }

    // ---- parameters ----

    /// Look a parameter up by name.
    pub fn param(&self, node: impl Into<NodeId>, name: &str) -> Result<ParamRef> {
        let id = node.into();
        let data = self.graph.node(id)?;
        let index = data.kind.param_index(name).ok_or_else(|| {
            Error::InvalidAccess(format!("{} has no parameter '{}'", data.kind.name(), name))
        })?;
        Ok(ParamRef { node: id, index })
    }

    pub fn param_descriptor(&self, param: ParamRef) -> Result<ParamDescriptor> {
        Ok(*self.timeline(param)?.descriptor())
    }

    pub fn default_value(&self, param: ParamRef) -> Result<f32> {
        Ok(self.param_descriptor(param)?.default)
    }

    pub fn min_value(&self, param: ParamRef) -> Result<f32> {
        Ok(self.param_descriptor(param)?.min)
    }

    pub fn max_value(&self, param: ParamRef) -> Result<f32> {
        Ok(self.param_descriptor(param)?.max)
    }

    pub fn automation_rate(&self, param: ParamRef) -> Result<AutomationRate> {
        Ok(self.param_descriptor(param)?.rate)
    }

    /// The directly-set value.
    pub fn value(&self, param: ParamRef) -> Result<f32> {
        Ok(self.timeline(param)?.value())
    }

    /// The automation value at `time`, before modulation and clamping.
    pub fn value_at(&self, param: ParamRef, time: f64) -> Result<f32> {
        Ok(self.timeline(param)?.value_at(time))
    }

    pub fn set_value(&mut self, param: ParamRef, value: f32) -> Result<()> {
        self.automate(param, |t| t.set_value(value))
    }

    pub fn set_value_at_time(&mut self, param: ParamRef, value: f32, time: f64) -> Result<()> {
        self.automate(param, |t| t.set_value_at_time(value, time))
    }

    pub fn linear_ramp_to_value_at_time(&mut self, param: ParamRef, value: f32, end_time: f64) -> Result<()> {
        self.automate(param, |t| t.linear_ramp_to_value_at_time(value, end_time))
    }

    pub fn exponential_ramp_to_value_at_time(
        &mut self,
        param: ParamRef,
        value: f32,
        end_time: f64,
    ) -> Result<()> {
        self.automate(param, |t| t.exponential_ramp_to_value_at_time(value, end_time))
    }

    pub fn set_target_at_time(
        &mut self,
        param: ParamRef,
        target: f32,
        start_time: f64,
        time_constant: f64,
    ) -> Result<()> {
        self.automate(param, |t| t.set_target_at_time(target, start_time, time_constant))
    }

    pub fn set_value_curve_at_time(
        &mut self,
        param: ParamRef,
        values: &[f32],
        start_time: f64,
        duration: f64,
    ) -> Result<()> {
        self.automate(param, |t| t.set_value_curve_at_time(values, start_time, duration))
    }

    pub fn cancel_scheduled_values(&mut self, param: ParamRef, cancel_time: f64) -> Result<()> {
        self.automate(param, |t| t.cancel_scheduled_values(cancel_time))
    }

    pub fn cancel_and_hold_at_time(&mut self, param: ParamRef, cancel_time: f64) -> Result<()> {
        self.automate(param, |t| t.cancel_and_hold_at_time(cancel_time))
    }

    // ---- scheduled sources ----

    /// Start a source at `when` seconds.
    pub fn start(&mut self, node: impl Into<NodeId>, when: f64) -> Result<()> {
        self.start_with(
            node,
            StartOptions {
                when,
                ..StartOptions::default()
            },
        )
    }

    pub fn start_with(&mut self, node: impl Into<NodeId>, options: StartOptions) -> Result<()> {
        let id = node.into();
        check_seconds("when", options.when)?;
        check_seconds("offset", options.offset)?;
        if let Some(duration) = options.duration {
            check_seconds("duration", duration)?;
        }
        let state = self.source_state(id)?;
        state.lifecycle.start()?;
        let frame = frame_at(options.when, self.options.sample_rate);
        tracing::debug!(node = %id, frame, "start");
        self.send(ControlMsg::Node {
            id,
            command: NodeCommand::Start {
                frame,
                offset: options.offset,
                duration: options.duration,
            },
        });
        Ok(())
    }

    /// Stop a started source at `when` seconds.
    pub fn stop(&mut self, node: impl Into<NodeId>, when: f64) -> Result<()> {
        let id = node.into();
        check_seconds("when", when)?;
        self.source_state(id)?.lifecycle.stop()?;
        let frame = frame_at(when, self.options.sample_rate);
        tracing::debug!(node = %id, frame, "stop");
        self.send(ControlMsg::Node {
            id,
            command: NodeCommand::Stop { frame },
        });
        Ok(())
    }

    // ---- node-specific settings ----

    pub fn oscillator_type(&self, node: OscillatorNode) -> Result<OscillatorType> {
        match self.state(node.id)?.extra {
            NodeExtra::Oscillator { kind } => Ok(kind),
            _ => Err(wrong_kind(node.id, "Oscillator")),
        }
    }

    /// Select a built-in waveform. `Custom` is only reachable through
    /// [`set_periodic_wave`](Self::set_periodic_wave).
    pub fn set_oscillator_type(&mut self, node: OscillatorNode, kind: OscillatorType) -> Result<()> {
        if kind == OscillatorType::Custom {
            return Err(Error::InvalidState(
                "use set_periodic_wave to select a custom waveform".into(),
            ));
        }
        self.set_oscillator_extra(node, kind)?;
        self.send(ControlMsg::Node {
            id: node.id,
            command: NodeCommand::OscillatorType(kind),
        });
        Ok(())
    }

    pub fn set_periodic_wave(&mut self, node: OscillatorNode, wave: Arc<PeriodicWave>) -> Result<()> {
        self.set_oscillator_extra(node, OscillatorType::Custom)?;
        self.send(ControlMsg::Node {
            id: node.id,
            command: NodeCommand::PeriodicWave(wave),
        });
        Ok(())
    }

    /// Assign the buffer to play. Only allowed once per node.
    pub fn set_buffer(&mut self, node: BufferSourceNode, buffer: Arc<AudioBuffer>) -> Result<()> {
        match &mut self.state_mut(node.id)?.extra {
            NodeExtra::BufferSource { has_buffer, .. } => {
                if *has_buffer {
                    return Err(Error::InvalidState("buffer may only be set once".into()));
                }
                *has_buffer = true;
            }
            _ => return Err(wrong_kind(node.id, "BufferSource")),
        }
        self.send(ControlMsg::Node {
            id: node.id,
            command: NodeCommand::Buffer(buffer),
        });
        Ok(())
    }

    pub fn loop_settings(&self, node: BufferSourceNode) -> Result<LoopSettings> {
        match self.state(node.id)?.extra {
            NodeExtra::BufferSource { looping, .. } => Ok(looping),
            _ => Err(wrong_kind(node.id, "BufferSource")),
        }
    }

    pub fn set_loop(&mut self, node: BufferSourceNode, settings: LoopSettings) -> Result<()> {
        if !settings.start.is_finite() || !settings.end.is_finite() {
            return Err(Error::Range("loop points must be finite".into()));
        }
        match &mut self.state_mut(node.id)?.extra {
            NodeExtra::BufferSource { looping, .. } => *looping = settings,
            _ => return Err(wrong_kind(node.id, "BufferSource")),
        }
        self.send(ControlMsg::Node {
            id: node.id,
            command: NodeCommand::Loop(settings),
        });
        Ok(())
    }

    pub fn filter_type(&self, node: BiquadFilterNode) -> Result<BiquadFilterType> {
        match self.state(node.id)?.extra {
            NodeExtra::Biquad { kind } => Ok(kind),
            _ => Err(wrong_kind(node.id, "BiquadFilter")),
        }
    }

    pub fn set_filter_type(&mut self, node: BiquadFilterNode, kind: BiquadFilterType) -> Result<()> {
        match &mut self.state_mut(node.id)?.extra {
            NodeExtra::Biquad { kind: current } => *current = kind,
            _ => return Err(wrong_kind(node.id, "BiquadFilter")),
        }
        self.send(ControlMsg::Node {
            id: node.id,
            command: NodeCommand::FilterType(kind),
        });
        Ok(())
    }

    /// Magnitude and phase response at `frequencies`, from the filter's
    /// parameter values at the current time. Does not touch filter state.
    pub fn get_frequency_response(
        &self,
        node: BiquadFilterNode,
        frequencies: &[f32],
        magnitude: &mut [f32],
        phase: &mut [f32],
    ) -> Result<()> {
        if magnitude.len() != frequencies.len() || phase.len() != frequencies.len() {
            return Err(Error::InvalidAccess(format!(
                "response arrays must match {} frequencies",
                frequencies.len()
            )));
        }
        let state = self.state(node.id)?;
        let NodeExtra::Biquad { kind } = state.extra else {
            return Err(wrong_kind(node.id, "BiquadFilter"));
        };
        let now = self.current_time();
        let value = |index: usize| -> Result<f32> {
            let timeline = state.timeline(index)?;
            Ok(timeline.descriptor().clamp(timeline.value_at(now)))
        };
        let coefficients = BiquadCoefficients::compute(
            kind,
            self.options.sample_rate,
            value(0)?,
            value(1)?,
            value(2)?,
            value(3)?,
        );
        coefficients.frequency_response(self.options.sample_rate, frequencies, magnitude, phase);
        Ok(())
    }

    /// Current gain reduction of a compressor, in dB (zero or negative).
    pub fn reduction(&self, node: DynamicsCompressorNode) -> Result<f32> {
        match &self.state(node.id)?.extra {
            NodeExtra::Compressor { reduction } => Ok(reduction.load(Ordering::Relaxed)),
            _ => Err(wrong_kind(node.id, "DynamicsCompressor")),
        }
    }

    /// Readback and settings of an analyser.
    pub fn analyser(&mut self, node: AnalyserNode) -> Result<&mut AnalyserReader> {
        match &mut self.state_mut(node.id)?.extra {
            NodeExtra::Analyser(reader) => Ok(&mut **reader),
            _ => Err(wrong_kind(node.id, "Analyser")),
        }
    }

    pub fn curve(&self, node: WaveShaperNode) -> Result<Option<Arc<[f32]>>> {
        match &self.state(node.id)?.extra {
            NodeExtra::WaveShaper { curve } => Ok(curve.clone()),
            _ => Err(wrong_kind(node.id, "WaveShaper")),
        }
    }

    /// Set or clear the shaping curve. A curve needs at least 2 points.
    pub fn set_curve(&mut self, node: WaveShaperNode, curve: Option<&[f32]>) -> Result<()> {
        if let Some(points) = curve {
            wave_shaper::validate_curve(points)?;
        }
        let curve: Option<Arc<[f32]>> = curve.map(Arc::from);
        match &mut self.state_mut(node.id)?.extra {
            NodeExtra::WaveShaper { curve: current } => current.clone_from(&curve),
            _ => return Err(wrong_kind(node.id, "WaveShaper")),
        }
        self.send(ControlMsg::Node {
            id: node.id,
            command: NodeCommand::Curve(curve),
        });
        Ok(())
    }

    // ---- queue upkeep ----

    /// Drain the renderer's notifications.
    pub fn poll_notifications(&mut self) -> Vec<Notification> {
        self.collect_garbage();
        let mut notifications = Vec::new();
        while let Ok(notification) = self.queues.notifications.pop() {
            notifications.push(notification);
        }
        notifications
    }

    /// Release retired objects and retry queued messages. Returns true when
    /// nothing is left waiting for the renderer.
    pub fn flush(&mut self) -> bool {
        self.collect_garbage();
        while let Some(message) = self.pending.pop_front() {
            if let Err(rtrb::PushError::Full(message)) = self.queues.messages.push(message) {
                self.pending.push_front(message);
                return false;
            }
        }
        true
    }

    fn collect_garbage(&mut self) {
        let mut released = 0usize;
        while let Ok(garbage) = self.queues.garbage.pop() {
            drop(garbage);
            released += 1;
        }
        if released > 0 {
            tracing::trace!(released, "released retired render objects");
        }
    }

    fn send(&mut self, message: ControlMsg) {
        if !self.flush() {
            self.pending.push_back(message);
            return;
        }
        if let Err(rtrb::PushError::Full(message)) = self.queues.messages.push(message) {
            tracing::warn!(
                pending = self.pending.len() + 1,
                "control queue full; holding messages until the renderer catches up"
            );
            self.pending.push_back(message);
        }
    }

    // ---- internals ----

    fn add_node(
        &mut self,
        kind: NodeKind,
        processor: Box<dyn AudioProcessor>,
        extra: NodeExtra,
    ) -> Result<NodeId> {
        if self.graph.live_count() >= self.options.max_nodes {
            return Err(Error::NotSupported(format!(
                "node capacity of {} reached",
                self.options.max_nodes
            )));
        }
        let channel = kind.default_channel_config(self.options.output_channels);
        let capacity = self
            .options
            .max_channels
            .max(kind.number_of_inputs())
            .max(kind.number_of_outputs())
            .max(channel.count);
        let slot = NodeSlot::new(
            processor,
            kind.params(),
            kind.number_of_inputs(),
            kind.number_of_outputs(),
            channel,
            capacity,
            self.options.block_size,
        );
        let id = self.graph.add_node(kind.clone(), channel);
        tracing::debug!(node = %id, kind = kind.name(), "created node");
        if self.states.len() <= id.0 {
            self.states.resize_with(id.0 + 1, || None);
        }
        self.states[id.0] = Some(NodeState::new(kind, extra));
        self.send(ControlMsg::InstallNode {
            id,
            slot: Box::new(slot),
        });
        self.publish_plan();
        Ok(id)
    }

    fn publish_plan(&mut self) {
        let plan = Plan::compile(&self.graph, self.options.block_size);
        self.send(ControlMsg::SwapPlan(Box::new(plan)));
    }

    fn state(&self, id: NodeId) -> Result<&NodeState> {
        self.graph.node(id)?;
        self.states
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidNode(id))
    }

    fn state_mut(&mut self, id: NodeId) -> Result<&mut NodeState> {
        self.graph.node(id)?;
        self.states
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidNode(id))
    }

    fn source_state(&mut self, id: NodeId) -> Result<&mut NodeState> {
        let state = self.state_mut(id)?;
        if !state.kind.is_scheduled_source() {
            return Err(Error::InvalidAccess(format!(
                "{} node {} cannot be started or stopped",
                state.kind.name(),
                id
            )));
        }
        Ok(state)
    }

    fn set_oscillator_extra(&mut self, node: OscillatorNode, kind: OscillatorType) -> Result<()> {
        match &mut self.state_mut(node.id)?.extra {
            NodeExtra::Oscillator { kind: current } => {
                *current = kind;
                Ok(())
            }
            _ => Err(wrong_kind(node.id, "Oscillator")),
        }
    }

    fn timeline(&self, param: ParamRef) -> Result<&ParamTimeline> {
        self.state(param.node)?.timeline(param.index)
    }

    /// Apply `edit` to a parameter's timeline and publish the result.
    fn automate(&mut self, param: ParamRef, edit: impl FnOnce(&mut ParamTimeline) -> Result<()>) -> Result<()> {
        let timeline = self.state_mut(param.node)?.timeline_mut(param.index)?;
        edit(timeline)?;
        let snapshot = Box::new(timeline.clone());
        self.send(ControlMsg::SwapTimeline {
            id: param.node,
            param: param.index,
            timeline: snapshot,
        });
        Ok(())
    }
}

fn check_seconds(what: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::Range(format!(
            "{} must be finite and non-negative, got {}",
            what, value
        )));
    }
    Ok(())
}

fn wrong_kind(id: NodeId, expected: &str) -> Error {
    Error::InvalidAccess(format!("node {} is not a {} node", id, expected))
}
