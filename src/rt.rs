//! RT module: the block renderer.
//!
//! A [`Renderer`] owns every node's processor, buses and automation
//! timelines. Each call to [`Renderer::process_block`] applies pending
//! control messages, walks the plan in order and delivers the destination's
//! input as interleaved samples. Everything it touches is sized ahead of
//! time; replaced objects travel back to the control side for release.

// IMPORTANT: Do not call assert_invariant, tracing, or anything else that
// may lock or allocate from this module's render path.

use crate::buffer::AudioBus;
use crate::control::{ControlMsg, Garbage, Notification, RenderEnds};
use crate::error::RenderError;
use crate::graph::NodeId;
use crate::node::{
    AudioProcessor, ChannelConfig, ParamValues, ProcessContext, ProcessStatus,
};
use crate::param::{AutomationRate, ParamDescriptor, ParamTimeline};
use crate::plan::{Plan, Source};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Everything the renderer keeps for one node.
pub struct NodeSlot {
    processor: Box<dyn AudioProcessor>,
    timelines: Vec<Box<ParamTimeline>>,
    channel: ChannelConfig,
    inputs: Vec<AudioBus>,
    outputs: Vec<AudioBus>,
    /// Previous block's outputs, for stale reads.
    history: Vec<AudioBus>,
    params: Vec<Vec<f32>>,
    scratch: Vec<f32>,
}

impl NodeSlot {
    /// Allocate buses and parameter blocks for a node.
    pub fn new(
        processor: Box<dyn AudioProcessor>,
        descriptors: &[ParamDescriptor],
        inputs: usize,
        outputs: usize,
        channel: ChannelConfig,
        bus_capacity: usize,
        block_size: usize,
    ) -> Self {
        Self {
            processor,
            timelines: descriptors
                .iter()
                .map(|d| Box::new(ParamTimeline::new(*d)))
                .collect(),
            channel,
            inputs: vec![AudioBus::new(bus_capacity, block_size); inputs],
            outputs: vec![AudioBus::new(bus_capacity, block_size); outputs],
            history: vec![AudioBus::new(bus_capacity, block_size); outputs],
            params: vec![vec![0.0; block_size]; descriptors.len()],
            scratch: vec![0.0; block_size],
        }
    }

    /// Output `port` from the last rendered block.
    pub fn output(&self, port: usize) -> Option<&AudioBus> {
        self.outputs.get(port)
    }
}

impl std::fmt::Debug for NodeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSlot")
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("params", &self.params.len())
            .field("channel", &self.channel)
            .finish()
    }
}

/// The render side of a context. `Send`, so it can live on an audio thread.
pub struct Renderer {
    slots: Vec<Option<Box<NodeSlot>>>,
    plan: Box<Plan>,
    queues: RenderEnds,
    destination: NodeId,
    sample_rate: f32,
    block_size: usize,
    output_channels: usize,
    frame: u64,
    clock: Arc<AtomicU64>,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .field("output_channels", &self.output_channels)
            .field("frame", &self.frame)
            .finish()
    }
}

impl Renderer {
    pub(crate) fn new(
        queues: RenderEnds,
        max_nodes: usize,
        destination: NodeId,
        sample_rate: f32,
        block_size: usize,
        output_channels: usize,
        clock: Arc<AtomicU64>,
    ) -> Self {
        Self {
            slots: (0..max_nodes).map(|_| None).collect(),
            plan: Box::new(Plan::empty(block_size)),
            queues,
            destination,
            sample_rate,
            block_size,
            output_channels,
            frame: 0,
            clock,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    /// Frames rendered so far.
    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    /// Render one block into `out`, interleaved, `block_size *
    /// output_channels` samples long.
    ///
    /// A delay-free cycle in the graph is reported as an error, but the
    /// block is still rendered (the cycle's members are silent) and time
    /// still advances. Only a wrongly sized `out` leaves time unchanged.
    pub fn process_block(&mut self, out: &mut [f32]) -> Result<(), RenderError> {
        self.render_block(out, false)
    }

    /// Like [`process_block`](Self::process_block), but a panicking
    /// processor does not unwind into the caller. The node that panicked is
    /// dropped from rendering, contributes silence from then on, and is
    /// reported as [`RenderError::NodePanicked`] for this block.
    pub fn process_block_safe(&mut self, out: &mut [f32]) -> Result<(), RenderError> {
        self.render_block(out, true)
    }

    fn render_block(&mut self, out: &mut [f32], contain_panics: bool) -> Result<(), RenderError> {
        let expected = self.block_size * self.output_channels;
        if out.len() != expected {
            return Err(RenderError::OutputSize {
                expected,
                got: out.len(),
            });
        }
        self.apply_messages();
        out.fill(0.0);

        let mut panicked = None;
        for index in 0..self.plan.order.len() {
            let id = self.plan.order[index];
            let Some(mut slot) = self.slots.get_mut(id.0).and_then(Option::take) else {
                continue;
            };
            if self.plan.is_muted(id) {
                for bus in &mut slot.outputs {
                    bus.reset(1);
                }
            } else {
                if contain_panics {
                    let rendered = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        self.render_node(id, &mut slot)
                    }));
                    if rendered.is_err() {
                        self.queues.retire(Garbage::Node(slot));
                        if panicked.is_none() {
                            panicked = Some(id);
                        }
                        continue;
                    }
                } else {
                    self.render_node(id, &mut slot);
                }
                if id == self.destination {
                    if let Some(input) = slot.inputs.first() {
                        interleave(input, self.output_channels, out);
                    }
                }
            }
            self.slots[id.0] = Some(slot);
        }

        for &(id, port) in &self.plan.stale_outputs {
            if let Some(slot) = self.slots.get_mut(id.0).and_then(Option::as_mut) {
                let NodeSlot {
                    history, outputs, ..
                } = &mut **slot;
                if let (Some(h), Some(o)) = (history.get_mut(port), outputs.get(port)) {
                    h.copy_from(o);
                }
            }
        }

        self.frame += self.block_size as u64;
        self.clock.store(self.frame, Ordering::Release);
        if let Some(node) = panicked {
            return Err(RenderError::NodePanicked { node });
        }
        match self.plan.cycle_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn apply_messages(&mut self) {
        while let Ok(message) = self.queues.messages.pop() {
            match message {
                ControlMsg::InstallNode { id, slot } => match self.slots.get_mut(id.0) {
                    Some(entry) => {
                        if let Some(old) = entry.replace(slot) {
                            self.queues.retire(Garbage::Node(old));
                        }
                    }
                    None => self.queues.retire(Garbage::Node(slot)),
                },
                ControlMsg::RemoveNode { id } => {
                    if let Some(old) = self.slots.get_mut(id.0).and_then(Option::take) {
                        self.queues.retire(Garbage::Node(old));
                    }
                }
                ControlMsg::SwapPlan(plan) => {
                    let old = std::mem::replace(&mut self.plan, plan);
                    self.seed_history(&old);
                    self.queues.retire(Garbage::Plan(old));
                }
                ControlMsg::SwapTimeline {
                    id,
                    param,
                    timeline,
                } => {
                    let target = self
                        .slots
                        .get_mut(id.0)
                        .and_then(Option::as_mut)
                        .and_then(|slot| slot.timelines.get_mut(param));
                    match target {
                        Some(current) => {
                            let old = std::mem::replace(current, timeline);
                            self.queues.retire(Garbage::Timeline(old));
                        }
                        None => self.queues.retire(Garbage::Timeline(timeline)),
                    }
                }
                ControlMsg::Node { id, command } => {
                    let leftover = match self.slots.get_mut(id.0).and_then(Option::as_mut) {
                        Some(slot) => slot.processor.handle_command(command),
                        None => Garbage::from_command(command),
                    };
                    if let Some(garbage) = leftover {
                        self.queues.retire(garbage);
                    }
                }
                ControlMsg::SetChannelConfig { id, config } => {
                    if let Some(slot) = self.slots.get_mut(id.0).and_then(Option::as_mut) {
                        slot.channel = config;
                    }
                }
            }
        }
    }

    /// Outputs that the new plan reads stale for the first time start from
    /// the block just rendered, which every bus still holds.
    fn seed_history(&mut self, old: &Plan) {
        for &(id, port) in &self.plan.stale_outputs {
            if old.stale_outputs.binary_search(&(id, port)).is_ok() {
                continue;
            }
            if let Some(slot) = self.slots.get_mut(id.0).and_then(Option::as_mut) {
                let NodeSlot {
                    history, outputs, ..
                } = &mut **slot;
                if let (Some(h), Some(o)) = (history.get_mut(port), outputs.get(port)) {
                    h.copy_from(o);
                }
            }
        }
    }

    fn render_node(&mut self, id: NodeId, slot: &mut NodeSlot) {
        let NodeSlot {
            processor,
            timelines,
            channel,
            inputs,
            outputs,
            history,
            params,
            scratch,
        } = slot;
        let slots = &self.slots;
        let own_history: &[AudioBus] = history;
        let lookup = |source: &Source| source_bus(slots, own_history, id, source);

        for (port, input) in inputs.iter_mut().enumerate() {
            let sources = &self.plan.inputs[id.0][port];
            let widest = sources
                .iter()
                .filter_map(&lookup)
                .map(AudioBus::channel_count)
                .max();
            input.reset(channel.computed_count(widest, input.max_channels()));
            for bus in sources.iter().filter_map(&lookup) {
                input.sum_from(bus, channel.interpretation);
            }
        }

        for (index, (values, timeline)) in params.iter_mut().zip(timelines.iter()).enumerate() {
            timeline.fill(self.frame, self.sample_rate, values);
            let descriptor = timeline.descriptor();
            for bus in self.plan.param_inputs[id.0][index].iter().filter_map(&lookup) {
                bus.mix_to_mono(scratch);
                match descriptor.rate {
                    AutomationRate::ARate => {
                        for (v, &m) in values.iter_mut().zip(scratch.iter()) {
                            *v += m;
                        }
                    }
                    AutomationRate::KRate => {
                        let m = scratch[0];
                        for v in values.iter_mut() {
                            *v += m;
                        }
                    }
                }
            }
            for v in values.iter_mut() {
                *v = descriptor.clamp(*v);
            }
        }

        let ctx = ProcessContext {
            sample_rate: self.sample_rate,
            block_size: self.block_size,
            frame: self.frame,
            in_feedback_cycle: self.plan.is_in_cycle(id),
        };
        let status = processor.process(&ctx, inputs, outputs, &ParamValues::new(params));
        if status == ProcessStatus::Ended {
            let end = self.frame + self.block_size as u64;
            self.queues.notify(Notification::Ended {
                node: id,
                time: end as f64 / self.sample_rate as f64,
            });
        }
    }
}

/// The bus `source` reads from. `id` is the node being rendered, whose own
/// slot is checked out of `slots`.
fn source_bus<'a>(
    slots: &'a [Option<Box<NodeSlot>>],
    own_history: &'a [AudioBus],
    id: NodeId,
    source: &Source,
) -> Option<&'a AudioBus> {
    if source.node == id {
        return if source.stale {
            own_history.get(source.port)
        } else {
            None
        };
    }
    let other = slots.get(source.node.0)?.as_deref()?;
    if source.stale {
        other.history.get(source.port)
    } else {
        other.outputs.get(source.port)
    }
}

/// Write the first `channels` channels of `bus` interleaved into `out`.
fn interleave(bus: &AudioBus, channels: usize, out: &mut [f32]) {
    let count = bus.channel_count().min(channels);
    for ch in 0..count {
        for (frame, &sample) in bus.channel(ch).iter().enumerate() {
            out[frame * channels + ch] = sample;
        }
    }
}

/// Render `frames` frames offline, block by block. Stops at the first
/// render error.
pub fn render_offline(renderer: &mut Renderer, frames: usize) -> Result<Vec<f32>, RenderError> {
    let channels = renderer.output_channels;
    let block_len = renderer.block_size * channels;
    let blocks = frames.div_ceil(renderer.block_size);
    let mut output = vec![0.0; blocks * block_len];
    for block in output.chunks_mut(block_len) {
        renderer.process_block(block)?;
    }
    output.truncate(frames * channels);
    Ok(output)
}
