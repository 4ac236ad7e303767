//! Message types and queues between the control side and the renderer.
//!
//! Three lock-free SPSC queues connect a [`Context`](crate::Context) to its
//! [`Renderer`](crate::Renderer):
//!
//! - control → render: [`ControlMsg`], complete snapshots (plans, timelines,
//!   node slots) built off the render thread and swapped in at the start of
//!   the next block;
//! - render → control: [`Garbage`], whatever the renderer swapped out, so
//!   deallocation never happens on the render thread;
//! - render → control: [`Notification`], one-shot lifecycle events.

use crate::buffer::AudioBuffer;
use crate::graph::NodeId;
use crate::node::oscillator::PeriodicWave;
use crate::node::{ChannelConfig, NodeCommand};
use crate::param::ParamTimeline;
use crate::plan::Plan;
use crate::rt::NodeSlot;
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::Arc;

/// Messages sent from the control side to the renderer.
pub enum ControlMsg {
    /// Place a freshly built node in its slot.
    InstallNode { id: NodeId, slot: Box<NodeSlot> },
    /// Take a node out of rendering; its slot comes back as garbage.
    RemoveNode { id: NodeId },
    /// Replace the render plan.
    SwapPlan(Box<Plan>),
    /// Replace one parameter's automation timeline.
    SwapTimeline {
        id: NodeId,
        param: usize,
        timeline: Box<ParamTimeline>,
    },
    /// Forward a node-specific command to its processor.
    Node { id: NodeId, command: NodeCommand },
    SetChannelConfig { id: NodeId, config: ChannelConfig },
}

impl ControlMsg {
    /// The node this message targets, if any.
    pub fn target_node(&self) -> Option<NodeId> {
        match self {
            ControlMsg::InstallNode { id, .. }
            | ControlMsg::RemoveNode { id }
            | ControlMsg::SwapTimeline { id, .. }
            | ControlMsg::Node { id, .. }
            | ControlMsg::SetChannelConfig { id, .. } => Some(*id),
            ControlMsg::SwapPlan(_) => None,
        }
    }

    /// Short name, for logging.
    pub fn description(&self) -> &'static str {
        match self {
            ControlMsg::InstallNode { .. } => "InstallNode",
            ControlMsg::RemoveNode { .. } => "RemoveNode",
            ControlMsg::SwapPlan(_) => "SwapPlan",
            ControlMsg::SwapTimeline { .. } => "SwapTimeline",
            ControlMsg::Node { .. } => "Node",
            ControlMsg::SetChannelConfig { .. } => "SetChannelConfig",
        }
    }
}

impl std::fmt::Debug for ControlMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlMsg")
            .field("kind", &self.description())
            .field("node", &self.target_node())
            .finish()
    }
}

/// Objects retired by the renderer, returned for deallocation.
pub enum Garbage {
    Node(Box<NodeSlot>),
    Plan(Box<Plan>),
    Timeline(Box<ParamTimeline>),
    Buffer(Arc<AudioBuffer>),
    Curve(Arc<[f32]>),
    Wave(Arc<PeriodicWave>),
}

impl Garbage {
    /// The heap-owning payload of a command nobody consumed.
    pub fn from_command(command: NodeCommand) -> Option<Garbage> {
        match command {
            NodeCommand::Buffer(buffer) => Some(Garbage::Buffer(buffer)),
            NodeCommand::Curve(curve) => curve.map(Garbage::Curve),
            NodeCommand::PeriodicWave(wave) => Some(Garbage::Wave(wave)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Garbage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Garbage::Node(_) => "Node",
            Garbage::Plan(_) => "Plan",
            Garbage::Timeline(_) => "Timeline",
            Garbage::Buffer(_) => "Buffer",
            Garbage::Curve(_) => "Curve",
            Garbage::Wave(_) => "Wave",
        };
        write!(f, "Garbage::{}", kind)
    }
}

/// Lifecycle events reported by the renderer, each delivered once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notification {
    /// A source node finished playing during the block ending at `time`.
    Ended { node: NodeId, time: f64 },
}

/// Control-side ends of the queues.
#[derive(Debug)]
pub(crate) struct ControlEnds {
    pub(crate) messages: Producer<ControlMsg>,
    pub(crate) garbage: Consumer<Garbage>,
    pub(crate) notifications: Consumer<Notification>,
}

/// Render-side ends of the queues.
#[derive(Debug)]
pub(crate) struct RenderEnds {
    pub(crate) messages: Consumer<ControlMsg>,
    pub(crate) garbage: Producer<Garbage>,
    pub(crate) notifications: Producer<Notification>,
}

impl RenderEnds {
    /// Hand `item` back to the control side. If the queue is full the
    /// object is dropped here instead.
    pub(crate) fn retire(&mut self, item: Garbage) {
        let _ = self.garbage.push(item);
    }

    pub(crate) fn notify(&mut self, notification: Notification) {
        let _ = self.notifications.push(notification);
    }
}

/// Create the three queues. The garbage queue holds two retirements per
/// control message, which covers every swap.
pub(crate) fn new_queues(control_capacity: usize, max_nodes: usize) -> (ControlEnds, RenderEnds) {
    let (messages_tx, messages_rx) = RingBuffer::new(control_capacity);
    let (garbage_tx, garbage_rx) = RingBuffer::new(control_capacity * 2);
    let (notify_tx, notify_rx) = RingBuffer::new(max_nodes.max(1));
    (
        ControlEnds {
            messages: messages_tx,
            garbage: garbage_rx,
            notifications: notify_rx,
        },
        RenderEnds {
            messages: messages_rx,
            garbage: garbage_tx,
            notifications: notify_tx,
        },
    )
}
