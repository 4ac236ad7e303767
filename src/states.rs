//! Control-side node state.
//!
//! The [`Context`](crate::Context) keeps the authoritative copy of every
//! parameter timeline and of each node's settings here; the renderer only
//! ever sees snapshots.

use crate::error::{Error, Result};
use crate::invariant_ppt::{assert_invariant, SOURCE_LIFECYCLE_ONCE};
use crate::node::analyser::AnalyserReader;
use crate::node::biquad::BiquadFilterType;
use crate::node::buffer_source::LoopSettings;
use crate::node::oscillator::OscillatorType;
use crate::node::NodeKind;
use crate::param::ParamTimeline;
use atomic_float::AtomicF32;
use std::sync::Arc;

/// Start/stop progress of a scheduled source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Idle,
    Started,
    Stopped,
}

impl Lifecycle {
    /// Move to `Started`. Only allowed once.
    pub fn start(&mut self) -> Result<()> {
        if *self != Lifecycle::Idle {
            return Err(Error::InvalidState("start may only be called once".into()));
        }
        *self = Lifecycle::Started;
        assert_invariant(
            SOURCE_LIFECYCLE_ONCE,
            *self == Lifecycle::Started,
            "source started once",
            None,
        );
        Ok(())
    }

    /// Move to `Stopped`. Requires a prior start; only allowed once.
    pub fn stop(&mut self) -> Result<()> {
        match *self {
            Lifecycle::Idle => Err(Error::InvalidState("stop called before start".into())),
            Lifecycle::Stopped => Err(Error::InvalidState("stop may only be called once".into())),
            Lifecycle::Started => {
                *self = Lifecycle::Stopped;
                Ok(())
            }
        }
    }
}

/// Settings the control side tracks for specific node types.
#[derive(Debug)]
pub enum NodeExtra {
    None,
    Oscillator {
        kind: OscillatorType,
    },
    BufferSource {
        has_buffer: bool,
        looping: LoopSettings,
    },
    Biquad {
        kind: BiquadFilterType,
    },
    Compressor {
        reduction: Arc<AtomicF32>,
    },
    Analyser(Box<AnalyserReader>),
    WaveShaper {
        curve: Option<Arc<[f32]>>,
    },
}

/// Everything the control side knows about one node.
#[derive(Debug)]
pub struct NodeState {
    pub kind: NodeKind,
    pub timelines: Vec<ParamTimeline>,
    pub lifecycle: Lifecycle,
    pub extra: NodeExtra,
}

impl NodeState {
    pub fn new(kind: NodeKind, extra: NodeExtra) -> Self {
        Self {
            timelines: kind.params().iter().map(|d| ParamTimeline::new(*d)).collect(),
            kind,
            lifecycle: Lifecycle::default(),
            extra,
        }
    }

    pub fn timeline(&self, index: usize) -> Result<&ParamTimeline> {
        self.timelines.get(index).ok_or_else(|| self.no_param(index))
    }

    pub fn timeline_mut(&mut self, index: usize) -> Result<&mut ParamTimeline> {
        let error = self.no_param(index);
        self.timelines.get_mut(index).ok_or(error)
    }

    fn no_param(&self, index: usize) -> Error {
        Error::InvalidAccess(format!(
            "{} has no parameter {} ({} parameters)",
            self.kind.name(),
            index,
            self.timelines.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_allows_one_start_and_one_stop() {
        let mut lifecycle = Lifecycle::default();
        assert!(matches!(lifecycle.stop(), Err(Error::InvalidState(_))));
        lifecycle.start().unwrap();
        assert!(matches!(lifecycle.start(), Err(Error::InvalidState(_))));
        lifecycle.stop().unwrap();
        assert!(matches!(lifecycle.stop(), Err(Error::InvalidState(_))));
        assert_eq!(lifecycle, Lifecycle::Stopped);
    }

    #[test]
    fn timelines_follow_descriptors() {
        let state = NodeState::new(NodeKind::Oscillator, NodeExtra::None);
        assert_eq!(state.timelines.len(), 2);
        assert_eq!(state.timeline(0).unwrap().value(), 440.0);
        assert!(matches!(state.timeline(2), Err(Error::InvalidAccess(_))));
    }
}
