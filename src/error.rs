//! Error types for auxgraph.
//!
//! Construction and scheduling calls fail synchronously with [`Error`]. The
//! only deferred failure is a delay-free feedback cycle, which surfaces as a
//! [`RenderError`] from the render pass that first sees it.

use crate::graph::{NodeId, PortKind};
use thiserror::Error;

/// Error type for control-side operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A value or index lies outside its allowed domain.
    #[error("RangeError: {0}")]
    Range(String),

    /// The operation is invalid for the object's lifecycle state.
    #[error("InvalidStateError: {0}")]
    InvalidState(String),

    /// The requested configuration cannot be honored by the node's algorithm.
    #[error("NotSupportedError: {0}")]
    NotSupported(String),

    /// A channel index or sample offset exceeds a buffer's bounds.
    #[error("IndexSizeError: {0}")]
    IndexSize(String),

    /// A port index exceeds the node's port count.
    #[error("IndexOutOfRange: {kind} index {index} out of range for node {node} ({count} ports)")]
    IndexOutOfRange {
        node: NodeId,
        kind: PortKind,
        index: usize,
        count: usize,
    },

    /// The referenced connection or object does not exist.
    #[error("InvalidAccessError: {0}")]
    InvalidAccess(String),

    /// The node id does not refer to a live node.
    #[error("unknown node {0}")]
    InvalidNode(NodeId),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by a render pass.
///
/// The block is still rendered and time still advances; the offending
/// subgraph contributes silence.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum RenderError {
    /// A feedback cycle without a delay node. Names the connection that
    /// closes it.
    #[error("delay-free feedback cycle closed by {from}:{output} -> {to}:{input}")]
    DelayFreeCycle {
        from: NodeId,
        output: usize,
        to: NodeId,
        input: usize,
    },

    /// A processor panicked in [`process_block_safe`](crate::Renderer::process_block_safe)
    /// and was dropped from rendering.
    #[error("node {node} panicked and was dropped")]
    NodePanicked { node: NodeId },

    /// The output slice does not hold exactly one block.
    #[error("output holds {got} samples, expected {expected}")]
    OutputSize { expected: usize, got: usize },
}

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        Error::Decode(err.to_string())
    }
}
