//! Graph module for auxgraph: the control-side routing topology.
//!
//! Nodes live in an arena indexed by [`NodeId`]; edges refer to nodes by id,
//! so feedback loops never form ownership cycles. Cycles are accepted here
//! and validated lazily when the [`Plan`](crate::plan::Plan) is compiled.
//!
//! Freed slots are reused, lowest index first. Each reuse bumps the slot's
//! generation, so an id kept from a removed node never resolves to its
//! successor.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use crate::error::{Error, Result};
use crate::invariant_ppt::{assert_invariant, PORT_INDEX_VALIDATED};
use crate::node::{ChannelConfig, NodeKind};
use std::collections::BTreeSet;
use std::fmt;

/// Unique identifier for a node: arena slot index and slot generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize, pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.1 == 0 {
            write!(f, "#{}", self.0)
        } else {
            write!(f, "#{}v{}", self.0, self.1)
        }
    }
}

/// Index of an input or output port on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub usize);

/// Which side of a node an index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// An audio input.
    Input,
    /// An audio output.
    Output,
    /// A parameter's modulation input.
    Param,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Input => write!(f, "input"),
            PortKind::Output => write!(f, "output"),
            PortKind::Param => write!(f, "param"),
        }
    }
}

/// An edge from a node output to a node input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    /// The source node ID.
    pub from_node: NodeId,
    /// The source output port.
    pub from_port: PortId,
    /// The destination node ID.
    pub to_node: NodeId,
    /// The destination input port.
    pub to_port: PortId,
}

/// An edge from a node output to a parameter's modulation input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamEdge {
    /// The source node ID.
    pub from_node: NodeId,
    /// The source output port.
    pub from_port: PortId,
    /// The node owning the parameter.
    pub to_node: NodeId,
    /// Index of the parameter within its node.
    pub param: usize,
}

/// A node in the graph.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// The unique ID of this node.
    pub id: NodeId,
    /// The node type.
    pub kind: NodeKind,
    /// Number of input ports, fixed at creation.
    pub inputs: usize,
    /// Number of output ports, fixed at creation.
    pub outputs: usize,
    /// How incoming channel counts are mixed.
    pub channel: ChannelConfig,
}

/// Selects which edges [`Graph::disconnect`] removes. The default removes
/// every edge leaving the source node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisconnectOptions {
    /// Only edges leaving this output.
    pub output: Option<usize>,
    /// Only edges reaching this node.
    pub destination: Option<NodeId>,
    /// Only edges reaching this input of `destination`.
    pub input: Option<usize>,
}

/// The routing graph: nodes, audio edges and parameter edges.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// All nodes in the graph (None for removed nodes).
    pub nodes: Vec<Option<NodeData>>,
    /// Audio edges, in connection order.
    pub edges: Vec<Edge>,
    /// Parameter modulation edges, in connection order.
    pub param_edges: Vec<ParamEdge>,
    /// Generation of the next node placed in each slot.
    generations: Vec<u32>,
    /// Vacant slots, reused lowest first.
    free: BTreeSet<usize>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node in the lowest vacant slot, or a new one.
    pub fn add_node(&mut self, kind: NodeKind, channel: ChannelConfig) -> NodeId {
        let index = match self.free.pop_first() {
            Some(index) => index,
            None => {
                self.nodes.push(None);
                self.generations.push(0);
                self.nodes.len() - 1
            }
        };
        let id = NodeId(index, self.generations[index]);
        self.nodes[index] = Some(NodeData {
            id,
            inputs: kind.number_of_inputs(),
            outputs: kind.number_of_outputs(),
            kind,
            channel,
        });
        id
    }

    /// Look up a live node. Ids of removed nodes fail even after their slot
    /// has been reused.
    pub fn node(&self, id: NodeId) -> Result<&NodeData> {
        self.nodes
            .get(id.0)
            .and_then(|n| n.as_ref())
            .filter(|n| n.id == id)
            .ok_or(Error::InvalidNode(id))
    }

    /// Look up a live node mutably.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        self.nodes
            .get_mut(id.0)
            .and_then(|n| n.as_mut())
            .filter(|n| n.id == id)
            .ok_or(Error::InvalidNode(id))
    }

    /// Iterate over live nodes in slot order.
    pub fn live_nodes(&self) -> impl Iterator<Item = &NodeData> {
        self.nodes.iter().flatten()
    }

    /// Number of live nodes.
    pub fn live_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Add an audio edge. Returns `false` if the identical edge already
    /// exists; the graph is untouched on any error.
    pub fn add_edge(&mut self, edge: Edge) -> Result<bool> {
        self.check_output(edge.from_node, edge.from_port.0)?;
        let to = self.node(edge.to_node)?;
        if edge.to_port.0 >= to.inputs {
            return Err(Error::IndexOutOfRange {
                node: edge.to_node,
                kind: PortKind::Input,
                index: edge.to_port.0,
                count: to.inputs,
            });
        }
        assert_invariant(
            PORT_INDEX_VALIDATED,
            edge.to_port.0 < to.inputs,
            "port indices validated before edge insertion",
            Some("add_edge"),
        );
        if self.edges.contains(&edge) {
            return Ok(false);
        }
        self.edges.push(edge);
        Ok(true)
    }

    /// Add a parameter modulation edge. Returns `false` if it already exists.
    pub fn add_param_edge(&mut self, edge: ParamEdge) -> Result<bool> {
        self.check_output(edge.from_node, edge.from_port.0)?;
        let to = self.node(edge.to_node)?;
        let count = to.kind.params().len();
        if edge.param >= count {
            return Err(Error::IndexOutOfRange {
                node: edge.to_node,
                kind: PortKind::Param,
                index: edge.param,
                count,
            });
        }
        if self.param_edges.contains(&edge) {
            return Ok(false);
        }
        self.param_edges.push(edge);
        Ok(true)
    }

    /// Remove edges leaving `from` that match `options`, returning how many
    /// were removed. Naming a destination that is not connected fails with
    /// `InvalidAccess`.
    pub fn disconnect(&mut self, from: NodeId, options: DisconnectOptions) -> Result<usize> {
        self.node(from)?;
        if let Some(output) = options.output {
            self.check_output(from, output)?;
        }
        if let Some(destination) = options.destination {
            let to = self.node(destination)?;
            if let Some(input) = options.input {
                if input >= to.inputs {
                    return Err(Error::IndexOutOfRange {
                        node: destination,
                        kind: PortKind::Input,
                        index: input,
                        count: to.inputs,
                    });
                }
            }
        }

        let before = self.edges.len() + self.param_edges.len();
        let matches_source = |node: NodeId, port: PortId| {
            node == from && options.output.map_or(true, |o| o == port.0)
        };
        self.edges.retain(|e| {
            !(matches_source(e.from_node, e.from_port)
                && options.destination.map_or(true, |d| d == e.to_node)
                && options.input.map_or(true, |i| i == e.to_port.0))
        });
        if options.input.is_none() {
            self.param_edges.retain(|e| {
                !(matches_source(e.from_node, e.from_port)
                    && options.destination.map_or(true, |d| d == e.to_node))
            });
        }
        let removed = before - self.edges.len() - self.param_edges.len();

        if let (0, Some(destination)) = (removed, options.destination) {
            return Err(Error::InvalidAccess(format!(
                "node {} is not connected to {}",
                from, destination
            )));
        }
        Ok(removed)
    }

    /// Remove one parameter modulation edge.
    pub fn disconnect_param(&mut self, edge: ParamEdge) -> Result<()> {
        let before = self.param_edges.len();
        self.param_edges.retain(|e| *e != edge);
        if self.param_edges.len() == before {
            return Err(Error::InvalidAccess(format!(
                "node {} output {} is not connected to param {} of {}",
                edge.from_node, edge.from_port.0, edge.param, edge.to_node
            )));
        }
        Ok(())
    }

    /// Remove a node and all edges connected to it. Its slot becomes
    /// available to the next [`add_node`](Self::add_node).
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<NodeData> {
        self.node(node_id)?;
        let data = self.nodes[node_id.0]
            .take()
            .ok_or(Error::InvalidNode(node_id))?;
        self.generations[node_id.0] = node_id.1.wrapping_add(1);
        self.free.insert(node_id.0);
        self.edges
            .retain(|e| e.from_node != node_id && e.to_node != node_id);
        self.param_edges
            .retain(|e| e.from_node != node_id && e.to_node != node_id);
        Ok(data)
    }

    fn check_output(&self, node: NodeId, output: usize) -> Result<()> {
        let data = self.node(node)?;
        if output >= data.outputs {
            return Err(Error::IndexOutOfRange {
                node,
                kind: PortKind::Output,
                index: output,
                count: data.outputs,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn edge(from: NodeId, output: usize, to: NodeId, input: usize) -> Edge {
        Edge {
            from_node: from,
            from_port: PortId(output),
            to_node: to,
            to_port: PortId(input),
        }
    }

    fn gain(graph: &mut Graph) -> NodeId {
        graph.add_node(NodeKind::Gain, ChannelConfig::default())
    }

    #[test]
    fn graph_port_out_of_range() {
        let mut graph = Graph::new();
        let osc = graph.add_node(NodeKind::Oscillator, ChannelConfig::default());
        let g = gain(&mut graph);
        assert!(matches!(
            graph.add_edge(edge(osc, 1, g, 0)),
            Err(Error::IndexOutOfRange {
                kind: PortKind::Output,
                ..
            })
        ));
        assert!(matches!(
            graph.add_edge(edge(osc, 0, g, 1)),
            Err(Error::IndexOutOfRange {
                kind: PortKind::Input,
                ..
            })
        ));
        // Oscillators have no inputs.
        assert!(graph.add_edge(edge(g, 0, osc, 0)).is_err());
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn graph_accepts_cycles() {
        let mut graph = Graph::new();
        let a = gain(&mut graph);
        let b = gain(&mut graph);
        assert!(graph.add_edge(edge(a, 0, b, 0)).unwrap());
        assert!(graph.add_edge(edge(b, 0, a, 0)).unwrap());
        assert_eq!(graph.edges.len(), 2);
    }

    #[test]
    fn graph_duplicate_edge_is_noop() {
        let mut graph = Graph::new();
        let a = gain(&mut graph);
        let b = gain(&mut graph);
        assert!(graph.add_edge(edge(a, 0, b, 0)).unwrap());
        assert!(!graph.add_edge(edge(a, 0, b, 0)).unwrap());
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn graph_disconnect_specific_destination() {
        let mut graph = Graph::new();
        let a = gain(&mut graph);
        let b = gain(&mut graph);
        let c = gain(&mut graph);
        graph.add_edge(edge(a, 0, b, 0)).unwrap();
        graph.add_edge(edge(a, 0, c, 0)).unwrap();
        let options = DisconnectOptions {
            destination: Some(c),
            ..Default::default()
        };
        assert_eq!(graph.disconnect(a, options).unwrap(), 1);
        assert_eq!(graph.edges, vec![edge(a, 0, b, 0)]);
        assert!(matches!(
            graph.disconnect(a, options),
            Err(Error::InvalidAccess(_))
        ));
        assert_eq!(graph.disconnect(a, DisconnectOptions::default()).unwrap(), 1);
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn graph_param_edges() {
        let mut graph = Graph::new();
        let lfo = graph.add_node(NodeKind::Oscillator, ChannelConfig::default());
        let g = gain(&mut graph);
        let pe = ParamEdge {
            from_node: lfo,
            from_port: PortId(0),
            to_node: g,
            param: 0,
        };
        assert!(graph.add_param_edge(pe).unwrap());
        assert!(graph
            .add_param_edge(ParamEdge { param: 1, ..pe })
            .is_err());
        graph.remove_node(lfo).unwrap();
        assert!(graph.param_edges.is_empty());
        assert!(graph.node(lfo).is_err());
    }

    #[test]
    fn graph_reuses_slots_with_new_generation() {
        let mut graph = Graph::new();
        let a = gain(&mut graph);
        let b = gain(&mut graph);
        graph.remove_node(a).unwrap();
        assert_eq!(graph.live_count(), 1);
        let c = gain(&mut graph);
        assert_eq!(c, NodeId(0, 1));
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.live_count(), 2);
        // The old id does not reach the new occupant.
        assert!(matches!(graph.node(a), Err(Error::InvalidNode(_))));
        assert!(graph.add_edge(edge(a, 0, b, 0)).is_err());
        assert!(graph.remove_node(a).is_err());
        assert!(graph.node(c).is_ok());
        assert_eq!(c.to_string(), "#0v1");
    }

    proptest! {
        #[test]
        fn graph_bad_connect_never_mutates(output in 0..4usize, input in 0..4usize) {
            let mut graph = Graph::new();
            let a = gain(&mut graph);
            let b = gain(&mut graph);
            let result = graph.add_edge(edge(a, output, b, input));
            if output == 0 && input == 0 {
                prop_assert!(result.is_ok());
                prop_assert_eq!(graph.edges.len(), 1);
            } else {
                prop_assert!(result.is_err());
                prop_assert!(graph.edges.is_empty());
            }
        }
    }
}
