//! Plan module: compile the routing graph into an executable render plan.
//!
//! Compilation runs on the control side whenever the topology changes. It
//! finds strongly connected components over audio and parameter edges,
//! breaks every cycle that contains a delay node by turning that node's
//! incoming edges into one-block-stale reads, and orders the rest
//! topologically. A cycle that survives (no delay node on it) is not an
//! error here: its members are muted and the plan carries a
//! [`RenderError`] that the renderer reports on every block.

use crate::error::RenderError;
use crate::graph::{Graph, NodeId};
use crate::invariant_ppt::{
    assert_invariant, CYCLE_HAS_DELAY, PLAN_COVERS_LIVE_NODES, PLAN_ORDER_RESPECTS_EDGES,
};
use std::collections::BTreeSet;

/// Where a port or parameter reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Source {
    pub node: NodeId,
    pub port: usize,
    /// Read the previous block's output instead of the current one.
    pub stale: bool,
}

/// The compiled plan: processing order, per-port sources and cycle policy.
/// All per-node tables are indexed by `NodeId.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub block_size: usize,
    pub order: Vec<NodeId>,
    /// `inputs[node][port]` lists the outputs summed into that input.
    pub inputs: Vec<Vec<Vec<Source>>>,
    /// `param_inputs[node][param]` lists the outputs modulating that parameter.
    pub param_inputs: Vec<Vec<Vec<Source>>>,
    /// Outputs read stale by someone, sorted; their history is kept across
    /// blocks.
    pub stale_outputs: Vec<(NodeId, usize)>,
    /// Delay nodes inside a validated feedback cycle.
    pub in_cycle: Vec<bool>,
    /// Members of delay-free cycles; they render silence.
    pub muted: Vec<bool>,
    pub cycle_error: Option<RenderError>,
}

/// One dependency edge, audio or parameter, in connection order.
#[derive(Debug, Clone, Copy)]
struct Link {
    from: usize,
    output: usize,
    to: usize,
    /// Input port, or parameter index when `param` is set.
    input: usize,
    param: bool,
}

impl Plan {
    /// A plan with nothing to render.
    pub fn empty(block_size: usize) -> Self {
        Self {
            block_size,
            order: Vec::new(),
            inputs: Vec::new(),
            param_inputs: Vec::new(),
            stale_outputs: Vec::new(),
            in_cycle: Vec::new(),
            muted: Vec::new(),
            cycle_error: None,
        }
    }

    /// Compile `graph`. Never fails: an invalid cycle is recorded in
    /// `cycle_error`.
    pub fn compile(graph: &Graph, block_size: usize) -> Self {
        let n = graph.nodes.len();
        let live: Vec<bool> = graph.nodes.iter().map(Option::is_some).collect();
        let ids: Vec<NodeId> = graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, d)| d.as_ref().map_or(NodeId(i, 0), |d| d.id))
            .collect();
        let links: Vec<Link> = graph
            .edges
            .iter()
            .map(|e| Link {
                from: e.from_node.0,
                output: e.from_port.0,
                to: e.to_node.0,
                input: e.to_port.0,
                param: false,
            })
            .chain(graph.param_edges.iter().map(|e| Link {
                from: e.from_node.0,
                output: e.from_port.0,
                to: e.to_node.0,
                input: e.param,
                param: true,
            }))
            .collect();

        // Pass 1: cycles through a delay node are broken at that node's inputs.
        let mut stale = vec![false; links.len()];
        let mut in_cycle = vec![false; n];
        let cyclic: Vec<Vec<usize>> = strongly_connected(n, &live, &links, &stale)
            .into_iter()
            .filter(|c| is_cyclic(c, &links, &stale))
            .collect();
        for component in &cyclic {
            let delays: Vec<usize> = component
                .iter()
                .copied()
                .filter(|&i| {
                    graph.nodes[i]
                        .as_ref()
                        .is_some_and(|d| d.kind.introduces_delay())
                })
                .collect();
            for &d in &delays {
                in_cycle[d] = true;
                for (k, link) in links.iter().enumerate() {
                    if link.to == d {
                        stale[k] = true;
                    }
                }
            }
        }

        // Pass 2: whatever is still cyclic has no delay on it.
        let mut muted = vec![false; n];
        let mut cycle_error = None;
        let mut inside_invalid = vec![false; links.len()];
        for component in strongly_connected(n, &live, &links, &stale) {
            if !is_cyclic(&component, &links, &stale) {
                continue;
            }
            let mut member = vec![false; n];
            for &i in &component {
                muted[i] = true;
                member[i] = true;
            }
            // The most recent audio connection closes the cycle; parameter
            // links only when the cycle has no audio link.
            let mut closing: Option<usize> = None;
            for (k, link) in links.iter().enumerate() {
                if stale[k] || !member[link.from] || !member[link.to] {
                    continue;
                }
                inside_invalid[k] = true;
                let keep_audio = link.param && closing.is_some_and(|c| !links[c].param);
                if !keep_audio {
                    closing = Some(k);
                }
            }
            if cycle_error.is_none() {
                if let Some(k) = closing {
                    let link = links[k];
                    tracing::warn!(
                        from = link.from,
                        to = link.to,
                        "delay-free feedback cycle; muting {} nodes",
                        component.len()
                    );
                    cycle_error = Some(RenderError::DelayFreeCycle {
                        from: ids[link.from],
                        output: link.output,
                        to: ids[link.to],
                        input: link.input,
                    });
                }
            }
        }

        let order = topo_order(&ids, &live, &links, &stale, &inside_invalid);

        let mut inputs: Vec<Vec<Vec<Source>>> = graph
            .nodes
            .iter()
            .map(|d| vec![Vec::new(); d.as_ref().map_or(0, |d| d.inputs)])
            .collect();
        let mut param_inputs: Vec<Vec<Vec<Source>>> = graph
            .nodes
            .iter()
            .map(|d| vec![Vec::new(); d.as_ref().map_or(0, |d| d.kind.params().len())])
            .collect();
        let mut stale_outputs = BTreeSet::new();
        for (k, link) in links.iter().enumerate() {
            let source = Source {
                node: ids[link.from],
                port: link.output,
                stale: stale[k],
            };
            if stale[k] {
                stale_outputs.insert((ids[link.from], link.output));
            }
            let table = if link.param {
                &mut param_inputs
            } else {
                &mut inputs
            };
            table[link.to][link.input].push(source);
        }

        let plan = Self {
            block_size,
            order,
            inputs,
            param_inputs,
            stale_outputs: stale_outputs.into_iter().collect(),
            in_cycle,
            muted,
            cycle_error,
        };
        plan.check(graph, &links, &stale, &inside_invalid);
        tracing::debug!(
            nodes = plan.order.len(),
            stale = plan.stale_outputs.len(),
            valid = plan.cycle_error.is_none(),
            "compiled render plan"
        );
        plan
    }

    /// Position of each node in `order`, `usize::MAX` for absent ones.
    fn positions(&self, n: usize) -> Vec<usize> {
        let mut position = vec![usize::MAX; n];
        for (p, id) in self.order.iter().enumerate() {
            position[id.0] = p;
        }
        position
    }

    fn check(&self, graph: &Graph, links: &[Link], stale: &[bool], inside_invalid: &[bool]) {
        let live = graph.live_nodes().count();
        assert_invariant(
            PLAN_COVERS_LIVE_NODES,
            self.order.len() == live,
            "plan must schedule every live node once",
            Some("Plan::compile"),
        );
        let position = self.positions(graph.nodes.len());
        let ordered = links
            .iter()
            .enumerate()
            .filter(|(k, _)| !stale[*k] && !inside_invalid[*k])
            .all(|(_, l)| position[l.from] < position[l.to]);
        assert_invariant(
            PLAN_ORDER_RESPECTS_EDGES,
            ordered,
            "sources must precede their consumers",
            Some("Plan::compile"),
        );
        let delay_in_every_cycle = self
            .in_cycle
            .iter()
            .enumerate()
            .filter(|(_, &c)| c)
            .all(|(i, _)| {
                graph.nodes[i]
                    .as_ref()
                    .is_some_and(|d| d.kind.introduces_delay())
            });
        assert_invariant(
            CYCLE_HAS_DELAY,
            delay_in_every_cycle,
            "only delay nodes may break a cycle",
            Some("Plan::compile"),
        );
    }

    /// True when node `id` sits inside a validated feedback cycle.
    pub fn is_in_cycle(&self, id: NodeId) -> bool {
        self.in_cycle.get(id.0).copied().unwrap_or(false)
    }

    pub fn is_muted(&self, id: NodeId) -> bool {
        self.muted.get(id.0).copied().unwrap_or(false)
    }
}

/// A component is cyclic if it has several members or a self-loop.
fn is_cyclic(component: &[usize], links: &[Link], stale: &[bool]) -> bool {
    component.len() > 1
        || links
            .iter()
            .enumerate()
            .any(|(k, l)| !stale[k] && l.from == component[0] && l.to == component[0])
}

/// Tarjan's algorithm over the non-stale links, iterative.
fn strongly_connected(n: usize, live: &[bool], links: &[Link], stale: &[bool]) -> Vec<Vec<usize>> {
    let mut adjacency = vec![Vec::new(); n];
    for (k, link) in links.iter().enumerate() {
        if !stale[k] {
            adjacency[link.from].push(link.to);
        }
    }

    const UNVISITED: usize = usize::MAX;
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut components = Vec::new();
    let mut next = 0;

    for root in 0..n {
        if !live[root] || index[root] != UNVISITED {
            continue;
        }
        // (node, next neighbour to visit)
        let mut call = vec![(root, 0usize)];
        index[root] = next;
        low[root] = next;
        next += 1;
        stack.push(root);
        on_stack[root] = true;

        while let Some(frame) = call.last_mut() {
            let v = frame.0;
            if let Some(&w) = adjacency[v].get(frame.1) {
                frame.1 += 1;
                if index[w] == UNVISITED {
                    index[w] = next;
                    low[w] = next;
                    next += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    call.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
                continue;
            }
            call.pop();
            if let Some(&(parent, _)) = call.last() {
                low[parent] = low[parent].min(low[v]);
            }
            if low[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            }
        }
    }
    components
}

/// Kahn's algorithm, always taking the lowest ready id so the order is
/// deterministic. Stale links and links inside invalid cycles impose no
/// ordering.
fn topo_order(
    ids: &[NodeId],
    live: &[bool],
    links: &[Link],
    stale: &[bool],
    inside_invalid: &[bool],
) -> Vec<NodeId> {
    let n = ids.len();
    let mut in_degree = vec![0usize; n];
    let mut adjacency = vec![Vec::new(); n];
    for (k, link) in links.iter().enumerate() {
        if stale[k] || inside_invalid[k] {
            continue;
        }
        adjacency[link.from].push(link.to);
        in_degree[link.to] += 1;
    }
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| live[i] && in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(v) = ready.pop_first() {
        order.push(ids[v]);
        for &w in &adjacency[v] {
            in_degree[w] -= 1;
            if in_degree[w] == 0 {
                ready.insert(w);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, ParamEdge, PortId};
    use crate::node::{ChannelConfig, NodeKind};

    fn add(graph: &mut Graph, kind: NodeKind) -> NodeId {
        graph.add_node(kind, ChannelConfig::default())
    }

    fn connect(graph: &mut Graph, from: NodeId, to: NodeId) {
        graph
            .add_edge(Edge {
                from_node: from,
                from_port: PortId(0),
                to_node: to,
                to_port: PortId(0),
            })
            .unwrap();
    }

    #[test]
    fn plan_orders_chain() {
        let mut graph = Graph::new();
        let dest = add(&mut graph, NodeKind::Destination);
        let gain = add(&mut graph, NodeKind::Gain);
        let osc = add(&mut graph, NodeKind::Oscillator);
        connect(&mut graph, osc, gain);
        connect(&mut graph, gain, dest);
        let plan = Plan::compile(&graph, 128);
        assert_eq!(plan.order, vec![osc, gain, dest]);
        assert!(plan.cycle_error.is_none());
        assert_eq!(plan.inputs[gain.0][0], vec![Source { node: osc, port: 0, stale: false }]);
    }

    #[test]
    fn plan_stability() {
        let mut graph = Graph::new();
        let a = add(&mut graph, NodeKind::Gain);
        let b = add(&mut graph, NodeKind::Gain);
        connect(&mut graph, a, b);
        assert_eq!(Plan::compile(&graph, 128), Plan::compile(&graph, 128));
    }

    #[test]
    fn delay_free_cycle_is_reported_and_muted() {
        let mut graph = Graph::new();
        let a = add(&mut graph, NodeKind::Gain);
        let b = add(&mut graph, NodeKind::Gain);
        connect(&mut graph, a, b);
        connect(&mut graph, b, a);
        let plan = Plan::compile(&graph, 128);
        assert_eq!(
            plan.cycle_error,
            Some(RenderError::DelayFreeCycle { from: b, output: 0, to: a, input: 0 })
        );
        assert!(plan.is_muted(a) && plan.is_muted(b));
        assert_eq!(plan.order.len(), 2);
    }

    #[test]
    fn delay_breaks_cycle_with_stale_input() {
        let mut graph = Graph::new();
        let a = add(&mut graph, NodeKind::Gain);
        let d = add(&mut graph, NodeKind::Delay { max_delay_time: 1.0 });
        connect(&mut graph, a, d);
        connect(&mut graph, d, a);
        let plan = Plan::compile(&graph, 128);
        assert!(plan.cycle_error.is_none());
        assert!(plan.is_in_cycle(d));
        assert!(!plan.is_in_cycle(a));
        assert_eq!(plan.stale_outputs, vec![(a, 0)]);
        assert!(plan.inputs[d.0][0][0].stale);
        assert_eq!(plan.order, vec![d, a]);
    }

    #[test]
    fn param_edge_cycle_counts() {
        let mut graph = Graph::new();
        let a = add(&mut graph, NodeKind::Gain);
        let b = add(&mut graph, NodeKind::Gain);
        connect(&mut graph, a, b);
        graph
            .add_param_edge(ParamEdge {
                from_node: b,
                from_port: PortId(0),
                to_node: a,
                param: 0,
            })
            .unwrap();
        let plan = Plan::compile(&graph, 128);
        assert!(plan.cycle_error.is_some());
    }

    #[test]
    fn self_loop_without_delay_is_invalid() {
        let mut graph = Graph::new();
        let a = add(&mut graph, NodeKind::Gain);
        connect(&mut graph, a, a);
        let plan = Plan::compile(&graph, 128);
        assert!(plan.is_muted(a));
        assert!(plan.cycle_error.is_some());
    }

    #[test]
    fn reused_slot_carries_its_generation() {
        let mut graph = Graph::new();
        let a = add(&mut graph, NodeKind::Gain);
        let b = add(&mut graph, NodeKind::Gain);
        graph.remove_node(a).unwrap();
        let c = add(&mut graph, NodeKind::Gain);
        connect(&mut graph, c, b);
        let plan = Plan::compile(&graph, 128);
        assert_eq!(plan.order, vec![c, b]);
        assert_eq!(plan.inputs[b.0][0][0].node, c);
    }

    #[test]
    fn two_delay_cycles_share_a_component() {
        let mut graph = Graph::new();
        let a = add(&mut graph, NodeKind::Gain);
        let d1 = add(&mut graph, NodeKind::Delay { max_delay_time: 1.0 });
        let d2 = add(&mut graph, NodeKind::Delay { max_delay_time: 1.0 });
        connect(&mut graph, a, d1);
        connect(&mut graph, d1, a);
        connect(&mut graph, a, d2);
        connect(&mut graph, d2, a);
        let plan = Plan::compile(&graph, 128);
        assert!(plan.cycle_error.is_none());
        assert!(plan.is_in_cycle(d1) && plan.is_in_cycle(d2));
        assert_eq!(plan.stale_outputs, vec![(a, 0)]);
    }

    #[test]
    fn removed_nodes_are_skipped() {
        let mut graph = Graph::new();
        let a = add(&mut graph, NodeKind::Gain);
        let b = add(&mut graph, NodeKind::Gain);
        connect(&mut graph, a, b);
        graph.remove_node(a).unwrap();
        let plan = Plan::compile(&graph, 128);
        assert_eq!(plan.order, vec![b]);
    }
}
