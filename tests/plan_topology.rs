use auxgraph::graph::{Edge, Graph, NodeId, ParamEdge, PortId};
use auxgraph::node::{ChannelConfig, NodeKind};
use auxgraph::plan::Plan;

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

fn gain(graph: &mut Graph) -> NodeId {
    graph.add_node(NodeKind::Gain, ChannelConfig::default())
}

#[test]
fn plan_topology_preservation() {
    let mut graph = Graph::new();
    let sink = gain(&mut graph);
    let mix = gain(&mut graph);
    let a = graph.add_node(NodeKind::Oscillator, ChannelConfig::default());
    let b = graph.add_node(NodeKind::Oscillator, ChannelConfig::default());
    connect(&mut graph, a, mix);
    connect(&mut graph, b, mix);
    connect(&mut graph, mix, sink);

    let plan = Plan::compile(&graph, 128);
    assert_eq!(plan.order, vec![a, b, mix, sink]);
    assert_eq!(plan.inputs[mix.0][0].len(), 2);
    assert!(plan.cycle_error.is_none());
    assert!(plan.stale_outputs.is_empty());
}

#[test]
fn plan_ties_break_by_lowest_id() {
    let mut graph = Graph::new();
    let nodes: Vec<NodeId> = (0..5).map(|_| gain(&mut graph)).collect();
    let plan = Plan::compile(&graph, 128);
    assert_eq!(plan.order, nodes);
}

#[test]
fn plan_param_edges_order_modulators_first() {
    let mut graph = Graph::new();
    let target = gain(&mut graph);
    let lfo = graph.add_node(NodeKind::Oscillator, ChannelConfig::default());
    graph
        .add_param_edge(ParamEdge {
            from_node: lfo,
            from_port: PortId(0),
            to_node: target,
            param: 0,
        })
        .unwrap();
    let plan = Plan::compile(&graph, 128);
    assert_eq!(plan.order, vec![lfo, target]);
    assert_eq!(plan.param_inputs[target.0][0].len(), 1);
}

#[test]
fn plan_marks_delay_cycle_edges_stale() {
    let mut graph = Graph::new();
    let delay = graph.add_node(NodeKind::Delay { max_delay_time: 1.0 }, ChannelConfig::default());
    let feedback = gain(&mut graph);
    connect(&mut graph, delay, feedback);
    connect(&mut graph, feedback, delay);

    let plan = Plan::compile(&graph, 128);
    assert!(plan.cycle_error.is_none());
    assert!(plan.is_in_cycle(delay));
    assert!(!plan.is_in_cycle(feedback));
    assert!(plan.inputs[delay.0][0][0].stale);
    assert!(!plan.inputs[feedback.0][0][0].stale);
    assert_eq!(plan.stale_outputs, vec![(feedback, 0)]);
    assert_eq!(plan.order, vec![delay, feedback]);
}

#[test]
fn plan_skips_removed_nodes() {
    let mut graph = Graph::new();
    let a = gain(&mut graph);
    let b = gain(&mut graph);
    let c = gain(&mut graph);
    connect(&mut graph, a, b);
    connect(&mut graph, b, c);
    graph.remove_node(b).unwrap();
    let plan = Plan::compile(&graph, 128);
    assert_eq!(plan.order, vec![a, c]);
    assert!(plan.inputs[b.0].is_empty());
}

#[test]
fn plan_determinism() {
    let mut graph = Graph::new();
    let a = gain(&mut graph);
    let b = gain(&mut graph);
    let c = gain(&mut graph);
    connect(&mut graph, c, a);
    connect(&mut graph, b, a);
    let first = Plan::compile(&graph, 64);
    for _ in 0..10 {
        assert_eq!(Plan::compile(&graph, 64), first);
    }
    assert_eq!(first.order, vec![b, c, a]);
}
