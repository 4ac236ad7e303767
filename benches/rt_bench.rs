use auxgraph::graph::{Edge, Graph, NodeId, PortId};
use auxgraph::node::{ChannelConfig, NodeKind};
use auxgraph::plan::Plan;
use auxgraph::{Context, ContextOptions};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_process_block(c: &mut Criterion) {
    let options = ContextOptions::default().block_size(1024).output_channels(1);
    let (mut ctx, mut renderer) = Context::new(options).unwrap();
    let osc = ctx.create_oscillator().unwrap();
    let gain = ctx.create_gain().unwrap();
    ctx.set_value(gain.gain(), 0.5).unwrap();
    ctx.connect(osc, gain).unwrap();
    ctx.connect(gain, ctx.destination()).unwrap();
    ctx.start(osc, 0.0).unwrap();
    let mut out = vec![0.0; 1024];

    c.bench_function("process_block_1024", |b| {
        b.iter(|| {
            renderer.process_block(black_box(&mut out)).unwrap();
            black_box(&out);
        })
    });
}

fn bench_automated_chain(c: &mut Criterion) {
    // Worst case for automation: every gain a-rate ramped.
    let (mut ctx, mut renderer) = Context::new(ContextOptions::default()).unwrap();
    let osc = ctx.create_oscillator().unwrap();
    let mut prev: NodeId = osc.into();
    for i in 0..10 {
        let next = ctx.create_gain().unwrap();
        ctx.set_value_at_time(next.gain(), 1.0, 0.0).unwrap();
        ctx.linear_ramp_to_value_at_time(next.gain(), 0.5, 1.0 + i as f64)
            .unwrap();
        ctx.connect(prev, next).unwrap();
        prev = next.into();
    }
    ctx.connect(prev, ctx.destination()).unwrap();
    ctx.start(osc, 0.0).unwrap();
    let mut out = vec![0.0; 256];

    c.bench_function("rt_automated_chain", |b| {
        b.iter(|| {
            for _ in 0..100 {
                renderer.process_block(black_box(&mut out)).unwrap();
            }
            black_box(&out);
        })
    });
}

fn bench_plan_compile(c: &mut Criterion) {
    let mut graph = Graph::new();
    let ids: Vec<NodeId> = (0..200)
        .map(|i| {
            let kind = if i % 10 == 0 {
                NodeKind::Delay { max_delay_time: 1.0 }
            } else {
                NodeKind::Gain
            };
            graph.add_node(kind, ChannelConfig::default())
        })
        .collect();
    for (i, &from) in ids.iter().enumerate() {
        for step in [1, 7, 31] {
            let to = ids[(i + step) % ids.len()];
            graph
                .add_edge(Edge {
                    from_node: from,
                    from_port: PortId(0),
                    to_node: to,
                    to_port: PortId(0),
                })
                .unwrap();
        }
    }

    c.bench_function("plan_compile_200", |b| {
        b.iter(|| black_box(Plan::compile(black_box(&graph), 128)))
    });
}

criterion_group!(benches, bench_process_block, bench_automated_chain, bench_plan_compile);
criterion_main!(benches);
