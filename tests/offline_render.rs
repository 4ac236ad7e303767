use auxgraph::{render_offline, Context, ContextOptions, Renderer};

fn patch(ctx: &mut Context) {
    let osc = ctx.create_oscillator().unwrap();
    let filter = ctx.create_biquad_filter().unwrap();
    let gain = ctx.create_gain().unwrap();
    ctx.set_value(osc.frequency(), 220.0).unwrap();
    ctx.set_value_at_time(gain.gain(), 0.0, 0.0).unwrap();
    ctx.linear_ramp_to_value_at_time(gain.gain(), 1.0, 0.01).unwrap();
    ctx.connect(osc, filter).unwrap();
    ctx.connect(filter, gain).unwrap();
    ctx.connect(gain, ctx.destination()).unwrap();
    ctx.start(osc, 0.0).unwrap();
}

fn fresh() -> (Context, Renderer) {
    let (mut ctx, renderer) = Context::new(ContextOptions::default()).unwrap();
    patch(&mut ctx);
    (ctx, renderer)
}

#[test]
fn offline_render_determinism() {
    let (_ctx_a, mut a) = fresh();
    let (_ctx_b, mut b) = fresh();
    let out_a = render_offline(&mut a, 4800).unwrap();
    let out_b = render_offline(&mut b, 4800).unwrap();
    assert_eq!(out_a, out_b);
    assert!(out_a.iter().any(|&s| s != 0.0));
}

#[test]
fn offline_render_truncates_partial_blocks() {
    let (_ctx, mut renderer) = fresh();
    let out = render_offline(&mut renderer, 100).unwrap();
    assert_eq!(out.len(), 200);
    // Whole blocks are still rendered.
    assert_eq!(renderer.current_frame(), 128);
}

#[test]
fn offline_render_block_size_does_not_change_output() {
    let (mut ctx, mut small) = Context::new(ContextOptions::default().block_size(32)).unwrap();
    patch(&mut ctx);
    let (_ctx, mut large) = fresh();
    let a = render_offline(&mut small, 1024).unwrap();
    let b = render_offline(&mut large, 1024).unwrap();
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).abs() < 1e-5);
    }
}
