use auxgraph::{render_offline, Context, ContextOptions, DisconnectOptions};

#[test]
fn dsp_unstarted_source_is_silent() {
    let (mut ctx, mut renderer) = Context::new(ContextOptions::default()).unwrap();
    let osc = ctx.create_oscillator().unwrap();
    ctx.connect(osc, ctx.destination()).unwrap();
    let out = render_offline(&mut renderer, 512).unwrap();
    assert!(out.iter().all(|&s| s == 0.0));
}

#[test]
fn dsp_disconnect_silences_output() {
    let (mut ctx, mut renderer) = Context::new(ContextOptions::default()).unwrap();
    let osc = ctx.create_oscillator().unwrap();
    ctx.connect(osc, ctx.destination()).unwrap();
    ctx.start(osc, 0.0).unwrap();
    let out = render_offline(&mut renderer, 256).unwrap();
    assert!(out.iter().any(|&s| s != 0.0));

    assert_eq!(ctx.disconnect(osc).unwrap(), 1);
    let out = render_offline(&mut renderer, 256).unwrap();
    assert!(out.iter().all(|&s| s == 0.0));
}

#[test]
fn dsp_selective_disconnect_keeps_other_paths() {
    let (mut ctx, mut renderer) = Context::new(ContextOptions::default()).unwrap();
    let osc = ctx.create_oscillator().unwrap();
    let quiet = ctx.create_gain().unwrap();
    ctx.connect(osc, quiet).unwrap();
    ctx.connect(osc, ctx.destination()).unwrap();
    ctx.start(osc, 0.0).unwrap();

    let removed = ctx
        .disconnect_with(
            osc,
            DisconnectOptions {
                destination: Some(quiet.id()),
                ..DisconnectOptions::default()
            },
        )
        .unwrap();
    assert_eq!(removed, 1);
    let out = render_offline(&mut renderer, 256).unwrap();
    assert!(out.iter().any(|&s| s != 0.0));
}

#[test]
fn dsp_removed_node_goes_quiet() {
    let (mut ctx, mut renderer) = Context::new(ContextOptions::default()).unwrap();
    let osc = ctx.create_oscillator().unwrap();
    ctx.connect(osc, ctx.destination()).unwrap();
    ctx.start(osc, 0.0).unwrap();
    render_offline(&mut renderer, 128).unwrap();

    ctx.remove_node(osc).unwrap();
    let out = render_offline(&mut renderer, 256).unwrap();
    assert!(out.iter().all(|&s| s == 0.0));
    assert!(ctx.start(osc, 1.0).is_err());
}

#[test]
fn dsp_stopped_source_stays_silent() {
    let options = ContextOptions::with_sample_rate(8000.0).output_channels(1);
    let (mut ctx, mut renderer) = Context::new(options).unwrap();
    let osc = ctx.create_oscillator().unwrap();
    ctx.connect(osc, ctx.destination()).unwrap();
    ctx.start(osc, 0.0).unwrap();
    ctx.stop(osc, 0.0).unwrap();
    let out = render_offline(&mut renderer, 512).unwrap();
    assert!(out.iter().all(|&s| s == 0.0));
}
