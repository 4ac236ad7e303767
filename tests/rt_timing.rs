use approx::assert_abs_diff_eq;
use auxgraph::{
    render_offline, AudioBuffer, Context, ContextOptions, Error, Notification, StartOptions,
};
use std::sync::Arc;

#[test]
fn rt_current_time_advances_per_block() {
    let (ctx, mut renderer) = Context::new(ContextOptions::default()).unwrap();
    assert_eq!(ctx.current_time(), 0.0);
    let mut out = vec![0.0; 256];
    for n in 1..=10u64 {
        renderer.process_block(&mut out).unwrap();
        assert_eq!(ctx.current_frame(), n * 128);
        assert_abs_diff_eq!(ctx.current_time(), (n * 128) as f64 / 48_000.0, epsilon = 1e-12);
    }
}

#[test]
fn rt_wrong_output_size_keeps_time() {
    let (ctx, mut renderer) = Context::new(ContextOptions::default()).unwrap();
    let mut out = vec![0.0; 128];
    assert!(renderer.process_block(&mut out).is_err());
    assert_eq!(ctx.current_frame(), 0);
}

#[test]
fn rt_buffer_source_ends_once() {
    let options = ContextOptions::with_sample_rate(8192.0).output_channels(1);
    let (mut ctx, mut renderer) = Context::new(options).unwrap();
    let source = ctx.create_buffer_source().unwrap();
    let buffer = AudioBuffer::from_channels(vec![vec![0.5; 200]], 8192.0).unwrap();
    ctx.set_buffer(source, Arc::new(buffer)).unwrap();
    ctx.connect(source, ctx.destination()).unwrap();
    ctx.start(source, 0.0).unwrap();
    assert!(matches!(ctx.start(source, 0.0), Err(Error::InvalidState(_))));

    let out = render_offline(&mut renderer, 1024).unwrap();
    assert!(out[..200].iter().all(|&s| s == 0.5));
    assert!(out[200..].iter().all(|&s| s == 0.0));

    let notifications = ctx.poll_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(
        notifications[0],
        Notification::Ended {
            node: source.id(),
            time: 256.0 / 8192.0,
        }
    );
    render_offline(&mut renderer, 1024).unwrap();
    assert!(ctx.poll_notifications().is_empty());
}

#[test]
fn rt_buffer_source_offset_and_duration() {
    let options = ContextOptions::with_sample_rate(8192.0).output_channels(1);
    let (mut ctx, mut renderer) = Context::new(options).unwrap();
    let source = ctx.create_buffer_source().unwrap();
    let ramp: Vec<f32> = (0..1024).map(|i| i as f32).collect();
    let buffer = AudioBuffer::from_channels(vec![ramp], 8192.0).unwrap();
    ctx.set_buffer(source, Arc::new(buffer)).unwrap();
    ctx.connect(source, ctx.destination()).unwrap();
    ctx.start_with(
        source,
        StartOptions {
            when: 10.0 / 8192.0,
            offset: 100.0 / 8192.0,
            duration: Some(20.0 / 8192.0),
        },
    )
    .unwrap();

    let out = render_offline(&mut renderer, 128).unwrap();
    assert!(out[..10].iter().all(|&s| s == 0.0));
    let played: Vec<f32> = (100..120).map(|i| i as f32).collect();
    assert_eq!(&out[10..30], played.as_slice());
    assert!(out[30..].iter().all(|&s| s == 0.0));
}

#[test]
fn rt_stop_is_sample_accurate_and_notifies() {
    let options = ContextOptions::with_sample_rate(8000.0).output_channels(1);
    let (mut ctx, mut renderer) = Context::new(options).unwrap();
    let osc = ctx.create_oscillator().unwrap();
    ctx.connect(osc, ctx.destination()).unwrap();
    ctx.start(osc, 0.0).unwrap();
    ctx.stop(osc, 0.0125).unwrap();

    let out = render_offline(&mut renderer, 256).unwrap();
    assert!(out[1..100].iter().any(|&s| s != 0.0));
    assert!(out[100..].iter().all(|&s| s == 0.0));
    let ended = ctx.poll_notifications();
    assert_eq!(
        ended,
        vec![Notification::Ended {
            node: osc.id(),
            time: 0.016,
        }]
    );
}

#[test]
fn rt_looping_source_keeps_playing() {
    let options = ContextOptions::with_sample_rate(8192.0).output_channels(1);
    let (mut ctx, mut renderer) = Context::new(options).unwrap();
    let source = ctx.create_buffer_source().unwrap();
    let buffer = AudioBuffer::from_channels(vec![vec![0.0, 1.0, 2.0, 3.0]], 8192.0).unwrap();
    ctx.set_buffer(source, Arc::new(buffer)).unwrap();
    ctx.set_loop(
        source,
        auxgraph::LoopSettings {
            enabled: true,
            start: 0.0,
            end: 0.0,
        },
    )
    .unwrap();
    ctx.connect(source, ctx.destination()).unwrap();
    ctx.start(source, 0.0).unwrap();

    let out = render_offline(&mut renderer, 512).unwrap();
    for (n, &s) in out.iter().enumerate() {
        assert_eq!(s, (n % 4) as f32);
    }
    assert!(ctx.poll_notifications().is_empty());
}

#[test]
fn rt_one_shot_sources_recycle_node_slots() {
    let options = ContextOptions::with_sample_rate(8192.0).output_channels(1);
    let (mut ctx, mut renderer) = Context::new(options).unwrap();
    let note = Arc::new(AudioBuffer::from_channels(vec![vec![0.5; 64]], 8192.0).unwrap());
    let mut out = vec![0.0; 128];
    let mut first = None;

    for n in 0..2000 {
        let source = ctx.create_buffer_source().unwrap();
        first.get_or_insert(source.id());
        ctx.set_buffer(source, Arc::clone(&note)).unwrap();
        ctx.connect(source, ctx.destination()).unwrap();
        ctx.start(source, 0.0).unwrap();
        renderer.process_block(&mut out).unwrap();
        assert_eq!(out[0], 0.5, "note {}", n);
        assert_eq!(out[64], 0.0, "note {}", n);
        assert!(matches!(
            ctx.poll_notifications().as_slice(),
            [Notification::Ended { node, .. }] if *node == source.id()
        ));
        ctx.remove_node(source).unwrap();
        renderer.process_block(&mut out).unwrap();
        assert!(out.iter().all(|&s| s == 0.0));
    }
    // Every note reused the first note's slot.
    let last = ctx.create_gain().unwrap();
    assert_eq!(last.id().0, first.unwrap().0);
}
