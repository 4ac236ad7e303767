use approx::assert_abs_diff_eq;
use auxgraph::{render_offline, AudioBuffer, Context, ContextOptions, Renderer};
use std::sync::Arc;

fn mono(sample_rate: f32) -> (Context, Renderer) {
    Context::new(ContextOptions::with_sample_rate(sample_rate).output_channels(1)).unwrap()
}

#[test]
fn dsp_gain_zero_is_silence() {
    let (mut ctx, mut renderer) = mono(48_000.0);
    let osc = ctx.create_oscillator().unwrap();
    let gain = ctx.create_gain().unwrap();
    ctx.set_value(gain.gain(), 0.0).unwrap();
    ctx.connect(osc, gain).unwrap();
    ctx.connect(gain, ctx.destination()).unwrap();
    ctx.start(osc, 0.0).unwrap();
    let out = render_offline(&mut renderer, 512).unwrap();
    assert!(out.iter().all(|&s| s == 0.0));
}

#[test]
fn dsp_fan_in_sums_sources() {
    let (mut ctx, mut renderer) = mono(48_000.0);
    let a = ctx.create_oscillator().unwrap();
    let b = ctx.create_oscillator().unwrap();
    let sum = ctx.create_gain().unwrap();
    ctx.connect(a, sum).unwrap();
    ctx.connect(b, sum).unwrap();
    ctx.connect(sum, ctx.destination()).unwrap();
    ctx.start(a, 0.0).unwrap();
    ctx.start(b, 0.0).unwrap();
    let mixed = render_offline(&mut renderer, 256).unwrap();

    let (mut ctx, mut renderer) = mono(48_000.0);
    let single = ctx.create_oscillator().unwrap();
    ctx.connect(single, ctx.destination()).unwrap();
    ctx.start(single, 0.0).unwrap();
    let one = render_offline(&mut renderer, 256).unwrap();

    for (m, s) in mixed.iter().zip(&one) {
        assert_abs_diff_eq!(*m, 2.0 * s, epsilon = 1e-6);
    }
}

#[test]
fn dsp_linear_ramp_is_sample_accurate() {
    let (mut ctx, mut renderer) = mono(8192.0);
    let source = ctx.create_buffer_source().unwrap();
    let ones = AudioBuffer::from_channels(vec![vec![1.0; 8192]], 8192.0).unwrap();
    ctx.set_buffer(source, Arc::new(ones)).unwrap();
    let gain = ctx.create_gain().unwrap();
    ctx.set_value_at_time(gain.gain(), 0.0, 0.0).unwrap();
    ctx.linear_ramp_to_value_at_time(gain.gain(), 1.0, 0.125).unwrap();
    ctx.connect(source, gain).unwrap();
    ctx.connect(gain, ctx.destination()).unwrap();
    ctx.start(source, 0.0).unwrap();

    let out = render_offline(&mut renderer, 2048).unwrap();
    // The ramp spans 1024 frames.
    for n in [0usize, 256, 512, 1000] {
        assert_abs_diff_eq!(out[n], n as f32 / 1024.0, epsilon = 1e-5);
    }
    assert!(out[1024..].iter().all(|&s| s == 1.0));
}

#[test]
fn dsp_audio_rate_modulation_adds_to_intrinsic_value() {
    let (mut ctx, mut renderer) = mono(8192.0);
    let carrier = ctx.create_buffer_source().unwrap();
    let ones = AudioBuffer::from_channels(vec![vec![1.0; 4096]], 8192.0).unwrap();
    ctx.set_buffer(carrier, Arc::new(ones)).unwrap();
    let offset = ctx.create_buffer_source().unwrap();
    let quarter = AudioBuffer::from_channels(vec![vec![0.25; 4096]], 8192.0).unwrap();
    ctx.set_buffer(offset, Arc::new(quarter)).unwrap();

    let vca = ctx.create_gain().unwrap();
    ctx.set_value(vca.gain(), 0.5).unwrap();
    ctx.connect(carrier, vca).unwrap();
    ctx.connect_param(offset, 0, vca.gain()).unwrap();
    ctx.connect(vca, ctx.destination()).unwrap();
    ctx.start(carrier, 0.0).unwrap();
    ctx.start(offset, 0.0).unwrap();

    let out = render_offline(&mut renderer, 256).unwrap();
    assert!(out.iter().all(|&s| s == 0.75));

    ctx.disconnect_param(offset, 0, vca.gain()).unwrap();
    let out = render_offline(&mut renderer, 256).unwrap();
    assert!(out.iter().all(|&s| s == 0.5));
}

#[test]
fn dsp_stereo_source_into_mono_destination_downmixes() {
    let (mut ctx, mut renderer) = mono(8192.0);
    let source = ctx.create_buffer_source().unwrap();
    let stereo = AudioBuffer::from_channels(vec![vec![1.0; 512], vec![0.5; 512]], 8192.0).unwrap();
    ctx.set_buffer(source, Arc::new(stereo)).unwrap();
    ctx.connect(source, ctx.destination()).unwrap();
    ctx.start(source, 0.0).unwrap();
    let out = render_offline(&mut renderer, 128).unwrap();
    assert!(out.iter().all(|&s| s == 0.75));
}
