//! auxgraph: a block-based audio graph engine with sample-accurate
//! parameter automation.
//!
//! A [`Context`] builds and edits the graph: nodes, connections and
//! automation timelines. Its paired [`Renderer`] pulls fixed-size blocks of
//! interleaved output through a compiled [`plan::Plan`] without locking or
//! allocating. Edits reach the renderer as snapshots over lock-free queues.
//!
//! ```
//! use auxgraph::{Context, ContextOptions};
//!
//! let (mut ctx, mut renderer) = Context::new(ContextOptions::default()).unwrap();
//! let osc = ctx.create_oscillator().unwrap();
//! let gain = ctx.create_gain().unwrap();
//! ctx.set_value(gain.gain(), 0.5).unwrap();
//! ctx.connect(osc, gain).unwrap();
//! ctx.connect(gain, ctx.destination()).unwrap();
//! ctx.start(osc, 0.0).unwrap();
//!
//! let mut out = vec![0.0; renderer.block_size() * renderer.output_channels()];
//! renderer.process_block(&mut out).unwrap();
//! ```

pub mod buffer;
pub mod config;
pub mod context;
pub mod control;
pub mod decode;
pub mod error;
pub mod graph;
#[doc(hidden)]
pub mod invariant_ppt;
pub mod node;
pub mod param;
pub mod plan;
pub mod rt;
pub mod states;

pub use buffer::{AudioBuffer, AudioBus};
pub use config::ContextOptions;
pub use context::{
    AnalyserNode, BiquadFilterNode, BufferSourceNode, ChannelMergerNode, ChannelSplitterNode,
    ConnectOptions, Context, DelayNode, DynamicsCompressorNode, GainNode, OscillatorNode, ParamRef,
    StartOptions, WaveShaperNode,
};
pub use control::Notification;
pub use decode::{AudioDecoder, DecodeHandle, WavDecoder};
pub use error::{Error, RenderError, Result};
pub use graph::{DisconnectOptions, NodeId};
pub use node::biquad::BiquadFilterType;
pub use node::buffer_source::LoopSettings;
pub use node::oscillator::{OscillatorType, PeriodicWave};
pub use node::{
    AudioProcessor, ChannelConfig, ChannelCountMode, ChannelInterpretation, ParamValues,
    ProcessContext, ProcessStatus,
};
pub use param::{AutomationRate, ParamDescriptor};
pub use rt::{render_offline, Renderer};
