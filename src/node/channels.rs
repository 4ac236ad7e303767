//! Channel routing: merge mono inputs into one bus, or split a bus into
//! mono outputs.

use super::{AudioProcessor, ParamValues, ProcessContext, ProcessStatus};
use crate::buffer::AudioBus;
use crate::config::MAX_CHANNELS;
use crate::error::{Error, Result};

pub const DEFAULT_CHANNEL_PORTS: usize = 6;

/// Check a merger/splitter port count.
pub fn validate_ports(count: usize) -> Result<()> {
    if count == 0 || count > MAX_CHANNELS {
        return Err(Error::Range(format!(
            "port count {} outside 1-{}",
            count, MAX_CHANNELS
        )));
    }
    Ok(())
}

/// Input `i` becomes output channel `i`. Inputs arrive already down-mixed
/// to mono.
#[derive(Debug, Default)]
pub struct MergerProcessor;

impl AudioProcessor for MergerProcessor {
    fn process(
        &mut self,
        _ctx: &ProcessContext,
        inputs: &[AudioBus],
        outputs: &mut [AudioBus],
        _params: &ParamValues<'_>,
    ) -> ProcessStatus {
        let out = &mut outputs[0];
        out.set_channel_count(inputs.len());
        for (ch, input) in inputs.iter().enumerate().take(out.channel_count()) {
            out.channel_mut(ch).copy_from_slice(input.channel(0));
        }
        ProcessStatus::Running
    }
}

/// Channel `i` of the input becomes mono output `i`; outputs past the
/// input's channel count are silent.
#[derive(Debug, Default)]
pub struct SplitterProcessor;

impl AudioProcessor for SplitterProcessor {
    fn process(
        &mut self,
        _ctx: &ProcessContext,
        inputs: &[AudioBus],
        outputs: &mut [AudioBus],
        _params: &ParamValues<'_>,
    ) -> ProcessStatus {
        let input = &inputs[0];
        for (ch, out) in outputs.iter_mut().enumerate() {
            if ch < input.channel_count() {
                out.set_channel_count(1);
                out.channel_mut(0).copy_from_slice(input.channel(ch));
            } else {
                out.reset(1);
            }
        }
        ProcessStatus::Running
    }
}
