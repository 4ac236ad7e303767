use super::{AudioProcessor, ParamValues, ProcessContext, ProcessStatus};
use crate::buffer::AudioBus;

/// Multiplies its input by the `gain` parameter, per sample.
#[derive(Debug, Default)]
pub struct GainProcessor;

impl AudioProcessor for GainProcessor {
    fn process(
        &mut self,
        _ctx: &ProcessContext,
        inputs: &[AudioBus],
        outputs: &mut [AudioBus],
        params: &ParamValues<'_>,
    ) -> ProcessStatus {
        let input = &inputs[0];
        let out = &mut outputs[0];
        out.set_channel_count(input.channel_count());
        let gain = params.get(0);
        for (dst, src) in out.channels_mut().iter_mut().zip(input.channels()) {
            for ((d, &s), &g) in dst.iter_mut().zip(src).zip(gain) {
                *d = s * g;
            }
        }
        ProcessStatus::Running
    }
}
