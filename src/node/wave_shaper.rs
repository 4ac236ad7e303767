use super::{AudioProcessor, NodeCommand, ParamValues, ProcessContext, ProcessStatus};
use crate::buffer::AudioBus;
use crate::control::Garbage;
use crate::error::{Error, Result};
use std::sync::Arc;

pub fn validate_curve(curve: &[f32]) -> Result<()> {
    if curve.len() < 2 {
        return Err(Error::InvalidState(format!(
            "shaping curve needs at least 2 points, got {}",
            curve.len()
        )));
    }
    Ok(())
}

/// Evaluate `curve` spread over `[-1, 1]` at `x`, clamping outside it.
pub fn shape(curve: &[f32], x: f32) -> f32 {
    let last = curve.len() - 1;
    let position = (last as f32 * (x + 1.0) / 2.0).clamp(0.0, last as f32);
    let index = position.floor() as usize;
    if index >= last {
        return curve[last];
    }
    let frac = position - index as f32;
    curve[index] + (curve[index + 1] - curve[index]) * frac
}

/// Memoryless non-linearity. Passes audio through unchanged until a curve
/// is set.
#[derive(Debug, Default)]
pub struct WaveShaperProcessor {
    curve: Option<Arc<[f32]>>,
}

impl AudioProcessor for WaveShaperProcessor {
    fn process(
        &mut self,
        _ctx: &ProcessContext,
        inputs: &[AudioBus],
        outputs: &mut [AudioBus],
        _params: &ParamValues<'_>,
    ) -> ProcessStatus {
        let input = &inputs[0];
        let out = &mut outputs[0];
        let Some(curve) = self.curve.as_deref() else {
            out.copy_from(input);
            return ProcessStatus::Running;
        };
        out.set_channel_count(input.channel_count());
        for (dst, src) in out.channels_mut().iter_mut().zip(input.channels()) {
            for (d, &s) in dst.iter_mut().zip(src) {
                *d = shape(curve, s);
            }
        }
        ProcessStatus::Running
    }

    fn handle_command(&mut self, command: NodeCommand) -> Option<Garbage> {
        match command {
            NodeCommand::Curve(curve) => {
                std::mem::replace(&mut self.curve, curve).map(Garbage::Curve)
            }
            other => Garbage::from_command(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_interpolates_and_clamps() {
        let curve = [-1.0, 0.0, 1.0];
        assert_eq!(shape(&curve, 0.0), 0.0);
        assert_eq!(shape(&curve, 0.5), 0.5);
        assert_eq!(shape(&curve, 3.0), 1.0);
        assert_eq!(shape(&curve, -3.0), -1.0);
    }

    #[test]
    fn short_curve_is_invalid_state() {
        assert!(matches!(validate_curve(&[1.0]), Err(Error::InvalidState(_))));
        assert!(validate_curve(&[0.0, 1.0]).is_ok());
    }

    #[test]
    fn curve_swap_returns_previous() {
        let mut shaper = WaveShaperProcessor::default();
        let first: Arc<[f32]> = Arc::from(vec![0.0, 1.0]);
        assert!(shaper.handle_command(NodeCommand::Curve(Some(first))).is_none());
        assert!(matches!(
            shaper.handle_command(NodeCommand::Curve(None)),
            Some(Garbage::Curve(_))
        ));
    }
}
