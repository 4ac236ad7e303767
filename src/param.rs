//! Parameter automation: per-parameter timelines of scheduled value changes.
//!
//! A [`ParamTimeline`] keeps its events sorted by start time and caches the
//! value in effect at each event's start, so [`ParamTimeline::value_at`] is a
//! binary search plus closed-form evaluation and never allocates.
//!
//! Evaluation rules:
//! - no events: the directly-set value;
//! - before the first event: the directly-set value;
//! - inside a ramp segment: linear or exponential interpolation from the
//!   previous event's end point to the ramp's target;
//! - inside a set-target region: exponential approach from the value in
//!   effect at its start;
//! - inside a value curve: linear interpolation across the curve, holding the
//!   last point once the curve's duration has elapsed;
//! - after the last event: that event's final value holds.

use crate::error::{Error, Result};
use crate::invariant_ppt::{assert_invariant, AUTOMATION_EVENTS_SORTED};
use std::sync::Arc;

/// How often a parameter is resolved during a render block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomationRate {
    /// Once per sample.
    ARate,
    /// Once per block, at the block's first frame.
    KRate,
}

/// Static description of a node parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamDescriptor {
    pub name: &'static str,
    pub default: f32,
    pub min: f32,
    pub max: f32,
    pub rate: AutomationRate,
}

impl ParamDescriptor {
    pub const fn new(
        name: &'static str,
        default: f32,
        min: f32,
        max: f32,
        rate: AutomationRate,
    ) -> Self {
        Self {
            name,
            default,
            min,
            max,
            rate,
        }
    }

    /// Clamp a computed value into the nominal range.
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.default;
        }
        value.clamp(self.min, self.max)
    }
}

/// A scheduled change to a parameter's value.
#[derive(Debug, Clone, PartialEq)]
pub enum AutomationEvent {
    /// Jump to `value` at `time`.
    SetValue { value: f32, time: f64 },
    /// Ramp linearly from the previous event to reach `value` at `time`.
    LinearRamp { value: f32, time: f64 },
    /// Ramp exponentially from the previous event to reach `value` at `time`.
    ExponentialRamp { value: f32, time: f64 },
    /// Approach `target` exponentially from `time` with `time_constant` seconds.
    SetTarget {
        target: f32,
        time: f64,
        time_constant: f64,
    },
    /// Play `values` back, evenly spread over `duration` seconds from `time`.
    SetValueCurve {
        values: Arc<[f32]>,
        time: f64,
        duration: f64,
    },
}

impl AutomationEvent {
    /// Start time in seconds.
    pub fn time(&self) -> f64 {
        match self {
            AutomationEvent::SetValue { time, .. }
            | AutomationEvent::LinearRamp { time, .. }
            | AutomationEvent::ExponentialRamp { time, .. }
            | AutomationEvent::SetTarget { time, .. }
            | AutomationEvent::SetValueCurve { time, .. } => *time,
        }
    }

    /// End of the region the event governs on its own.
    pub fn end_time(&self) -> f64 {
        match self {
            AutomationEvent::SetValueCurve { time, duration, .. } => time + duration,
            other => other.time(),
        }
    }

    fn is_ramp(&self) -> bool {
        matches!(
            self,
            AutomationEvent::LinearRamp { .. } | AutomationEvent::ExponentialRamp { .. }
        )
    }

    fn is_curve(&self) -> bool {
        matches!(self, AutomationEvent::SetValueCurve { .. })
    }
}

/// The automation state of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTimeline {
    descriptor: ParamDescriptor,
    value: f32,
    events: Vec<AutomationEvent>,
    /// Value in effect immediately before each event starts.
    anchors: Vec<f32>,
}

impl ParamTimeline {
    pub fn new(descriptor: ParamDescriptor) -> Self {
        Self {
            descriptor,
            value: descriptor.default,
            events: Vec::with_capacity(16),
            anchors: Vec::with_capacity(16),
        }
    }

    pub fn descriptor(&self) -> &ParamDescriptor {
        &self.descriptor
    }

    /// The directly-set value.
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Set the directly-set value, used wherever no event governs. Fails
    /// with `Range` if a leading exponential ramp would then start from a
    /// non-positive value.
    pub fn set_value(&mut self, value: f32) -> Result<()> {
        check_value(value)?;
        let previous = std::mem::replace(&mut self.value, value);
        self.refresh_anchors();
        if let Err(err) = self.check_exponential_starts() {
            self.value = previous;
            self.refresh_anchors();
            return Err(err);
        }
        Ok(())
    }

    pub fn events(&self) -> &[AutomationEvent] {
        &self.events
    }

    pub fn set_value_at_time(&mut self, value: f32, time: f64) -> Result<()> {
        self.schedule(AutomationEvent::SetValue { value, time })
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, end_time: f64) -> Result<()> {
        self.schedule(AutomationEvent::LinearRamp {
            value,
            time: end_time,
        })
    }

    pub fn exponential_ramp_to_value_at_time(&mut self, value: f32, end_time: f64) -> Result<()> {
        self.schedule(AutomationEvent::ExponentialRamp {
            value,
            time: end_time,
        })
    }

    pub fn set_target_at_time(&mut self, target: f32, time: f64, time_constant: f64) -> Result<()> {
        self.schedule(AutomationEvent::SetTarget {
            target,
            time,
            time_constant,
        })
    }

    pub fn set_value_curve_at_time(&mut self, values: &[f32], time: f64, duration: f64) -> Result<()> {
        self.schedule(AutomationEvent::SetValueCurve {
            values: Arc::from(values),
            time,
            duration,
        })
    }

    /// Validate and insert an event, keeping events sorted by start time.
    /// Events sharing a start time keep their scheduling order.
    pub fn schedule(&mut self, event: AutomationEvent) -> Result<()> {
        check_time(event.time())?;
        match &event {
            AutomationEvent::SetValue { value, .. } | AutomationEvent::LinearRamp { value, .. } => {
                check_value(*value)?;
            }
            AutomationEvent::ExponentialRamp { value, .. } => {
                check_value(*value)?;
                if *value <= 0.0 {
                    return Err(Error::Range(format!(
                        "exponential ramp target {} must be positive",
                        value
                    )));
                }
            }
            AutomationEvent::SetTarget {
                target,
                time_constant,
                ..
            } => {
                check_value(*target)?;
                if !time_constant.is_finite() || *time_constant < 0.0 {
                    return Err(Error::Range(format!(
                        "time constant {} must be finite and non-negative",
                        time_constant
                    )));
                }
            }
            AutomationEvent::SetValueCurve {
                values, duration, ..
            } => {
                if values.len() < 2 {
                    return Err(Error::InvalidState(format!(
                        "value curve needs at least 2 points, got {}",
                        values.len()
                    )));
                }
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(Error::Range("value curve holds non-finite values".into()));
                }
                if !duration.is_finite() || *duration <= 0.0 {
                    return Err(Error::Range(format!(
                        "curve duration {} must be finite and positive",
                        duration
                    )));
                }
            }
        }
        self.check_curve_overlap(&event)?;

        let index = self.events.partition_point(|e| e.time() <= event.time());
        self.events.insert(index, event);
        self.refresh_anchors();
        // Also covers an event landing in front of an existing exponential ramp.
        if let Err(err) = self.check_exponential_starts() {
            self.events.remove(index);
            self.refresh_anchors();
            return Err(err);
        }

        assert_invariant(
            AUTOMATION_EVENTS_SORTED,
            self.events.windows(2).all(|w| w[0].time() <= w[1].time()),
            "automation events sorted by start time",
            Some("schedule"),
        );
        Ok(())
    }

    /// Remove every event starting at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) -> Result<()> {
        check_time(time)?;
        let keep = self.events.partition_point(|e| e.time() < time);
        self.events.truncate(keep);
        self.refresh_anchors();
        Ok(())
    }

    /// Remove every event starting at or after `time` and pin the value in
    /// effect at `time` from then on. A ramp in progress at `time` is cut
    /// short so its shape up to `time` is unchanged.
    pub fn cancel_and_hold_at_time(&mut self, time: f64) -> Result<()> {
        check_time(time)?;
        let held = self.value_at(time);
        let keep = self.events.partition_point(|e| e.time() < time);
        let cut = self.events.get(keep).cloned();
        self.events.truncate(keep);
        let pin = match cut {
            Some(AutomationEvent::LinearRamp { .. }) => {
                AutomationEvent::LinearRamp { value: held, time }
            }
            Some(AutomationEvent::ExponentialRamp { .. }) if held > 0.0 => {
                AutomationEvent::ExponentialRamp { value: held, time }
            }
            _ => AutomationEvent::SetValue { value: held, time },
        };
        self.events.push(pin);
        self.refresh_anchors();
        Ok(())
    }

    /// The automation value at `time` seconds.
    pub fn value_at(&self, time: f64) -> f32 {
        if self.events.is_empty() {
            return self.value;
        }
        let index = self.events.partition_point(|e| e.time() <= time);
        if let Some(next) = self.events.get(index) {
            if next.is_ramp() {
                let (t0, v0) = self.segment_start(index);
                if index == 0 || time >= t0 {
                    return ramp_value(next, t0, v0, time);
                }
            }
        }
        if index == 0 {
            return self.value;
        }
        hold_value(&self.events[index - 1], self.anchors[index - 1], time)
    }

    /// Write automation values for one block starting at `start_frame`.
    /// a-rate parameters get one value per frame, k-rate ones the value at
    /// the block's first frame.
    pub fn fill(&self, start_frame: u64, sample_rate: f32, out: &mut [f32]) {
        if self.events.is_empty() {
            out.fill(self.value);
            return;
        }
        let sr = sample_rate as f64;
        match self.descriptor.rate {
            AutomationRate::KRate => out.fill(self.value_at(start_frame as f64 / sr)),
            AutomationRate::ARate => {
                for (n, sample) in out.iter_mut().enumerate() {
                    *sample = self.value_at((start_frame + n as u64) as f64 / sr);
                }
            }
        }
    }

    /// Start point `(t0, v0)` of a ramp inserted at `index`.
    fn segment_start(&self, index: usize) -> (f64, f32) {
        if index == 0 {
            return (0.0, self.value);
        }
        let prev = &self.events[index - 1];
        match prev {
            AutomationEvent::SetValue { value, time }
            | AutomationEvent::LinearRamp { value, time }
            | AutomationEvent::ExponentialRamp { value, time } => (*time, *value),
            AutomationEvent::SetTarget { time, .. } => (*time, self.anchors[index - 1]),
            AutomationEvent::SetValueCurve {
                values,
                time,
                duration,
            } => (time + duration, values[values.len() - 1]),
        }
    }

    /// Every exponential ramp must start from a positive value.
    fn check_exponential_starts(&self) -> Result<()> {
        for (index, event) in self.events.iter().enumerate() {
            if let AutomationEvent::ExponentialRamp { time, .. } = event {
                let (_, start) = self.segment_start(index);
                if start <= 0.0 {
                    return Err(Error::Range(format!(
                        "exponential ramp ending at {}s starts from {}, must be positive",
                        time, start
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_curve_overlap(&self, event: &AutomationEvent) -> Result<()> {
        let time = event.time();
        let inside_curve = self
            .events
            .iter()
            .filter(|e| e.is_curve())
            .any(|c| c.time() <= time && time < c.end_time());
        let covers_event = event.is_curve()
            && self
                .events
                .iter()
                .any(|e| time <= e.time() && e.time() < event.end_time());
        if inside_curve || covers_event {
            return Err(Error::NotSupported(format!(
                "event at {}s overlaps a value curve",
                time
            )));
        }
        Ok(())
    }

    fn refresh_anchors(&mut self) {
        let mut anchors = std::mem::take(&mut self.anchors);
        anchors.clear();
        for i in 0..self.events.len() {
            let anchor = if i == 0 {
                self.value
            } else {
                hold_value(&self.events[i - 1], anchors[i - 1], self.events[i].time())
            };
            anchors.push(anchor);
        }
        self.anchors = anchors;
    }
}

fn check_time(time: f64) -> Result<()> {
    if !time.is_finite() || time < 0.0 {
        return Err(Error::Range(format!(
            "time {} must be finite and non-negative",
            time
        )));
    }
    Ok(())
}

fn check_value(value: f32) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::Range(format!("value {} must be finite", value)));
    }
    Ok(())
}

/// Value of `event` at `time`, with no later event interfering.
fn hold_value(event: &AutomationEvent, anchor: f32, time: f64) -> f32 {
    match event {
        AutomationEvent::SetValue { value, .. }
        | AutomationEvent::LinearRamp { value, .. }
        | AutomationEvent::ExponentialRamp { value, .. } => *value,
        AutomationEvent::SetTarget {
            target,
            time: start,
            time_constant,
        } => {
            if *time_constant == 0.0 {
                return *target;
            }
            let decay = (-(time - start) / time_constant).exp();
            (*target as f64 + (anchor as f64 - *target as f64) * decay) as f32
        }
        AutomationEvent::SetValueCurve {
            values,
            time: start,
            duration,
        } => curve_value(values, *start, *duration, time),
    }
}

fn ramp_value(ramp: &AutomationEvent, t0: f64, v0: f32, time: f64) -> f32 {
    let (v1, t1) = match ramp {
        AutomationEvent::LinearRamp { value, time } | AutomationEvent::ExponentialRamp { value, time } => {
            (*value, *time)
        }
        _ => return v0,
    };
    if t1 <= t0 {
        return v1;
    }
    let progress = ((time - t0) / (t1 - t0)).clamp(0.0, 1.0);
    match ramp {
        AutomationEvent::ExponentialRamp { .. } => {
            if v0 <= 0.0 || v1 <= 0.0 {
                // Unreachable ramp shape: hold until the ramp ends.
                return v0;
            }
            (v0 as f64 * (v1 as f64 / v0 as f64).powf(progress)) as f32
        }
        _ => (v0 as f64 + (v1 as f64 - v0 as f64) * progress) as f32,
    }
}

fn curve_value(values: &[f32], start: f64, duration: f64, time: f64) -> f32 {
    let last = values.len() - 1;
    if time >= start + duration {
        return values[last];
    }
    let position = ((time - start) / duration * last as f64).max(0.0);
    let k = position.floor() as usize;
    if k >= last {
        return values[last];
    }
    let frac = (position - k as f64) as f32;
    values[k] + (values[k + 1] - values[k]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const GAIN: ParamDescriptor = ParamDescriptor::new("gain", 1.0, -1e9, 1e9, AutomationRate::ARate);

    #[test]
    fn empty_timeline_returns_direct_value() {
        let mut param = ParamTimeline::new(GAIN);
        assert_eq!(param.value_at(3.0), 1.0);
        param.set_value(0.25).unwrap();
        assert_eq!(param.value_at(0.0), 0.25);
    }

    #[test]
    fn linear_ramp_midpoint() {
        let mut param = ParamTimeline::new(GAIN);
        param.set_value_at_time(1.0, 0.0).unwrap();
        param.linear_ramp_to_value_at_time(0.0, 1.0).unwrap();
        assert_eq!(param.value_at(0.5), 0.5);
        assert_eq!(param.value_at(0.0), 1.0);
        assert_eq!(param.value_at(1.0), 0.0);
        assert_eq!(param.value_at(7.0), 0.0);
    }

    #[test]
    fn exponential_ramp_closed_form() {
        let mut param = ParamTimeline::new(GAIN);
        param.set_value_at_time(1.0, 1.0).unwrap();
        param.exponential_ramp_to_value_at_time(4.0, 3.0).unwrap();
        assert_eq!(param.value_at(1.0), 1.0);
        assert_relative_eq!(param.value_at(2.0), 2.0, epsilon = 1e-6);
        assert_eq!(param.value_at(3.0), 4.0);
    }

    #[test]
    fn exponential_ramp_rejects_non_positive() {
        let mut param = ParamTimeline::new(GAIN);
        assert!(matches!(
            param.exponential_ramp_to_value_at_time(0.0, 1.0),
            Err(Error::Range(_))
        ));
        param.set_value_at_time(0.0, 0.0).unwrap();
        assert!(matches!(
            param.exponential_ramp_to_value_at_time(2.0, 1.0),
            Err(Error::Range(_))
        ));
        assert_eq!(param.events().len(), 1);
    }

    #[test]
    fn exponential_ramp_start_is_checked_on_later_inserts() {
        let mut param = ParamTimeline::new(GAIN);
        param.set_value_at_time(1.0, 0.0).unwrap();
        param.exponential_ramp_to_value_at_time(2.0, 1.0).unwrap();
        let before = param.clone();

        // Would make the ramp start from zero.
        assert!(matches!(param.set_value_at_time(0.0, 0.5), Err(Error::Range(_))));
        assert_eq!(param, before);
        param.set_value_at_time(0.5, 0.5).unwrap();
        assert_eq!(param.value_at(1.0), 2.0);

        // A leading ramp starts from the directly-set value.
        let mut param = ParamTimeline::new(GAIN);
        param.exponential_ramp_to_value_at_time(2.0, 1.0).unwrap();
        assert!(matches!(param.set_value(0.0), Err(Error::Range(_))));
        assert_eq!(param.value(), 1.0);
    }

    #[test]
    fn rejects_bad_times() {
        let mut param = ParamTimeline::new(GAIN);
        assert!(matches!(param.set_value_at_time(1.0, -1.0), Err(Error::Range(_))));
        assert!(matches!(
            param.set_value_at_time(1.0, f64::NAN),
            Err(Error::Range(_))
        ));
        assert!(matches!(
            param.set_target_at_time(1.0, 0.0, -0.5),
            Err(Error::Range(_))
        ));
    }

    #[test]
    fn out_of_order_insertion_stays_sorted() {
        let mut param = ParamTimeline::new(GAIN);
        param.set_value_at_time(3.0, 2.0).unwrap();
        param.set_value_at_time(1.0, 0.5).unwrap();
        param.set_value_at_time(2.0, 1.0).unwrap();
        let times: Vec<f64> = param.events().iter().map(AutomationEvent::time).collect();
        assert_eq!(times, vec![0.5, 1.0, 2.0]);
        assert_eq!(param.value_at(0.1), 1.0); // before first: direct value
        assert_eq!(param.value_at(1.5), 2.0);
    }

    #[test]
    fn set_target_decays_from_value_at_start() {
        let mut param = ParamTimeline::new(GAIN);
        param.set_value_at_time(1.0, 0.0).unwrap();
        param.set_target_at_time(0.0, 1.0, 0.5).unwrap();
        assert_eq!(param.value_at(1.0), 1.0);
        assert_relative_eq!(param.value_at(1.5), (-1.0f32).exp(), epsilon = 1e-6);
    }

    #[test]
    fn value_curve_interpolates_and_holds() {
        let mut param = ParamTimeline::new(GAIN);
        param.set_value_curve_at_time(&[0.0, 1.0, 0.0], 1.0, 2.0).unwrap();
        assert_eq!(param.value_at(1.0), 0.0);
        assert_relative_eq!(param.value_at(1.5), 0.5, epsilon = 1e-6);
        assert_relative_eq!(param.value_at(2.0), 1.0, epsilon = 1e-6);
        assert_eq!(param.value_at(3.0), 0.0);
        assert_eq!(param.value_at(10.0), 0.0);
    }

    #[test]
    fn value_curve_overlap_rejected() {
        let mut param = ParamTimeline::new(GAIN);
        param.set_value_curve_at_time(&[0.0, 1.0], 1.0, 2.0).unwrap();
        assert!(matches!(
            param.set_value_at_time(0.5, 2.0),
            Err(Error::NotSupported(_))
        ));
        assert!(matches!(
            param.set_value_curve_at_time(&[0.0, 1.0], 0.0, 1.5),
            Err(Error::NotSupported(_))
        ));
        assert!(matches!(
            param.set_value_curve_at_time(&[1.0], 5.0, 1.0),
            Err(Error::InvalidState(_))
        ));
        param.set_value_at_time(0.5, 3.0).unwrap();
    }

    #[test]
    fn cancel_removes_events_at_or_after() {
        let mut param = ParamTimeline::new(GAIN);
        param.set_value_at_time(1.0, 0.0).unwrap();
        param.linear_ramp_to_value_at_time(0.0, 1.0).unwrap();
        param.cancel_scheduled_values(0.5).unwrap();
        assert_eq!(param.events().len(), 1);
        assert_eq!(param.value_at(0.75), 1.0);
        assert_eq!(param.value_at(100.0), 1.0);
    }

    #[test]
    fn cancel_and_hold_pins_ramp_value() {
        let mut param = ParamTimeline::new(GAIN);
        param.set_value_at_time(1.0, 0.0).unwrap();
        param.linear_ramp_to_value_at_time(0.0, 1.0).unwrap();
        param.cancel_and_hold_at_time(0.25).unwrap();
        assert_eq!(param.value_at(0.125), 0.875);
        assert_eq!(param.value_at(0.25), 0.75);
        assert_eq!(param.value_at(5.0), 0.75);
    }

    #[test]
    fn fill_k_rate_uses_block_start() {
        let descriptor = ParamDescriptor::new("q", 1.0, -10.0, 10.0, AutomationRate::KRate);
        let mut param = ParamTimeline::new(descriptor);
        param.set_value_at_time(0.0, 0.0).unwrap();
        param.linear_ramp_to_value_at_time(1.0, 1.0).unwrap();
        let mut out = [9.0f32; 4];
        param.fill(2, 4.0, &mut out);
        assert_eq!(out, [0.5; 4]);
    }
}
