use serde::{Deserialize, Serialize};
use crate::error::FieldError;


/// External production term of a voxel (nM/ms), either constant or a piecewise
/// linear function of time
///
/// A piecewise linear schedule holds its first value before the first breakpoint,
/// its last value after the last breakpoint and interpolates linearly in between,
/// two breakpoints at the same time form a step
///
/// ```rust
/// use no_diffusion::field::ProductionSchedule;
///
/// // pulse of 5 nM/ms rising over 100 ms and falling back to zero by 200 ms
/// let schedule = ProductionSchedule::piecewise_linear(
///     vec![0., 100., 200., 5000.],
///     vec![0., 5., 0., 0.],
/// ).unwrap();
///
/// assert_eq!(schedule.rate_at(50.), 2.5);
/// assert_eq!(schedule.rate_at(100.), 5.);
/// assert_eq!(schedule.rate_at(6000.), 0.);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScheduleRecord")]
pub enum ProductionSchedule {
    /// Same rate at every time
    Constant(f64),
    /// Linear interpolation between `(times[i], values[i])` breakpoints
    PiecewiseLinear {
        times: Vec<f64>,
        values: Vec<f64>,
    },
}

// deserialized form, checked by `piecewise_linear` before it becomes a schedule
#[derive(Deserialize)]
enum ScheduleRecord {
    Constant(f64),
    PiecewiseLinear {
        times: Vec<f64>,
        values: Vec<f64>,
    },
}

impl TryFrom<ScheduleRecord> for ProductionSchedule {
    type Error = FieldError;

    fn try_from(record: ScheduleRecord) -> Result<Self, FieldError> {
        match record {
            ScheduleRecord::Constant(value) if value.is_finite() => Ok(ProductionSchedule::Constant(value)),
            ScheduleRecord::Constant(value) => Err(FieldError::InvalidSchedule(format!("constant rate {}", value))),
            ScheduleRecord::PiecewiseLinear { times, values } => ProductionSchedule::piecewise_linear(times, values),
        }
    }
}

impl Default for ProductionSchedule {
    fn default() -> Self {
        ProductionSchedule::Constant(0.)
    }
}

impl ProductionSchedule {
    /// Builds a piecewise linear schedule, times must be finite and non-decreasing
    /// and have one value each
    pub fn piecewise_linear(times: Vec<f64>, values: Vec<f64>) -> Result<Self, FieldError> {
        if times.is_empty() {
            return Err(FieldError::InvalidSchedule(String::from("schedule has no breakpoints")));
        }
        if times.len() != values.len() {
            return Err(FieldError::InvalidSchedule(
                format!("{} times but {} values", times.len(), values.len())
            ));
        }
        if times.iter().chain(values.iter()).any(|i| !i.is_finite()) {
            return Err(FieldError::InvalidSchedule(String::from("breakpoints must be finite")));
        }
        if times.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(FieldError::InvalidSchedule(String::from("times must be non-decreasing")));
        }

        Ok(ProductionSchedule::PiecewiseLinear { times, values })
    }

    /// Production rate at time `t` (ms)
    pub fn rate_at(&self, t: f64) -> f64 {
        match self {
            ProductionSchedule::Constant(value) => *value,
            ProductionSchedule::PiecewiseLinear { times, values } => {
                // first breakpoint strictly after t
                let upper = times.partition_point(|&time| time <= t);

                if upper == 0 {
                    return values.first().copied().unwrap_or(0.);
                }
                if upper == times.len() {
                    return values.last().copied().unwrap_or(0.);
                }

                let (t0, t1) = (times[upper - 1], times[upper]);
                let (v0, v1) = (values[upper - 1], values[upper]);

                v0 + (v1 - v0) * (t - t0) / (t1 - t0)
            }
        }
    }

    /// Whether the schedule is zero at all times
    pub fn is_zero(&self) -> bool {
        match self {
            ProductionSchedule::Constant(value) => *value == 0.,
            ProductionSchedule::PiecewiseLinear { values, .. } => values.iter().all(|i| *i == 0.),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_step_breakpoints() {
        let schedule = ProductionSchedule::piecewise_linear(
            vec![0., 10., 10., 20.], vec![0., 0., 4., 4.],
        ).unwrap();

        assert_eq!(schedule.rate_at(5.), 0.);
        assert_eq!(schedule.rate_at(10.), 4.);
        assert_eq!(schedule.rate_at(15.), 4.);
        assert_eq!(schedule.rate_at(-1.), 0.);
    }

    #[test]
    fn test_invalid_schedules() {
        assert!(ProductionSchedule::piecewise_linear(vec![], vec![]).is_err());
        assert!(ProductionSchedule::piecewise_linear(vec![0., 1.], vec![0.]).is_err());
        assert!(ProductionSchedule::piecewise_linear(vec![1., 0.], vec![0., 0.]).is_err());
        assert!(ProductionSchedule::piecewise_linear(vec![0., f64::NAN], vec![0., 0.]).is_err());
    }

    #[test]
    fn test_deserialized_schedules_are_checked() {
        let schedule: ProductionSchedule = serde_json::from_str(
            r#"{"PiecewiseLinear": {"times": [0.0, 10.0], "values": [0.0, 2.0]}}"#
        ).unwrap();
        assert_eq!(schedule.rate_at(5.), 1.);

        let constant: ProductionSchedule = serde_json::from_str(r#"{"Constant": 3.0}"#).unwrap();
        assert_eq!(constant, ProductionSchedule::Constant(3.));

        for json in [
            r#"{"PiecewiseLinear": {"times": [], "values": []}}"#,
            r#"{"PiecewiseLinear": {"times": [0.0, 1.0], "values": [0.0]}}"#,
            r#"{"PiecewiseLinear": {"times": [5.0, 1.0], "values": [0.0, 0.0]}}"#,
        ] {
            assert!(serde_json::from_str::<ProductionSchedule>(json).is_err(), "{}", json);
        }

        let round_trip = serde_json::to_string(&schedule).unwrap();
        assert_eq!(serde_json::from_str::<ProductionSchedule>(&round_trip).unwrap(), schedule);
    }

    #[test]
    fn test_reference_center_pulse() {
        let schedule = ProductionSchedule::piecewise_linear(
            vec![0., 420., 470., 570., 620., 2000.],
            vec![0., 0., 250., 250., 0., 0.],
        ).unwrap();

        assert_eq!(schedule.rate_at(445.), 125.);
        assert_eq!(schedule.rate_at(500.), 250.);
        assert_eq!(schedule.rate_at(700.), 0.);
        assert!(!schedule.is_zero());
    }
}
