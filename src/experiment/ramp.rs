//! Stepped source meter ramps.

use crate::experiment::command::RampLeg;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::debug;
use worklist_core::capabilities::SourceMeter;
use worklist_core::error::{DriverError, DriverErrorKind, DriverResult};
use worklist_core::types::SourceMode;

/// Levels visited going from `from` to `target` in `points` equal steps.
///
/// The start level is not included; the last level is exactly `target`.
pub fn ramp_levels(from: f64, target: f64, points: u32) -> Vec<f64> {
    let n = points.max(1);
    (1..=n)
        .map(|k| {
            if k == n {
                target
            } else {
                from + (target - from) * f64::from(k) / f64::from(n)
            }
        })
        .collect()
}

/// Refuse a ramp the meter cannot carry out.
async fn check_meter(meter: &dyn SourceMeter, mode: SourceMode, target: f64) -> DriverResult<()> {
    if !meter.is_connected() {
        return Err(DriverError::not_connected(meter.name()));
    }
    if !meter.output_enabled().await? {
        return Err(DriverError::new(
            meter.name(),
            DriverErrorKind::Hardware,
            "output is disabled",
        ));
    }
    let limit = meter.limit(mode).await?;
    if target.abs() > limit {
        return Err(DriverError::new(
            meter.name(),
            DriverErrorKind::InvalidParameter,
            format!(
                "target {} {} exceeds limit {} {}",
                target,
                mode.unit(),
                limit,
                mode.unit()
            ),
        ));
    }
    Ok(())
}

/// Ramp each meter from its present level to its leg's target.
///
/// With two legs the points are interleaved: point k is set on the first
/// meter, then on the second, each followed by its own inter-point delay.
pub async fn execute_ramp(
    meters: &[(Arc<dyn SourceMeter>, RampLeg)],
    mode: SourceMode,
    points: u32,
) -> DriverResult<()> {
    let mut plans = Vec::with_capacity(meters.len());
    for (meter, leg) in meters {
        let delay = leg.point_delay(points).ok_or_else(|| {
            DriverError::new(
                meter.name(),
                DriverErrorKind::InvalidParameter,
                format!(
                    "ramp step {} at rate {} gives a point delay out of range",
                    leg.step, leg.rate
                ),
            )
        })?;
        check_meter(meter.as_ref(), mode, leg.target).await?;
        let from = meter.level(mode).await?;
        debug!(
            device = meter.name(),
            from,
            to = leg.target,
            points,
            "Starting ramp"
        );
        plans.push((
            meter,
            ramp_levels(from, leg.target, points),
            delay,
        ));
    }

    for k in 0..points.max(1) as usize {
        for (meter, levels, delay) in &plans {
            meter.set_level(mode, levels[k]).await?;
            sleep(*delay).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use worklist_driver_mock::{MockSourceMeter, MockSourceMeterConfig};

    fn leg(device: u8, target: f64) -> RampLeg {
        RampLeg {
            device,
            target,
            rate: 100.0,
            step: 10.0,
        }
    }

    #[test]
    fn test_ramp_levels() {
        assert_eq!(ramp_levels(0.0, 1.0, 4), vec![0.25, 0.5, 0.75, 1.0]);
        assert_eq!(ramp_levels(1.0, -1.0, 2), vec![0.0, -1.0]);
        assert_eq!(ramp_levels(0.3, 0.7, 3).last(), Some(&0.7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_legs_interleave() {
        let first = Arc::new(MockSourceMeter::new());
        let second = Arc::new(MockSourceMeter::new());
        let meters: Vec<(Arc<dyn SourceMeter>, RampLeg)> = vec![
            (first.clone(), leg(1, 1.0)),
            (second.clone(), leg(2, -2.0)),
        ];
        execute_ramp(&meters, SourceMode::Voltage, 2).await.unwrap();

        assert_eq!(
            first.history(),
            vec![(SourceMode::Voltage, 0.5), (SourceMode::Voltage, 1.0)]
        );
        assert_eq!(
            second.history(),
            vec![(SourceMode::Voltage, -1.0), (SourceMode::Voltage, -2.0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_delay_fails_before_any_level_is_set() {
        let meter = Arc::new(MockSourceMeter::new());
        let glacial = RampLeg {
            device: 1,
            target: 0.001,
            rate: 1e-300,
            step: 1e300,
        };
        let meters: Vec<(Arc<dyn SourceMeter>, RampLeg)> = vec![(meter.clone(), glacial)];
        let err = execute_ramp(&meters, SourceMode::Voltage, 1)
            .await
            .unwrap_err();

        assert_eq!(err.kind, DriverErrorKind::InvalidParameter);
        assert!(meter.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refuses_disabled_output_and_excess_target() {
        let meter = Arc::new(MockSourceMeter::new());
        meter.set_output_enabled(false);
        let meters: Vec<(Arc<dyn SourceMeter>, RampLeg)> = vec![(meter.clone(), leg(1, 1.0))];
        let err = execute_ramp(&meters, SourceMode::Voltage, 3)
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Hardware);

        let limited = Arc::new(MockSourceMeter::with_config(MockSourceMeterConfig {
            voltage_limit: 5.0,
            ..Default::default()
        }));
        let meters: Vec<(Arc<dyn SourceMeter>, RampLeg)> = vec![(limited.clone(), leg(1, 6.0))];
        let err = execute_ramp(&meters, SourceMode::Voltage, 3)
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::InvalidParameter);
        assert!(limited.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_meter_refused() {
        let meter = Arc::new(MockSourceMeter::new());
        meter.set_connected(false);
        let meters: Vec<(Arc<dyn SourceMeter>, RampLeg)> = vec![(meter, leg(2, 1.0))];
        let err = execute_ramp(&meters, SourceMode::Current, 1)
            .await
            .unwrap_err();
        assert!(err.is_connection());
    }
}
