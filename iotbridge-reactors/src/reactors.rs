//! Alert policies
//!
//! - Low production quality: lower the machine's desired `productionRate` by
//!   10, never below 10, with an ETag-conditioned twin update.
//! - Error spike: invoke `EmergencyStop` on the machine.
//!
//! Both handlers swallow every failure after logging it; the message counts
//! as handled either way.

use crate::alerts::{ErrorAlert, QualityAlert};
use crate::service::{ServiceError, ServiceHub, Twin};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

pub const KEY_PRODUCTION_RATE: &str = "productionRate";
pub const METHOD_EMERGENCY_STOP: &str = "EmergencyStop";

/// Quality percentage below which the rate is throttled
pub const QUALITY_THRESHOLD: f64 = 90.0;
pub const RATE_STEP: i64 = 10;
pub const MIN_PRODUCTION_RATE: i64 = 10;

/// Error count above which the machine is stopped
pub const ERROR_COUNT_THRESHOLD: i64 = 3;

/// Refetch-and-retry attempts after a stale ETag
pub const CONFLICT_RETRIES: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleOutcome {
    Throttled { from: i64, to: i64 },
    WithinTolerance,
    RateMissing,
    /// The twin kept changing under us
    Conflict,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { status: i32 },
    Skipped,
    Failed(String),
}

pub fn throttled_rate(current: i64) -> i64 {
    (current - RATE_STEP).max(MIN_PRODUCTION_RATE)
}

fn desired_rate(twin: &Twin) -> Option<i64> {
    match twin.desired.get(KEY_PRODUCTION_RATE)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|v| v as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64),
        _ => None,
    }
}

/// Quality alert handler
pub async fn throttle_on_low_quality(hub: &dyn ServiceHub, alert: &QualityAlert) -> ThrottleOutcome {
    let device = alert.device_id.as_str();
    info!("Quality alert for {}: {}%", device, alert.production_quality);

    if device.is_empty() {
        warn!("Quality alert without device id, ignoring");
        return ThrottleOutcome::Skipped;
    }
    if alert.production_quality >= QUALITY_THRESHOLD {
        info!("Production quality {}% for {} is within tolerance", alert.production_quality, device);
        return ThrottleOutcome::WithinTolerance;
    }

    let mut conflicts = 0;
    loop {
        let twin = match hub.get_twin(device).await {
            Ok(twin) => twin,
            Err(e) => {
                error!("Failed to fetch twin of {}: {}", device, e);
                return ThrottleOutcome::Failed(e.to_string());
            }
        };

        let current = match desired_rate(&twin) {
            Some(rate) => rate,
            None => {
                warn!("Desired property {} does not exist for {}", KEY_PRODUCTION_RATE, device);
                return ThrottleOutcome::RateMissing;
            }
        };
        let new_rate = throttled_rate(current);

        let mut patch = Map::new();
        patch.insert(KEY_PRODUCTION_RATE.to_string(), Value::from(new_rate));

        match hub.update_desired(device, patch, &twin.etag).await {
            Ok(()) => {
                info!("Changed {} of {} from {} to {}", KEY_PRODUCTION_RATE, device, current, new_rate);
                return ThrottleOutcome::Throttled {
                    from: current,
                    to: new_rate,
                };
            }
            Err(ServiceError::ConcurrencyConflict { .. }) if conflicts < CONFLICT_RETRIES => {
                conflicts += 1;
                warn!("Twin of {} changed since read (etag {}), refetching", device, twin.etag);
            }
            Err(e @ ServiceError::ConcurrencyConflict { .. }) => {
                error!("Giving up on {} update: {}", KEY_PRODUCTION_RATE, e);
                return ThrottleOutcome::Conflict;
            }
            Err(e) => {
                error!("Failed to update {} for {}: {}", KEY_PRODUCTION_RATE, device, e);
                return ThrottleOutcome::Failed(e.to_string());
            }
        }
    }
}

/// Error-count alert handler
pub async fn emergency_stop_on_errors(hub: &dyn ServiceHub, alert: &ErrorAlert) -> StopOutcome {
    let device = alert.device_id.as_str();
    info!("Checking emergency stop for {}: {} errors", device, alert.error_count);

    if device.is_empty() || alert.error_count <= ERROR_COUNT_THRESHOLD {
        warn!("Skipping {} for '{}'. Error count: {}", METHOD_EMERGENCY_STOP, device, alert.error_count);
        return StopOutcome::Skipped;
    }

    info!("Invoking {} on {}...", METHOD_EMERGENCY_STOP, device);
    match hub.invoke_method(device, METHOD_EMERGENCY_STOP, Value::Null).await {
        Ok(result) => {
            info!("Emergency stop triggered for {}. Response status: {}", device, result.status);
            StopOutcome::Stopped { status: result.status }
        }
        Err(e) => {
            error!("{} failed for {}: {}", METHOD_EMERGENCY_STOP, device, e);
            StopOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttled_rate_clamps() {
        assert_eq!(throttled_rate(50), 40);
        assert_eq!(throttled_rate(20), 10);
        assert_eq!(throttled_rate(12), 10);
        assert_eq!(throttled_rate(10), 10);
        assert_eq!(throttled_rate(3), 10);
    }

    #[test]
    fn test_desired_rate() {
        let mut twin = Twin {
            device_id: "d".into(),
            etag: "e".into(),
            desired: Map::new(),
        };
        assert_eq!(desired_rate(&twin), None);

        twin.desired.insert(KEY_PRODUCTION_RATE.into(), Value::from(70));
        assert_eq!(desired_rate(&twin), Some(70));

        twin.desired.insert(KEY_PRODUCTION_RATE.into(), Value::from(70.0));
        assert_eq!(desired_rate(&twin), Some(70));

        twin.desired.insert(KEY_PRODUCTION_RATE.into(), Value::from(" 50 "));
        assert_eq!(desired_rate(&twin), Some(50));

        twin.desired.insert(KEY_PRODUCTION_RATE.into(), Value::from("42.9"));
        assert_eq!(desired_rate(&twin), Some(42));

        for bad in [Value::from("fast"), Value::from("NaN"), Value::Bool(true), Value::Null] {
            twin.desired.insert(KEY_PRODUCTION_RATE.into(), bad);
            assert_eq!(desired_rate(&twin), None);
        }
    }
}
