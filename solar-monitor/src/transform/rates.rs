//! Instantaneous power reconstructed from cumulative energy counters.

use serde::Serialize;
use solar_client::domain::{EnergyChannel, Sample};
use time::{Date, OffsetDateTime, UtcOffset};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Power derived from the delivered-energy delta between a sample and its
/// predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedRatePoint {
    pub timestamp: i64,
    pub production_watts: f64,
    pub net_watts: f64,
    pub total_watts: f64,
}

impl DerivedRatePoint {
    pub const fn zero(timestamp: i64) -> Self {
        Self {
            timestamp,
            production_watts: 0.0,
            net_watts: 0.0,
            total_watts: 0.0,
        }
    }

    /// Production, net and total, in that order.
    pub fn rates(&self) -> [f64; 3] {
        [self.production_watts, self.net_watts, self.total_watts]
    }
}

/// Derive one rate point per sample.
///
/// `samples` are expected in timestamp order. The first sample, and the first
/// sample of every new calendar day in `offset`, map to zero: counters are not
/// differenced across midnight. Counter regressions clamp to zero, and a
/// non-positive elapsed time yields zero.
pub fn reconstruct(samples: &[Sample], offset: UtcOffset) -> Vec<DerivedRatePoint> {
    let mut out = Vec::with_capacity(samples.len());
    let mut prev: Option<&Sample> = None;

    for cur in samples {
        let point = match prev {
            Some(p) if same_local_day(p, cur, offset) => rate_between(p, cur),
            _ => DerivedRatePoint::zero(cur.timestamp),
        };
        out.push(point);
        prev = Some(cur);
    }

    out
}

fn local_date(timestamp: i64, offset: UtcOffset) -> Option<Date> {
    OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()
        .map(|t| t.to_offset(offset).date())
}

fn same_local_day(a: &Sample, b: &Sample, offset: UtcOffset) -> bool {
    match (local_date(a.timestamp, offset), local_date(b.timestamp, offset)) {
        (Some(da), Some(db)) => da == db,
        _ => false,
    }
}

fn rate_between(prev: &Sample, cur: &Sample) -> DerivedRatePoint {
    let elapsed_hours = cur.timestamp.saturating_sub(prev.timestamp) as f64 / SECONDS_PER_HOUR;

    let watts = |p: &EnergyChannel, c: &EnergyChannel| -> f64 {
        if elapsed_hours <= 0.0 {
            return 0.0;
        }
        let delta = c.wh_delivered.saturating_sub(p.wh_delivered).max(0);
        delta as f64 / elapsed_hours
    };

    DerivedRatePoint {
        timestamp: cur.timestamp,
        production_watts: watts(&prev.production, &cur.production),
        net_watts: watts(&prev.net_consumption, &cur.net_consumption),
        total_watts: watts(&prev.total_consumption, &cur.total_consumption),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    fn sample(timestamp: i64, production_wh: i64, net_wh: i64, total_wh: i64) -> Sample {
        Sample {
            timestamp,
            production: EnergyChannel::new(0, production_wh, 0),
            net_consumption: EnergyChannel::new(0, net_wh, 0),
            total_consumption: EnergyChannel::new(0, total_wh, 0),
        }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(reconstruct(&[], UtcOffset::UTC).is_empty());
    }

    #[test]
    fn single_sample_is_a_zero_point() {
        let points = reconstruct(&[sample(1_000, 100, 50, 10)], UtcOffset::UTC);
        assert_eq!(points, vec![DerivedRatePoint::zero(1_000)]);
        assert_eq!(points[0].rates(), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn five_watt_hours_over_one_hour_is_five_watts() {
        let points = reconstruct(&[sample(1_000, 100, 0, 0), sample(4_600, 105, 0, 0)], UtcOffset::UTC);
        assert_eq!(points[1].production_watts, 5.0);
    }

    #[test]
    fn channels_are_derived_independently() {
        // 15 minutes apart.
        let points = reconstruct(&[sample(0, 1_000, 2_000, 3_000), sample(900, 1_250, 2_100, 3_300)], UtcOffset::UTC);
        assert_eq!(points[1].rates(), [1_000.0, 400.0, 1_200.0]);
    }

    #[test]
    fn day_rollover_resets_rates() {
        let before = datetime!(2024-03-10 23:59:50 UTC).unix_timestamp();
        let after = datetime!(2024-03-11 00:00:10 UTC).unix_timestamp();

        let points = reconstruct(&[sample(before, 100, 100, 100), sample(after, 9_000, 9_000, 9_000)], UtcOffset::UTC);

        assert_eq!(points.len(), 2);
        assert_eq!(points[1].rates(), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn rollover_is_judged_in_the_configured_offset() {
        // Midnight UTC is 19:00 the previous day at -05:00.
        let before = datetime!(2024-03-10 23:59:50 UTC).unix_timestamp();
        let after = datetime!(2024-03-11 00:00:10 UTC).unix_timestamp();

        let points = reconstruct(&[sample(before, 100, 0, 0), sample(after, 101, 0, 0)], offset!(-5));

        assert_eq!(points[1].production_watts, 1.0 / (20.0 / 3600.0));
    }

    #[test]
    fn rollover_baseline_advances_to_the_new_day() {
        let t0 = datetime!(2024-03-10 23:00:00 UTC).unix_timestamp();
        let t1 = datetime!(2024-03-11 00:30:00 UTC).unix_timestamp();
        let t2 = datetime!(2024-03-11 01:30:00 UTC).unix_timestamp();

        let points = reconstruct(
            &[sample(t0, 0, 0, 0), sample(t1, 500, 0, 0), sample(t2, 800, 0, 0)],
            UtcOffset::UTC,
        );

        assert_eq!(points[1].production_watts, 0.0);
        assert_eq!(points[2].production_watts, 300.0);
    }

    #[test]
    fn counter_regression_clamps_to_zero() {
        let points = reconstruct(&[sample(1_000, 500, 0, 0), sample(4_600, 400, 0, 0)], UtcOffset::UTC);
        assert_eq!(points[1].production_watts, 0.0);
    }

    #[test]
    fn duplicate_or_reversed_timestamps_yield_zero() {
        let same = reconstruct(&[sample(1_000, 100, 0, 0), sample(1_000, 200, 0, 0)], UtcOffset::UTC);
        assert_eq!(same[1].production_watts, 0.0);

        let reversed = reconstruct(&[sample(4_600, 100, 0, 0), sample(1_000, 200, 0, 0)], UtcOffset::UTC);
        assert_eq!(reversed[1].production_watts, 0.0);
    }
}
