use serde::Serialize;
use time::OffsetDateTime;

/// One metering channel of a gateway reading.
///
/// `watts` is the power reported at sample time. The two watt-hour fields are
/// lifetime counters kept by the device; firmware that does not report them
/// leaves them at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnergyChannel {
    pub watts: i64,
    pub wh_delivered: i64,
    pub wh_received: i64,
}

impl EnergyChannel {
    pub const fn new(watts: i64, wh_delivered: i64, wh_received: i64) -> Self {
        Self {
            watts,
            wh_delivered,
            wh_received,
        }
    }
}

/// A single accepted telemetry reading, keyed by its unix timestamp (seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub timestamp: i64,
    pub production: EnergyChannel,
    pub net_consumption: EnergyChannel,
    pub total_consumption: EnergyChannel,
}

impl Sample {
    /// The sample's timestamp as a UTC datetime, if it is representable.
    pub fn created_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.timestamp).ok()
    }

    pub fn channels(&self) -> [EnergyChannel; 3] {
        [self.production, self.net_consumption, self.total_consumption]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn created_at_converts_unix_seconds() {
        let s = Sample {
            timestamp: datetime!(2024-06-01 12:00:00 UTC).unix_timestamp(),
            production: EnergyChannel::default(),
            net_consumption: EnergyChannel::default(),
            total_consumption: EnergyChannel::default(),
        };

        assert_eq!(s.created_at(), Some(datetime!(2024-06-01 12:00:00 UTC)));
    }

    #[test]
    fn channels_are_ordered_production_net_total() {
        let s = Sample {
            timestamp: 0,
            production: EnergyChannel::new(1, 0, 0),
            net_consumption: EnergyChannel::new(2, 0, 0),
            total_consumption: EnergyChannel::new(3, 0, 0),
        };

        let watts: Vec<i64> = s.channels().iter().map(|c| c.watts).collect();
        assert_eq!(watts, vec![1, 2, 3]);
    }
}
