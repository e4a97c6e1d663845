mod rates;

pub use rates::{reconstruct, DerivedRatePoint};

use crate::pipeline::{Envelope, PipelineError, Transform};
use solar_client::domain::Sample;
use time::macros::datetime;

/// Pure validation of a gateway `Sample`.
///
/// Rules:
/// - timestamp must be within a broad sanity window [2000-01-01, 2100-01-01).
/// - cumulative watt-hour counters must be non-negative.
pub fn validate_sample(env: Envelope<Sample>) -> Result<Envelope<Sample>, PipelineError> {
    let s = &env.payload;

    let min_ts = datetime!(2000-01-01 00:00:00 UTC).unix_timestamp();
    let max_ts = datetime!(2100-01-01 00:00:00 UTC).unix_timestamp();

    if s.timestamp < min_ts || s.timestamp >= max_ts {
        return Err(PipelineError::Validation(format!(
            "timestamp {} out of allowed range",
            s.timestamp
        )));
    }

    if s
        .channels()
        .iter()
        .any(|c| c.wh_delivered < 0 || c.wh_received < 0)
    {
        return Err(PipelineError::Validation(
            "cumulative watt-hour counters must be non-negative".to_string(),
        ));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct SampleValidation;

#[async_trait::async_trait]
impl Transform<Sample> for SampleValidation {
    async fn apply(&self, input: Envelope<Sample>) -> Result<Envelope<Sample>, PipelineError> {
        match validate_sample(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_sample_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}
