mod sample;

pub use sample::{EnergyChannel, Sample};
