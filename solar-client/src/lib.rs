pub mod db;
pub mod domain;

pub use db::{SampleStore, StoreError, TokenStore};
pub use domain::{EnergyChannel, Sample};
