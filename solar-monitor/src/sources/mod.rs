pub mod gateway_poll;

pub use gateway_poll::GatewayPollSource;
