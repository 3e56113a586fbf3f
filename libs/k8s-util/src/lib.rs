pub mod client;
pub mod metrics;
pub mod path;
