pub mod limit;
pub mod partition;
pub mod schedule;
