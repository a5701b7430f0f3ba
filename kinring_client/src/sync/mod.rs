pub mod mirror;
pub mod partition;
pub mod subscriber;
pub mod writer;
