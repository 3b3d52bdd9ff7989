pub mod metrics;
pub mod normalize;
pub mod stress;
