pub mod aggregate;
pub mod orchestrator;
pub mod partition;
pub mod pool;
