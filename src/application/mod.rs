pub mod optimization;
pub mod pipeline;
pub mod prediction;
pub mod run_bundle;
pub mod training;
