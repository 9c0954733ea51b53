pub mod error;
pub mod params;
pub mod performance;
pub mod project;
