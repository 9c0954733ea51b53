mod artifacts;
mod connection;
mod metrics;
mod runs;

pub use artifacts::{RunArtifact, RunArtifactInput, RunArtifactsRepository};
pub use connection::RegistryDb;
pub use metrics::{RunMetric, RunMetricInput, RunMetricsRepository};
pub use runs::{Run, RunInput, RunKind, RunRepository, RunStatus};
