pub mod aggregator;
pub mod matcher;
pub mod normalizer;
pub mod upload;
pub mod workflow;

pub use aggregator::{summarize, Aggregator, ReconLocks};
pub use matcher::{MatchedRow, Matcher};
pub use normalizer::RawRow;
pub use upload::{SubmitUpload, UploadService};
pub use workflow::{CreateReconciliation, WorkflowService};
