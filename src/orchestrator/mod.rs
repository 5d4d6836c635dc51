pub mod aggregator;
pub mod coordinator;
pub mod registry;
pub mod scan_manager;

pub use aggregator::{AggregatedResults, AggregatorHandle, ResultAggregator, ScanReport};
pub use coordinator::TaskCoordinator;
pub use registry::TaskRegistry;
pub use scan_manager::{ScanManager, ScanOutcome, ScanRequest};
