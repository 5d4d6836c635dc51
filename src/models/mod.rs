pub mod api;
pub mod rule;
pub mod scan;

pub use api::{
    ApiDefinition, AuthRequirement, AuthType, Endpoint, InsertionPoint, OperationType,
    ParamLocation, Parameter, RequestBody,
};
pub use rule::{Detection, DetectionLocations, RequiredParameter, Rule, Severity, Strategy};
pub use scan::{
    AuthContext, Evidence, Finding, ScanResult, ScanState, ScanStatus, ScanSummary, ScanTask,
    TaskStatus, TaskStatusRecord,
};
