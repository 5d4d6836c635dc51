pub mod client;
pub mod pool;
pub mod proto;

use async_trait::async_trait;

use crate::error::CommsError;
use crate::models::{Evidence, Finding, ScanTask};

pub use client::ScannerClient;
pub use pool::NodePool;

/// What a scanner node reported for one task attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResult {
    pub success: bool,
    pub findings: Vec<Finding>,
    pub error_details: Option<String>,
}

/// Sends a single task attempt to some scanner node.
#[async_trait]
pub trait ScanDispatcher: Send + Sync {
    async fn dispatch(&self, task: &ScanTask) -> Result<RemoteResult, CommsError>;
}

// ============================================
// Model <-> wire conversions
// ============================================

impl From<&ScanTask> for proto::ScanTask {
    fn from(task: &ScanTask) -> Self {
        proto::ScanTask {
            id: task.id.clone(),
            scan_id: task.scan_id.to_string(),
            target: Some(proto::Target {
                url: task.target.url.clone(),
                method: task.target.method.clone(),
                protocol: task.target.protocol.clone(),
            }),
            auth_context: task.auth_context.as_ref().map(|auth| proto::AuthContext {
                r#type: auth.auth_type.as_str().to_string(),
                headers: auth.headers.clone(),
            }),
            rule_context: Some(proto::RuleContext {
                id: task.rule.id.clone(),
                category: task.rule.category.clone(),
                severity: task.rule.severity.as_str().to_string(),
                required_evidence: task.rule.patterns.clone(),
            }),
            payload: task.payload.as_ref().map(|payload| proto::Payload {
                headers: payload.headers.clone(),
                query_params: payload.query_params.clone(),
                insertion_points: payload
                    .insertion_points
                    .iter()
                    .map(|point| proto::InsertionPoint {
                        location: point.location.clone(),
                        r#type: point.point_type.clone(),
                        payloads: point.payloads.clone(),
                    })
                    .collect(),
            }),
            validation: task.validation.as_ref().map(|validation| proto::Validation {
                success_conditions: Some(proto::SuccessConditions {
                    status_codes: validation
                        .success_conditions
                        .status_codes
                        .iter()
                        .map(|&code| i32::from(code))
                        .collect(),
                    timing_threshold: validation.success_conditions.timing_threshold,
                    error_patterns: validation.success_conditions.error_patterns.clone(),
                }),
                evidence_collection: Some(proto::EvidenceCollection {
                    save_request: validation.evidence_collection.save_request,
                    save_response: validation.evidence_collection.save_response,
                    timing_analysis: validation.evidence_collection.timing_analysis,
                }),
            }),
        }
    }
}

impl From<proto::Finding> for Finding {
    fn from(finding: proto::Finding) -> Self {
        Finding {
            id: finding.id,
            rule_id: finding.rule_id,
            severity: finding.severity,
            evidence: finding.evidence.map(|e| Evidence {
                data: e.data,
                description: e.description,
            }),
        }
    }
}

impl From<proto::ScanResult> for RemoteResult {
    fn from(result: proto::ScanResult) -> Self {
        RemoteResult {
            success: result.success,
            findings: result.findings.into_iter().map(Finding::from).collect(),
            error_details: Some(result.error_details).filter(|e| !e.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::scan::{
        EvidenceCollection, SuccessConditions, TaskInsertionPoint, TaskPayload, TaskTarget,
        TaskValidation,
    };
    use crate::models::{AuthContext, AuthType, Endpoint, OperationType, Rule};
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn task_maps_onto_wire_message() {
        let rule: Rule = serde_json::from_value(serde_json::json!({
            "id": "SQLI-1",
            "name": "sqli",
            "description": "",
            "severity": "HIGH",
            "category": "sql_injection",
            "method": "ANY",
            "required_parameters": [],
            "detection": {"locations": {}, "strategies": [{"name": "error", "active": true}]},
            "payloads": {"sql_injection": ["'"]},
            "patterns": ["SQL syntax"]
        }))
        .unwrap();

        let task = ScanTask {
            id: "task-1".to_string(),
            scan_id: uuid::Uuid::nil(),
            endpoint: Arc::new(Endpoint::new("/users", "GET", OperationType::Rest)),
            rule: Arc::new(rule),
            target: TaskTarget {
                url: "http://target/users".to_string(),
                method: "GET".to_string(),
                protocol: "http".to_string(),
            },
            auth_context: Some(AuthContext {
                auth_type: AuthType::Jwt,
                headers: HashMap::from([("Authorization".to_string(), "Bearer t".to_string())]),
            }),
            payload: Some(TaskPayload {
                insertion_points: vec![TaskInsertionPoint {
                    location: "query.search".to_string(),
                    point_type: "sql_injection".to_string(),
                    payloads: vec!["'".to_string()],
                }],
                ..TaskPayload::default()
            }),
            validation: Some(TaskValidation {
                success_conditions: SuccessConditions {
                    status_codes: vec![200, 201, 202],
                    timing_threshold: 0.0,
                    error_patterns: vec!["SQL syntax".to_string()],
                },
                evidence_collection: EvidenceCollection {
                    save_request: true,
                    save_response: true,
                    timing_analysis: false,
                },
            }),
        };

        let wire = proto::ScanTask::from(&task);
        assert_eq!(wire.id, "task-1");
        assert_eq!(wire.auth_context.as_ref().unwrap().r#type, "jwt");
        assert_eq!(wire.rule_context.as_ref().unwrap().severity, "HIGH");
        assert_eq!(wire.payload.as_ref().unwrap().insertion_points[0].r#type, "sql_injection");
        assert_eq!(
            wire.validation
                .as_ref()
                .and_then(|v| v.success_conditions.as_ref())
                .map(|c| c.status_codes.clone()),
            Some(vec![200, 201, 202])
        );
    }

    #[test]
    fn empty_error_details_become_none() {
        let remote = RemoteResult::from(proto::ScanResult {
            task_id: "t".to_string(),
            success: true,
            findings: vec![proto::Finding {
                id: "f".to_string(),
                rule_id: "r".to_string(),
                severity: "high".to_string(),
                evidence: None,
            }],
            error_details: String::new(),
        });
        assert!(remote.success);
        assert_eq!(remote.error_details, None);
        assert_eq!(remote.findings[0].severity, "high");
    }
}
