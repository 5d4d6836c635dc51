use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::Notify;
use uuid::Uuid;

use byakugan::auth::AuthManager;
use byakugan::config::{Config, CoordinatorConfig};
use byakugan::error::CommsError;
use byakugan::grpc::{RemoteResult, ScanDispatcher};
use byakugan::models::{
    Evidence, Finding, OperationType, ParamLocation, ScanState, ScanTask, TaskStatus,
};
use byakugan::orchestrator::{ScanManager, ScanRequest, TaskCoordinator};
use byakugan::parser::ApiParser;
use byakugan::rules::RuleEngine;

const USERS_API: &str = r#"
openapi: 3.0.0
info:
  title: Users
  version: "1.0"
servers:
  - url: http://api.test
paths:
  /users/{id}:
    get:
      operationId: getUser
      parameters:
        - name: id
          in: path
          required: true
          schema:
            type: integer
  /search:
    get:
      parameters:
        - name: q
          in: query
          schema:
            type: string
  /orders:
    post:
      requestBody:
        content:
          application/json:
            schema:
              type: object
"#;

const RULES: &str = r#"
rules:
  - id: SQLI-001
    name: SQL injection in path identifiers
    severity: HIGH
    category: sql_injection
    method: GET
    required_parameters:
      - {name: id, location: path}
    detection:
      locations:
        path_parameters: [id]
      strategies:
        - {name: error_based, active: true}
    payloads:
      sql_injection: ["' OR '1'='1", "1; SELECT pg_sleep(5)--"]
    patterns: ["SQL syntax"]
  - id: XSS-001
    name: Reflected search term
    severity: MEDIUM
    category: xss
    required_parameters:
      - {name: q, location: query}
    detection:
      locations:
        query_parameters: [q]
      strategies:
        - {name: reflected, active: true}
    payloads:
      xss: ["<script>alert(1)</script>"]
  - id: HDR-001
    name: Missing security headers
    severity: LOW
    category: misconfiguration
    detection:
      locations: {}
      strategies:
        - {name: passive, active: true}
    payloads:
      misconfiguration: ["probe"]
"#;

const WSDL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<definitions name="UserService"
             targetNamespace="http://example.com/users"
             xmlns="http://schemas.xmlsoap.org/wsdl/"
             xmlns:soap="http://schemas.xmlsoap.org/wsdl/soap/"
             xmlns:tns="http://example.com/users">
  <message name="SearchUsersRequest">
    <part name="searchQuery" type="xsd:string"/>
  </message>
  <portType name="UserPortType">
    <operation name="SearchUsers">
      <input message="tns:SearchUsersRequest"/>
    </operation>
  </portType>
  <service name="UserDirectory">
    <port name="UserPort" binding="tns:UserBinding">
      <soap:address location="http://soap.example.com/users"/>
    </port>
  </service>
</definitions>"#;

// ============================================
// Mock scanner nodes
// ============================================

/// Reports one finding per task at the rule's severity. Tasks for
/// `failing_rule` always fail.
#[derive(Default)]
struct RecordingDispatcher {
    seen: Mutex<Vec<ScanTask>>,
    failing_rule: Option<&'static str>,
}

#[async_trait]
impl ScanDispatcher for RecordingDispatcher {
    async fn dispatch(&self, task: &ScanTask) -> Result<RemoteResult, CommsError> {
        self.seen.lock().unwrap().push(task.clone());

        if self.failing_rule == Some(task.rule.id.as_str()) {
            return Err(CommsError::Status {
                code: tonic::Code::Internal,
                message: "scanner crashed".to_string(),
            });
        }
        Ok(RemoteResult {
            success: true,
            findings: vec![Finding {
                id: format!("finding-{}", task.id),
                rule_id: task.rule.id.clone(),
                severity: task.rule.severity.as_str().to_string(),
                evidence: Some(Evidence {
                    data: task.target.url.clone(),
                    description: task.rule.name.clone(),
                }),
            }],
            error_details: None,
        })
    }
}

/// Holds the first dispatch until released.
struct GatedDispatcher {
    started: Notify,
    release: Notify,
    calls: Mutex<usize>,
}

#[async_trait]
impl ScanDispatcher for GatedDispatcher {
    async fn dispatch(&self, _task: &ScanTask) -> Result<RemoteResult, CommsError> {
        let first = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls == 1
        };
        if first {
            self.started.notify_one();
            self.release.notified().await;
        }
        Ok(RemoteResult {
            success: true,
            findings: Vec::new(),
            error_details: None,
        })
    }
}

fn write_rules(dir: &Path) {
    std::fs::write(dir.join("core.yaml"), RULES).unwrap();
}

fn load_engine(dir: &Path) -> RuleEngine {
    let mut engine = RuleEngine::new();
    engine.load_rules(dir).unwrap();
    engine
}

fn coordinator(dispatcher: Arc<dyn ScanDispatcher>, concurrent_limit: usize) -> TaskCoordinator {
    TaskCoordinator::new(
        dispatcher,
        Arc::new(AuthManager::new()),
        CoordinatorConfig {
            concurrent_limit,
            task_timeout_secs: 30,
            retry_count: 3,
            retry_delay_ms: 1_000,
        },
    )
}

// ============================================
// Parsing and matching
// ============================================

#[test]
fn path_identifier_rule_matches_get_user() {
    let dir = tempfile::tempdir().unwrap();
    write_rules(dir.path());
    let engine = load_engine(dir.path());

    let definition = ApiParser::default().parse(USERS_API).unwrap();
    let endpoint = definition
        .endpoints
        .iter()
        .find(|e| e.path == "/users/{id}" && e.method == "GET")
        .unwrap();

    let ids: Vec<String> = engine
        .match_endpoint(endpoint)
        .iter()
        .map(|r| r.id.clone())
        .collect();
    assert_eq!(ids, vec!["SQLI-001".to_string(), "HDR-001".to_string()]);

    let mut only_sqli = RuleEngine::new();
    let sqli_dir = tempfile::tempdir().unwrap();
    let sqli_only = RULES.split("  - id: XSS-001").next().unwrap();
    std::fs::write(sqli_dir.path().join("sqli.yaml"), sqli_only).unwrap();
    only_sqli.load_rules(sqli_dir.path()).unwrap();
    let matched = only_sqli.match_endpoint(endpoint);
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, "SQLI-001");
}

#[test]
fn wsdl_operation_becomes_injectable_soap_endpoint() {
    let definition = ApiParser::default().parse(WSDL).unwrap();
    assert_eq!(definition.endpoints.len(), 1);

    let endpoint = &definition.endpoints[0];
    assert_eq!(endpoint.path, "/soap/SearchUsers");
    assert_eq!(endpoint.method, "POST");
    assert_eq!(endpoint.operation_type, OperationType::Soap);
    assert_eq!(endpoint.parameters.len(), 1);

    let param = &endpoint.parameters[0];
    assert_eq!(param.name, "searchquery");
    assert_eq!(param.location, ParamLocation::Body);
    assert_eq!(param.insertion_points.len(), 1);
    assert_eq!(param.insertion_points[0].param_type, "sql_injection");
}

#[test]
fn shipped_rules_load() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("rules");
    let engine = load_engine(&dir);
    assert!(engine.get("SQLI-001").is_some());
    assert!(engine.get("XSS-001").is_some());
}

// ============================================
// Task generation and execution
// ============================================

#[test]
fn one_task_per_matching_rule() {
    let dir = tempfile::tempdir().unwrap();
    write_rules(dir.path());
    let engine = load_engine(dir.path());
    let definition = ApiParser::default().parse(USERS_API).unwrap();

    let expected: usize = definition
        .endpoints
        .iter()
        .map(|e| engine.match_endpoint(e).len())
        .sum();

    let coordinator = coordinator(Arc::new(RecordingDispatcher::default()), 4);
    let scan_id = Uuid::new_v4();
    let tasks = coordinator.generate_tasks(&definition, &engine, scan_id);

    assert_eq!(tasks.len(), expected);
    assert_eq!(tasks.len(), 5);
    assert!(tasks.iter().all(|t| t.scan_id == scan_id));

    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids.len(), tasks.len());

    let sqli = tasks.iter().find(|t| t.rule.id == "SQLI-001").unwrap();
    assert_eq!(sqli.target.url, "http://api.test/users/{id}");
    assert_eq!(sqli.target.method, "GET");
    let points = &sqli.payload.as_ref().unwrap().insertion_points;
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].location, "path.id");
    assert_eq!(points[0].payloads.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn every_task_reports_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    write_rules(dir.path());
    let engine = load_engine(dir.path());
    let definition = ApiParser::default().parse(USERS_API).unwrap();

    let dispatcher = Arc::new(RecordingDispatcher {
        failing_rule: Some("XSS-001"),
        ..RecordingDispatcher::default()
    });
    let coordinator = coordinator(dispatcher.clone(), 2);
    let tasks = coordinator.generate_tasks(&definition, &engine, Uuid::new_v4());
    let task_ids: HashSet<String> = tasks.iter().map(|t| t.id.clone()).collect();

    let results = coordinator.execute_tasks(tasks).await;
    let result_ids: HashSet<String> = results.iter().map(|r| r.task_id.clone()).collect();
    assert_eq!(results.len(), task_ids.len());
    assert_eq!(result_ids, task_ids);

    let failed: Vec<_> = results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, TaskStatus::Failed);
    assert_eq!(failed[0].retry_count, 3);
    assert!(failed[0].error_details.as_deref().unwrap().contains("scanner crashed"));

    assert!(results.iter().filter(|r| r.success).all(|r| r.retry_count == 0));
    // Four successful tasks plus three attempts for the failing one
    assert_eq!(dispatcher.seen.lock().unwrap().len(), 7);
}

// ============================================
// Scan manager
// ============================================

fn scan_config(concurrent_limit: usize) -> Config {
    let mut config = Config::default();
    config.coordinator.concurrent_limit = concurrent_limit;
    config.coordinator.retry_delay_ms = 10;
    config
}

#[tokio::test]
async fn full_scan_produces_report() {
    let dir = tempfile::tempdir().unwrap();
    write_rules(dir.path());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let manager = ScanManager::from_config(&scan_config(3), dispatcher.clone());

    let mut request = ScanRequest::new(USERS_API, dir.path());
    request.target_base_url = Some("https://staging.api.test/".to_string());
    let scan_id = request.scan_id;

    let outcome = manager.run_scan(request).await.unwrap();
    assert_eq!(outcome.scan_id, scan_id);
    assert_eq!(outcome.status.state, ScanState::Completed);
    assert_eq!(outcome.status.progress, 1.0);
    assert_eq!(outcome.results.len(), 5);

    let summary = &outcome.summary;
    assert_eq!(summary.total_tasks, 5);
    assert_eq!(summary.completed_tasks, 5);
    assert_eq!(summary.failed_tasks, 0);
    assert_eq!(summary.total_findings, 5);
    assert_eq!(summary.severity_counts["high"], 1);
    assert_eq!(summary.severity_counts["medium"], 1);
    assert_eq!(summary.severity_counts["low"], 3);
    assert_eq!(summary.severity_counts["critical"], 0);

    assert_eq!(outcome.report.findings.len(), 5);
    assert!(outcome.report.errors.is_empty());
    assert!(outcome.report.metadata.end_time.is_some());

    let seen = dispatcher.seen.lock().unwrap();
    assert!(seen
        .iter()
        .all(|t| t.target.url.starts_with("https://staging.api.test/")));
    drop(seen);

    assert_eq!(manager.summary(scan_id).await.unwrap(), outcome.summary);
    let status = manager.scan_status(scan_id).await.unwrap();
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.finished_tasks, 5);
}

#[tokio::test]
async fn stopping_a_scan_lets_in_flight_work_finish() {
    let dir = tempfile::tempdir().unwrap();
    write_rules(dir.path());
    let dispatcher = Arc::new(GatedDispatcher {
        started: Notify::new(),
        release: Notify::new(),
        calls: Mutex::new(0),
    });
    let manager = ScanManager::from_config(&scan_config(1), dispatcher.clone());

    let request = ScanRequest::new(USERS_API, dir.path());
    let scan_id = request.scan_id;

    let (outcome, _) = tokio::join!(manager.run_scan(request), async {
        dispatcher.started.notified().await;
        let status = manager.scan_status(scan_id).await.unwrap();
        assert_eq!(status.state, ScanState::Running);
        assert_eq!(status.total_tasks, 5);

        manager.stop_scan(scan_id).await.unwrap();
        dispatcher.release.notify_one();
    });
    let outcome = outcome.unwrap();

    assert_eq!(outcome.status.state, ScanState::Cancelled);
    assert_eq!(outcome.results.len(), 5);
    let completed = outcome
        .results
        .iter()
        .filter(|r| r.status == TaskStatus::Completed)
        .count();
    let stopped = outcome
        .results
        .iter()
        .filter(|r| r.status == TaskStatus::Stopped)
        .count();
    assert_eq!(completed, 1);
    assert_eq!(stopped, 4);
    assert_eq!(*dispatcher.calls.lock().unwrap(), 1);
    assert_eq!(outcome.summary.failed_tasks, 4);
}
