use crate::error::RuleValidationError;
use crate::models::rule::{DetectionDocument, RuleDocument};
use crate::models::{Detection, Rule, Severity};

/// Admission checks for rule documents.
pub struct RuleValidator;

impl RuleValidator {
    pub fn validate(doc: &RuleDocument) -> Result<(), RuleValidationError> {
        required(&doc.id, "id")?;
        required(&doc.name, "name")?;
        let severity = required(&doc.severity, "severity")?;
        required(&doc.category, "category")?;

        if Severity::parse(severity).is_none() {
            return Err(RuleValidationError::UnknownSeverity(severity.to_string()));
        }

        let detection = doc
            .detection
            .as_ref()
            .ok_or(RuleValidationError::MissingDetection("locations"))?;
        if detection.locations.is_none() {
            return Err(RuleValidationError::MissingDetection("locations"));
        }
        let strategies = detection
            .strategies
            .as_ref()
            .ok_or(RuleValidationError::MissingDetection("strategies"))?;
        if !strategies.iter().any(|s| s.active) {
            return Err(RuleValidationError::NoActiveStrategy);
        }

        if !doc.payloads.values().any(|payloads| !payloads.is_empty()) {
            return Err(RuleValidationError::EmptyPayloads);
        }

        Ok(())
    }
}

fn required<'a>(field: &'a Option<String>, name: &'static str) -> Result<&'a str, RuleValidationError> {
    match field.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(RuleValidationError::MissingField(name)),
    }
}

pub fn validate_rule(doc: &RuleDocument) -> bool {
    RuleValidator::validate(doc).is_ok()
}

impl TryFrom<RuleDocument> for Rule {
    type Error = RuleValidationError;

    fn try_from(doc: RuleDocument) -> Result<Self, Self::Error> {
        RuleValidator::validate(&doc)?;

        let severity = doc
            .severity
            .as_deref()
            .map(str::trim)
            .and_then(Severity::parse)
            .ok_or_else(|| RuleValidationError::UnknownSeverity(doc.severity.clone().unwrap_or_default()))?;
        let DetectionDocument {
            locations,
            strategies,
        } = doc.detection.unwrap_or_default();

        Ok(Rule {
            id: doc.id.unwrap_or_default().trim().to_string(),
            name: doc.name.unwrap_or_default(),
            description: doc.description.unwrap_or_default(),
            severity,
            category: doc.category.unwrap_or_default(),
            method: doc
                .method
                .map(|m| m.trim().to_uppercase())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "ANY".to_string()),
            required_parameters: doc.required_parameters,
            detection: Detection {
                locations: locations.unwrap_or_default(),
                strategies: strategies.unwrap_or_default(),
            },
            payloads: doc.payloads,
            patterns: doc.patterns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rule::RuleFile;

    fn document(yaml: &str) -> RuleDocument {
        let file: RuleFile = serde_yaml::from_str(yaml).unwrap();
        file.rules.into_iter().next().unwrap()
    }

    const VALID: &str = r#"
rules:
  - id: SQLI-001
    name: SQL injection in path id
    severity: HIGH
    category: sql_injection
    method: get
    detection:
      locations:
        path_parameters: [id]
      strategies:
        - name: error_based
          active: true
    payloads:
      sql_injection: ["' OR 1=1 --"]
"#;

    #[test]
    fn accepts_complete_rule() {
        let doc = document(VALID);
        assert!(validate_rule(&doc));

        let rule = Rule::try_from(doc).unwrap();
        assert_eq!(rule.severity, Severity::High);
        assert_eq!(rule.method, "GET");
        assert_eq!(rule.detection.locations.path_parameters, vec!["id".to_string()]);
    }

    #[test]
    fn rejects_missing_id() {
        let mut doc = document(VALID);
        doc.id = None;
        assert_eq!(
            RuleValidator::validate(&doc),
            Err(RuleValidationError::MissingField("id"))
        );

        doc.id = Some("   ".to_string());
        assert!(!validate_rule(&doc));
    }

    #[test]
    fn rejects_unknown_severity() {
        let mut doc = document(VALID);
        doc.severity = Some("BOGUS".to_string());
        assert_eq!(
            RuleValidator::validate(&doc),
            Err(RuleValidationError::UnknownSeverity("BOGUS".to_string()))
        );
    }

    #[test]
    fn rejects_detection_without_active_strategy() {
        let mut doc = document(VALID);
        if let Some(detection) = doc.detection.as_mut() {
            for strategy in detection.strategies.iter_mut().flatten() {
                strategy.active = false;
            }
        }
        assert_eq!(
            RuleValidator::validate(&doc),
            Err(RuleValidationError::NoActiveStrategy)
        );
    }

    #[test]
    fn rejects_missing_detection_blocks() {
        let mut doc = document(VALID);
        doc.detection.as_mut().unwrap().strategies = None;
        assert_eq!(
            RuleValidator::validate(&doc),
            Err(RuleValidationError::MissingDetection("strategies"))
        );

        doc.detection = None;
        assert_eq!(
            RuleValidator::validate(&doc),
            Err(RuleValidationError::MissingDetection("locations"))
        );
    }

    #[test]
    fn rejects_empty_payloads() {
        let mut doc = document(VALID);
        doc.payloads.clear();
        assert_eq!(
            RuleValidator::validate(&doc),
            Err(RuleValidationError::EmptyPayloads)
        );

        doc.payloads.insert("sql_injection".to_string(), Vec::new());
        assert!(!validate_rule(&doc));
    }
}
