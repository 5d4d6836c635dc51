// Rule applicability. Everything here is a pure function of (rule, endpoint).

use crate::models::{Endpoint, ParamLocation, Rule};

pub fn matches(rule: &Rule, endpoint: &Endpoint) -> bool {
    method_matches(rule, endpoint)
        && covers_required_parameters(rule, endpoint)
        && locations_match(rule, endpoint)
}

pub fn method_matches(rule: &Rule, endpoint: &Endpoint) -> bool {
    rule.method.eq_ignore_ascii_case("ANY") || rule.method.eq_ignore_ascii_case(&endpoint.method)
}

pub fn covers_required_parameters(rule: &Rule, endpoint: &Endpoint) -> bool {
    rule.required_parameters.iter().all(|required| {
        endpoint
            .parameters
            .iter()
            .any(|p| p.location == required.location && p.name.eq_ignore_ascii_case(&required.name))
    })
}

/// No declared locations matches anything; otherwise one endpoint parameter
/// must be named in the set for its location.
pub fn locations_match(rule: &Rule, endpoint: &Endpoint) -> bool {
    let locations = &rule.detection.locations;
    if locations.is_empty() {
        return true;
    }

    endpoint.parameters.iter().any(|param| {
        let declared = match param.location {
            ParamLocation::Path => &locations.path_parameters,
            ParamLocation::Query => &locations.query_parameters,
            ParamLocation::Header => &locations.headers,
            ParamLocation::Body | ParamLocation::Cookie => return false,
        };
        declared.iter().any(|name| name.eq_ignore_ascii_case(&param.name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Detection, DetectionLocations, OperationType, Parameter, RequiredParameter, Severity,
        Strategy,
    };
    use std::collections::BTreeMap;

    fn rule(method: &str) -> Rule {
        Rule {
            id: "R1".to_string(),
            name: "rule".to_string(),
            description: String::new(),
            severity: Severity::Medium,
            category: "sql_injection".to_string(),
            method: method.to_string(),
            required_parameters: Vec::new(),
            detection: Detection {
                locations: DetectionLocations::default(),
                strategies: vec![Strategy {
                    name: "error_based".to_string(),
                    active: true,
                }],
            },
            payloads: BTreeMap::from([("sql_injection".to_string(), vec!["'".to_string()])]),
            patterns: Vec::new(),
        }
    }

    fn endpoint(method: &str, params: &[(&str, ParamLocation)]) -> Endpoint {
        let mut endpoint = Endpoint::new("/users/{id}", method, OperationType::Rest);
        endpoint.parameters = params
            .iter()
            .map(|(name, location)| Parameter::new(*name, *location))
            .collect();
        endpoint
    }

    #[test]
    fn any_method_matches_everything() {
        let rule = rule("ANY");
        assert!(matches(&rule, &endpoint("GET", &[])));
        assert!(matches(&rule, &endpoint("DELETE", &[])));
    }

    #[test]
    fn method_comparison_ignores_case() {
        assert!(matches(&rule("get"), &endpoint("GET", &[])));
        assert!(!matches(&rule("POST"), &endpoint("GET", &[])));
    }

    #[test]
    fn required_parameters_must_share_location() {
        let mut rule = rule("GET");
        rule.required_parameters.push(RequiredParameter {
            name: "id".to_string(),
            location: ParamLocation::Path,
        });

        assert!(matches(&rule, &endpoint("GET", &[("id", ParamLocation::Path)])));
        assert!(!matches(&rule, &endpoint("GET", &[("id", ParamLocation::Query)])));
        assert!(!matches(&rule, &endpoint("GET", &[])));
    }

    #[test]
    fn declared_locations_need_an_intersection() {
        let mut rule = rule("ANY");
        rule.detection.locations.query_parameters.push("search".to_string());
        rule.detection.locations.headers.push("x-user".to_string());

        assert!(matches(&rule, &endpoint("GET", &[("search", ParamLocation::Query)])));
        assert!(matches(&rule, &endpoint("GET", &[("X-User", ParamLocation::Header)])));
        assert!(!matches(&rule, &endpoint("GET", &[("search", ParamLocation::Path)])));
        assert!(!matches(&rule, &endpoint("GET", &[("page", ParamLocation::Query)])));
    }
}
