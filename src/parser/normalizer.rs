// Canonical form for parsed definitions. Every function here is idempotent.

use crate::models::{ApiDefinition, Endpoint, InsertionPoint, Parameter};

/// Leading slash, no trailing slash, no repeated slashes.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

pub fn normalize_parameter(mut param: Parameter) -> Parameter {
    param.name = param.name.to_lowercase();
    if param.param_type.trim().is_empty() {
        param.param_type = "string".to_string();
    }
    param.insertion_points = param
        .insertion_points
        .into_iter()
        .map(normalize_insertion_point)
        .collect();
    param
}

fn normalize_insertion_point(mut point: InsertionPoint) -> InsertionPoint {
    point.param_name = point.param_name.to_lowercase();
    point
}

pub fn normalize_endpoint(mut endpoint: Endpoint) -> Endpoint {
    endpoint.path = normalize_path(&endpoint.path);
    endpoint.method = endpoint.method.to_uppercase();
    endpoint.parameters = endpoint
        .parameters
        .into_iter()
        .map(normalize_parameter)
        .collect();
    endpoint
}

pub fn normalize_definition(mut definition: ApiDefinition) -> ApiDefinition {
    definition.endpoints = definition
        .endpoints
        .into_iter()
        .map(normalize_endpoint)
        .collect();
    definition
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OperationType, ParamLocation};
    use pretty_assertions::assert_eq;

    #[test]
    fn paths() {
        assert_eq!(normalize_path("//api//users//"), "/api/users");
        assert_eq!(normalize_path("api/users/"), "/api/users");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/users/{id}"), "/users/{id}");
    }

    #[test]
    fn parameter_from_raw_document() {
        let raw = serde_json::json!({"name": "USER_ID", "location": "QUERY"});
        let param: Parameter = serde_json::from_value(raw).unwrap();
        let param = normalize_parameter(param);

        assert_eq!(param.name, "user_id");
        assert_eq!(param.location, ParamLocation::Query);
        assert_eq!(param.param_type, "string");
        assert!(!param.required);
    }

    #[test]
    fn invalid_location_falls_back_to_query() {
        let raw = serde_json::json!({"name": "x", "location": "nowhere", "type": "integer"});
        let param = normalize_parameter(serde_json::from_value(raw).unwrap());
        assert_eq!(param.location, ParamLocation::Query);
        assert_eq!(param.param_type, "integer");
    }

    #[test]
    fn endpoint_normalization_is_idempotent() {
        let mut endpoint = Endpoint::new("api//Users/{ID}/", "get", OperationType::Rest);
        let mut param = Parameter::new("ID", ParamLocation::Path);
        param.param_type = String::new();
        param.insertion_points.push(InsertionPoint {
            param_name: "ID".to_string(),
            param_type: "sql_injection".to_string(),
            location: ParamLocation::Path,
            payloads: Vec::new(),
        });
        endpoint.parameters.push(param);

        let once = normalize_endpoint(endpoint);
        let twice = normalize_endpoint(once.clone());

        assert_eq!(once, twice);
        assert_eq!(once.path, "/api/Users/{ID}");
        assert_eq!(once.method, "GET");
        assert_eq!(once.parameters[0].name, "id");
        assert_eq!(once.parameters[0].param_type, "string");
        assert_eq!(once.parameters[0].insertion_points[0].param_name, "id");
    }
}
