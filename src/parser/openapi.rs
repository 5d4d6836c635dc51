use serde_json::{Map, Value};

use super::{InjectionHeuristic, RawDocument};
use crate::error::ParseError;
use crate::models::{
    ApiDefinition, AuthRequirement, AuthType, Endpoint, OperationType, ParamLocation, Parameter,
    RequestBody,
};

const FORMAT: &str = "OpenAPI";
const METHODS: [&str; 5] = ["get", "post", "put", "delete", "patch"];

pub fn can_parse(doc: &RawDocument) -> bool {
    match doc {
        RawDocument::Structured { value, .. } => is_openapi_root(value),
        _ => false,
    }
}

pub(super) fn is_openapi_root(value: &Value) -> bool {
    value.as_object().is_some_and(|map| {
        map.contains_key("openapi") || map.contains_key("swagger") || map.contains_key("paths")
    })
}

pub fn parse(doc: &RawDocument, heuristic: &InjectionHeuristic) -> Result<ApiDefinition, ParseError> {
    let RawDocument::Structured { value: root, .. } = doc else {
        return Err(invalid("document is not a mapping"));
    };
    validate(root)?;

    let info = root.get("info");
    let title = str_at(info, "title").unwrap_or("Unknown API");
    let version = info
        .and_then(|i| i.get("version"))
        .map(scalar_to_string)
        .unwrap_or_else(|| "1.0.0".to_string());

    let mut definition = ApiDefinition::new(title, version);
    definition.description = str_at(info, "description").map(str::to_string);
    definition.base_url = base_url(root);

    definition.auth_schemes.extend(security_schemes(root));

    let global_security = root.get("security").and_then(Value::as_array);

    let Some(paths) = root.get("paths").and_then(Value::as_object) else {
        return Ok(definition);
    };

    for (path, item) in paths {
        let Some(item) = item.as_object() else {
            continue;
        };
        let shared_params = item.get("parameters").and_then(Value::as_array);

        for method in METHODS {
            let Some(operation) = item.get(method).and_then(Value::as_object) else {
                continue;
            };

            let mut endpoint = Endpoint::new(path.as_str(), method.to_uppercase(), OperationType::Rest);
            endpoint.name = operation
                .get("operationId")
                .or_else(|| operation.get("summary"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            endpoint.description = operation
                .get("description")
                .or_else(|| operation.get("summary"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            endpoint.parameters = parameters(
                root,
                shared_params,
                operation.get("parameters").and_then(Value::as_array),
                heuristic,
            );
            endpoint.request_body = operation
                .get("requestBody")
                .map(|body| resolve(root, body))
                .and_then(request_body);

            let security = operation
                .get("security")
                .and_then(Value::as_array)
                .or(global_security);
            if let Some(security) = security {
                endpoint.auth_requirements = auth_requirements(security, &definition);
            }

            definition.endpoints.push(endpoint);
        }
    }

    Ok(definition)
}

fn validate(root: &Value) -> Result<(), ParseError> {
    if root.get("openapi").is_none() && root.get("swagger").is_none() {
        return Err(invalid("missing `openapi` version field"));
    }
    match root.get("paths") {
        Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(invalid("`paths` must be a mapping")),
        None => Err(invalid("missing `paths`")),
    }
}

fn invalid(message: &str) -> ParseError {
    ParseError::Validation {
        format: FORMAT,
        message: message.to_string(),
    }
}

fn str_at<'a>(value: Option<&'a Value>, key: &str) -> Option<&'a str> {
    value.and_then(|v| v.get(key)).and_then(Value::as_str)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn base_url(root: &Value) -> Option<String> {
    if let Some(url) = root
        .get("servers")
        .and_then(Value::as_array)
        .and_then(|servers| servers.first())
        .and_then(|server| server.get("url"))
        .and_then(Value::as_str)
    {
        return Some(url.to_string());
    }

    // Swagger 2.0
    let host = root.get("host").and_then(Value::as_str)?;
    let scheme = root
        .get("schemes")
        .and_then(Value::as_array)
        .and_then(|s| s.first())
        .and_then(Value::as_str)
        .unwrap_or("https");
    let base_path = root.get("basePath").and_then(Value::as_str).unwrap_or("");
    Some(format!("{}://{}{}", scheme, host, base_path))
}

fn security_schemes(root: &Value) -> Map<String, Value> {
    root.pointer("/components/securitySchemes")
        .or_else(|| root.get("securityDefinitions"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Follows a local `$ref` such as `#/components/parameters/Limit`.
fn resolve<'a>(root: &'a Value, value: &'a Value) -> &'a Value {
    match value.get("$ref").and_then(Value::as_str) {
        Some(reference) => reference
            .strip_prefix('#')
            .and_then(|pointer| root.pointer(pointer))
            .unwrap_or(value),
        None => value,
    }
}

fn parameters(
    root: &Value,
    shared: Option<&Vec<Value>>,
    own: Option<&Vec<Value>>,
    heuristic: &InjectionHeuristic,
) -> Vec<Parameter> {
    let mut params: Vec<Parameter> = Vec::new();

    let raw = shared.into_iter().flatten().chain(own.into_iter().flatten());
    for value in raw {
        let Some(param) = parameter(resolve(root, value), heuristic) else {
            continue;
        };
        // Operation-level parameters override path-level ones with the same name and location
        match params
            .iter_mut()
            .find(|p| p.name == param.name && p.location == param.location)
        {
            Some(existing) => *existing = param,
            None => params.push(param),
        }
    }

    params
}

fn parameter(value: &Value, heuristic: &InjectionHeuristic) -> Option<Parameter> {
    let name = value.get("name").and_then(Value::as_str)?;
    let location = ParamLocation::from_source(value.get("in").and_then(Value::as_str).unwrap_or(""));

    let mut param = Parameter::new(name, location);
    param.required = value.get("required").and_then(Value::as_bool).unwrap_or(false);
    param.param_type = value
        .pointer("/schema/type")
        .or_else(|| value.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("string")
        .to_string();
    param.description = value
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);
    param.insertion_points = heuristic.insertion_points(name, location);

    Some(param)
}

fn request_body(body: &Value) -> Option<RequestBody> {
    let (content_type, media) = body.get("content")?.as_object()?.iter().next()?;
    Some(RequestBody {
        content_type: content_type.clone(),
        schema: media.get("schema").cloned().unwrap_or(Value::Null),
        required: body.get("required").and_then(Value::as_bool).unwrap_or(false),
    })
}

pub fn auth_type_for(scheme: &Value) -> AuthType {
    let kind = scheme.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "http" => {
            // Bearer tokens go out through the JWT handler whatever their format
            let http_scheme = scheme.get("scheme").and_then(Value::as_str).unwrap_or("");
            if http_scheme.eq_ignore_ascii_case("bearer") {
                AuthType::Jwt
            } else {
                AuthType::Basic
            }
        }
        "basic" => AuthType::Basic,
        "apiKey" => AuthType::ApiKey,
        "oauth2" | "openIdConnect" => AuthType::Oauth2,
        _ => AuthType::None,
    }
}

fn auth_requirements(security: &[Value], definition: &ApiDefinition) -> Vec<AuthRequirement> {
    let mut requirements = Vec::new();

    for entry in security {
        let Some(entry) = entry.as_object() else {
            continue;
        };
        for name in entry.keys() {
            let Some(scheme) = definition.auth_schemes.get(name) else {
                tracing::warn!("Security requirement references unknown scheme '{}'", name);
                continue;
            };

            let auth_type = auth_type_for(scheme);
            let requirement = match auth_type {
                AuthType::ApiKey => AuthRequirement {
                    auth_type,
                    location: scheme
                        .get("in")
                        .and_then(Value::as_str)
                        .unwrap_or("header")
                        .to_string(),
                    name: scheme
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("X-API-Key")
                        .to_string(),
                    scheme: None,
                },
                _ => AuthRequirement {
                    scheme: scheme.get("scheme").and_then(Value::as_str).map(str::to_string),
                    ..AuthRequirement::header(auth_type)
                },
            };

            if !requirements.contains(&requirement) {
                requirements.push(requirement);
            }
        }
    }

    requirements
}
