use std::collections::HashMap;

use graphql_parser::schema::{
    self, Definition, Field, InputValue, Type, TypeDefinition, TypeExtension,
};
use serde_json::{Value, json};

use super::{InjectionHeuristic, RawDocument, openapi};
use crate::error::ParseError;
use crate::models::{
    ApiDefinition, AuthRequirement, AuthType, Endpoint, OperationType, ParamLocation, Parameter,
    RequestBody,
};

const FORMAT: &str = "GraphQL";
const ENDPOINT_PATH: &str = "/graphql";

/// SDL text, or a mapping holding the SDL under a `graphql` key. Any other
/// non-OpenAPI mapping may itself be SDL that happened to read as YAML.
fn sdl(doc: &RawDocument) -> Option<&str> {
    match doc {
        RawDocument::Text(text) => Some(text.as_str()),
        RawDocument::Structured { value, source } => {
            match value.get("graphql").and_then(Value::as_str) {
                Some(embedded) => Some(embedded),
                None if !openapi::is_openapi_root(value) => source.as_deref(),
                None => None,
            }
        }
        RawDocument::Markup(_) => None,
    }
}

pub fn can_parse(doc: &RawDocument) -> bool {
    let Some(text) = sdl(doc) else {
        return false;
    };
    match schema::parse_schema::<String>(text) {
        Ok(document) => document.definitions.iter().any(|d| {
            matches!(
                d,
                Definition::SchemaDefinition(_)
                    | Definition::TypeDefinition(_)
                    | Definition::TypeExtension(_)
            )
        }),
        Err(_) => false,
    }
}

pub fn parse(doc: &RawDocument, heuristic: &InjectionHeuristic) -> Result<ApiDefinition, ParseError> {
    let text = sdl(doc).ok_or(ParseError::Validation {
        format: FORMAT,
        message: "no schema definition language found".to_string(),
    })?;
    let document = schema::parse_schema::<String>(text).map_err(|e| ParseError::Malformed {
        format: FORMAT,
        message: e.to_string(),
    })?;

    let mut query_root = "Query".to_string();
    let mut mutation_root = "Mutation".to_string();
    let mut fields: HashMap<String, Vec<&Field<'_, String>>> = HashMap::new();

    for definition in &document.definitions {
        match definition {
            Definition::SchemaDefinition(schema) => {
                if let Some(query) = &schema.query {
                    query_root = query.clone();
                }
                if let Some(mutation) = &schema.mutation {
                    mutation_root = mutation.clone();
                }
            }
            Definition::TypeDefinition(TypeDefinition::Object(object)) => {
                fields.entry(object.name.clone()).or_default().extend(object.fields.iter());
            }
            Definition::TypeExtension(TypeExtension::Object(extension)) => {
                fields
                    .entry(extension.name.clone())
                    .or_default()
                    .extend(extension.fields.iter());
            }
            _ => {}
        }
    }

    let mut definition = ApiDefinition::new("GraphQL API", "1.0.0");
    definition.auth_schemes.insert(
        "bearerAuth".to_string(),
        json!({"type": "http", "scheme": "bearer", "bearerFormat": "JWT"}),
    );

    let roots = [
        (query_root, OperationType::Query),
        (mutation_root, OperationType::Mutation),
    ];
    for (root, operation_type) in roots {
        for field in fields.get(&root).into_iter().flatten() {
            definition.endpoints.push(endpoint(field, operation_type, heuristic));
        }
    }

    Ok(definition)
}

fn endpoint(field: &Field<'_, String>, operation_type: OperationType, heuristic: &InjectionHeuristic) -> Endpoint {
    let mut endpoint = Endpoint::new(ENDPOINT_PATH, "POST", operation_type);
    endpoint.name = field.name.clone();
    endpoint.description = field.description.clone().unwrap_or_default();
    endpoint.parameters = field
        .arguments
        .iter()
        .map(|arg| parameter(arg, heuristic))
        .collect();
    endpoint.request_body = Some(RequestBody {
        content_type: "application/json".to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "variables": {"type": "object"},
                "operationName": {"type": "string"}
            },
            "required": ["query"]
        }),
        required: true,
    });
    endpoint.auth_requirements = vec![AuthRequirement {
        scheme: Some("bearer".to_string()),
        ..AuthRequirement::header(AuthType::Jwt)
    }];
    endpoint
}

fn parameter(arg: &InputValue<'_, String>, heuristic: &InjectionHeuristic) -> Parameter {
    let mut param = Parameter::new(arg.name.clone(), ParamLocation::Body);
    param.required = matches!(arg.value_type, Type::NonNullType(_));
    param.param_type = named_type(&arg.value_type).to_string();
    param.description = arg.description.clone();
    param.insertion_points = heuristic.insertion_points(&arg.name, ParamLocation::Body);
    param
}

fn named_type<'a>(ty: &'a Type<'_, String>) -> &'a str {
    match ty {
        Type::NamedType(name) => name.as_str(),
        Type::ListType(inner) | Type::NonNullType(inner) => named_type(inner),
    }
}
