use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value, json};

use super::{InjectionHeuristic, RawDocument};
use crate::error::ParseError;
use crate::models::{
    ApiDefinition, AuthRequirement, AuthType, Endpoint, OperationType, ParamLocation, Parameter,
    RequestBody,
};

const FORMAT: &str = "WSDL";

// ============================================
// Minimal element tree
// ============================================

#[derive(Debug, Default)]
struct Element {
    /// Local name, namespace prefix removed
    name: String,
    /// Qualified attribute name and unescaped value
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, ParseError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| malformed(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(|e| malformed(e.to_string()))?;
            attributes.push((key, value.into_owned()));
        }
        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
        })
    }

    fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| strip_prefix(key) == local && !key.starts_with("xmlns"))
            .map(|(_, value)| value.as_str())
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn namespaces(&self) -> BTreeMap<String, String> {
        self.attributes
            .iter()
            .filter_map(|(key, value)| {
                let prefix = match key.as_str() {
                    "xmlns" => "",
                    other => other.strip_prefix("xmlns:")?,
                };
                Some((prefix.to_string(), value.clone()))
            })
            .collect()
    }
}

fn malformed(message: String) -> ParseError {
    ParseError::Malformed {
        format: FORMAT,
        message,
    }
}

fn strip_prefix(qualified: &str) -> &str {
    qualified.rsplit(':').next().unwrap_or(qualified)
}

fn parse_tree(text: &str) -> Result<Element, ParseError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(Element::from_start(&start)?),
            Ok(Event::Empty(start)) => {
                let element = Element::from_start(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Ok(Event::End(_)) => {
                let element = stack.pop().ok_or_else(|| malformed("unbalanced end tag".to_string()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(malformed(format!(
                    "error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
        }
    }

    if !stack.is_empty() {
        return Err(malformed("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| malformed("document has no root element".to_string()))
}

/// Local name of the first element, without building the tree.
fn root_name(text: &str) -> Option<String> {
    let mut reader = Reader::from_str(text);
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) | Ok(Event::Empty(start)) => {
                return Some(String::from_utf8_lossy(start.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

// ============================================
// WSDL
// ============================================

pub fn can_parse(doc: &RawDocument) -> bool {
    match doc {
        RawDocument::Markup(text) => root_name(text).as_deref() == Some("definitions"),
        _ => false,
    }
}

pub fn parse(doc: &RawDocument, heuristic: &InjectionHeuristic) -> Result<ApiDefinition, ParseError> {
    let RawDocument::Markup(text) = doc else {
        return Err(ParseError::Validation {
            format: FORMAT,
            message: "document is not XML".to_string(),
        });
    };
    let root = parse_tree(text)?;
    if root.name != "definitions" {
        return Err(ParseError::Validation {
            format: FORMAT,
            message: format!("root element is <{}>, expected <definitions>", root.name),
        });
    }

    let namespaces = root.namespaces();
    let service = root.children_named("service").next();

    let title = service
        .and_then(|s| s.attr("name"))
        .or_else(|| root.attr("name"))
        .unwrap_or("SOAP Service");
    let mut definition = ApiDefinition::new(title, "1.0.0");
    definition.description = root.attr("targetNamespace").map(str::to_string);
    definition.base_url = service.and_then(|s| {
        s.children_named("port")
            .flat_map(|port| port.children_named("address"))
            .find_map(|address| address.attr("location"))
            .map(str::to_string)
    });
    definition.auth_schemes.insert(
        "basicAuth".to_string(),
        json!({"type": "http", "scheme": "basic"}),
    );

    // message name -> [(part name, part type)]
    let messages: BTreeMap<&str, Vec<(&str, &str)>> = root
        .children_named("message")
        .filter_map(|message| {
            let name = message.attr("name")?;
            let parts = message
                .children_named("part")
                .filter_map(|part| {
                    let part_name = part.attr("name")?;
                    let part_type = part.attr("type").or_else(|| part.attr("element")).unwrap_or("string");
                    Some((part_name, strip_prefix(part_type)))
                })
                .collect();
            Some((name, parts))
        })
        .collect();

    for port_type in root.children_named("portType") {
        for operation in port_type.children_named("operation") {
            let Some(name) = operation.attr("name") else {
                continue;
            };
            let parts = operation
                .children_named("input")
                .next()
                .and_then(|input| input.attr("message"))
                .and_then(|message| messages.get(strip_prefix(message)))
                .cloned()
                .unwrap_or_default();

            definition
                .endpoints
                .push(endpoint(name, &parts, &namespaces, heuristic));
        }
    }

    Ok(definition)
}

fn endpoint(
    operation: &str,
    parts: &[(&str, &str)],
    namespaces: &BTreeMap<String, String>,
    heuristic: &InjectionHeuristic,
) -> Endpoint {
    let mut endpoint = Endpoint::new(format!("/soap/{}", operation), "POST", OperationType::Soap);
    endpoint.name = operation.to_string();

    let mut properties = Map::new();
    for (part_name, part_type) in parts {
        let mut param = Parameter::new(*part_name, ParamLocation::Body);
        param.required = true;
        param.param_type = part_type.to_string();
        param.insertion_points = heuristic.insertion_points(part_name, ParamLocation::Body);
        endpoint.parameters.push(param);

        properties.insert(part_name.to_string(), json!({"type": part_type}));
    }

    endpoint.request_body = Some(RequestBody {
        content_type: "text/xml".to_string(),
        schema: json!({
            "type": "object",
            "xml": {"namespaces": namespaces},
            "properties": {
                "Envelope": {
                    "type": "object",
                    "properties": {
                        "Body": {
                            "type": "object",
                            "properties": {
                                operation: {
                                    "type": "object",
                                    "properties": Value::Object(properties)
                                }
                            }
                        }
                    }
                }
            }
        }),
        required: true,
    });
    endpoint.auth_requirements = vec![AuthRequirement {
        scheme: Some("basic".to_string()),
        ..AuthRequirement::header(AuthType::Basic)
    }];
    endpoint
}
