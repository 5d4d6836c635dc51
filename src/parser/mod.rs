// API definition parsing
//
// Format detection is a fixed sequence of pure probes over the raw document
// (OpenAPI, then GraphQL SDL, then WSDL). The first probe that recognizes the
// document's structure commits to that format; parse failures after that
// point are real errors.

pub mod graphql;
pub mod normalizer;
pub mod openapi;
pub mod soap;

use std::path::Path;

use serde_json::Value;

use crate::config::ParserConfig;
use crate::error::ParseError;
use crate::models::{ApiDefinition, InsertionPoint, ParamLocation};

// ============================================
// Raw documents
// ============================================

#[derive(Debug, Clone, PartialEq)]
pub enum RawDocument {
    /// JSON or YAML mapping, with the text it was read from when there was one.
    /// Terse GraphQL SDL is also valid YAML, so the text is kept for the SDL check.
    Structured { value: Value, source: Option<String> },
    /// XML text
    Markup(String),
    /// Anything else, e.g. GraphQL SDL
    Text(String),
}

impl RawDocument {
    pub fn structured(value: Value) -> Self {
        RawDocument::Structured {
            value,
            source: None,
        }
    }

    pub fn from_text(text: &str) -> Result<Self, ParseError> {
        let trimmed = text.trim_start();

        if trimmed.starts_with('<') {
            return Ok(RawDocument::Markup(text.to_string()));
        }

        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            let value: Value = serde_json::from_str(text).map_err(|e| ParseError::Malformed {
                format: "JSON",
                message: e.to_string(),
            })?;
            return Ok(RawDocument::Structured {
                value,
                source: Some(text.to_string()),
            });
        }

        match serde_yaml::from_str::<Value>(text) {
            Ok(value @ Value::Object(_)) => Ok(RawDocument::Structured {
                value,
                source: Some(text.to_string()),
            }),
            Ok(_) => Ok(RawDocument::Text(text.to_string())),
            Err(e) if looks_like_openapi_yaml(text) => Err(ParseError::Malformed {
                format: "YAML",
                message: e.to_string(),
            }),
            Err(_) => Ok(RawDocument::Text(text.to_string())),
        }
    }
}

fn looks_like_openapi_yaml(text: &str) -> bool {
    text.lines()
        .any(|line| line.starts_with("openapi:") || line.starts_with("swagger:"))
}

// ============================================
// Formats
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    OpenApi,
    GraphQl,
    Soap,
}

impl DefinitionFormat {
    /// Probe order.
    pub const ALL: [DefinitionFormat; 3] = [
        DefinitionFormat::OpenApi,
        DefinitionFormat::GraphQl,
        DefinitionFormat::Soap,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DefinitionFormat::OpenApi => "OpenAPI",
            DefinitionFormat::GraphQl => "GraphQL",
            DefinitionFormat::Soap => "WSDL",
        }
    }

    pub fn can_parse(&self, doc: &RawDocument) -> bool {
        match self {
            DefinitionFormat::OpenApi => openapi::can_parse(doc),
            DefinitionFormat::GraphQl => graphql::can_parse(doc),
            DefinitionFormat::Soap => soap::can_parse(doc),
        }
    }

    pub fn parse(
        &self,
        doc: &RawDocument,
        heuristic: &InjectionHeuristic,
    ) -> Result<ApiDefinition, ParseError> {
        match self {
            DefinitionFormat::OpenApi => openapi::parse(doc, heuristic),
            DefinitionFormat::GraphQl => graphql::parse(doc, heuristic),
            DefinitionFormat::Soap => soap::parse(doc, heuristic),
        }
    }

    pub fn detect(doc: &RawDocument) -> Option<DefinitionFormat> {
        Self::ALL.into_iter().find(|format| format.can_parse(doc))
    }
}

// ============================================
// Vulnerable parameter heuristic
// ============================================

/// Marks parameters whose names suggest they reach a query or lookup.
#[derive(Debug, Clone)]
pub struct InjectionHeuristic {
    keywords: Vec<String>,
    category: String,
}

impl InjectionHeuristic {
    pub fn new(keywords: &[String], category: impl Into<String>) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            category: category.into(),
        }
    }

    pub fn is_vulnerable(&self, param_name: &str) -> bool {
        let name = param_name.to_lowercase();
        self.keywords.iter().any(|k| name.contains(k.as_str()))
    }

    pub fn insertion_points(&self, param_name: &str, location: ParamLocation) -> Vec<InsertionPoint> {
        if !self.is_vulnerable(param_name) {
            return Vec::new();
        }
        vec![InsertionPoint {
            param_name: param_name.to_string(),
            param_type: self.category.clone(),
            location,
            payloads: Vec::new(),
        }]
    }
}

impl Default for InjectionHeuristic {
    fn default() -> Self {
        let config = ParserConfig::default();
        Self::new(&config.vulnerable_params, config.injection_category)
    }
}

// ============================================
// Parser
// ============================================

#[derive(Debug, Clone)]
pub struct ApiParser {
    max_file_size: usize,
    heuristic: InjectionHeuristic,
}

impl ApiParser {
    pub fn new(config: &ParserConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            heuristic: InjectionHeuristic::new(&config.vulnerable_params, config.injection_category.clone()),
        }
    }

    /// `content` is either a path to a definition file or the definition text.
    pub fn parse(&self, content: &str) -> Result<ApiDefinition, ParseError> {
        let text = self.load(content)?;
        let doc = RawDocument::from_text(&text)?;
        self.parse_document(&doc)
    }

    pub fn parse_file(&self, path: &Path) -> Result<ApiDefinition, ParseError> {
        let text = self.read_file(path)?;
        let doc = RawDocument::from_text(&text)?;
        self.parse_document(&doc)
    }

    pub fn parse_document(&self, doc: &RawDocument) -> Result<ApiDefinition, ParseError> {
        let format = DefinitionFormat::detect(doc).ok_or(ParseError::UnsupportedFormat)?;
        tracing::debug!("Detected {} definition", format.name());

        let definition = format.parse(doc, &self.heuristic)?;
        let definition = normalizer::normalize_definition(definition);

        tracing::info!(
            "Parsed {} definition '{}' with {} endpoints",
            format.name(),
            definition.title,
            definition.endpoints.len()
        );
        Ok(definition)
    }

    fn load(&self, content: &str) -> Result<String, ParseError> {
        if !content.contains('\n') {
            let path = Path::new(content.trim());
            if path.is_file() {
                return self.read_file(path);
            }
        }
        self.check_size(content.len())?;
        Ok(content.to_string())
    }

    fn read_file(&self, path: &Path) -> Result<String, ParseError> {
        let io_err = |source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        };
        let size = std::fs::metadata(path).map_err(io_err)?.len();
        self.check_size(usize::try_from(size).unwrap_or(usize::MAX))?;
        std::fs::read_to_string(path).map_err(io_err)
    }

    fn check_size(&self, size: usize) -> Result<(), ParseError> {
        if size > self.max_file_size {
            return Err(ParseError::TooLarge {
                size,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }
}

impl Default for ApiParser {
    fn default() -> Self {
        Self::new(&ParserConfig::default())
    }
}
