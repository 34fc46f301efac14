//! Extraction schemas: the field sets the inference stage must fill.
//!
//! A built-in `document` schema is always present. Deployments can add variants (or replace
//! the built-in one) through a JSON file:
//!
//! ```json
//! { "schemas": [
//!     { "name": "invoice", "description": "Supplier invoices",
//!       "fields": [ { "name": "total", "type": "number", "description": "Grand total" } ] }
//! ] }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Name of the schema that is always available.
pub const DEFAULT_SCHEMA_NAME: &str = "document";

/// Prefix reserved for metadata keys such as `_confidence`.
pub const RESERVED_PREFIX: char = '_';

/// Errors raised while loading or selecting schemas.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Schema file could not be read.
    #[error("failed to read schema file {}: {source}", .path.display())]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Schema file is not valid JSON of the expected shape.
    #[error("failed to parse schema file: {0}")]
    Parse(#[from] serde_json::Error),
    /// A schema definition violates a structural rule.
    #[error("schema '{schema}' is invalid: {reason}")]
    Invalid {
        /// Offending schema name.
        schema: String,
        /// What is wrong with it.
        reason: String,
    },
    /// The requested variant does not exist.
    #[error("unknown extraction schema '{0}'")]
    Unknown(String),
}

/// Value type expected for a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Free text.
    #[default]
    String,
    /// Any JSON number.
    Number,
    /// Whole number.
    Integer,
    /// `true` / `false`.
    Boolean,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
}

impl FieldKind {
    /// Lower-case name used in prompts and listings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One named field the service is asked to extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    /// Key in the inference result.
    pub name: String,
    /// Expected value type.
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    /// Hint forwarded to the model.
    #[serde(default)]
    pub description: String,
}

/// Named set of fields plus optional model instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    /// Variant name selected by clients.
    pub name: String,
    /// Short human-readable purpose.
    #[serde(default)]
    pub description: String,
    /// Extra guidance placed in the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Declared fields, in prompt order.
    pub fields: Vec<SchemaField>,
}

impl ExtractionSchema {
    /// Iterate over declared field names.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        for field in &mut self.fields {
            field.name = field.name.trim().to_string();
        }
        self
    }

    fn check(&self) -> Result<(), SchemaError> {
        let invalid = |reason: &str| SchemaError::Invalid {
            schema: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.fields.is_empty() {
            return Err(invalid("at least one field is required"));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            let name = field.name.as_str();
            if name.is_empty() {
                return Err(invalid("field names must not be empty"));
            }
            if name.starts_with(RESERVED_PREFIX) {
                return Err(invalid(&format!("field '{name}' uses the reserved '_' prefix")));
            }
            if !seen.insert(name) {
                return Err(invalid(&format!("field '{name}' is declared twice")));
            }
        }
        Ok(())
    }
}

/// The schema used when no file overrides it.
pub fn builtin_document_schema() -> ExtractionSchema {
    let field = |name: &str, kind: FieldKind, description: &str| SchemaField {
        name: name.into(),
        kind,
        description: description.into(),
    };
    ExtractionSchema {
        name: DEFAULT_SCHEMA_NAME.into(),
        description: "General-purpose document metadata".into(),
        instructions: None,
        fields: vec![
            field("title", FieldKind::String, "Main heading or title of the document"),
            field(
                "document_type",
                FieldKind::String,
                "Kind of document, e.g. invoice, letter, receipt, form, worksheet",
            ),
            field("date", FieldKind::String, "Primary date on the document in ISO 8601 form"),
            field("author", FieldKind::String, "Person or organisation that issued the document"),
            field("language", FieldKind::String, "ISO 639-1 code of the main language"),
            field("summary", FieldKind::String, "One or two sentence summary of the content"),
        ],
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaFile {
    Wrapped { schemas: Vec<ExtractionSchema> },
    List(Vec<ExtractionSchema>),
}

/// Immutable lookup of schema variants by name.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<ExtractionSchema>>,
    default_name: String,
}

impl SchemaRegistry {
    /// Build a registry from explicit schemas; `default_name` must be among them.
    pub fn new(
        schemas: impl IntoIterator<Item = ExtractionSchema>,
        default_name: &str,
    ) -> Result<Self, SchemaError> {
        let mut map = BTreeMap::new();
        for schema in schemas {
            let schema = schema.normalized();
            schema.check()?;
            map.insert(schema.name.clone(), Arc::new(schema));
        }
        let default_name = default_name.trim().to_string();
        if !map.contains_key(&default_name) {
            return Err(SchemaError::Unknown(default_name));
        }
        Ok(Self {
            schemas: map,
            default_name,
        })
    }

    /// Built-in schemas plus, optionally, the variants declared in `file`.
    pub fn load(file: Option<&Path>, default_name: &str) -> Result<Self, SchemaError> {
        let mut schemas = vec![builtin_document_schema()];
        if let Some(path) = file {
            let raw = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let loaded = parse_schema_file(&raw)?;
            tracing::info!(
                path = %path.display(),
                count = loaded.len(),
                "Loaded extraction schemas"
            );
            schemas.extend(loaded);
        }
        Self::new(schemas, default_name)
    }

    /// Select a schema by name; `None` or blank selects the default.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<ExtractionSchema>, SchemaError> {
        let name = name
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.default_name);
        self.schemas
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::Unknown(name.to_string()))
    }

    /// Name of the default variant.
    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// All variants ordered by name.
    pub fn list(&self) -> Vec<Arc<ExtractionSchema>> {
        self.schemas.values().cloned().collect()
    }
}

/// Parse a schema file body, accepting either `{"schemas": [...]}` or a bare list.
pub fn parse_schema_file(raw: &str) -> Result<Vec<ExtractionSchema>, SchemaError> {
    let parsed: SchemaFile = serde_json::from_str(raw)?;
    Ok(match parsed {
        SchemaFile::Wrapped { schemas } => schemas,
        SchemaFile::List(schemas) => schemas,
    })
}
