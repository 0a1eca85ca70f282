//! Converts scanner XML artifacts into [`ScanDocument`]s.
//!
//! The conversion is generic: attributes become `@name` keys, text becomes
//! `#text` (or the element's whole value when it has nothing else), and an
//! element that repeats under the same parent turns into an array. A parent
//! with one `<host>` therefore holds an object while a parent with several
//! holds an array; [`crate::extractor`] accepts both.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use xml::reader::{EventReader, XmlEvent};

/// One parsed artifact. Read-only once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ScanDocument(Value);

impl ScanDocument {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn from_xml_str(xml: &str) -> Result<Self, ParseError> {
        xml_to_value(xml).map(Self)
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("empty file: {0}")]
    Empty(PathBuf),
    #[error("error parsing XML: {0}")]
    Xml(#[from] xml::reader::Error),
    #[error("document has no root element")]
    NoRoot,
}

/// Parses every XML artifact in `paths`, skipping the ones that fail.
pub async fn parse_artifacts(paths: &[PathBuf]) -> Vec<ScanDocument> {
    let mut documents = Vec::new();

    for path in paths.iter().filter(|p| is_xml(p)) {
        match parse_artifact(path).await {
            Ok(doc) => {
                debug!("Parsed: {}", path.display());
                documents.push(doc);
            }
            Err(e) => warn!("Skipping {}: {e}", path.display()),
        }
    }

    documents
}

pub async fn parse_artifact(path: &Path) -> Result<ScanDocument, ParseError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if content.trim().is_empty() {
        return Err(ParseError::Empty(path.to_path_buf()));
    }

    ScanDocument::from_xml_str(&content)
}

fn is_xml(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
}

struct Frame {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Frame {
    fn into_value(self) -> Value {
        let text = self.text.trim();
        if self.fields.is_empty() {
            return if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.to_string())
            };
        }

        let mut fields = self.fields;
        if !text.is_empty() {
            fields.insert("#text".to_string(), Value::String(text.to_string()));
        }
        Value::Object(fields)
    }
}

fn xml_to_value(xml: &str) -> Result<Value, ParseError> {
    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Value> = None;

    for event in EventReader::from_str(xml) {
        match event? {
            XmlEvent::StartElement {
                name, attributes, ..
            } => {
                let mut fields = Map::new();
                for attr in attributes {
                    fields.insert(format!("@{}", attr.name.local_name), Value::String(attr.value));
                }
                stack.push(Frame {
                    name: name.local_name,
                    fields,
                    text: String::new(),
                });
            }
            XmlEvent::Characters(text) | XmlEvent::CData(text) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text);
                }
            }
            XmlEvent::EndElement { .. } => {
                let Some(frame) = stack.pop() else {
                    return Err(ParseError::NoRoot);
                };
                let name = frame.name.clone();
                let value = frame.into_value();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.fields, name, value),
                    None => {
                        let mut doc = Map::new();
                        doc.insert(name, value);
                        root = Some(Value::Object(doc));
                    }
                }
            }
            _ => {}
        }
    }

    root.ok_or(ParseError::NoRoot)
}

fn insert_child(fields: &mut Map<String, Value>, name: String, value: Value) {
    match fields.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(name, value);
        }
    }
}
