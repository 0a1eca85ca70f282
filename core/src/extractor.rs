//! Open-port extraction and the follow-up service scan.

use std::collections::BTreeSet;
use std::fmt;

use scanai_common::network::target::Target;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::parser::ScanDocument;
use crate::runner::ScanCommand;

/// Distinct ports seen in the "open" state. Iterates in ascending numeric order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PortSet(BTreeSet<u16>);

impl PortSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, port: u16) -> bool {
        self.0.insert(port)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }

    /// Scanner port list, e.g. `22,80,443`.
    pub fn to_port_list(&self) -> String {
        self.join(",")
    }

    fn join(&self, sep: &str) -> String {
        self.iter()
            .map(|p| p.to_string())
            .collect::<Vec<String>>()
            .join(sep)
    }
}

impl Extend<u16> for PortSet {
    fn extend<T: IntoIterator<Item = u16>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl FromIterator<u16> for PortSet {
    fn from_iter<T: IntoIterator<Item = u16>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for PortSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join(", "))
    }
}

#[derive(Debug, Error)]
enum ExtractError {
    #[error("no nmaprun element")]
    MissingRun,
    #[error("unexpected {0} value")]
    Shape(&'static str),
}

/// Folds every document into one [`PortSet`]. Malformed documents are
/// skipped; the result does not depend on document order.
pub fn extract_open_ports<'a, I>(documents: I) -> PortSet
where
    I: IntoIterator<Item = &'a ScanDocument>,
{
    documents
        .into_iter()
        .fold(PortSet::new(), |mut ports, doc| {
            match open_ports(doc) {
                Ok(found) => ports.extend(found),
                Err(e) => warn!("Error extracting ports: {e}"),
            }
            ports
        })
}

fn open_ports(doc: &ScanDocument) -> Result<Vec<u16>, ExtractError> {
    let run = doc
        .as_value()
        .get("nmaprun")
        .ok_or(ExtractError::MissingRun)?;

    let hosts = match run {
        Value::Object(fields) => one_or_many(fields.get("host"), "host")?,
        Value::Null => Vec::new(),
        _ => return Err(ExtractError::Shape("nmaprun")),
    };

    let mut found = Vec::new();
    for host in hosts {
        let ports = match host {
            Value::Object(fields) => fields.get("ports"),
            _ => return Err(ExtractError::Shape("host")),
        };
        let entries = match ports {
            Some(Value::Object(fields)) => one_or_many(fields.get("port"), "port")?,
            None | Some(Value::Null) => continue,
            Some(_) => return Err(ExtractError::Shape("ports")),
        };

        for entry in entries {
            let state = entry
                .get("state")
                .and_then(|s| s.get("@state"))
                .and_then(Value::as_str);
            if state != Some("open") {
                continue;
            }
            match entry.get("@portid").and_then(Value::as_str).map(str::parse::<u16>) {
                Some(Ok(port)) => found.push(port),
                _ => warn!("Ignoring open port entry without a valid portid"),
            }
        }
    }

    Ok(found)
}

/// A single child is an object, several are an array; both come out as a list.
fn one_or_many<'a>(
    value: Option<&'a Value>,
    what: &'static str,
) -> Result<Vec<&'a Value>, ExtractError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.iter().collect()),
        Some(obj @ Value::Object(_)) => Ok(vec![obj]),
        Some(_) => Err(ExtractError::Shape(what)),
    }
}

/// The one targeted service-detection command for `target`, or `None`
/// when nothing is open.
pub fn service_command(target: &Target, ports: &PortSet, scanner: &str) -> Option<ScanCommand> {
    if ports.is_empty() {
        return None;
    }

    Some(ScanCommand::new(
        scanner,
        [
            "-sV".to_string(),
            "-sC".to_string(),
            format!("-p{}", ports.to_port_list()),
            target.as_str().to_string(),
        ],
    ))
}
