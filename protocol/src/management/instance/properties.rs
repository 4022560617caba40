use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const SERVER_PORT_KEY: &str = "server-port";
pub const SERVER_PORT_V6_KEY: &str = "server-portv6";
pub const SERVER_NAME_KEY: &str = "server-name";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PropertiesError {
    #[error("missing property: {0}")]
    MissingKey(String),
    #[error("property {key} is not a valid port: {value:?}")]
    InvalidPort { key: String, value: String },
}

/// The two ports a server binds, as read from its property file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortPair {
    pub v4: u16,
    pub v6: u16,
}

impl PortPair {
    pub fn new(v4: u16, v6: u16) -> Self {
        Self { v4, v6 }
    }

    /// True when either port is shared with `other`.
    pub fn overlaps(&self, other: &PortPair) -> bool {
        self.v4 == other.v4 || self.v6 == other.v6
    }

    pub fn checked_offset(&self, step: u16) -> Option<PortPair> {
        Some(PortPair {
            v4: self.v4.checked_add(step)?,
            v6: self.v6.checked_add(step)?,
        })
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.v4, self.v6)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry { key: String, value: String },
    Raw(String),
}

/// One line and whether it was terminated by `\r\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Row {
    line: Line,
    crlf: bool,
}

/// A `server.properties` file.
///
/// Every line is kept in order with its own line ending, so comments, blank
/// lines, unknown keys and mixed `\n`/`\r\n` endings survive a
/// parse/serialize round trip untouched. Only values changed through
/// [`ServerProperties::set`] differ on output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerProperties {
    rows: Vec<Row>,
    trailing_newline: bool,
}

impl ServerProperties {
    fn entries(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.rows.iter().filter_map(|row| match &row.line {
            Line::Entry { key, value } => Some((key.trim(), value.as_str())),
            Line::Raw(_) => None,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries().find(|(k, _)| *k == key).map(|(_, value)| value)
    }

    /// Replaces the value of `key`, appending a new entry if it is absent.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        for row in self.rows.iter_mut() {
            if let Line::Entry { key: k, value: v } = &mut row.line {
                if k.trim() == key {
                    *v = value;
                    return;
                }
            }
        }

        // appended lines follow the file's dominant line ending
        let terminated = if self.trailing_newline {
            &self.rows[..]
        } else {
            &self.rows[..self.rows.len().saturating_sub(1)]
        };
        let crlf = terminated.iter().filter(|row| row.crlf).count() * 2 > terminated.len();
        if !self.trailing_newline {
            if let Some(last) = self.rows.last_mut() {
                last.crlf = crlf;
            }
        }
        self.rows.push(Row {
            line: Line::Entry {
                key: key.to_string(),
                value,
            },
            crlf,
        });
        self.trailing_newline = true;
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries().map(|(key, _)| key)
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        self.entries()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    pub fn server_name(&self) -> Option<&str> {
        self.get(SERVER_NAME_KEY)
    }

    pub fn server_port(&self) -> Result<u16, PropertiesError> {
        self.port(SERVER_PORT_KEY)
    }

    pub fn server_port_v6(&self) -> Result<u16, PropertiesError> {
        self.port(SERVER_PORT_V6_KEY)
    }

    pub fn ports(&self) -> Result<PortPair, PropertiesError> {
        Ok(PortPair::new(self.server_port()?, self.server_port_v6()?))
    }

    pub fn set_ports(&mut self, ports: PortPair) {
        self.set(SERVER_PORT_KEY, ports.v4.to_string());
        self.set(SERVER_PORT_V6_KEY, ports.v6.to_string());
    }

    fn port(&self, key: &str) -> Result<u16, PropertiesError> {
        let value = self
            .get(key)
            .ok_or_else(|| PropertiesError::MissingKey(key.to_string()))?;
        value
            .trim()
            .parse::<u16>()
            .map_err(|_| PropertiesError::InvalidPort {
                key: key.to_string(),
                value: value.to_string(),
            })
    }
}

fn parse_line(line: &str) -> Line {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
        return Line::Raw(line.to_string());
    }
    match line.split_once('=') {
        Some((key, value)) => Line::Entry {
            key: key.to_string(),
            value: value.to_string(),
        },
        None => Line::Raw(line.to_string()),
    }
}

impl FromStr for ServerProperties {
    type Err = std::convert::Infallible;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let trailing_newline = content.ends_with('\n');
        let mut rows = vec![];
        let mut rest = content;
        while !rest.is_empty() {
            let (text, crlf, next) = match rest.find('\n') {
                Some(end) => {
                    let text = &rest[..end];
                    match text.strip_suffix('\r') {
                        Some(text) => (text, true, &rest[end + 1..]),
                        None => (text, false, &rest[end + 1..]),
                    }
                }
                // an unterminated last line keeps any stray '\r' as content
                None => (rest, false, ""),
            };
            rows.push(Row {
                line: parse_line(text),
                crlf,
            });
            rest = next;
        }

        Ok(Self {
            rows,
            trailing_newline,
        })
    }
}

impl fmt::Display for ServerProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.rows.len().saturating_sub(1);
        for (i, row) in self.rows.iter().enumerate() {
            match &row.line {
                Line::Entry { key, value } => write!(f, "{}={}", key, value)?,
                Line::Raw(raw) => f.write_str(raw)?,
            }
            if i < last || self.trailing_newline {
                f.write_str(if row.crlf { "\r\n" } else { "\n" })?;
            }
        }
        Ok(())
    }
}
