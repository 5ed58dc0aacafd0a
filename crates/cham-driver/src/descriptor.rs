//! Board descriptor: hierarchical typed key/value configuration
//!
//! Descriptors are written in the MDIS text format:
//!
//! ```text
//! CHAM_1 {
//!     DESC_TYPE          = U_INT32  1
//!     PCI_BUS_PATH       = BINARY   0x1c,0x00
//!     PCI_DEVICE_NUMBER  = U_INT32  0x0d
//!     AUTOENUM           = U_INT32  1
//!     AUTOENUM_EXCLUDINGV2 = BINARY 0x23,0x19   # system + uart
//!     GROUP_0 {
//!         GROUP_ID       = U_INT32  2
//!         DEVICE_IDV2_0  = U_INT32  0x3500
//!     }
//! }
//! ```
//!
//! Nested blocks become slash-separated key paths (`GROUP_0/GROUP_ID`). A
//! text holding exactly one top-level block and no top-level keys is
//! unwrapped: the block name becomes the descriptor name.

use crate::error::{ChamError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Identification of the descriptor layer
pub const IDENT: &str = concat!("cham-driver descriptor ", env!("CARGO_PKG_VERSION"));

/// A typed descriptor value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescValue {
    /// `U_INT32`
    U32(u32),
    /// `BINARY`
    Binary(Vec<u8>),
    /// `STRING`
    String(String),
}

impl DescValue {
    const fn type_name(&self) -> &'static str {
        match self {
            Self::U32(_) => "U_INT32",
            Self::Binary(_) => "BINARY",
            Self::String(_) => "STRING",
        }
    }
}

impl fmt::Display for DescValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U32(v) => write!(f, "U_INT32 {v:#x}"),
            Self::Binary(bytes) => {
                write!(f, "BINARY ")?;
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{b:#04x}")?;
                }
                Ok(())
            }
            Self::String(s) => write!(f, "STRING {s:?}"),
        }
    }
}

/// Board descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    name: Option<String>,
    entries: BTreeMap<String, DescValue>,
}

impl Descriptor {
    /// Empty descriptor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty descriptor with a name
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            entries: BTreeMap::new(),
        }
    }

    /// Add a `U_INT32` entry
    #[must_use]
    pub fn with_u32(mut self, key: impl Into<String>, value: u32) -> Self {
        self.insert(key, DescValue::U32(value));
        self
    }

    /// Add a `BINARY` entry
    #[must_use]
    pub fn with_binary(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.insert(key, DescValue::Binary(value.into()));
        self
    }

    /// Add a `STRING` entry
    #[must_use]
    pub fn with_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, DescValue::String(value.into()));
        self
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, key: impl Into<String>, value: DescValue) -> Option<DescValue> {
        self.entries.insert(key.into(), value)
    }

    /// Descriptor (device) name, if the text named it
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Raw entry
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&DescValue> {
        self.entries.get(key)
    }

    /// Whether `key` is present
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// `U_INT32` value of `key`, `None` if absent
    ///
    /// # Errors
    ///
    /// Returns [`ChamError::Descriptor`] if the key holds another type.
    pub fn get_u32(&self, key: &str) -> Result<Option<u32>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(DescValue::U32(v)) => {
                tracing::trace!("{key} = {v:#x}");
                Ok(Some(*v))
            }
            Some(other) => Err(type_mismatch(key, "U_INT32", other)),
        }
    }

    /// `BINARY` value of `key`, `None` if absent
    ///
    /// # Errors
    ///
    /// Returns [`ChamError::Descriptor`] if the key holds another type.
    pub fn get_binary(&self, key: &str) -> Result<Option<&[u8]>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(DescValue::Binary(b)) => {
                tracing::trace!("{key} = {} bytes", b.len());
                Ok(Some(b))
            }
            Some(other) => Err(type_mismatch(key, "BINARY", other)),
        }
    }

    /// `STRING` value of `key`, `None` if absent
    ///
    /// # Errors
    ///
    /// Returns [`ChamError::Descriptor`] if the key holds another type.
    pub fn get_string(&self, key: &str) -> Result<Option<&str>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(DescValue::String(s)) => Ok(Some(s)),
            Some(other) => Err(type_mismatch(key, "STRING", other)),
        }
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DescValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Read and parse a descriptor file
    ///
    /// # Errors
    ///
    /// Returns [`ChamError::Io`] if the file cannot be read and
    /// [`ChamError::DescriptorSyntax`] if it does not parse.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Reading descriptor {}", path.display());
        let text = std::fs::read_to_string(path)?;
        text.parse()
    }
}

fn type_mismatch(key: &str, wanted: &str, found: &DescValue) -> ChamError {
    ChamError::descriptor(
        key,
        format!("expected {wanted}, found {}", found.type_name()),
    )
}

impl FromStr for Descriptor {
    type Err = ChamError;

    fn from_str(text: &str) -> Result<Self> {
        Parser::default().parse(text)
    }
}

#[derive(Default)]
struct Parser {
    blocks: Vec<String>,
    top_blocks: Vec<String>,
    top_keys: bool,
    entries: BTreeMap<String, DescValue>,
}

impl Parser {
    fn parse(mut self, text: &str) -> Result<Descriptor> {
        let mut last_line = 0;
        for (n, raw) in text.lines().enumerate() {
            last_line = n + 1;
            self.line(n + 1, strip_comment(raw).trim())?;
        }

        if let Some(open) = self.blocks.last() {
            return Err(syntax(last_line, format!("block {open} is not closed")));
        }

        let mut entries = self.entries;
        let mut name = None;
        if !self.top_keys && self.top_blocks.len() == 1 {
            let block = self.top_blocks.remove(0);
            let prefix = format!("{block}/");
            entries = entries
                .into_iter()
                .map(|(k, v)| (k.strip_prefix(&prefix).map_or(k.clone(), str::to_owned), v))
                .collect();
            name = Some(block);
        }

        Ok(Descriptor { name, entries })
    }

    fn line(&mut self, line_no: usize, line: &str) -> Result<()> {
        if line.is_empty() {
            return Ok(());
        }

        if line == "}" {
            if self.blocks.pop().is_none() {
                return Err(syntax(line_no, "unbalanced '}'"));
            }
            return Ok(());
        }

        if let Some(head) = line.strip_suffix('{') {
            let name = head.trim();
            if !is_ident(name) {
                return Err(syntax(line_no, format!("bad block name {name:?}")));
            }
            if self.blocks.is_empty() {
                self.top_blocks.push(name.to_owned());
            }
            self.blocks.push(name.to_owned());
            return Ok(());
        }

        let (key, rest) = line
            .split_once('=')
            .ok_or_else(|| syntax(line_no, "expected KEY = TYPE VALUE"))?;
        let key = key.trim();
        if !key.split('/').all(is_ident) {
            return Err(syntax(line_no, format!("bad key {key:?}")));
        }
        let value = parse_value(line_no, rest.trim())?;

        if self.blocks.is_empty() {
            self.top_keys = true;
        }
        let mut path = self.blocks.join("/");
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(key);

        if self.entries.insert(path.clone(), value).is_some() {
            return Err(syntax(line_no, format!("duplicate key {path}")));
        }
        Ok(())
    }
}

fn syntax(line: usize, reason: impl Into<String>) -> ChamError {
    ChamError::DescriptorSyntax {
        line,
        reason: reason.into(),
    }
}

fn is_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Cut a `#` comment, ignoring `#` inside quotes
fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '#' if !quoted => return &line[..i],
            _ => {}
        }
    }
    line
}

fn parse_value(line_no: usize, text: &str) -> Result<DescValue> {
    let (ty, value) = text
        .split_once(char::is_whitespace)
        .map_or((text, ""), |(t, v)| (t, v.trim()));

    match ty {
        "U_INT32" => parse_u32(value)
            .map(DescValue::U32)
            .ok_or_else(|| syntax(line_no, format!("bad U_INT32 value {value:?}"))),
        "BINARY" => {
            let bytes = value
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(|b| {
                    parse_u32(b)
                        .and_then(|v| u8::try_from(v).ok())
                        .ok_or_else(|| syntax(line_no, format!("bad BINARY byte {b:?}")))
                })
                .collect::<Result<Vec<u8>>>()?;
            Ok(DescValue::Binary(bytes))
        }
        "STRING" => {
            let s = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Ok(DescValue::String(s.to_owned()))
        }
        other => Err(syntax(line_no, format!("unknown value type {other:?}"))),
    }
}

/// Decimal or `0x` hexadecimal
fn parse_u32(text: &str) -> Option<u32> {
    match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}
