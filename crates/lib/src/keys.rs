//! Target key encoding.
//!
//! Every node in the dependency graph lives in one flat string key space.
//! Three kinds of identity share it and are told apart by a two-character prefix:
//!
//! - plain keys: the bare name of an in-memory result (`"report"`)
//! - path keys: `p-` + unpadded base32 of a file path or URL
//! - namespaced keys: `n-` + unpadded base32 of a `namespace::symbol` reference
//!
//! The base32 alphabet (`A-Z2-7`) keeps encoded keys usable as identifiers.
//! The text format is the one externally observable data shape of the engine,
//! so it must stay stable.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of keys that denote file-backed artifacts.
pub const PATH_PREFIX: &str = "p-";

/// Prefix of keys that denote namespaced external references.
pub const NAMESPACED_PREFIX: &str = "n-";

/// Separator between namespace and symbol in a reference.
pub const NAMESPACE_SEPARATOR: &str = "::";

const URL_SCHEMES: &[&str] = &["http://", "https://", "ftp://", "ftps://"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
  #[error("key {key:?} does not carry the {expected:?} prefix")]
  MissingPrefix { key: String, expected: &'static str },

  #[error("key {key:?} has an invalid base32 payload: {message}")]
  InvalidPayload { key: String, message: String },

  #[error("key {key:?} does not decode to UTF-8")]
  NotUtf8 { key: String },

  #[error("{0:?} is not a namespace::symbol reference")]
  NotNamespaced(String),
}

/// Which of the three identities a key denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
  Plain,
  Path,
  Namespaced,
}

impl KeyKind {
  pub fn of(key: &str) -> Self {
    if is_path_key(key) {
      KeyKind::Path
    } else if is_namespaced_key(key) {
      KeyKind::Namespaced
    } else {
      KeyKind::Plain
    }
  }
}

/// A structured `namespace::symbol` reference.
///
/// The pair is decided once, at encode time, so resolution never has to
/// re-parse free-form text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespacedRef {
  pub namespace: String,
  pub symbol: String,
}

impl NamespacedRef {
  pub fn new(namespace: impl Into<String>, symbol: impl Into<String>) -> Self {
    Self {
      namespace: namespace.into(),
      symbol: symbol.into(),
    }
  }

  /// Split `ns::sym` (or the internal form `ns:::sym`) into its parts.
  pub fn parse(text: &str) -> Result<Self, KeyError> {
    let (namespace, symbol) = text
      .split_once(NAMESPACE_SEPARATOR)
      .ok_or_else(|| KeyError::NotNamespaced(text.to_string()))?;
    let symbol = symbol.trim_start_matches(':');
    if namespace.is_empty() || symbol.is_empty() {
      return Err(KeyError::NotNamespaced(text.to_string()));
    }
    Ok(Self::new(namespace, symbol))
  }
}

impl fmt::Display for NamespacedRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}{}", self.namespace, NAMESPACE_SEPARATOR, self.symbol)
  }
}

pub fn is_path_key(key: &str) -> bool {
  key.starts_with(PATH_PREFIX)
}

pub fn is_namespaced_key(key: &str) -> bool {
  key.starts_with(NAMESPACED_PREFIX)
}

pub fn is_url(path: &str) -> bool {
  URL_SCHEMES.iter().any(|scheme| path.starts_with(scheme))
}

pub fn encode_path(path: &str) -> String {
  encode_with(PATH_PREFIX, path)
}

pub fn decode_path(key: &str) -> Result<String, KeyError> {
  decode_with(PATH_PREFIX, key)
}

pub fn encode_namespaced(reference: &str) -> String {
  encode_with(NAMESPACED_PREFIX, reference)
}

pub fn decode_namespaced(key: &str) -> Result<String, KeyError> {
  decode_with(NAMESPACED_PREFIX, key)
}

/// Decode a namespaced key straight into its structured reference.
pub fn decode_reference(key: &str) -> Result<NamespacedRef, KeyError> {
  NamespacedRef::parse(&decode_namespaced(key)?)
}

/// Encode `name` as a namespaced key if it contains a namespace separator.
pub fn standardize(name: &str) -> String {
  if !is_namespaced_key(name) && name.contains(NAMESPACE_SEPARATOR) {
    encode_namespaced(name)
  } else {
    name.to_string()
  }
}

/// Human-readable form of a key for logs and error messages.
pub fn display_name(key: &str) -> String {
  match KeyKind::of(key) {
    KeyKind::Path => match decode_path(key) {
      Ok(path) if is_url(&path) => format!("url {}", path),
      Ok(path) => format!("file {}", path),
      Err(_) => key.to_string(),
    },
    KeyKind::Namespaced => decode_namespaced(key).unwrap_or_else(|_| key.to_string()),
    KeyKind::Plain => key.to_string(),
  }
}

fn encode_with(prefix: &str, text: &str) -> String {
  format!("{}{}", prefix, BASE32_NOPAD.encode(text.as_bytes()))
}

fn decode_with(prefix: &'static str, key: &str) -> Result<String, KeyError> {
  let payload = key.strip_prefix(prefix).ok_or_else(|| KeyError::MissingPrefix {
    key: key.to_string(),
    expected: prefix,
  })?;
  let bytes = BASE32_NOPAD
    .decode(payload.as_bytes())
    .map_err(|e| KeyError::InvalidPayload {
      key: key.to_string(),
      message: e.to_string(),
    })?;
  String::from_utf8(bytes).map_err(|_| KeyError::NotUtf8 { key: key.to_string() })
}

/// Key codec with an optional memo of previous conversions.
///
/// Every operation is pure, so the memo only saves work: a codec built with
/// [`KeyCodec::new`] answers exactly like one built with [`KeyCodec::cached`].
#[derive(Debug, Default)]
pub struct KeyCodec {
  memo: Option<Mutex<Memo>>,
}

#[derive(Debug, Default)]
struct Memo {
  encoded: HashMap<(char, String), String>,
  decoded: HashMap<String, String>,
}

impl KeyCodec {
  pub fn new() -> Self {
    Self { memo: None }
  }

  pub fn cached() -> Self {
    Self {
      memo: Some(Mutex::new(Memo::default())),
    }
  }

  pub fn is_cached(&self) -> bool {
    self.memo.is_some()
  }

  pub fn encode_path(&self, path: &str) -> String {
    self.encode('p', path, encode_path)
  }

  pub fn encode_namespaced(&self, reference: &str) -> String {
    self.encode('n', reference, encode_namespaced)
  }

  pub fn decode_path(&self, key: &str) -> Result<String, KeyError> {
    self.decode(key, decode_path)
  }

  pub fn decode_namespaced(&self, key: &str) -> Result<String, KeyError> {
    self.decode(key, decode_namespaced)
  }

  pub fn decode_reference(&self, key: &str) -> Result<NamespacedRef, KeyError> {
    NamespacedRef::parse(&self.decode_namespaced(key)?)
  }

  pub fn standardize(&self, name: &str) -> String {
    if !is_namespaced_key(name) && name.contains(NAMESPACE_SEPARATOR) {
      self.encode_namespaced(name)
    } else {
      name.to_string()
    }
  }

  pub fn display_name(&self, key: &str) -> String {
    match KeyKind::of(key) {
      KeyKind::Path => match self.decode_path(key) {
        Ok(path) if is_url(&path) => format!("url {}", path),
        Ok(path) => format!("file {}", path),
        Err(_) => key.to_string(),
      },
      KeyKind::Namespaced => self.decode_namespaced(key).unwrap_or_else(|_| key.to_string()),
      KeyKind::Plain => key.to_string(),
    }
  }

  fn encode(&self, tag: char, text: &str, encode: fn(&str) -> String) -> String {
    let Some(memo) = &self.memo else {
      return encode(text);
    };
    let mut memo = memo.lock().unwrap_or_else(|e| e.into_inner());
    memo
      .encoded
      .entry((tag, text.to_string()))
      .or_insert_with(|| encode(text))
      .clone()
  }

  fn decode(&self, key: &str, decode: fn(&str) -> Result<String, KeyError>) -> Result<String, KeyError> {
    let Some(memo) = &self.memo else {
      return decode(key);
    };
    let mut memo = memo.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(hit) = memo.decoded.get(key) {
      return Ok(hit.clone());
    }
    let decoded = decode(key)?;
    memo.decoded.insert(key.to_string(), decoded.clone());
    Ok(decoded)
  }
}
