// ABOUTME: Dynamically typed column values shared by every backend
// ABOUTME: Provides the textual form used for comparison and blob decoding for extraction

use anyhow::{Context, Result};
use rusqlite::types::ValueRef;

/// A single column value as read from either backend.
///
/// PostgreSQL rows arrive over the text protocol, so they only ever produce
/// `Null` and `Text`. SQLite reports its storage classes directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// One row of a query result, in projection order
pub type Row = Vec<Value>;

impl Value {
    /// Textual form used for comparisons and file names.
    ///
    /// Returns `None` for NULL. Reals use the shortest round-trip form, which
    /// always keeps a decimal point or exponent (`1.0`, not `1`). Blobs become
    /// lowercase hex.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sql_utils::dbms::Value;
    /// assert_eq!(Value::Integer(42).to_text(), Some("42".to_string()));
    /// assert_eq!(Value::Real(1.0).to_text(), Some("1.0".to_string()));
    /// assert_eq!(Value::Blob(vec![0xde, 0xad]).to_text(), Some("dead".to_string()));
    /// assert_eq!(Value::Null.to_text(), None);
    /// ```
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(format!("{:?}", f)),
            Value::Text(s) => Some(s.clone()),
            Value::Blob(bytes) => Some(hex::encode(bytes)),
        }
    }

    /// Raw bytes of a blob-like value.
    ///
    /// Text in PostgreSQL's bytea hex escape form (`\x0a1b...`) is decoded back
    /// to bytes; any other text is taken as its UTF-8 encoding. Numbers are
    /// written in their textual form.
    pub fn into_bytes(self) -> Result<Option<Vec<u8>>> {
        match self {
            Value::Null => Ok(None),
            Value::Blob(bytes) => Ok(Some(bytes)),
            Value::Text(text) => match text.strip_prefix("\\x") {
                Some(encoded) => hex::decode(encoded)
                    .map(Some)
                    .context("Failed to decode bytea hex value"),
                None => Ok(Some(text.into_bytes())),
            },
            other => Ok(other.to_text().map(String::into_bytes)),
        }
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
        }
    }
}

impl From<Option<&str>> for Value {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some(text) => Value::Text(text.to_string()),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_text() {
        assert_eq!(Value::Null.to_text(), None);
        assert_eq!(Value::Integer(-7).to_text(), Some("-7".to_string()));
        assert_eq!(Value::Real(2.5).to_text(), Some("2.5".to_string()));
        assert_eq!(Value::Real(3.0).to_text(), Some("3.0".to_string()));
        assert_eq!(Value::Text("abc".into()).to_text(), Some("abc".to_string()));
        assert_eq!(
            Value::Blob(vec![0x00, 0xff]).to_text(),
            Some("00ff".to_string())
        );
    }

    #[test]
    fn test_text_and_integer_compare_equal_by_text() {
        // Comparison is textual, so an INTEGER 10 and a TEXT "10" agree
        assert_eq!(
            Value::Integer(10).to_text(),
            Value::Text("10".into()).to_text()
        );
    }

    #[test]
    fn test_into_bytes_decodes_bytea_hex() {
        let value = Value::Text("\\x89504e47".to_string());
        assert_eq!(
            value.into_bytes().unwrap(),
            Some(vec![0x89, 0x50, 0x4e, 0x47])
        );
    }

    #[test]
    fn test_into_bytes_rejects_bad_hex() {
        let value = Value::Text("\\xzz".to_string());
        assert!(value.into_bytes().is_err());
    }

    #[test]
    fn test_into_bytes_other_values() {
        assert_eq!(Value::Null.into_bytes().unwrap(), None);
        assert_eq!(
            Value::Blob(vec![1, 2, 3]).into_bytes().unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(
            Value::Text("plain".into()).into_bytes().unwrap(),
            Some(b"plain".to_vec())
        );
        assert_eq!(
            Value::Integer(5).into_bytes().unwrap(),
            Some(b"5".to_vec())
        );
    }

    #[test]
    fn test_from_sqlite_value_ref() {
        assert_eq!(Value::from(ValueRef::Null), Value::Null);
        assert_eq!(Value::from(ValueRef::Integer(3)), Value::Integer(3));
        assert_eq!(
            Value::from(ValueRef::Text(b"hi")),
            Value::Text("hi".to_string())
        );
        assert_eq!(Value::from(ValueRef::Blob(&[9])), Value::Blob(vec![9]));
    }
}
