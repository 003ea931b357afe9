// ABOUTME: Per-field value substitutions applied before comparing records
// ABOUTME: Built from repeated field:value1:value2 directives

use crate::error::UsageError;
use std::collections::HashMap;

/// Mapping of field name to (raw value → replacement value)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemapTable {
    fields: HashMap<String, HashMap<String, String>>,
}

impl RemapTable {
    /// Build a table from `field:value1:value2` directives
    ///
    /// Only the first two colons split; anything after the second colon is
    /// part of `value2`. Directives for the same field merge, and a later
    /// directive for the same `field:value1` replaces an earlier one.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sql_utils::compare::RemapTable;
    /// let remap = RemapTable::parse(["price:10:10.00", "price:20:20.00"]).unwrap();
    /// assert_eq!(remap.lookup("price", "10"), Some("10.00"));
    /// assert_eq!(remap.lookup("price", "20"), Some("20.00"));
    /// assert_eq!(remap.lookup("price", "30"), None);
    /// ```
    pub fn parse<I, S>(directives: I) -> Result<Self, UsageError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::default();
        for directive in directives {
            let directive = directive.as_ref();
            let mut parts = directive.splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(field), Some(from), Some(to)) if !field.is_empty() => {
                    table
                        .fields
                        .entry(field.to_string())
                        .or_default()
                        .insert(from.to_string(), to.to_string());
                }
                _ => return Err(UsageError::MalformedRemap(directive.to_string())),
            }
        }
        Ok(table)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn lookup(&self, field: &str, value: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(|values| values.get(value))
            .map(String::as_str)
    }

    /// Return a copy of `record` with remapped values substituted
    ///
    /// `fields` names each position of `record`. NULLs are never remapped.
    pub fn apply(&self, fields: &[String], record: &[Option<String>]) -> Vec<Option<String>> {
        record
            .iter()
            .zip(fields)
            .map(|(value, field)| match value {
                Some(raw) => Some(self.lookup(field, raw).unwrap_or(raw).to_string()),
                None => None,
            })
            .collect()
    }
}
