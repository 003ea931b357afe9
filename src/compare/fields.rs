// ABOUTME: Field list grammar with wildcards and retroactive exclusions
// ABOUTME: Resolves `*`, `table.*` and `-name` tokens against table column lists

use crate::dbms::Dbms;
use crate::error::UsageError;
use anyhow::Result;
use std::collections::HashMap;

/// One entry of a field list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldToken {
    /// A field name or expression, used verbatim
    Name(String),
    /// `*`: every column of the (single) table
    AllColumns,
    /// `table.*`: every column of `table`, qualified with `table.`
    TableColumns(String),
    /// `-name`: drop the first earlier occurrence of `name`
    Exclude(String),
}

/// A parsed, not yet resolved, field list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    tokens: Vec<FieldToken>,
}

impl FieldSpec {
    /// Parse a comma-separated field list such as `*,-id,orders.total`
    pub fn parse(list: &str) -> Result<Self, UsageError> {
        Self::from_tokens(list.split(','))
    }

    /// Parse individual tokens; surrounding whitespace is ignored
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self, UsageError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens = tokens
            .into_iter()
            .map(|token| parse_token(token.as_ref().trim()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[FieldToken] {
        &self.tokens
    }

    /// Tables whose columns must be fetched before [`FieldSpec::resolve`]
    ///
    /// Fails if `*` is used while `table_spec` describes a join, since there
    /// is then no single table to take the columns from. Each table appears
    /// once, in order of first use.
    pub fn wildcard_tables(&self, table_spec: &str) -> Result<Vec<String>, UsageError> {
        let mut tables: Vec<String> = Vec::new();
        for token in &self.tokens {
            let table = match token {
                FieldToken::AllColumns => {
                    if is_join(table_spec) {
                        return Err(UsageError::WildcardOnJoin(table_spec.to_string()));
                    }
                    table_spec.trim()
                }
                FieldToken::TableColumns(table) => table.as_str(),
                _ => continue,
            };
            if !tables.iter().any(|t| t == table) {
                tables.push(table.to_string());
            }
        }
        Ok(tables)
    }

    /// Expand the list, left to right, using prefetched column names
    ///
    /// `columns` maps every table returned by [`FieldSpec::wildcard_tables`]
    /// to its column names; a missing entry expands to nothing. Exclusions
    /// only see fields accumulated before them.
    pub fn resolve(&self, table_spec: &str, columns: &HashMap<String, Vec<String>>) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for token in &self.tokens {
            match token {
                FieldToken::Name(name) => fields.push(name.clone()),
                FieldToken::AllColumns => {
                    if let Some(names) = columns.get(table_spec.trim()) {
                        fields.extend(names.iter().cloned());
                    }
                }
                FieldToken::TableColumns(table) => {
                    if let Some(names) = columns.get(table) {
                        fields.extend(names.iter().map(|name| format!("{}.{}", table, name)));
                    }
                }
                FieldToken::Exclude(name) => {
                    if let Some(pos) = fields.iter().position(|field| field == name) {
                        fields.remove(pos);
                    }
                }
            }
        }
        fields
    }

    /// Validate, fetch wildcard columns from `dbms`, and resolve
    pub async fn resolve_with(&self, dbms: &Dbms, table_spec: &str) -> Result<Vec<String>> {
        let mut columns = HashMap::new();
        for table in self.wildcard_tables(table_spec)? {
            let names = dbms.column_names(&table).await?;
            tracing::debug!("Table {} has columns {:?}", table, names);
            columns.insert(table, names);
        }
        Ok(self.resolve(table_spec, &columns))
    }
}

fn parse_token(token: &str) -> Result<FieldToken, UsageError> {
    let malformed = || UsageError::MalformedField(token.to_string());
    if token.is_empty() {
        return Err(malformed());
    }
    if token == "*" {
        return Ok(FieldToken::AllColumns);
    }
    if let Some(name) = token.strip_prefix('-') {
        let name = name.trim();
        if name.is_empty() {
            return Err(malformed());
        }
        return Ok(FieldToken::Exclude(name.to_string()));
    }
    if let Some(table) = token.strip_suffix(".*") {
        if table.is_empty() {
            return Err(malformed());
        }
        return Ok(FieldToken::TableColumns(table.to_string()));
    }
    Ok(FieldToken::Name(token.to_string()))
}

/// True when `table_spec` is more than a single, optionally schema-qualified, table name
pub fn is_join(table_spec: &str) -> bool {
    table_spec
        .trim()
        .chars()
        .any(|c| c.is_whitespace() || c == ',' || c == '(' || c == ')')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(entries: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(table, names)| {
                (
                    table.to_string(),
                    names.iter().map(|n| n.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_parse_tokens() {
        let spec = FieldSpec::parse("*, -id ,orders.*,total").unwrap();
        assert_eq!(
            spec.tokens(),
            [
                FieldToken::AllColumns,
                FieldToken::Exclude("id".to_string()),
                FieldToken::TableColumns("orders".to_string()),
                FieldToken::Name("total".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_malformed_tokens() {
        for list in ["a,,b", "", "-", "a, - ", ".*"] {
            assert!(
                matches!(FieldSpec::parse(list), Err(UsageError::MalformedField(_))),
                "{:?} should be rejected",
                list
            );
        }
    }

    #[test]
    fn test_wildcard_then_exclusion() {
        let spec = FieldSpec::parse("*,-id").unwrap();
        let cols = columns(&[("people", &["id", "name", "age"])]);
        assert_eq!(spec.wildcard_tables("people").unwrap(), ["people"]);
        assert_eq!(spec.resolve("people", &cols), ["name", "age"]);
    }

    #[test]
    fn test_exclusion_of_absent_name_is_noop() {
        let spec = FieldSpec::parse("-ghost").unwrap();
        assert!(spec.resolve("people", &HashMap::new()).is_empty());

        let spec = FieldSpec::parse("name,-ghost,age").unwrap();
        assert_eq!(spec.resolve("people", &HashMap::new()), ["name", "age"]);
    }

    #[test]
    fn test_exclusion_before_wildcard_has_no_effect() {
        let spec = FieldSpec::parse("-id,*").unwrap();
        let cols = columns(&[("people", &["id", "name"])]);
        assert_eq!(spec.resolve("people", &cols), ["id", "name"]);
    }

    #[test]
    fn test_exclusion_removes_only_first_occurrence() {
        let spec = FieldSpec::parse("id,*,-id").unwrap();
        let cols = columns(&[("people", &["id", "name"])]);
        assert_eq!(spec.resolve("people", &cols), ["id", "name"]);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let spec = FieldSpec::parse("name,name").unwrap();
        assert_eq!(spec.resolve("people", &HashMap::new()), ["name", "name"]);
    }

    #[test]
    fn test_star_on_join_is_usage_error() {
        let spec = FieldSpec::parse("*").unwrap();
        let err = spec
            .wildcard_tables("people p JOIN pets q ON q.owner = p.id")
            .unwrap_err();
        assert!(matches!(err, UsageError::WildcardOnJoin(_)));
    }

    #[test]
    fn test_table_star_on_join_is_qualified() {
        let spec = FieldSpec::parse("p.*,-p.age,q.name").unwrap();
        let table_spec = "people p, pets q";
        assert_eq!(spec.wildcard_tables(table_spec).unwrap(), ["p"]);

        let cols = columns(&[("p", &["id", "name", "age"])]);
        assert_eq!(spec.resolve(table_spec, &cols), ["p.id", "p.name", "q.name"]);
    }

    #[test]
    fn test_wildcard_tables_listed_once() {
        let spec = FieldSpec::parse("*,people.*,*").unwrap();
        assert_eq!(spec.wildcard_tables("people").unwrap(), ["people"]);
    }

    #[test]
    fn test_is_join() {
        assert!(!is_join("people"));
        assert!(!is_join(" public.people "));
        assert!(is_join("people p"));
        assert!(is_join("people,pets"));
        assert!(is_join("(SELECT 1)"));
    }
}
