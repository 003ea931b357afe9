// ABOUTME: Filename templates with {field} placeholders for blob extraction
// ABOUTME: Parses templates and renders safe file names from row values

use crate::error::UsageError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(usize),
}

/// A parsed template such as `{id}-{name}.png`
///
/// `{{` and `}}` stand for literal braces. Each distinct placeholder becomes
/// one entry of [`FilenameTemplate::fields`], in order of first appearance.
///
/// # Examples
///
/// ```
/// # use sql_utils::template::FilenameTemplate;
/// let template = FilenameTemplate::parse("{id}_{name}.jpg").unwrap();
/// assert_eq!(template.fields(), ["id", "name"]);
///
/// let name = template
///     .render(&[Some("7".to_string()), Some("a/b".to_string())])
///     .unwrap();
/// assert_eq!(name, "7_a_b.jpg");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    segments: Vec<Segment>,
    fields: Vec<String>,
}

impl FilenameTemplate {
    pub fn parse(template: &str) -> Result<Self, UsageError> {
        let malformed = |reason: &str| UsageError::MalformedTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut fields: Vec<String> = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(malformed("unmatched '}'")),
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') => return Err(malformed("nested '{'")),
                            Some(c) => name.push(c),
                            None => return Err(malformed("unterminated placeholder")),
                        }
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(malformed("empty placeholder"));
                    }
                    let index = match fields.iter().position(|f| f == name) {
                        Some(index) => index,
                        None => {
                            fields.push(name.to_string());
                            fields.len() - 1
                        }
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(index));
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments, fields })
    }

    /// Field names the template refers to, each once
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Render a file name from values given in [`FilenameTemplate::fields`] order
    ///
    /// Path separators and NUL in values become `_` and NULL renders as
    /// `null`, so a value can never escape the output directory.
    pub fn render(&self, values: &[Option<String>]) -> anyhow::Result<String> {
        let mut name = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => name.push_str(text),
                Segment::Field(index) => {
                    let value = values.get(*index).ok_or_else(|| {
                        anyhow::anyhow!("No value for field {}", self.fields[*index])
                    })?;
                    match value {
                        Some(text) => name.extend(text.chars().map(sanitize_char)),
                        None => name.push_str("null"),
                    }
                }
            }
        }
        if name.is_empty() || name == "." || name == ".." {
            anyhow::bail!("Filename template produced unusable name {:?}", name);
        }
        Ok(name)
    }
}

fn sanitize_char(c: char) -> char {
    match c {
        '/' | '\\' | '\0' => '_',
        c => c,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn test_literal_only() {
        let template = FilenameTemplate::parse("fixed.bin").unwrap();
        assert!(template.fields().is_empty());
        assert_eq!(template.render(&[]).unwrap(), "fixed.bin");
    }

    #[test]
    fn test_repeated_placeholder_selected_once() {
        let template = FilenameTemplate::parse("{id}/{id}-{kind}").unwrap();
        assert_eq!(template.fields(), ["id", "kind"]);
        assert_eq!(template.render(&some(&["3", "png"])).unwrap(), "3/3-png");
    }

    #[test]
    fn test_escaped_braces() {
        let template = FilenameTemplate::parse("{{{id}}}.txt").unwrap();
        assert_eq!(template.fields(), ["id"]);
        assert_eq!(template.render(&some(&["9"])).unwrap(), "{9}.txt");
    }

    #[test]
    fn test_values_are_sanitized() {
        let template = FilenameTemplate::parse("{name}").unwrap();
        assert_eq!(
            template.render(&some(&["../etc\\passwd"])).unwrap(),
            ".._etc_passwd"
        );
        assert_eq!(template.render(&[None]).unwrap(), "null");
    }

    #[test]
    fn test_unusable_names_rejected() {
        let template = FilenameTemplate::parse("{name}").unwrap();
        assert!(template.render(&some(&[""])).is_err());
        assert!(template.render(&some(&[".."])).is_err());
    }

    #[test]
    fn test_malformed_templates() {
        for template in ["{id", "id}", "{}", "{ }", "{a{b}}"] {
            assert!(
                matches!(
                    FilenameTemplate::parse(template),
                    Err(UsageError::MalformedTemplate { .. })
                ),
                "{:?} should be rejected",
                template
            );
        }
    }
}
