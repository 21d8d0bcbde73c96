//! Ordered override tables as stored in the mapping file.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::walk;
use crate::{FieldPath, OverrideError, OverrideExpr};

/// A single `path: expression` entry.
#[derive(Clone, Debug, PartialEq)]
pub struct OverrideRule {
    path: FieldPath,
    expr: OverrideExpr,
}

impl OverrideRule {
    /// Creates a rule from parsed parts.
    #[must_use]
    pub fn new(path: FieldPath, expr: OverrideExpr) -> Self {
        Self { path, expr }
    }

    /// Returns the field path being overridden.
    #[must_use]
    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    /// Returns the expression producing the new value.
    #[must_use]
    pub fn expr(&self) -> &OverrideExpr {
        &self.expr
    }
}

/// The `attribute_override` table of one mapping node, in file order.
///
/// Rules are parsed when the mapping is loaded, so a malformed expression is
/// reported before any release work starts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "IndexMap<String, Value>",
    into = "IndexMap<String, Value>"
)]
pub struct AttributeOverride {
    rules: Vec<OverrideRule>,
}

impl AttributeOverride {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a rule, keeping insertion order.
    #[must_use]
    pub fn with_rule(mut self, path: FieldPath, expr: OverrideExpr) -> Self {
        self.rules.push(OverrideRule::new(path, expr));
        self
    }

    /// Returns `true` when no rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the rules in file order.
    #[must_use]
    pub fn rules(&self) -> &[OverrideRule] {
        &self.rules
    }

    /// Returns the distinct root keys touched by the table, in first-seen order.
    #[must_use]
    pub fn root_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for rule in &self.rules {
            let root = rule.path.root();
            if !keys.contains(&root) {
                keys.push(root);
            }
        }
        keys
    }

    /// Returns `true` when applying the table puts a value at `path`.
    ///
    /// Besides a rule on `path` itself, a rule on an ancestor counts when its
    /// literal carries the nested field or when it pulls a target record
    /// value. An ancestor set to `$source_value` only copies the source.
    #[must_use]
    pub fn writes(&self, path: &FieldPath) -> bool {
        self.rules.iter().any(|rule| {
            let Some(rest) = path.strip_prefix(&rule.path) else {
                return false;
            };
            if rest.is_empty() {
                return true;
            }
            match &rule.expr {
                OverrideExpr::Literal(value) => walk(rest, value).is_some(),
                OverrideExpr::CrossRef { .. } => true,
                OverrideExpr::SourceValue => false,
            }
        })
    }
}

impl TryFrom<IndexMap<String, Value>> for AttributeOverride {
    type Error = OverrideError;

    fn try_from(raw: IndexMap<String, Value>) -> Result<Self, Self::Error> {
        let rules = raw
            .into_iter()
            .map(|(path, value)| {
                Ok(OverrideRule::new(
                    FieldPath::parse(path)?,
                    OverrideExpr::parse(value)?,
                ))
            })
            .collect::<Result<Vec<_>, OverrideError>>()?;
        Ok(Self { rules })
    }
}

impl From<AttributeOverride> for IndexMap<String, Value> {
    fn from(table: AttributeOverride) -> Self {
        table
            .rules
            .into_iter()
            .map(|rule| (rule.path.as_str().to_owned(), rule.expr.to_value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_in_order() {
        let table: AttributeOverride = serde_json::from_value(json!({
            "name": "Production hook",
            "config.url": "$prd_ref:42.config.url",
            "config.timeout_s": "$source_value",
        }))
        .unwrap();

        let paths: Vec<_> = table.rules().iter().map(|r| r.path().as_str()).collect();
        assert_eq!(paths, ["name", "config.url", "config.timeout_s"]);
        assert_eq!(table.root_keys(), ["name", "config"]);
        assert!(table.writes(&FieldPath::parse("config.url").unwrap()));
        assert!(table.rules()[1].expr().is_cross_ref());
    }

    #[test]
    fn writes_sees_nested_fields_of_ancestor_rules() {
        let url = FieldPath::parse("config.url").unwrap();
        let table = |raw: Value| -> AttributeOverride { serde_json::from_value(raw).unwrap() };

        assert!(table(json!({"config": {"url": "https://prod", "private": true}})).writes(&url));
        assert!(table(json!({"config": "$prd_ref:42.config"})).writes(&url));
        assert!(!table(json!({"config": {"private": true}})).writes(&url));
        assert!(!table(json!({"config": "$source_value"})).writes(&url));
        assert!(!table(json!({"config.url.scheme": "https"})).writes(&url));
        assert!(!table(json!({"name": "x"})).writes(&url));
    }

    #[test]
    fn serializes_back_to_raw_form() {
        let raw = json!({"config.url": "$prd_ref:42.config.url", "active": false});
        let table: AttributeOverride = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&table).unwrap(), raw);
    }

    #[test]
    fn rejects_bad_expressions_at_load() {
        let result: Result<AttributeOverride, _> =
            serde_json::from_value(json!({"config.url": "$prd_ref:x"}));
        assert!(result.is_err());
    }
}
