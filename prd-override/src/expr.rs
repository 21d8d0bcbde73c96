//! Typed override expressions.

use std::sync::LazyLock;

use prd_primitives::ObjectId;
use regex::Regex;
use serde_json::Value;

use crate::{FieldPath, OverrideError, OverrideResult};

/// Keyword that copies the same field from the source payload.
pub const SOURCE_VALUE_KEYWORD: &str = "$source_value";
/// Keyword that introduces a cross-reference to another object's target record.
pub const TARGET_REFERENCE_KEYWORD: &str = "$prd_ref";

static CROSS_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$prd_ref:(\d+)(?:\.(.+))?$").expect("valid cross reference regex")
});

/// The right-hand side of an attribute override rule.
#[derive(Clone, Debug, PartialEq)]
pub enum OverrideExpr {
    /// Used verbatim.
    Literal(Value),
    /// The value found at the same path on the source object.
    SourceValue,
    /// A field of the target counterpart of another source object.
    ///
    /// Without a path the expression evaluates to the target id itself.
    CrossRef {
        /// Source-side identity of the referenced object.
        source_id: ObjectId,
        /// Field to read from the referenced object's target record.
        path: Option<FieldPath>,
    },
}

impl OverrideExpr {
    /// Parses a raw mapping value.
    ///
    /// Only strings that start with one of the reserved keywords are treated
    /// as references; everything else is a literal.
    ///
    /// # Errors
    ///
    /// Returns [`OverrideError::InvalidExpression`] when a reserved keyword is
    /// used with malformed syntax.
    pub fn parse(raw: Value) -> OverrideResult<Self> {
        let Value::String(text) = &raw else {
            return Ok(Self::Literal(raw));
        };

        if text == SOURCE_VALUE_KEYWORD {
            return Ok(Self::SourceValue);
        }
        if !text.starts_with(TARGET_REFERENCE_KEYWORD) {
            return Ok(Self::Literal(raw));
        }

        let Some(captures) = CROSS_REF_RE.captures(text) else {
            return Err(OverrideError::InvalidExpression {
                expression: text.clone(),
                reason: format!("expected `{TARGET_REFERENCE_KEYWORD}:<id>.<path>`"),
            });
        };

        let source_id = captures[1]
            .parse::<ObjectId>()
            .map_err(|err| OverrideError::InvalidExpression {
                expression: text.clone(),
                reason: err.to_string(),
            })?;
        let path = captures
            .get(2)
            .map(|path| FieldPath::parse(path.as_str()))
            .transpose()?;

        Ok(Self::CrossRef { source_id, path })
    }

    /// Renders the expression back into its configuration form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::SourceValue => Value::String(SOURCE_VALUE_KEYWORD.to_owned()),
            Self::CrossRef { source_id, path } => Value::String(match path {
                Some(path) => format!("{TARGET_REFERENCE_KEYWORD}:{source_id}.{path}"),
                None => format!("{TARGET_REFERENCE_KEYWORD}:{source_id}"),
            }),
        }
    }

    /// Returns `true` for expressions that need the lookup table.
    #[must_use]
    pub const fn is_cross_ref(&self) -> bool {
        matches!(self, Self::CrossRef { .. })
    }
}
