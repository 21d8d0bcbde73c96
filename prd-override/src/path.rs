//! Dotted field paths into JSON payloads.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::{OverrideError, OverrideResult};

static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)((?:\[\d+\])*)$").expect("valid segment regex"));
static INDEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("valid index regex"));

/// One step of a [`FieldPath`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    /// Object member lookup.
    Key(String),
    /// Array element lookup.
    Index(usize),
}

/// A parsed path such as `config.url` or `settings.columns[0].name`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Parses a dotted path.
    ///
    /// # Errors
    ///
    /// Returns [`OverrideError::InvalidPath`] for empty paths, empty segments
    /// or malformed index suffixes.
    pub fn parse(raw: impl Into<String>) -> OverrideResult<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(OverrideError::invalid_path(raw, "path is empty"));
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            let Some(captures) = SEGMENT_RE.captures(part) else {
                return Err(OverrideError::invalid_path(
                    raw.clone(),
                    format!("malformed segment `{part}`"),
                ));
            };
            segments.push(Segment::Key(captures[1].to_owned()));
            for index in INDEX_RE.captures_iter(&captures[2]) {
                let index = index[1].parse::<usize>().map_err(|err| {
                    OverrideError::invalid_path(raw.clone(), format!("bad index: {err}"))
                })?;
                segments.push(Segment::Index(index));
            }
        }

        Ok(Self { raw, segments })
    }

    /// Returns the path as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the parsed segments.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns the top-level object key this path starts from.
    #[must_use]
    pub fn root(&self) -> &str {
        match self.segments.first() {
            Some(Segment::Key(key)) => key,
            // parse() always starts with a key
            _ => "",
        }
    }

    /// Reads the value at this path.
    #[must_use]
    pub fn get<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        walk(&self.segments, value)
    }

    /// Returns the segments left after `ancestor`, or `None` when `ancestor`
    /// is not a prefix of this path.
    #[must_use]
    pub fn strip_prefix(&self, ancestor: &FieldPath) -> Option<&[Segment]> {
        self.segments.strip_prefix(ancestor.segments.as_slice())
    }

    /// Writes `new_value` at this path inside `target`.
    ///
    /// Missing intermediate object members are created; array elements must
    /// already exist.
    ///
    /// # Errors
    ///
    /// Returns [`OverrideError::Resolution`] when the path crosses a scalar or
    /// indexes past the end of an array.
    pub fn set(&self, target: &mut Value, new_value: Value) -> OverrideResult<()> {
        let Some((last, parents)) = self.segments.split_last() else {
            return Err(OverrideError::invalid_path(self.raw.clone(), "path is empty"));
        };

        let mut current = target;
        for segment in parents {
            current = match segment {
                Segment::Key(key) => {
                    let object = self.as_object_mut(current, key)?;
                    object
                        .entry(key.clone())
                        .or_insert_with(|| Value::Object(Map::new()))
                }
                Segment::Index(index) => self.element_mut(current, *index)?,
            };
        }

        match last {
            Segment::Key(key) => {
                self.as_object_mut(current, key)?
                    .insert(key.clone(), new_value);
            }
            Segment::Index(index) => {
                *self.element_mut(current, *index)? = new_value;
            }
        }
        Ok(())
    }

    fn as_object_mut<'v>(
        &self,
        value: &'v mut Value,
        key: &str,
    ) -> OverrideResult<&'v mut Map<String, Value>> {
        if value.is_null() {
            *value = Value::Object(Map::new());
        }
        value.as_object_mut().ok_or_else(|| {
            OverrideError::resolution(
                self.raw.clone(),
                format!("cannot set member `{key}` on a non-object value"),
            )
        })
    }

    fn element_mut<'v>(&self, value: &'v mut Value, index: usize) -> OverrideResult<&'v mut Value> {
        value
            .as_array_mut()
            .and_then(|items| items.get_mut(index))
            .ok_or_else(|| {
                OverrideError::resolution(
                    self.raw.clone(),
                    format!("index {index} does not exist"),
                )
            })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Follows `segments` from `value`.
pub(crate) fn walk<'v>(segments: &[Segment], value: &'v Value) -> Option<&'v Value> {
    segments
        .iter()
        .try_fold(value, |current, segment| match segment {
            Segment::Key(key) => current.as_object()?.get(key),
            Segment::Index(index) => current.as_array()?.get(*index),
        })
}
