//! Group name templates.
//!
//! A [`GroupTemplate`] is parsed once, when configuration is loaded, so an
//! unknown placeholder is reported before any remote call is made.
//! Resolution against a [`Collection`] is pure string substitution.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::error::{Error, Result};

/// Substitution variables a template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    /// `{el}`: the distribution major version.
    El,
    /// `{collection}`: the software collection name.
    Collection,
}

impl Variable {
    /// All supported placeholder names.
    pub const NAMES: &'static [&'static str] = &["el", "collection"];

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "el" => Some(Variable::El),
            "collection" => Some(Variable::Collection),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Variable::El => "el",
            Variable::Collection => "collection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(Variable),
}

/// A validated group name format string, e.g. `scl{el}-{collection}-candidate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupTemplate {
    source: String,
    segments: Vec<Segment>,
}

/// A resolved, concrete group name (tag, target, test job).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupName(String);

impl GroupName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl GroupTemplate {
    /// Parses a template, rejecting unknown placeholders and unbalanced braces.
    pub fn parse(source: &str) -> Result<Self> {
        let fail = |reason: String| Error::Template {
            template: source.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

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
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => return Err(fail("unclosed placeholder".to_string())),
                        }
                    }
                    let variable = Variable::from_name(name.trim()).ok_or_else(|| {
                        fail(format!(
                            "unknown placeholder '{{{}}}' (supported: {})",
                            name,
                            Variable::NAMES.join(", ")
                        ))
                    })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Variable(variable));
                }
                '}' => return Err(fail("unmatched '}'".to_string())),
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        if segments.is_empty() {
            return Err(fail("template is empty".to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The original format string.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the template needs a named collection to resolve.
    pub fn requires_collection_name(&self) -> bool {
        self.segments
            .iter()
            .any(|s| *s == Segment::Variable(Variable::Collection))
    }

    /// Renders the template for `collection`.
    ///
    /// Fails when the template references `{collection}` and the collection
    /// has no name; the placeholder is never silently dropped.
    pub fn resolve(&self, collection: &Collection) -> Result<GroupName> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(Variable::El) => out.push_str(&collection.el.to_string()),
                Segment::Variable(var @ Variable::Collection) => {
                    let name = collection.name().ok_or_else(|| Error::Template {
                        template: self.source.clone(),
                        reason: format!(
                            "collection {} does not provide '{{{}}}'",
                            collection,
                            var.name()
                        ),
                    })?;
                    out.push_str(name);
                }
            }
        }
        Ok(GroupName(out))
    }
}

impl fmt::Display for GroupTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for GroupTemplate {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        GroupTemplate::parse(&value)
    }
}

impl From<GroupTemplate> for String {
    fn from(template: GroupTemplate) -> Self {
        template.source
    }
}

/// Resolves a single template.
pub fn resolve(template: &GroupTemplate, collection: &Collection) -> Result<GroupName> {
    template.resolve(collection)
}

/// Resolves every template, preserving template order.
pub fn resolve_all(templates: &[GroupTemplate], collection: &Collection) -> Result<Vec<GroupName>> {
    templates.iter().map(|t| t.resolve(collection)).collect()
}

/// Drops repeated group names, keeping the first occurrence.
pub fn dedup_groups(groups: Vec<GroupName>) -> Vec<GroupName> {
    let mut unique: Vec<GroupName> = Vec::with_capacity(groups.len());
    for group in groups {
        if !unique.contains(&group) {
            unique.push(group);
        }
    }
    unique
}
