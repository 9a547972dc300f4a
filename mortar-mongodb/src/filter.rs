//! MongoDB filter/query building utilities.

use bson::{Bson, Document};

use crate::error::{MongoError, MongoResult};

/// Accumulator for MongoDB filter documents.
///
/// Each predicate targets one field. Predicates on the same field merge into
/// one operator document, so `gt` followed by `lt` on `age` produces
/// `{ "age": { "$gt": .., "$lt": .. } }`; repeating an operator overwrites it.
/// Alternatives added with [`FilterBuilder::or`] accumulate under `$or`.
///
/// # Example
///
/// ```rust
/// use mortar_mongodb::FilterBuilder;
/// use bson::doc;
///
/// let mut filter = FilterBuilder::new();
/// filter
///     .eq("status", "active")?
///     .gte("age", 18)?
///     .lt("age", 65)?;
///
/// assert_eq!(
///     filter.build(),
///     doc! { "status": "active", "age": { "$gte": 18, "$lt": 65 } }
/// );
/// # Ok::<(), mortar_mongodb::MongoError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    doc: Document,
}

/// Options for [`FilterBuilder::like`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeOptions {
    /// Regular expression flags, `i` by default.
    pub flags: String,
    /// Anchor the pattern at the start of the value.
    pub anchor_start: bool,
    /// Anchor the pattern at the end of the value.
    pub anchor_end: bool,
}

impl Default for LikeOptions {
    fn default() -> Self {
        Self {
            flags: "i".to_string(),
            anchor_start: false,
            anchor_end: false,
        }
    }
}

impl LikeOptions {
    /// Case-insensitive, unanchored.
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchored at both ends.
    pub fn exact() -> Self {
        Self::new().anchor_start(true).anchor_end(true)
    }

    /// Replace the regular expression flags (`i`, `m`, `x`, `s`, `u`).
    pub fn flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = flags.into();
        self
    }

    /// Anchor at the start.
    pub fn anchor_start(mut self, enabled: bool) -> Self {
        self.anchor_start = enabled;
        self
    }

    /// Anchor at the end.
    pub fn anchor_end(mut self, enabled: bool) -> Self {
        self.anchor_end = enabled;
        self
    }
}

impl FilterBuilder {
    /// Create a new empty filter builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filter builder from an existing document.
    pub fn from_doc(doc: Document) -> Self {
        Self { doc }
    }

    /// Merge a field → value map; each field is overwritten.
    pub fn merge(&mut self, wheres: Document) -> &mut Self {
        for (field, value) in wheres {
            self.doc.insert(field, value);
        }
        self
    }

    /// Add an equality condition.
    pub fn eq(&mut self, field: &str, value: impl Into<Bson>) -> MongoResult<&mut Self> {
        let field = require_field(field, "where")?;
        self.doc.insert(field, value.into());
        Ok(self)
    }

    /// Append each pair of `alternatives` as its own `$or` branch.
    pub fn or(&mut self, alternatives: Document) -> MongoResult<&mut Self> {
        if alternatives.is_empty() {
            return Err(MongoError::validation("Where value should be a non-empty map"));
        }

        let added = alternatives.into_iter().map(|(field, value)| {
            let mut branch = Document::new();
            branch.insert(field, value);
            Bson::Document(branch)
        });

        match self.doc.get_mut("$or") {
            Some(Bson::Array(branches)) => branches.extend(added),
            _ => {
                self.doc.insert("$or", added.collect::<Vec<_>>());
            }
        }
        Ok(self)
    }

    /// Add an "in" condition (value in array).
    pub fn in_array<V: Into<Bson>>(
        &mut self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> MongoResult<&mut Self> {
        self.list_operator(field, "$in", "where in", values)
    }

    /// Add an "all" condition (array contains all values).
    pub fn all<V: Into<Bson>>(
        &mut self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> MongoResult<&mut Self> {
        self.list_operator(field, "$all", "where all in", values)
    }

    /// Add a "not in" condition.
    pub fn not_in<V: Into<Bson>>(
        &mut self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> MongoResult<&mut Self> {
        self.list_operator(field, "$nin", "where not in", values)
    }

    /// Add a greater-than condition.
    pub fn gt(&mut self, field: &str, value: impl Into<Bson>) -> MongoResult<&mut Self> {
        let field = require_field(field, "greater than")?;
        self.set_operators(field, [("$gt", value.into())]);
        Ok(self)
    }

    /// Add a greater-than-or-equal condition.
    pub fn gte(&mut self, field: &str, value: impl Into<Bson>) -> MongoResult<&mut Self> {
        let field = require_field(field, "greater than or equal")?;
        self.set_operators(field, [("$gte", value.into())]);
        Ok(self)
    }

    /// Add a less-than condition.
    pub fn lt(&mut self, field: &str, value: impl Into<Bson>) -> MongoResult<&mut Self> {
        let field = require_field(field, "less than")?;
        self.set_operators(field, [("$lt", value.into())]);
        Ok(self)
    }

    /// Add a less-than-or-equal condition.
    pub fn lte(&mut self, field: &str, value: impl Into<Bson>) -> MongoResult<&mut Self> {
        let field = require_field(field, "less than or equal")?;
        self.set_operators(field, [("$lte", value.into())]);
        Ok(self)
    }

    /// Add a not-equal condition.
    pub fn ne(&mut self, field: &str, value: impl Into<Bson>) -> MongoResult<&mut Self> {
        let field = require_field(field, "not equal")?;
        self.set_operators(field, [("$ne", value.into())]);
        Ok(self)
    }

    /// Inclusive range: `lower <= field <= upper`.
    pub fn between(
        &mut self,
        field: &str,
        lower: impl Into<Bson>,
        upper: impl Into<Bson>,
    ) -> MongoResult<&mut Self> {
        let field = require_field(field, "between")?;
        let (lower, upper) = require_bounds(lower.into(), upper.into(), "between")?;
        self.set_operators(field, [("$gte", lower), ("$lte", upper)]);
        Ok(self)
    }

    /// Exclusive range: `lower < field < upper`.
    pub fn between_ne(
        &mut self,
        field: &str,
        lower: impl Into<Bson>,
        upper: impl Into<Bson>,
    ) -> MongoResult<&mut Self> {
        let field = require_field(field, "between but not equal")?;
        let (lower, upper) = require_bounds(lower.into(), upper.into(), "between but not equal")?;
        self.set_operators(field, [("$gt", lower), ("$lt", upper)]);
        Ok(self)
    }

    /// Match a literal substring of a string field.
    ///
    /// Regular expression metacharacters in `value` are escaped; anchors are
    /// only added when `options` asks for them.
    pub fn like(&mut self, field: &str, value: &str, options: LikeOptions) -> MongoResult<&mut Self> {
        let field = require_field(field, "like")?;
        let value = value.trim();
        if value.is_empty() {
            return Err(MongoError::validation(
                "Mongo field's value is required to perform like query",
            ));
        }

        let mut pattern = regex_lite::escape(value);
        if options.anchor_start {
            pattern.insert(0, '^');
        }
        if options.anchor_end {
            pattern.push('$');
        }

        self.set_operators(
            field,
            [
                ("$regex", Bson::String(pattern)),
                ("$options", Bson::String(options.flags)),
            ],
        );
        Ok(self)
    }

    /// The accumulated filter.
    pub fn as_document(&self) -> &Document {
        &self.doc
    }

    /// Build the filter document.
    pub fn build(self) -> Document {
        self.doc
    }

    /// Remove every predicate.
    pub fn clear(&mut self) {
        self.doc.clear();
    }

    /// Check if the filter is empty.
    pub fn is_empty(&self) -> bool {
        self.doc.is_empty()
    }

    fn list_operator<V: Into<Bson>>(
        &mut self,
        field: &str,
        operator: &str,
        action: &str,
        values: impl IntoIterator<Item = V>,
    ) -> MongoResult<&mut Self> {
        let field = require_field(field, action)?;
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(MongoError::validation(format!(
                "{} value should be a non-empty list",
                action
            )));
        }
        self.set_operators(field, [(operator, Bson::Array(values))]);
        Ok(self)
    }

    /// Merge operators into the field's operator document, replacing a
    /// literal equality value if one is present.
    fn set_operators<const N: usize>(&mut self, field: &str, operators: [(&str, Bson); N]) {
        let mut current = match self.doc.get(field) {
            Some(Bson::Document(existing)) if is_operator_document(existing) => existing.clone(),
            _ => Document::new(),
        };
        for (operator, value) in operators {
            current.insert(operator, value);
        }
        self.doc.insert(field, current);
    }
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().all(|key| key.starts_with('$'))
}

fn require_field<'a>(field: &'a str, action: &str) -> MongoResult<&'a str> {
    let field = field.trim();
    if field.is_empty() {
        return Err(MongoError::validation(format!(
            "Mongo field is required to perform {} query",
            action
        )));
    }
    Ok(field)
}

fn require_bounds(lower: Bson, upper: Bson, action: &str) -> MongoResult<(Bson, Bson)> {
    let missing = |value: &Bson| match value {
        Bson::Null | Bson::Undefined => true,
        Bson::String(s) => s.is_empty(),
        _ => false,
    };
    if missing(&lower) {
        return Err(MongoError::validation(format!(
            "Mongo field's start value is required to perform {} query",
            action
        )));
    }
    if missing(&upper) {
        return Err(MongoError::validation(format!(
            "Mongo field's end value is required to perform {} query",
            action
        )));
    }
    Ok((lower, upper))
}
