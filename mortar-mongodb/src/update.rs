//! Update document accumulation.

use bson::{Bson, Document, doc};
use indexmap::IndexMap;

use crate::error::{MongoError, MongoResult};

/// Values accepted where an update takes field/value pairs.
///
/// Implemented for a single `(field, value)` tuple and for a whole
/// [`Document`], whose pairs are applied one by one.
pub trait IntoFieldValues {
    /// Flatten into ordered field/value pairs.
    fn into_field_values(self) -> Vec<(String, Bson)>;
}

impl<K: Into<String>, V: Into<Bson>> IntoFieldValues for (K, V) {
    fn into_field_values(self) -> Vec<(String, Bson)> {
        vec![(self.0.into(), self.1.into())]
    }
}

impl IntoFieldValues for Document {
    fn into_field_values(self) -> Vec<(String, Bson)> {
        self.into_iter().collect()
    }
}

/// Values accepted where an update takes one or more field names.
pub trait IntoFieldNames {
    /// Flatten into field names.
    fn into_field_names(self) -> Vec<String>;
}

impl IntoFieldNames for &str {
    fn into_field_names(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoFieldNames for String {
    fn into_field_names(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoFieldNames for &[&str] {
    fn into_field_names(self) -> Vec<String> {
        self.iter().map(|field| field.to_string()).collect()
    }
}

impl<T: Into<String>> IntoFieldNames for Vec<T> {
    fn into_field_names(self) -> Vec<String> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<String>, const N: usize> IntoFieldNames for [T; N] {
    fn into_field_names(self) -> Vec<String> {
        self.into_iter().map(Into::into).collect()
    }
}

/// Accumulator for update operator documents.
///
/// Every operator's sub-document is created on first use and reused by later
/// calls, so `set(("a", 1))` followed by `set(("b", 2))` yields
/// `{ "$set": { "a": 1, "b": 2 } }`. `$pull` and `$rename` only ever hold the
/// most recent pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateBuilder {
    operators: IndexMap<String, Document>,
}

impl UpdateBuilder {
    /// Create an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// `$set` one pair or every pair of a map.
    pub fn set(&mut self, fields: impl IntoFieldValues) -> &mut Self {
        self.assign("$set", fields)
    }

    /// `$unset` one or more fields.
    pub fn unset(&mut self, fields: impl IntoFieldNames) -> &mut Self {
        let operator = self.operator("$unset");
        for field in fields.into_field_names() {
            operator.insert(field, 1);
        }
        self
    }

    /// `$addToSet`; a list value adds each element through `$each`.
    pub fn add_to_set(&mut self, field: &str, value: impl Into<Bson>) -> &mut Self {
        let value = match value.into() {
            Bson::Array(values) => Bson::Document(doc! { "$each": values }),
            other => other,
        };
        self.operator("$addToSet").insert(field, value);
        self
    }

    /// `$push` one pair or every pair of a map.
    pub fn push(&mut self, fields: impl IntoFieldValues) -> &mut Self {
        self.assign("$push", fields)
    }

    /// `$pop` the last element of one or more array fields.
    pub fn pop(&mut self, fields: impl IntoFieldNames) -> &mut Self {
        let operator = self.operator("$pop");
        for field in fields.into_field_names() {
            operator.insert(field, 1);
        }
        self
    }

    /// `$pull` elements matching `value`; replaces any earlier `$pull`.
    pub fn pull(&mut self, field: &str, value: impl Into<Bson>) -> &mut Self {
        let mut pull = Document::new();
        pull.insert(field, value.into());
        self.operators.insert("$pull".to_string(), pull);
        self
    }

    /// `$rename` a field; replaces any earlier `$rename`.
    pub fn rename(&mut self, old: &str, new: &str) -> &mut Self {
        let mut rename = Document::new();
        rename.insert(old, new);
        self.operators.insert("$rename".to_string(), rename);
        self
    }

    /// `$inc` one pair or every pair of a map.
    pub fn inc(&mut self, fields: impl IntoFieldValues) -> &mut Self {
        self.assign("$inc", fields)
    }

    /// `$mul` one pair or every pair of a map.
    pub fn mul(&mut self, fields: impl IntoFieldValues) -> &mut Self {
        self.assign("$mul", fields)
    }

    /// `$min` one pair or every pair of a map.
    pub fn min(&mut self, fields: impl IntoFieldValues) -> &mut Self {
        self.assign("$min", fields)
    }

    /// `$max` one pair or every pair of a map.
    pub fn max(&mut self, fields: impl IntoFieldValues) -> &mut Self {
        self.assign("$max", fields)
    }

    /// Fold an update fragment underneath the accumulated operators.
    ///
    /// Keys already accumulated win over the fragment's keys. Every fragment
    /// value must be an operator document.
    pub fn merge_under(&mut self, fragment: Document) -> MongoResult<&mut Self> {
        let mut merged = IndexMap::with_capacity(fragment.len() + self.operators.len());
        for (key, value) in fragment {
            match value {
                Bson::Document(fields) => {
                    merged.insert(key, fields);
                }
                _ => {
                    return Err(MongoError::validation(format!(
                        "update operator '{}' must map to a document",
                        key
                    )));
                }
            }
        }
        merged.extend(std::mem::take(&mut self.operators));
        self.operators = merged;
        Ok(self)
    }

    /// The accumulated update document.
    pub fn to_document(&self) -> Document {
        self.operators
            .iter()
            .map(|(name, fields)| (name.clone(), Bson::Document(fields.clone())))
            .collect()
    }

    /// Build the update document.
    pub fn build(self) -> Document {
        self.operators
            .into_iter()
            .map(|(name, fields)| (name, Bson::Document(fields)))
            .collect()
    }

    /// Remove every operator.
    pub fn clear(&mut self) {
        self.operators.clear();
    }

    /// Check if no operator was added.
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    fn assign(&mut self, operator: &str, fields: impl IntoFieldValues) -> &mut Self {
        let operator = self.operator(operator);
        for (field, value) in fields.into_field_values() {
            operator.insert(field, value);
        }
        self
    }

    fn operator(&mut self, name: &str) -> &mut Document {
        self.operators.entry(name.to_string()).or_default()
    }
}
