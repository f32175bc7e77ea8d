//! Materialization of directory entries into caller-defined records.
//!
//! A record type declares, once, which directory attribute feeds which of its fields by
//! implementing [`DirectoryRecord`] (usually through [`directory_record!`](crate::directory_record)).
//! A search then builds an [`AttributeMap`] from that declaration, requests exactly the
//! mapped attributes, and fills one fresh record per returned entry.
//!
//! The output must be a `&mut Vec<T>` of a record type; any other shape is rejected by the
//! compiler:
//!
//! ```compile_fail
//! use dirsearch_ldap::SearchResults;
//!
//! let mut numbers: Vec<u32> = Vec::new();
//! // `u32` is not a record type.
//! let _ = SearchResults::new(&mut numbers);
//! ```
//!
//! ```compile_fail
//! use dirsearch_ldap::{directory_record, SearchResults};
//!
//! #[derive(Default)]
//! struct Account {
//!     name: String,
//! }
//! directory_record!(Account { name: text => "name" });
//!
//! // Results are appended to a sequence, not written into a single record.
//! let mut account = Account::default();
//! let _ = SearchResults::new(&mut account);
//! ```
//!
//! ```compile_fail
//! use dirsearch_ldap::{directory_record, SearchResults};
//!
//! #[derive(Default)]
//! struct Account {
//!     name: String,
//! }
//! directory_record!(Account { name: text => "name" });
//!
//! // The sequence must be borrowed mutably so results can be appended to it.
//! let _ = SearchResults::new(Vec::<Account>::new());
//! ```

use dirsearch_core::{Error, Result, Sid};
use std::collections::HashMap;
use std::fmt;

/// Raw attribute value handed over by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeValue<'a> {
    /// Value decoded as text.
    Text(&'a str),
    /// Value kept as raw bytes (e.g. `objectSid`).
    Binary(&'a [u8]),
}

enum FieldSetter<T> {
    Text(fn(&mut T) -> &mut String),
    Sid(fn(&mut T) -> &mut Sid),
}

impl<T> Clone for FieldSetter<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FieldSetter<T> {}

impl<T> FieldSetter<T> {
    fn assign(self, record: &mut T, value: AttributeValue<'_>) {
        match (self, value) {
            (Self::Text(field), AttributeValue::Text(text)) => *field(record) = text.to_owned(),
            (Self::Text(field), AttributeValue::Binary(bytes)) => {
                *field(record) = String::from_utf8_lossy(bytes).into_owned();
            }
            (Self::Sid(field), AttributeValue::Text(text)) => {
                *field(record) = Sid::from(text.as_bytes());
            }
            (Self::Sid(field), AttributeValue::Binary(bytes)) => *field(record) = Sid::from(bytes),
        }
    }
}

/// Declares the attribute-to-field mapping of a record type.
pub struct AttributeMapBuilder<T> {
    fields: Vec<(String, FieldSetter<T>)>,
}

impl<T> AttributeMapBuilder<T> {
    /// Starts an empty declaration.
    #[must_use]
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Maps `attribute` onto a text field.
    #[must_use]
    pub fn text(mut self, attribute: impl Into<String>, field: fn(&mut T) -> &mut String) -> Self {
        self.fields
            .push((attribute.into(), FieldSetter::Text(field)));
        self
    }

    /// Maps `attribute` onto a security identifier field.
    #[must_use]
    pub fn sid(mut self, attribute: impl Into<String>, field: fn(&mut T) -> &mut Sid) -> Self {
        self.fields.push((attribute.into(), FieldSetter::Sid(field)));
        self
    }

    /// Freezes the declaration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRecord`] if two fields are mapped to the same attribute.
    pub fn build(self) -> Result<AttributeMap<T>> {
        let mut names = Vec::with_capacity(self.fields.len());
        let mut fields = HashMap::with_capacity(self.fields.len());

        for (attribute, setter) in self.fields {
            if fields.contains_key(&attribute) {
                return Err(Error::InvalidRecord(format!(
                    "attribute `{attribute}` is mapped to more than one field"
                )));
            }
            names.push(attribute.clone());
            fields.insert(attribute, setter);
        }

        Ok(AttributeMap { names, fields })
    }
}

impl<T> Default for AttributeMapBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen attribute-name to field mapping for one record type.
pub struct AttributeMap<T> {
    names: Vec<String>,
    fields: HashMap<String, FieldSetter<T>>,
}

impl<T> AttributeMap<T> {
    /// Attribute names in declaration order, each exactly once.
    #[must_use]
    pub fn attribute_list(&self) -> &[String] {
        &self.names
    }

    /// Returns true if `attribute` feeds a field.
    #[must_use]
    pub fn contains(&self, attribute: &str) -> bool {
        self.fields.contains_key(attribute)
    }

    /// Number of mapped attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true when no attribute is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<T> fmt::Debug for AttributeMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeMap")
            .field("attributes", &self.names)
            .finish()
    }
}

/// A record type that directory entries can be materialized into.
///
/// Fields not named in [`DirectoryRecord::attributes`] are left at their default value.
pub trait DirectoryRecord: Default + Send + 'static {
    /// Declares which directory attribute feeds each field.
    fn attributes() -> AttributeMapBuilder<Self>;
}

/// Implements [`DirectoryRecord`] from a field list.
///
/// Each entry reads `field: kind => "attribute"`, where `kind` is `text` for `String`
/// fields and `sid` for [`Sid`] fields.
///
/// ```
/// use dirsearch_ldap::{directory_record, Sid};
///
/// #[derive(Debug, Default)]
/// struct Account {
///     name: String,
///     mail: String,
///     sid: Sid,
///     note: String,
/// }
///
/// directory_record!(Account {
///     name: text => "sAMAccountName",
///     mail: text => "mail",
///     sid: sid => "objectSid",
/// });
/// ```
#[macro_export]
macro_rules! directory_record {
    ($record:ty { $($field:ident : $kind:ident => $attribute:expr),* $(,)? }) => {
        impl $crate::DirectoryRecord for $record {
            fn attributes() -> $crate::AttributeMapBuilder<Self> {
                $crate::AttributeMapBuilder::<Self>::new()
                    $(.$kind($attribute, |record| &mut record.$field))*
            }
        }
    };
}

/// Accumulates materialized records into the caller's output sequence for one search.
pub struct SearchResults<'a, T: DirectoryRecord> {
    records: &'a mut Vec<T>,
    attributes: AttributeMap<T>,
}

impl<'a, T: DirectoryRecord> SearchResults<'a, T> {
    /// Builds the attribute map for `T` and takes over `records` for appending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRecord`] if the record declaration maps one attribute twice.
    pub fn new(records: &'a mut Vec<T>) -> Result<Self> {
        let attributes = T::attributes().build()?;
        Ok(Self {
            records,
            attributes,
        })
    }

    /// Attribute names to request from the directory.
    #[must_use]
    pub fn attribute_list(&self) -> &[String] {
        self.attributes.attribute_list()
    }

    /// Mapping in use for this search.
    #[must_use]
    pub fn attribute_map(&self) -> &AttributeMap<T> {
        &self.attributes
    }

    /// Allocates a fresh, default-valued record.
    #[must_use]
    pub fn new_record(&self) -> T {
        T::default()
    }

    /// Stores `value` in the field mapped to `attribute`.
    ///
    /// Attributes without a mapped field are ignored.
    pub fn set_field(&self, record: &mut T, attribute: &str, value: AttributeValue<'_>) {
        if let Some(setter) = self.attributes.fields.get(attribute) {
            setter.assign(record, value);
        }
    }

    /// Appends a finished record to the output, preserving arrival order.
    pub fn append(&mut self, record: T) {
        self.records.push(record);
    }

    /// Number of records in the output sequence.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true when the output sequence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Prefixes a record construction failure with the operation that hit it.
pub(crate) fn in_context(operation: &str, err: Error) -> Error {
    match err {
        Error::InvalidRecord(message) => Error::InvalidRecord(format!("{operation}: {message}")),
        other => other,
    }
}
