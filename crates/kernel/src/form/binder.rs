//! Binding submitted data and records onto form fields.

use std::ops::BitOr;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::submission::{FieldValue, Submission};
use super::types::FieldList;
use crate::error::FormError;

/// Flags controlling how [`DataBinder::bind`] treats missing and empty values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergePolicy(u8);

impl MergePolicy {
    /// Only overwrite fields whose key is present.
    pub const DEFAULT: MergePolicy = MergePolicy(0);

    /// Reset fields whose key is absent to null.
    pub const CLEAR_MISSING: MergePolicy = MergePolicy(1);

    /// Leave fields alone when the submitted value is falsy.
    pub const IGNORE_FALSEISH: MergePolicy = MergePolicy(2);

    /// Whether every flag in `other` is set.
    pub fn contains(self, other: MergePolicy) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MergePolicy {
    type Output = MergePolicy;

    fn bitor(self, rhs: Self) -> Self::Output {
        MergePolicy(self.0 | rhs.0)
    }
}

/// A data object fields can be read from and saved into.
pub trait DataRecord {
    /// Read a property.
    fn field(&self, name: &str) -> Option<FieldValue>;

    /// Write a property.
    fn set_field(&mut self, name: &str, value: FieldValue);
}

impl DataRecord for Map<String, Value> {
    fn field(&self, name: &str) -> Option<FieldValue> {
        self.get(name).map(FieldValue::from_json)
    }

    fn set_field(&mut self, name: &str, value: FieldValue) {
        self.insert(name.to_string(), value.to_json());
    }
}

/// Where bound values come from.
pub enum BindSource<'a> {
    /// Submitted request variables.
    Mapping(&'a Submission),

    /// A data object read property by property.
    Record(&'a dyn DataRecord),

    /// A decoded JSON document; must be an object.
    Json(&'a Value),
}

/// Writes values from a source onto the fields of a form.
pub struct DataBinder;

impl DataBinder {
    /// Bind `source` onto `fields` and return how many fields were written.
    ///
    /// `allowed` restricts binding to the named fields. For mappings, a field
    /// with a set `<name>_unchanged` companion is left untouched.
    pub fn bind(
        fields: &mut FieldList,
        source: BindSource<'_>,
        policy: MergePolicy,
        allowed: Option<&[String]>,
    ) -> Result<usize, FormError> {
        // JSON objects bind like any other mapping
        let converted;
        let source = match source {
            BindSource::Json(value) => {
                converted = Submission::from_json(value).inspect_err(|e| {
                    warn!(error = %e, "refusing to bind form data");
                })?;
                BindSource::Mapping(&converted)
            }
            other => other,
        };

        let context = match &source {
            BindSource::Mapping(data) => Some(Arc::new((*data).clone())),
            _ => None,
        };

        let clear_missing = policy.contains(MergePolicy::CLEAR_MISSING);
        let ignore_falseish = policy.contains(MergePolicy::IGNORE_FALSEISH);
        let mut bound = 0;

        for field in fields.data_fields_mut() {
            if allowed.is_some_and(|names| !names.iter().any(|n| *n == field.name)) {
                continue;
            }

            let value = match &source {
                BindSource::Mapping(data) => {
                    // Client said the field wasn't touched
                    if data.is_set(&format!("{}_unchanged", field.name)) {
                        continue;
                    }
                    lookup(data, &field.name)
                }
                BindSource::Record(record) => record.field(&field.name),
                BindSource::Json(_) => None,
            };

            // Apply the merge policy
            match value {
                Some(value) if !(ignore_falseish && value.is_falsy()) => {
                    field.bind_value(value, context.clone());
                    bound += 1;
                }
                Some(_) => {}
                None if clear_missing => {
                    field.bind_value(FieldValue::Null, context.clone());
                    bound += 1;
                }
                None => {}
            }
        }

        debug!(bound, clear_missing, ignore_falseish, "bound form data");
        Ok(bound)
    }
}

fn lookup(data: &Submission, name: &str) -> Option<FieldValue> {
    if let Some(value) = data.get(name) {
        return Some(value.clone());
    }
    match name.find('[') {
        Some(pos) if pos > 0 => data.lookup_flattened(name),
        _ => None,
    }
}
