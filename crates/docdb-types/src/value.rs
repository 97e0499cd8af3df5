use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// A composite value: an ordered sequence of byte fields.
///
/// Values identify documents (a primary key may span several fields) and
/// carry indexed values. Ordering is field by field, and a value that is a
/// field-wise prefix of another sorts first, which is exactly the order of
/// their encoded keys.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Value {
    fields: Vec<Vec<u8>>,
}

impl Value {
    /// A value with no fields.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a value from any sequence of byte-like fields.
    ///
    /// ```
    /// use docdb_types::Value;
    ///
    /// let id = Value::of(["aaa", "a"]);
    /// assert_eq!(id.len(), 2);
    /// ```
    pub fn of<I, F>(fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: AsRef<[u8]>,
    {
        Self {
            fields: fields.into_iter().map(|f| f.as_ref().to_vec()).collect(),
        }
    }

    /// A value with exactly one field.
    pub fn single(field: impl AsRef<[u8]>) -> Self {
        Self {
            fields: vec![field.as_ref().to_vec()],
        }
    }

    pub(crate) fn from_fields(fields: Vec<Vec<u8>>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Vec<u8>] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Append a field.
    pub fn push(&mut self, field: impl AsRef<[u8]>) {
        self.fields.push(field.as_ref().to_vec());
    }

    /// Builder form of [`Value::push`].
    pub fn with(mut self, field: impl AsRef<[u8]>) -> Self {
        self.push(field);
        self
    }

    /// Check that every field can be embedded in a key.
    pub fn validate(&self) -> Result<(), KeyError> {
        match self.fields.iter().position(|f| f.contains(&0)) {
            Some(position) => Err(KeyError::InvalidKeyField { position }),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Value[")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "\"{}\"", field.escape_ascii())?;
        }
        f.write_str("]")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", field.escape_ascii())?;
        }
        Ok(())
    }
}

impl From<&str> for Value {
    fn from(field: &str) -> Self {
        Self::single(field)
    }
}

impl From<String> for Value {
    fn from(field: String) -> Self {
        Self {
            fields: vec![field.into_bytes()],
        }
    }
}

impl From<&String> for Value {
    fn from(field: &String) -> Self {
        Self::single(field)
    }
}

impl From<&[u8]> for Value {
    fn from(field: &[u8]) -> Self {
        Self::single(field)
    }
}

impl From<Vec<u8>> for Value {
    fn from(field: Vec<u8>) -> Self {
        Self {
            fields: vec![field],
        }
    }
}

impl<const N: usize> From<[&str; N]> for Value {
    fn from(fields: [&str; N]) -> Self {
        Self::of(fields)
    }
}

impl From<&Value> for Value {
    fn from(value: &Value) -> Self {
        value.clone()
    }
}

impl<F: AsRef<[u8]>> FromIterator<F> for Value {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        Self::of(iter)
    }
}
