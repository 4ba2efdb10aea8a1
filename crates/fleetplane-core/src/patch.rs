//! Tri-state field for partial updates.
//!
//! A PATCH body has to tell apart "leave this field alone" (the key is
//! absent), "clear this field" (the key is `null`) and "set this field"
//! (the key has a value). A bare `Option<T>` collapses the first two.
//!
//! Fields of type [`Patch`] must be declared with
//! `#[serde(default, skip_serializing_if = "Patch::is_unset")]` so that a
//! missing key deserializes to [`Patch::Unset`] and is omitted again on
//! output.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single field of a partial update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Patch<T> {
    /// The field was not mentioned; keep the current value.
    #[default]
    Unset,
    /// The field was explicitly `null`; clear the current value.
    Null,
    /// The field carries a new value.
    Value(T),
}

impl<T> Patch<T> {
    /// Returns true if the field was not mentioned.
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Returns true if the field was explicitly `null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the new value, if any.
    #[must_use]
    pub const fn as_value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Unset | Self::Null => None,
        }
    }

    /// Apply the patch to an optional field.
    #[must_use]
    pub fn apply_to(self, current: Option<T>) -> Option<T> {
        match self {
            Self::Unset => current,
            Self::Null => None,
            Self::Value(value) => Some(value),
        }
    }

    /// Apply the patch to a required field.
    ///
    /// # Errors
    ///
    /// Returns `Err(())` when the patch is [`Patch::Null`], since a required
    /// field cannot be cleared. Callers attach the field name to the error.
    #[allow(clippy::result_unit_err)]
    pub fn apply_required(self, current: T) -> Result<T, ()> {
        match self {
            Self::Unset => Ok(current),
            Self::Null => Err(()),
            Self::Value(value) => Ok(value),
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Self::Value)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Only reached when the key is present; absent keys use `Default`.
        Option::<T>::deserialize(deserializer).map(Self::from)
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Value(value) => value.serialize(serializer),
            Self::Unset | Self::Null => serializer.serialize_none(),
        }
    }
}
