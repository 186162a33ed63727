//! Tri-state field wrapper for partial update payloads.
//!
//! Update requests distinguish "field absent" (leave unchanged) from an
//! explicit `null` (clear the value). A plain `Option<T>` collapses the two,
//! so updatable fields are declared as `Patch<T>` with `#[serde(default)]`:
//! a missing key stays `Absent`, `null` becomes `Null`, and anything else
//! becomes `Value`.

use serde::{Deserialize, Deserializer};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Patch<T> {
    #[default]
    Absent,
    Null,
    Value(T),
}

impl<T> Patch<T> {
    /// Applies this patch over the current value: absent keeps it, null
    /// clears it, a value replaces it.
    pub fn resolve(self, current: Option<T>) -> Option<T> {
        match self {
            Patch::Absent => current,
            Patch::Null => None,
            Patch::Value(v) => Some(v),
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Patch::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => Patch::Value(v),
            None => Patch::Null,
        }
    }
}

impl<'de, T> Deserialize<'de> for Patch<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Patch::from)
    }
}
