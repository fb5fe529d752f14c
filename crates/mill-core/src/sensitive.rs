// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Debug, Display, Formatter};

/// Wraps a value that must never reach logs or remote callers verbatim.
///
/// Used for access-denial details (table and column names) and policy
/// filter text. Call `.expose()` to read the inner value.
#[derive(Clone, Eq, PartialEq, Hash, Default)]
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Sensitive<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> Debug for Sensitive<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> Display for Sensitive<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> Serialize for Sensitive<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("***")
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Sensitive<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Sensitive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_in_formatting() {
        let detail = Sensitive::new("SALES.CLIENT");
        assert_eq!(format!("{:?}", detail), "[REDACTED]");
        assert_eq!(format!("{}", detail), "[REDACTED]");
        assert_eq!(*detail.expose(), "SALES.CLIENT");
    }

    #[test]
    fn redacts_when_serialized() {
        let detail = Sensitive::new(String::from("pii_ssn"));
        assert_eq!(serde_json::to_string(&detail).unwrap(), "\"***\"");
    }
}
