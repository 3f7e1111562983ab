use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProtocolError;

/// Maximum topic length in bytes.
pub const MAX_TOPIC_LEN: usize = 255;

/// An immutable, validated topic name.
///
/// Topics are non-empty printable ASCII without whitespace, at most
/// [`MAX_TOPIC_LEN`] bytes. Cloning is cheap.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(Arc<str>);

impl Topic {
    /// Validate and create a topic.
    pub fn new(name: impl AsRef<str>) -> Result<Self, ProtocolError> {
        let name = name.as_ref();
        validate(name)?;
        Ok(Self(Arc::from(name)))
    }

    /// The topic as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate(name: &str) -> Result<(), ProtocolError> {
    if name.is_empty() {
        return Err(ProtocolError::InvalidTopic("topic is empty".to_string()));
    }
    if name.len() > MAX_TOPIC_LEN {
        return Err(ProtocolError::InvalidTopic(format!(
            "topic is {} bytes (max {MAX_TOPIC_LEN})",
            name.len()
        )));
    }
    if let Some(bad) = name.chars().find(|c| !c.is_ascii_graphic()) {
        return Err(ProtocolError::InvalidTopic(format!(
            "topic contains {bad:?}; only printable ASCII without spaces is allowed"
        )));
    }
    Ok(())
}

impl TryFrom<&str> for Topic {
    type Error = ProtocolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for Topic {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({:?})", &*self.0)
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Topic::new(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_names() {
        for name in ["sensors", "robot/arm/joint_states", "cam.front-left", "a"] {
            assert_eq!(Topic::new(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(Topic::new(""), Err(ProtocolError::InvalidTopic(_))));
    }

    #[test]
    fn rejects_whitespace_and_non_ascii() {
        assert!(Topic::new("two words").is_err());
        assert!(Topic::new("tab\there").is_err());
        assert!(Topic::new("température").is_err());
    }

    #[test]
    fn rejects_too_long() {
        let name = "t".repeat(MAX_TOPIC_LEN + 1);
        assert!(Topic::new(&name).is_err());
        assert!(Topic::new(&name[..MAX_TOPIC_LEN]).is_ok());
    }
}
