//! Dock identity gathered from `# Field:` info lines

use crate::core::codec::InfoRecord;
use serde::{Deserialize, Serialize};

/// Four-field dock descriptor. Complete once every field is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockIdentity {
    /// Firmware version
    pub version: Option<f64>,
    /// Dock serial number
    pub serial: Option<String>,
    /// Stored user name
    pub user: Option<String>,
    /// Stored dock name
    pub name: Option<String>,
}

impl DockIdentity {
    /// Whether all four fields are present
    pub fn is_identified(&self) -> bool {
        self.version.is_some() && self.serial.is_some() && self.user.is_some() && self.name.is_some()
    }

    /// Record an info line. Returns true if it set an identity field.
    ///
    /// Empty values and plain messages leave the identity untouched.
    pub fn apply(&mut self, record: &InfoRecord) -> bool {
        fn set(slot: &mut Option<String>, value: &str) -> bool {
            if value.is_empty() {
                return false;
            }
            *slot = Some(value.to_string());
            true
        }

        match record {
            InfoRecord::Version(v) => {
                self.version = Some(*v);
                true
            }
            InfoRecord::Serial(v) => set(&mut self.serial, v),
            InfoRecord::User(v) => set(&mut self.user, v),
            InfoRecord::Dock(v) => set(&mut self.name, v),
            InfoRecord::Message(_) => false,
        }
    }

    /// Forget every field
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl std::fmt::Display for DockIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = |v: &Option<String>| v.clone().unwrap_or_else(|| "?".to_string());
        write!(
            f,
            "{} (serial {}, user {}, firmware {})",
            text(&self.name),
            text(&self.serial),
            text(&self.user),
            self.version.map_or_else(|| "?".to_string(), |v| v.to_string())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identified_only_when_complete() {
        let mut identity = DockIdentity::default();
        assert!(identity.apply(&InfoRecord::Dock("Workbench".into())));
        assert!(identity.apply(&InfoRecord::Version(1.12)));
        assert!(identity.apply(&InfoRecord::User("maker".into())));
        assert!(!identity.is_identified());
        assert!(identity.apply(&InfoRecord::Serial("42".into())));
        assert!(identity.is_identified());

        identity.reset();
        assert!(!identity.is_identified());
        assert_eq!(identity, DockIdentity::default());
    }

    #[test]
    fn empty_values_and_messages_are_ignored() {
        let mut identity = DockIdentity::default();
        assert!(!identity.apply(&InfoRecord::Serial(String::new())));
        assert!(!identity.apply(&InfoRecord::Message("Serial: 1".into())));
        assert_eq!(identity.serial, None);
    }

    #[test]
    fn display_marks_missing_fields() {
        let identity = DockIdentity {
            version: Some(1.12),
            serial: Some("42".into()),
            user: None,
            name: Some("Workbench".into()),
        };
        assert_eq!(identity.to_string(), "Workbench (serial 42, user ?, firmware 1.12)");
    }
}
