//! Strongly-typed identifiers for parkwatch

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Employee identity, owned by the external employee registry
    EmployeeId
);

string_id!(
    /// Registered vehicle
    VehicleId
);

string_id!(
    /// Assigned parking spot (1:1 with an employee)
    SpotId
);

string_id!(
    /// Complaint identifier assigned by the intake system; doubles as the
    /// idempotency key for sanction escalation
    ComplaintId
);

impl ComplaintId {
    /// Fresh id for complaints that arrive without one
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Unique identifier for a connected IPC client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn employee_id_equality() {
        let a = EmployeeId::new("e-100");
        let b = EmployeeId::from("e-100");
        let c = EmployeeId::new("e-101");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ClientId::new(), ClientId::new());
        assert_ne!(ComplaintId::generate(), ComplaintId::generate());
    }

    #[test]
    fn string_ids_serialize_as_plain_strings() {
        let vehicle = VehicleId::new("v-7");
        let json = serde_json::to_string(&vehicle).unwrap();
        assert_eq!(json, "\"v-7\"");

        let parsed: VehicleId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, vehicle);
    }
}
