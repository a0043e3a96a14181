//! Newtype identifiers shared across every governance component.
//!
//! Per spec: "Tenant: the top-level isolation boundary; every entity
//! (agent, tool, config, reputation record) is scoped to a tenant."

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(TenantId);
string_id!(AgentId);
string_id!(RemoteInstanceId);
string_id!(ToolId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_display_roundtrip() {
        let t = TenantId::from("acme-corp");
        assert_eq!(t.to_string(), "acme-corp");
        assert_eq!(t.as_str(), "acme-corp");
    }
}
