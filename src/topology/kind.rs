//! Node kinds.

use serde::{Deserialize, Serialize};

/// The closed set of resource kinds a topology is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Root of the topology.
    Environment,
    /// Competition-wide settings.
    Competition,
    /// One team's copy of the environment.
    Team,
    /// A network inside a team.
    Network,
    /// A machine on a network.
    Host,
    /// A management endpoint of a host.
    Connection,
    /// A DNS record.
    DnsRecord,
    /// An ordered provisioning step of a host (script or command).
    ProvisioningStep,
    /// A custom machine image.
    Ami,
    /// A Terraform remote state backend.
    RemoteState,
    /// A maintainer or account.
    User,
}

impl NodeKind {
    /// All kinds, in tree order.
    pub const ALL: [Self; 11] = [
        Self::Environment,
        Self::Competition,
        Self::Team,
        Self::Network,
        Self::Host,
        Self::Connection,
        Self::DnsRecord,
        Self::ProvisioningStep,
        Self::Ami,
        Self::RemoteState,
        Self::User,
    ];

    /// Returns the serialized name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::Competition => "competition",
            Self::Team => "team",
            Self::Network => "network",
            Self::Host => "host",
            Self::Connection => "connection",
            Self::DnsRecord => "dns_record",
            Self::ProvisioningStep => "provisioning_step",
            Self::Ami => "ami",
            Self::RemoteState => "remote_state",
            Self::User => "user",
        }
    }

    /// Parses a kind from its serialized name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    /// Short tag used in revision file names.
    #[must_use]
    pub const fn file_tag(self) -> &'static str {
        match self {
            Self::Environment => "env",
            Self::DnsRecord => "dns",
            Self::ProvisioningStep => "pstep",
            Self::RemoteState => "remote",
            other => other.as_str(),
        }
    }

    /// Whether records of this kind live in their parent's directory.
    ///
    /// Leaf kinds share a directory with their siblings, so their file name
    /// carries the leaf segment of the node id.
    #[must_use]
    pub const fn is_leaf_record(self) -> bool {
        matches!(self, Self::Connection | Self::DnsRecord | Self::ProvisioningStep)
    }

    /// Whether siblings of this kind must be applied one after another.
    #[must_use]
    pub const fn is_ordered(self) -> bool {
        matches!(self, Self::ProvisioningStep)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for kind in NodeKind::ALL {
            assert_eq!(NodeKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(NodeKind::from_name("router"), None);
    }

    #[test]
    fn test_serde_names_match_as_str() {
        let json = serde_json::to_string(&NodeKind::ProvisioningStep).expect("serialize");
        assert_eq!(json, "\"provisioning_step\"");
    }
}
