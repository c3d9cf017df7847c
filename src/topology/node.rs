//! The in-memory topology tree.

use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;

use super::fingerprint::{CanonicalAttrs, fingerprint};
use super::kind::NodeKind;
use crate::config::ConnectionProtocol;

/// One resource of the desired topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    /// Path-derived identity, unique within the environment.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Kind-specific attributes.
    pub spec: NodeSpec,
    /// Variables declared on this node.
    pub vars: HashMap<String, String>,
    /// Variables visible to this node, including those of its ancestors.
    ///
    /// Persisted on the revision record for templating but never
    /// fingerprinted, so an ancestor's variable change does not cascade.
    pub scope_vars: HashMap<String, String>,
    /// Resource tags.
    pub tags: HashMap<String, String>,
    /// Owned nodes.
    pub children: Vec<Node>,
}

/// Kind-specific attributes of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeSpec {
    /// Root of the topology.
    Environment {
        /// Description.
        description: String,
        /// Cloud builder.
        builder: String,
        /// Administrative CIDRs.
        admin_cidrs: Vec<String>,
        /// Number of team copies.
        team_count: u32,
    },
    /// Competition-wide settings.
    Competition {
        /// Root password hash.
        root_password: String,
        /// DNS provider type.
        dns_type: String,
        /// Root domain.
        root_domain: String,
        /// Upstream DNS servers.
        dns_servers: Vec<String>,
        /// NTP servers.
        ntp_servers: Vec<String>,
    },
    /// One team's copy of the networks.
    Team {
        /// Team index.
        index: u32,
    },
    /// A network inside a team.
    Network {
        /// Address range.
        cidr: String,
        /// Whether the network is reachable over VPN.
        vpn: bool,
    },
    /// A machine.
    Host(HostSpec),
    /// A management endpoint.
    Connection {
        /// Transport.
        protocol: ConnectionProtocol,
        /// Target address.
        address: Option<String>,
        /// Target port.
        port: u16,
        /// Login user.
        user: String,
        /// Bastion host, if any.
        bastion: Option<String>,
        /// Connect timeout in seconds.
        timeout_secs: u32,
    },
    /// A DNS record.
    DnsRecord {
        /// Zone.
        zone: String,
        /// Record type.
        record_type: String,
        /// Ordered record values.
        values: Vec<String>,
        /// Time to live.
        ttl: u32,
        /// Whether the record is disabled.
        disabled: bool,
    },
    /// An ordered provisioning step.
    ProvisioningStep {
        /// Step number.
        step: u32,
        /// What the step runs.
        payload: StepPayload,
    },
    /// A custom image.
    Ami {
        /// Image name.
        image_name: String,
        /// Description.
        description: String,
        /// Image provider.
        provider: String,
        /// Login user baked into the image.
        username: String,
    },
    /// A Terraform remote state backend.
    RemoteState {
        /// Backend type.
        backend_type: String,
        /// Backend configuration.
        config: HashMap<String, String>,
    },
    /// A maintainer.
    User {
        /// Contact address.
        email: String,
    },
}

/// Attributes of a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostSpec {
    /// Hostname presented by the machine.
    pub hostname: String,
    /// Operating system.
    pub os: String,
    /// Boot image.
    pub ami: Option<String>,
    /// Instance size.
    pub instance_size: String,
    /// Disk size in GB.
    pub disk_size: u32,
    /// Address derived from the network range.
    pub address: Option<String>,
    /// Exposed TCP ports.
    pub exposed_tcp_ports: Vec<String>,
    /// Exposed UDP ports.
    pub exposed_udp_ports: Vec<String>,
    /// Password override.
    pub override_password: Option<String>,
    /// Group memberships.
    pub user_groups: Vec<String>,
}

/// The payload of a provisioning step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepPayload {
    /// A script uploaded to the host and executed there.
    Script {
        /// Source path, relative to the topology file.
        source: String,
        /// Script body.
        content: String,
        /// Interpreter, if not the default shell.
        interpreter: Option<String>,
        /// Arguments.
        args: Vec<String>,
        /// Upload destination on the host.
        remote_path: String,
        /// Whether a non-zero exit is tolerated.
        ignore_errors: bool,
    },
    /// A command run on the host.
    Command {
        /// Program.
        program: String,
        /// Arguments.
        args: Vec<String>,
        /// Working directory.
        cwd: Option<String>,
        /// Whether a non-zero exit is tolerated.
        ignore_errors: bool,
    },
}

impl NodeSpec {
    /// Returns the kind of node this spec describes.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::Environment { .. } => NodeKind::Environment,
            Self::Competition { .. } => NodeKind::Competition,
            Self::Team { .. } => NodeKind::Team,
            Self::Network { .. } => NodeKind::Network,
            Self::Host(_) => NodeKind::Host,
            Self::Connection { .. } => NodeKind::Connection,
            Self::DnsRecord { .. } => NodeKind::DnsRecord,
            Self::ProvisioningStep { .. } => NodeKind::ProvisioningStep,
            Self::Ami { .. } => NodeKind::Ami,
            Self::RemoteState { .. } => NodeKind::RemoteState,
            Self::User { .. } => NodeKind::User,
        }
    }

    fn write_attrs(&self, attrs: CanonicalAttrs) -> CanonicalAttrs {
        match self {
            Self::Environment {
                description,
                builder,
                admin_cidrs,
                team_count,
            } => attrs
                .field("description", description)
                .field("builder", builder)
                .list("admin_cidrs", admin_cidrs)
                .field("team_count", team_count),
            Self::Competition {
                root_password,
                dns_type,
                root_domain,
                dns_servers,
                ntp_servers,
            } => attrs
                .field("root_password", root_password)
                .field("dns_type", dns_type)
                .field("root_domain", root_domain)
                .list("dns_servers", dns_servers)
                .list("ntp_servers", ntp_servers),
            Self::Team { index } => attrs.field("index", index),
            Self::Network { cidr, vpn } => attrs.field("cidr", cidr).field("vpn", vpn),
            Self::Host(host) => attrs
                .field("hostname", &host.hostname)
                .field("os", &host.os)
                .optional("ami", host.ami.as_deref())
                .field("instance_size", &host.instance_size)
                .field("disk_size", host.disk_size)
                .optional("address", host.address.as_deref())
                .list("exposed_tcp_ports", &host.exposed_tcp_ports)
                .list("exposed_udp_ports", &host.exposed_udp_ports)
                .optional("override_password", host.override_password.as_deref())
                .list("user_groups", &host.user_groups),
            Self::Connection {
                protocol,
                address,
                port,
                user,
                bastion,
                timeout_secs,
            } => attrs
                .field("protocol", protocol)
                .optional("address", address.as_deref())
                .field("port", port)
                .field("user", user)
                .optional("bastion", bastion.as_deref())
                .field("timeout_secs", timeout_secs),
            Self::DnsRecord {
                zone,
                record_type,
                values,
                ttl,
                disabled,
            } => attrs
                .field("zone", zone)
                .field("record_type", record_type)
                .list("values", values)
                .field("ttl", ttl)
                .field("disabled", disabled),
            Self::ProvisioningStep { step, payload } => {
                let attrs = attrs.field("step", step);
                match payload {
                    StepPayload::Script {
                        source,
                        content,
                        interpreter,
                        args,
                        remote_path,
                        ignore_errors,
                    } => attrs
                        .field("payload", "script")
                        .field("source", source)
                        .field("content", content)
                        .optional("interpreter", interpreter.as_deref())
                        .list("args", args)
                        .field("remote_path", remote_path)
                        .field("ignore_errors", ignore_errors),
                    StepPayload::Command {
                        program,
                        args,
                        cwd,
                        ignore_errors,
                    } => attrs
                        .field("payload", "command")
                        .field("program", program)
                        .list("args", args)
                        .optional("cwd", cwd.as_deref())
                        .field("ignore_errors", ignore_errors),
                }
            }
            Self::Ami {
                image_name,
                description,
                provider,
                username,
            } => attrs
                .field("image_name", image_name)
                .field("description", description)
                .field("provider", provider)
                .field("username", username),
            Self::RemoteState {
                backend_type,
                config,
            } => attrs
                .field("backend_type", backend_type)
                .map("config", config),
            Self::User { email } => attrs.field("email", email),
        }
    }

    fn summary(&self) -> Option<String> {
        match self {
            Self::Environment { team_count, .. } => Some(format!("{team_count} teams")),
            Self::Network { cidr, .. } => Some(cidr.clone()),
            Self::Host(host) => Some(match &host.address {
                Some(address) => format!("{}, {address}", host.os),
                None => host.os.clone(),
            }),
            Self::Connection { protocol, port, .. } => Some(format!("{protocol}:{port}")),
            Self::DnsRecord {
                record_type,
                values,
                ..
            } => Some(format!("{record_type} {}", values.join(","))),
            Self::ProvisioningStep { step, payload } => Some(match payload {
                StepPayload::Script { source, .. } if !source.is_empty() => {
                    format!("#{step} script {source}")
                }
                StepPayload::Script { .. } => format!("#{step} script"),
                StepPayload::Command { program, .. } => format!("#{step} command {program}"),
            }),
            Self::RemoteState { backend_type, .. } => Some(backend_type.clone()),
            Self::Competition { .. }
            | Self::Team { .. }
            | Self::Ami { .. }
            | Self::User { .. } => None,
        }
    }
}

impl Node {
    /// Creates a childless node.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, spec: NodeSpec) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            spec,
            vars: HashMap::new(),
            scope_vars: HashMap::new(),
            tags: HashMap::new(),
            children: Vec::new(),
        }
    }

    /// Returns the node's kind.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.spec.kind()
    }

    /// Returns the canonical attribute set used for change detection.
    ///
    /// Children and inherited variables are excluded.
    #[must_use]
    pub fn canonical(&self) -> CanonicalAttrs {
        let attrs = CanonicalAttrs::new(self.kind())
            .field("id", &self.id)
            .field("name", &self.name);
        self.spec
            .write_attrs(attrs)
            .map("vars", &self.vars)
            .map("tags", &self.tags)
    }

    /// Returns the node's fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        fingerprint(&self.canonical())
    }

    /// Returns a one-line description of the node.
    #[must_use]
    pub fn label(&self) -> String {
        match self.spec.summary() {
            Some(summary) => format!("{} {} ({summary})", self.kind(), self.name),
            None => format!("{} {}", self.kind(), self.name),
        }
    }

    /// Returns the owned nodes.
    #[must_use]
    pub fn children(&self) -> &[Self] {
        &self.children
    }

    /// Returns the step number of a provisioning step.
    #[must_use]
    pub const fn step_number(&self) -> Option<u32> {
        match &self.spec {
            NodeSpec::ProvisioningStep { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Returns every node of the subtree in pre-order.
    #[must_use]
    pub fn walk(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Finds a node of the subtree by id.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Self> {
        self.walk().into_iter().find(|n| n.id == id)
    }

    /// Returns the number of nodes in the subtree, including this one.
    #[must_use]
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(Self::subtree_size).sum::<usize>()
    }
}

/// Derives a host address from its network range and last octet.
#[must_use]
pub fn host_address(cidr: &str, last_octet: u8) -> Option<String> {
    let base: Ipv4Addr = cidr.split('/').next()?.trim().parse().ok()?;
    let [a, b, c, _] = base.octets();
    Some(Ipv4Addr::new(a, b, c, last_octet).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(n: u32, content: &str) -> Node {
        Node::new(
            format!("hosts/h1/steps/{n}"),
            n.to_string(),
            NodeSpec::ProvisioningStep {
                step: n,
                payload: StepPayload::Script {
                    source: String::new(),
                    content: content.to_string(),
                    interpreter: None,
                    args: Vec::new(),
                    remote_path: String::from("/tmp/step.sh"),
                    ignore_errors: false,
                },
            },
        )
    }

    fn network() -> Node {
        let mut net = Node::new(
            "teams/0/networks/corp",
            "corp",
            NodeSpec::Network {
                cidr: String::from("10.0.1.0/24"),
                vpn: false,
            },
        );
        net.children.push(step(1, "echo one"));
        net.children.push(step(2, "echo two"));
        net
    }

    #[test]
    fn test_child_change_does_not_touch_parent_fingerprint() {
        let before = network();
        let mut after = network();
        after.children[1] = step(2, "echo changed");

        assert_eq!(before.fingerprint(), after.fingerprint());
        assert_ne!(
            before.children[1].fingerprint(),
            after.children[1].fingerprint()
        );
    }

    #[test]
    fn test_scope_vars_are_not_fingerprinted() {
        let plain = network();
        let mut scoped = network();
        scoped
            .scope_vars
            .insert(String::from("season"), String::from("fall"));
        assert_eq!(plain.fingerprint(), scoped.fingerprint());

        scoped.vars.insert(String::from("season"), String::from("fall"));
        assert_ne!(plain.fingerprint(), scoped.fingerprint());
    }

    #[test]
    fn test_walk_is_preorder() {
        let net = network();
        let ids: Vec<&str> = net.walk().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "teams/0/networks/corp",
                "hosts/h1/steps/1",
                "hosts/h1/steps/2"
            ]
        );
        assert_eq!(net.subtree_size(), 3);
        assert!(net.find("hosts/h1/steps/2").is_some());
        assert!(net.find("hosts/h1/steps/3").is_none());
    }

    #[test]
    fn test_label() {
        assert_eq!(network().label(), "network corp (10.0.1.0/24)");
        assert_eq!(step(2, "x").label(), "provisioning_step 2 (#2 script)");
    }

    #[test]
    fn test_host_address() {
        assert_eq!(host_address("10.0.1.0/24", 10).as_deref(), Some("10.0.1.10"));
        assert_eq!(host_address("not-a-cidr", 10), None);
    }
}
