//! Expands a topology file into the node tree.
//!
//! Networks are instantiated once per team. Every node gets a path-like id
//! that doubles as its location under the build root, and a variable scope
//! made of its ancestors' variables overlaid with its own.

use std::collections::HashMap;
use tracing::debug;

use super::node::{HostSpec, Node, NodeSpec, StepPayload, host_address};
use crate::config::{
    AmiConfig, CompetitionConfig, ConnectionConfig, ConnectionProtocol, DnsRecordConfig,
    HostConfig, NetworkConfig, Platform, StepConfig, TopologyConfig, UserConfig,
};

/// Builds [`Node`] trees from topology files.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopologyBuilder {
    platform: Platform,
}

impl TopologyBuilder {
    /// Creates a builder for hosts following the given path convention.
    #[must_use]
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Expands the topology into its node tree.
    #[must_use]
    pub fn build(&self, config: &TopologyConfig) -> Node {
        let env = &config.environment;
        let name = if env.name.is_empty() {
            env.id.clone()
        } else {
            env.name.clone()
        };

        let mut root = Node::new(
            env.id.clone(),
            name,
            NodeSpec::Environment {
                description: env.description.clone(),
                builder: env.builder.clone(),
                admin_cidrs: env.admin_cidrs.clone(),
                team_count: env.team_count,
            },
        );
        root.vars = env.vars.clone();
        root.tags = env.tags.clone();
        root.scope_vars = env.vars.clone();

        if let Some(competition) = &config.competition {
            root.children
                .push(Self::competition(competition, &root.scope_vars));
        }

        for remote in &config.remote_states {
            let mut node = Node::new(
                format!("remote/{}", remote.id),
                remote.id.clone(),
                NodeSpec::RemoteState {
                    backend_type: remote.backend_type.clone(),
                    config: remote.config.clone(),
                },
            );
            node.scope_vars = root.scope_vars.clone();
            root.children.push(node);
        }

        for ami in &config.amis {
            root.children.push(Self::ami(ami, &root.scope_vars));
        }

        for user in &config.users {
            root.children.push(Self::user(
                format!("users/{}", user.id),
                user,
                &root.scope_vars,
            ));
        }

        for index in 0..env.team_count {
            root.children.push(self.team(index, config, &root.scope_vars));
        }

        debug!("Expanded topology {} into {} nodes", env.id, root.subtree_size());
        root
    }

    fn competition(config: &CompetitionConfig, parent: &HashMap<String, String>) -> Node {
        let mut node = Node::new(
            "competition",
            config.id.clone(),
            NodeSpec::Competition {
                root_password: config.root_password.clone(),
                dns_type: config.dns.dns_type.clone(),
                root_domain: config.dns.root_domain.clone(),
                dns_servers: config.dns.dns_servers.clone(),
                ntp_servers: config.dns.ntp_servers.clone(),
            },
        );
        node.vars = config.vars.clone();
        node.scope_vars = scope(parent, &config.vars);

        for record in &config.records {
            node.children.push(Self::dns_record(
                format!("competition/dns/{}", record.name),
                record,
                &node.scope_vars,
            ));
        }
        node
    }

    fn ami(config: &AmiConfig, parent: &HashMap<String, String>) -> Node {
        let id = format!("amis/{}", config.id);
        let mut node = Node::new(
            id.clone(),
            config.id.clone(),
            NodeSpec::Ami {
                image_name: config.name.clone(),
                description: config.description.clone(),
                provider: config.provider.clone(),
                username: config.username.clone(),
            },
        );
        node.vars = config.vars.clone();
        node.tags = config.tags.clone();
        node.scope_vars = scope(parent, &config.vars);

        if let Some(maintainer) = &config.maintainer {
            node.children.push(Self::user(
                format!("{id}/maintainer"),
                maintainer,
                &node.scope_vars,
            ));
        }
        node
    }

    fn user(id: String, config: &UserConfig, parent: &HashMap<String, String>) -> Node {
        let name = if config.name.is_empty() {
            config.id.clone()
        } else {
            config.name.clone()
        };
        let mut node = Node::new(
            id,
            name,
            NodeSpec::User {
                email: config.email.clone(),
            },
        );
        node.scope_vars = parent.clone();
        node
    }

    fn team(&self, index: u32, config: &TopologyConfig, parent: &HashMap<String, String>) -> Node {
        let id = format!("teams/{index}");
        let mut node = Node::new(id.clone(), format!("team-{index}"), NodeSpec::Team { index });
        node.scope_vars = parent.clone();
        node.scope_vars
            .insert(String::from("team_number"), index.to_string());

        for network in &config.networks {
            node.children.push(self.network(
                format!("{id}/networks/{}", network.name),
                network,
                &node.scope_vars,
            ));
        }
        node
    }

    fn network(&self, id: String, config: &NetworkConfig, parent: &HashMap<String, String>) -> Node {
        let mut node = Node::new(
            id.clone(),
            config.name.clone(),
            NodeSpec::Network {
                cidr: config.cidr.clone(),
                vpn: config.vpn,
            },
        );
        node.vars = config.vars.clone();
        node.tags = config.tags.clone();
        node.scope_vars = scope(parent, &config.vars);

        for host in &config.hosts {
            node.children.push(self.host(
                format!("{id}/hosts/{}", host.name),
                host,
                &config.cidr,
                &node.scope_vars,
            ));
        }
        node
    }

    fn host(
        &self,
        id: String,
        config: &HostConfig,
        cidr: &str,
        parent: &HashMap<String, String>,
    ) -> Node {
        let address = host_address(cidr, config.last_octet);
        let hostname = if config.hostname.is_empty() {
            config.name.clone()
        } else {
            config.hostname.clone()
        };

        let mut node = Node::new(
            id.clone(),
            config.name.clone(),
            NodeSpec::Host(HostSpec {
                hostname,
                os: config.os.clone(),
                ami: config.ami.clone(),
                instance_size: config.instance_size.clone(),
                disk_size: config.disk_size,
                address: address.clone(),
                exposed_tcp_ports: config.exposed_tcp_ports.clone(),
                exposed_udp_ports: config.exposed_udp_ports.clone(),
                override_password: config.override_password.clone(),
                user_groups: config.user_groups.clone(),
            }),
        );
        node.vars = config.vars.clone();
        node.tags = config.tags.clone();
        node.scope_vars = scope(parent, &config.vars);

        for connection in &config.connections {
            node.children.push(Self::connection(
                format!("{id}/connections/{}", connection.name),
                connection,
                address.clone(),
                &node.scope_vars,
            ));
        }

        for record in &config.dns {
            node.children.push(Self::dns_record(
                format!("{id}/dns/{}", record.name),
                record,
                &node.scope_vars,
            ));
        }

        let mut steps: Vec<&StepConfig> = config.steps.iter().collect();
        steps.sort_by_key(|s| s.step);
        for step in steps {
            node.children.push(self.step(
                format!("{id}/steps/{}", step.step),
                step,
                &node.scope_vars,
            ));
        }
        node
    }

    fn connection(
        id: String,
        config: &ConnectionConfig,
        address: Option<String>,
        parent: &HashMap<String, String>,
    ) -> Node {
        let port = config.port.unwrap_or(match config.protocol {
            ConnectionProtocol::Ssh => 22,
            ConnectionProtocol::Winrm => 5985,
        });
        let mut node = Node::new(
            id,
            config.name.clone(),
            NodeSpec::Connection {
                protocol: config.protocol,
                address,
                port,
                user: config.user.clone(),
                bastion: config.bastion.clone(),
                timeout_secs: config.timeout_secs,
            },
        );
        node.scope_vars = parent.clone();
        node
    }

    fn dns_record(id: String, config: &DnsRecordConfig, parent: &HashMap<String, String>) -> Node {
        let mut node = Node::new(
            id,
            config.name.clone(),
            NodeSpec::DnsRecord {
                zone: config.zone.clone(),
                record_type: config.record_type.clone(),
                values: config.values.clone(),
                ttl: config.ttl,
                disabled: config.disabled,
            },
        );
        node.vars = config.vars.clone();
        node.scope_vars = scope(parent, &config.vars);
        node
    }

    fn step(&self, id: String, config: &StepConfig, parent: &HashMap<String, String>) -> Node {
        let payload = match (&config.script, &config.command) {
            (Some(script), _) => {
                let extension = match (self.platform, script.interpreter.as_deref()) {
                    (_, Some("powershell" | "pwsh")) | (Platform::Windows, None) => "ps1",
                    _ => "sh",
                };
                StepPayload::Script {
                    source: script.source.clone(),
                    content: script.content.clone(),
                    interpreter: script.interpreter.clone(),
                    args: script.args.clone(),
                    remote_path: self.platform.join(
                        self.platform.scratch_dir(),
                        &format!("rangeforge-step-{}.{extension}", config.step),
                    ),
                    ignore_errors: script.ignore_errors,
                }
            }
            (None, Some(command)) => StepPayload::Command {
                program: command.program.clone(),
                args: command.args.clone(),
                cwd: command.cwd.clone(),
                ignore_errors: command.ignore_errors,
            },
            // Rejected by validation; an empty command keeps the tree total.
            (None, None) => StepPayload::Command {
                program: String::new(),
                args: Vec::new(),
                cwd: None,
                ignore_errors: false,
            },
        };

        let mut node = Node::new(
            id,
            config.step.to_string(),
            NodeSpec::ProvisioningStep {
                step: config.step,
                payload,
            },
        );
        node.vars = config.vars.clone();
        node.scope_vars = scope(parent, &config.vars);
        node
    }
}

fn scope(parent: &HashMap<String, String>, own: &HashMap<String, String>) -> HashMap<String, String> {
    let mut merged = parent.clone();
    merged.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::topology::NodeKind;

    const TOPOLOGY: &str = r#"
environment:
  id: regionals
  team_count: 2
  vars:
    season: fall
competition:
  id: cptc
  records:
    - name: scoreboard
      values: ["10.0.0.5"]
amis:
  - id: kali
    maintainer:
      id: alex
users:
  - id: ops
networks:
  - name: corp
    cidr: 10.0.1.0/24
    vars:
      domain: corp.local
    hosts:
      - name: dc01
        os: w2k16
        last_octet: 10
        vars:
          season: winter
        connections:
          - name: mgmt
            protocol: winrm
        steps:
          - step: 2
            command:
              program: shutdown
          - step: 1
            script:
              content: "Install-WindowsFeature AD-Domain-Services"
              interpreter: powershell
"#;

    fn tree() -> Node {
        let config = ConfigParser::new()
            .parse_yaml(TOPOLOGY, None)
            .expect("topology parses");
        TopologyBuilder::new(Platform::Unix).build(&config)
    }

    #[test]
    fn test_networks_are_instantiated_per_team() {
        let root = tree();
        let hosts: Vec<&str> = root
            .walk()
            .into_iter()
            .filter(|n| n.kind() == NodeKind::Host)
            .map(|n| n.id.as_str())
            .collect();

        assert_eq!(
            hosts,
            vec![
                "teams/0/networks/corp/hosts/dc01",
                "teams/1/networks/corp/hosts/dc01"
            ]
        );
    }

    #[test]
    fn test_steps_are_sorted_by_number() {
        let root = tree();
        let host = root
            .find("teams/0/networks/corp/hosts/dc01")
            .expect("host exists");
        let steps: Vec<u32> = host.children().iter().filter_map(Node::step_number).collect();
        assert_eq!(steps, vec![1, 2]);

        let first = root
            .find("teams/0/networks/corp/hosts/dc01/steps/1")
            .expect("step exists");
        match &first.spec {
            NodeSpec::ProvisioningStep {
                payload: StepPayload::Script { remote_path, .. },
                ..
            } => assert_eq!(remote_path, "/tmp/rangeforge-step-1.ps1"),
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn test_host_address_and_connection_port() {
        let root = tree();
        let conn = root
            .find("teams/1/networks/corp/hosts/dc01/connections/mgmt")
            .expect("connection exists");
        match &conn.spec {
            NodeSpec::Connection { address, port, .. } => {
                assert_eq!(address.as_deref(), Some("10.0.1.10"));
                assert_eq!(*port, 5985);
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn test_scope_vars_overlay_ancestors() {
        let root = tree();
        let host = root
            .find("teams/1/networks/corp/hosts/dc01")
            .expect("host exists");

        assert_eq!(host.scope_vars.get("season").map(String::as_str), Some("winter"));
        assert_eq!(host.scope_vars.get("domain").map(String::as_str), Some("corp.local"));
        assert_eq!(host.scope_vars.get("team_number").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_environment_children() {
        let root = tree();
        assert!(root.find("competition/dns/scoreboard").is_some());
        assert!(root.find("amis/kali/maintainer").is_some());
        assert!(root.find("users/ops").is_some());
        assert_eq!(root.id, "regionals");
    }
}
