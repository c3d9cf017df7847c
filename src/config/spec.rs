//! Topology specification types.
//!
//! This module defines all the structs that map to the `rangeforge.yaml` file.
//! These types are declarative and fully describe the desired state of one
//! environment; the build settings for the engine live alongside them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The root structure of a topology file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopologyConfig {
    /// The environment being built.
    pub environment: EnvironmentConfig,
    /// Engine settings.
    #[serde(default)]
    pub settings: BuildSettings,
    /// Competition-wide definitions.
    #[serde(default)]
    pub competition: Option<CompetitionConfig>,
    /// Terraform remote state backends.
    #[serde(default)]
    pub remote_states: Vec<RemoteStateConfig>,
    /// Custom machine images.
    #[serde(default)]
    pub amis: Vec<AmiConfig>,
    /// Environment maintainers.
    #[serde(default)]
    pub users: Vec<UserConfig>,
    /// Networks, instantiated once per team.
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

/// Environment-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentConfig {
    /// Unique identifier of the environment.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Cloud builder used to realize the environment.
    #[serde(default = "default_builder")]
    pub builder: String,
    /// Administrative CIDRs allowed through the perimeter.
    #[serde(default)]
    pub admin_cidrs: Vec<String>,
    /// Number of identical team copies.
    #[serde(default = "default_team_count")]
    pub team_count: u32,
    /// Template variables.
    #[serde(default)]
    pub vars: HashMap<String, String>,
    /// Resource tags.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Competition-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompetitionConfig {
    /// Identifier.
    pub id: String,
    /// Hash of the default root password.
    #[serde(default)]
    pub root_password: String,
    /// DNS settings.
    #[serde(default)]
    pub dns: DnsConfig,
    /// Competition-wide DNS records.
    #[serde(default)]
    pub records: Vec<DnsRecordConfig>,
    /// Template variables.
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

/// DNS server settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsConfig {
    /// DNS provider type.
    #[serde(default, rename = "type")]
    pub dns_type: String,
    /// Root domain.
    #[serde(default)]
    pub root_domain: String,
    /// Upstream servers.
    #[serde(default)]
    pub dns_servers: Vec<String>,
    /// NTP servers.
    #[serde(default)]
    pub ntp_servers: Vec<String>,
}

/// A single DNS record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsRecordConfig {
    /// Record name (leaf label).
    pub name: String,
    /// Zone the record belongs to.
    #[serde(default)]
    pub zone: String,
    /// Record type (A, CNAME, ...).
    #[serde(default = "default_record_type", rename = "type")]
    pub record_type: String,
    /// Record values, in order.
    #[serde(default)]
    pub values: Vec<String>,
    /// Time to live in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    /// Whether the record is disabled.
    #[serde(default)]
    pub disabled: bool,
    /// Template variables.
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

/// Terraform remote state backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteStateConfig {
    /// Identifier.
    pub id: String,
    /// Backend type (s3, gcs, ...).
    #[serde(rename = "type")]
    pub backend_type: String,
    /// Backend configuration.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// A custom machine image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AmiConfig {
    /// Identifier.
    pub id: String,
    /// Image name.
    #[serde(default)]
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Image provider.
    #[serde(default)]
    pub provider: String,
    /// Login user baked into the image.
    #[serde(default)]
    pub username: String,
    /// Image maintainer.
    #[serde(default)]
    pub maintainer: Option<UserConfig>,
    /// Template variables.
    #[serde(default)]
    pub vars: HashMap<String, String>,
    /// Resource tags.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// A person responsible for part of the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserConfig {
    /// Identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Contact address.
    #[serde(default)]
    pub email: String,
}

/// A network, instantiated for every team.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Network name.
    pub name: String,
    /// Address range.
    pub cidr: String,
    /// Whether the network is reachable over VPN.
    #[serde(default)]
    pub vpn: bool,
    /// Hosts placed on this network.
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
    /// Template variables.
    #[serde(default)]
    pub vars: HashMap<String, String>,
    /// Resource tags.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// A host on a network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostConfig {
    /// Host name (unique within its network).
    pub name: String,
    /// Hostname presented by the machine.
    #[serde(default)]
    pub hostname: String,
    /// Operating system identifier.
    pub os: String,
    /// Image the host boots from.
    #[serde(default)]
    pub ami: Option<String>,
    /// Instance size.
    #[serde(default)]
    pub instance_size: String,
    /// Disk size in GB.
    #[serde(default = "default_disk_size")]
    pub disk_size: u32,
    /// Last octet of the host address within the network.
    pub last_octet: u8,
    /// TCP ports exposed outside the network.
    #[serde(default)]
    pub exposed_tcp_ports: Vec<String>,
    /// UDP ports exposed outside the network.
    #[serde(default)]
    pub exposed_udp_ports: Vec<String>,
    /// Password override for this host.
    #[serde(default)]
    pub override_password: Option<String>,
    /// Groups the host belongs to.
    #[serde(default)]
    pub user_groups: Vec<String>,
    /// Management connections.
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    /// DNS records pointing at this host.
    #[serde(default)]
    pub dns: Vec<DnsRecordConfig>,
    /// Ordered provisioning steps.
    #[serde(default)]
    pub steps: Vec<StepConfig>,
    /// Template variables.
    #[serde(default)]
    pub vars: HashMap<String, String>,
    /// Resource tags.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// A management connection to a host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Connection name (unique within its host).
    pub name: String,
    /// Transport used to reach the host.
    pub protocol: ConnectionProtocol,
    /// Port to connect to.
    #[serde(default)]
    pub port: Option<u16>,
    /// Login user.
    #[serde(default)]
    pub user: String,
    /// Whether the connection goes through a bastion.
    #[serde(default)]
    pub bastion: Option<String>,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub timeout_secs: u32,
}

/// Supported management transports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionProtocol {
    /// Secure shell.
    #[default]
    Ssh,
    /// Windows remote management.
    Winrm,
}

/// A provisioning step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepConfig {
    /// Step number; steps run in ascending order.
    pub step: u32,
    /// Script payload.
    #[serde(default)]
    pub script: Option<ScriptConfig>,
    /// Command payload.
    #[serde(default)]
    pub command: Option<CommandConfig>,
    /// Template variables.
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

/// A script uploaded to and executed on the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptConfig {
    /// Path of the script source, relative to the topology file.
    #[serde(default)]
    pub source: String,
    /// Script body; loaded from `source` when left empty.
    #[serde(default)]
    pub content: String,
    /// Interpreter used to run the script.
    #[serde(default)]
    pub interpreter: Option<String>,
    /// Arguments passed to the script.
    #[serde(default)]
    pub args: Vec<String>,
    /// Whether a non-zero exit is tolerated.
    #[serde(default)]
    pub ignore_errors: bool,
}

/// A one-off command run on the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandConfig {
    /// Program to execute.
    pub program: String,
    /// Arguments, in order.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory on the host.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Whether a non-zero exit is tolerated.
    #[serde(default)]
    pub ignore_errors: bool,
}

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildSettings {
    /// Directory that holds the revision records.
    #[serde(default)]
    pub build_root: Option<String>,
    /// Maximum number of nodes applied concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Path convention of the provisioned hosts.
    #[serde(default)]
    pub platform: Platform,
    /// Retry policy for collaborator calls.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Shell hooks per node kind (keyed by kind name, e.g. `host`).
    #[serde(default)]
    pub hooks: HashMap<String, HookConfig>,
}

/// Remote path convention.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// POSIX paths.
    #[default]
    Unix,
    /// Windows paths.
    Windows,
}

/// Retry and backoff parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    /// Maximum attempts per call.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for the backoff delay in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Overall deadline per call in seconds.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

/// Shell commands run by the hook collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HookConfig {
    /// Command realizing or updating a node.
    pub apply: String,
    /// Command removing a node.
    #[serde(default)]
    pub destroy: Option<String>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            build_root: None,
            workers: default_workers(),
            platform: Platform::default(),
            retry: RetrySettings::default(),
            hooks: HashMap::new(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl TopologyConfig {
    /// Returns the total number of hosts across all teams.
    #[must_use]
    pub fn total_hosts(&self) -> usize {
        let per_team: usize = self.networks.iter().map(|n| n.hosts.len()).sum();
        per_team * self.environment.team_count as usize
    }
}

impl Platform {
    /// Joins remote path segments using this platform's separator.
    #[must_use]
    pub fn join(self, base: &str, leaf: &str) -> String {
        let sep = match self {
            Self::Unix => '/',
            Self::Windows => '\\',
        };
        let trimmed = base.trim_end_matches(['/', '\\']);
        format!("{trimmed}{sep}{leaf}")
    }

    /// Default scratch directory for uploaded scripts.
    #[must_use]
    pub const fn scratch_dir(self) -> &'static str {
        match self {
            Self::Unix => "/tmp",
            Self::Windows => "C:\\Windows\\Temp",
        }
    }
}

impl std::fmt::Display for ConnectionProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ssh => "ssh",
            Self::Winrm => "winrm",
        };
        write!(f, "{s}")
    }
}

// Default value functions

fn default_builder() -> String {
    String::from("tf_aws")
}

const fn default_team_count() -> u32 {
    1
}

fn default_record_type() -> String {
    String::from("A")
}

const fn default_ttl() -> u32 {
    300
}

const fn default_disk_size() -> u32 {
    30
}

const fn default_connect_timeout() -> u32 {
    300
}

const fn default_workers() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

const fn default_deadline_secs() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_join() {
        assert_eq!(Platform::Unix.join("/tmp/", "step.sh"), "/tmp/step.sh");
        assert_eq!(
            Platform::Windows.join(Platform::Windows.scratch_dir(), "step.ps1"),
            "C:\\Windows\\Temp\\step.ps1"
        );
    }

    #[test]
    fn test_default_settings() {
        let settings = BuildSettings::default();
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.retry.max_attempts, 3);
        assert!(settings.hooks.is_empty());
    }
}
