//! Topology configuration module.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `rangeforge.yaml`
//! - Validation of names, references and step ordering
//! - Engine settings (build root, workers, retry policy, hooks)

mod spec;
mod parser;
mod validator;

pub use spec::{
    AmiConfig, BuildSettings, CommandConfig, CompetitionConfig, ConnectionConfig,
    ConnectionProtocol, DnsConfig, DnsRecordConfig, EnvironmentConfig, HookConfig, HostConfig,
    NetworkConfig, Platform, RemoteStateConfig, RetrySettings, ScriptConfig, StepConfig,
    TopologyConfig, UserConfig,
};
pub use parser::{ConfigParser, DEFAULT_BUILD_ROOT, find_config_file};
pub use validator::{ConfigValidator, ValidationResult};
