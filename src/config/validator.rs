//! Topology validation.
//!
//! This module validates a parsed topology before any node is built:
//! names must be usable as path segments, names must be unique within their
//! namespace, and step numbering must define a total order per host.

use crate::error::{ConfigError, ForgeError, Result};
use crate::topology::NodeKind;
use std::collections::HashSet;
use tracing::debug;

use super::spec::{
    BuildSettings, DnsRecordConfig, HostConfig, NetworkConfig, StepConfig, TopologyConfig,
};

/// Validator for topology files.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a topology.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, config: &TopologyConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_environment(config, &mut result);
        Self::validate_settings(&config.settings, &mut result);
        Self::validate_globals(config, &mut result);
        Self::validate_networks(&config.networks, &mut result);

        if result.errors.is_empty() {
            debug!("Topology validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(ForgeError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    fn validate_environment(config: &TopologyConfig, result: &mut ValidationResult) {
        let env = &config.environment;
        check_name(&env.id, "environment.id", result);

        if env.team_count == 0 {
            result.errors.push(ValidationError {
                field: String::from("environment.team_count"),
                message: String::from("Team count must be at least 1"),
            });
        }

        if config.networks.is_empty() {
            result
                .warnings
                .push(String::from("No networks defined in topology"));
        }
    }

    fn validate_settings(settings: &BuildSettings, result: &mut ValidationResult) {
        if settings.workers == 0 {
            result.errors.push(ValidationError {
                field: String::from("settings.workers"),
                message: String::from("Worker count must be at least 1"),
            });
        }

        if settings.retry.max_attempts == 0 {
            result.errors.push(ValidationError {
                field: String::from("settings.retry.max_attempts"),
                message: String::from("Retry attempts must be at least 1"),
            });
        }

        if settings.retry.initial_backoff_ms > settings.retry.max_backoff_ms {
            result.warnings.push(String::from(
                "settings.retry: initial backoff exceeds max backoff and will be capped",
            ));
        }

        for kind in settings.hooks.keys() {
            if NodeKind::from_name(kind).is_none() {
                result.errors.push(ValidationError {
                    field: format!("settings.hooks.{kind}"),
                    message: format!("Unknown node kind '{kind}' in hooks"),
                });
            }
        }
    }

    fn validate_globals(config: &TopologyConfig, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for (i, remote) in config.remote_states.iter().enumerate() {
            let field = format!("remote_states[{i}].id");
            check_name(&remote.id, &field, result);
            check_unique(&mut seen, &remote.id, "remote state", &field, result);
        }

        let mut seen = HashSet::new();
        for (i, ami) in config.amis.iter().enumerate() {
            let field = format!("amis[{i}].id");
            check_name(&ami.id, &field, result);
            check_unique(&mut seen, &ami.id, "ami", &field, result);
            if let Some(maintainer) = &ami.maintainer {
                check_name(&maintainer.id, &format!("amis[{i}].maintainer.id"), result);
            }
        }

        let mut seen = HashSet::new();
        for (i, user) in config.users.iter().enumerate() {
            let field = format!("users[{i}].id");
            check_name(&user.id, &field, result);
            check_unique(&mut seen, &user.id, "user", &field, result);
        }

        if let Some(competition) = &config.competition {
            check_name(&competition.id, "competition.id", result);
            Self::validate_records(&competition.records, "competition.records", result);
        }
    }

    fn validate_networks(networks: &[NetworkConfig], result: &mut ValidationResult) {
        let mut seen_networks = HashSet::new();
        let mut seen_cidrs = HashSet::new();

        for (i, network) in networks.iter().enumerate() {
            let prefix = format!("networks[{i}]");
            check_name(&network.name, &format!("{prefix}.name"), result);
            check_unique(
                &mut seen_networks,
                &network.name,
                "network",
                &format!("{prefix}.name"),
                result,
            );

            if !seen_cidrs.insert(network.cidr.as_str()) {
                result.warnings.push(format!(
                    "{prefix}.cidr: {} overlaps another network",
                    network.cidr
                ));
            }

            if network.hosts.is_empty() {
                result
                    .warnings
                    .push(format!("{prefix}: network '{}' has no hosts", network.name));
            }

            let mut seen_hosts = HashSet::new();
            let mut seen_octets = HashSet::new();
            for (j, host) in network.hosts.iter().enumerate() {
                let host_prefix = format!("{prefix}.hosts[{j}]");
                check_unique(
                    &mut seen_hosts,
                    &host.name,
                    "host",
                    &format!("{host_prefix}.name"),
                    result,
                );
                if !seen_octets.insert(host.last_octet) {
                    result.errors.push(ValidationError {
                        field: format!("{host_prefix}.last_octet"),
                        message: format!(
                            "Address .{} is used twice in network {}",
                            host.last_octet, network.name
                        ),
                    });
                }
                Self::validate_host(host, &host_prefix, result);
            }
        }
    }

    fn validate_host(host: &HostConfig, prefix: &str, result: &mut ValidationResult) {
        check_name(&host.name, &format!("{prefix}.name"), result);

        if host.os.is_empty() {
            result.errors.push(ValidationError {
                field: format!("{prefix}.os"),
                message: format!("Host '{}' has no operating system", host.name),
            });
        }

        if host.connections.is_empty() && !host.steps.is_empty() {
            result.warnings.push(format!(
                "{prefix}: host '{}' has provisioning steps but no connection",
                host.name
            ));
        }

        let mut seen = HashSet::new();
        for (i, connection) in host.connections.iter().enumerate() {
            let field = format!("{prefix}.connections[{i}].name");
            check_name(&connection.name, &field, result);
            check_unique(&mut seen, &connection.name, "connection", &field, result);
        }

        Self::validate_records(&host.dns, &format!("{prefix}.dns"), result);
        Self::validate_steps(&host.steps, prefix, result);
    }

    fn validate_records(records: &[DnsRecordConfig], prefix: &str, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for (i, record) in records.iter().enumerate() {
            let field = format!("{prefix}[{i}]");
            check_name(&record.name, &format!("{field}.name"), result);
            check_unique(&mut seen, &record.name, "dns record", &format!("{field}.name"), result);

            if record.values.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{field}.values"),
                    message: format!("DNS record '{}' has no values", record.name),
                });
            }
            if record.zone.is_empty() {
                result.warnings.push(format!(
                    "{field}.zone: record '{}' has no zone and will use the root domain",
                    record.name
                ));
            }
        }
    }

    fn validate_steps(steps: &[StepConfig], prefix: &str, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for (i, step) in steps.iter().enumerate() {
            let field = format!("{prefix}.steps[{i}]");

            if step.step == 0 {
                result.errors.push(ValidationError {
                    field: format!("{field}.step"),
                    message: String::from("Step numbers start at 1"),
                });
            }
            if !seen.insert(step.step) {
                result.errors.push(ValidationError {
                    field: format!("{field}.step"),
                    message: format!("Duplicate step number {}", step.step),
                });
            }

            match (&step.script, &step.command) {
                (Some(_), Some(_)) => result.errors.push(ValidationError {
                    field: field.clone(),
                    message: String::from("A step carries either a script or a command, not both"),
                }),
                (None, None) => result.errors.push(ValidationError {
                    field: field.clone(),
                    message: String::from("A step needs a script or a command"),
                }),
                (Some(script), None) if script.content.is_empty() && script.source.is_empty() => {
                    result.errors.push(ValidationError {
                        field: format!("{field}.script"),
                        message: String::from("Script has neither content nor source"),
                    });
                }
                (None, Some(command)) if command.program.is_empty() => {
                    result.errors.push(ValidationError {
                        field: format!("{field}.command.program"),
                        message: String::from("Command program cannot be empty"),
                    });
                }
                _ => {}
            }
        }
    }
}

/// Checks that a name is usable as a single path segment.
fn check_name(name: &str, field: &str, result: &mut ValidationResult) {
    if name.is_empty() {
        result.errors.push(ValidationError {
            field: field.to_string(),
            message: String::from("Name cannot be empty"),
        });
    } else if !is_valid_name(name) {
        result.errors.push(ValidationError {
            field: field.to_string(),
            message: format!(
                "Name '{name}' is invalid. Use letters, digits, '-', '_' or '.', not starting with '.'"
            ),
        });
    }
}

fn check_unique<'a>(
    seen: &mut HashSet<&'a str>,
    name: &'a str,
    resource_type: &str,
    field: &str,
    result: &mut ValidationResult,
) {
    if !seen.insert(name) {
        result.errors.push(ValidationError {
            field: field.to_string(),
            message: format!("Duplicate {resource_type} name: {name}"),
        });
    }
}

/// Checks if a name is a safe path segment.
fn is_valid_name(name: &str) -> bool {
    !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

impl ValidationResult {
    /// Returns true if validation passed.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}
