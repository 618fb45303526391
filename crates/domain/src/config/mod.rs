mod orchestration;
mod providers;
mod restart;
mod server;
mod sessions;
mod tools;
mod workspace;

pub use orchestration::*;
pub use providers::*;
pub use restart::*;
pub use server::*;
pub use sessions::*;
pub use tools::*;
pub use workspace::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub providers: Vec<ProviderProfile>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub restart: RestartConfig,
}

impl Config {
    /// Load the config from a TOML file.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| crate::Error::Config(format!("{}: {e}", path.display())))
    }

    /// Validate cross-field constraints. Errors should abort startup;
    /// warnings are logged and tolerated.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let mut seen = HashSet::new();
        for profile in &self.providers {
            if profile.id.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    message: "provider profile with empty id".into(),
                });
            }
            if !seen.insert(profile.id.clone()) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    message: format!("duplicate provider profile id '{}'", profile.id),
                });
            }
            if profile.model.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    message: format!("provider '{}' has no model set", profile.id),
                });
            }
        }

        for route in &self.routes {
            for pid in std::iter::once(&route.primary_provider_id)
                .chain(route.fallback_provider_ids.iter())
            {
                if !seen.contains(pid) {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Error,
                        message: format!(
                            "route '{}' references unknown provider '{pid}'",
                            route.id
                        ),
                    });
                }
            }
        }

        if self.orchestration.cap == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "orchestration.cap must be at least 1".into(),
            });
        }

        if self.server.mutation_rate_per_minute == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "server.mutation_rate_per_minute is 0 -- all mutations will be rejected"
                    .into(),
            });
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        let errors: Vec<_> = config
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn duplicate_provider_id_rejected() {
        let mut config = Config::default();
        config.providers.push(ProviderProfile::named("p1"));
        config.providers.push(ProviderProfile::named("p1"));
        assert!(config
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("duplicate")));
    }

    #[test]
    fn route_with_unknown_provider_rejected() {
        let mut config = Config::default();
        config.providers.push(ProviderProfile::named("real"));
        config.routes.push(RouteConfig {
            id: "r1".into(),
            primary_provider_id: "ghost".into(),
            fallback_provider_ids: vec![],
        });
        assert!(config
            .validate()
            .iter()
            .any(|i| i.message.contains("unknown provider 'ghost'")));
    }

    #[test]
    fn minimal_toml_parses() {
        let raw = r#"
            [server]
            port = 4000

            [[providers]]
            id = "main"
            kind = "openai_compat"
            model = "gpt-test"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.providers[0].id, "main");
    }
}
