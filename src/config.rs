//! Runtime defaults shared by the builders

use serde::{Deserialize, Serialize};

use crate::context::ContextSharing;
use crate::error::AgentError;

/// Defaults adopted by builders through `.config(&RuntimeConfig)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Model calls allowed per agent run
    pub max_turns: u32,
    /// Discussion rounds for networks
    pub max_rounds: u32,
    /// Child context policy for supervisor workers
    pub context_sharing: ContextSharing,
    pub temperature: Option<f64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_rounds: 2,
            context_sharing: ContextSharing::StateOnly,
            temperature: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a JSON config. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, AgentError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| AgentError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        validate_max_turns(self.max_turns)?;
        validate_max_rounds(self.max_rounds)?;
        validate_temperature(self.temperature)
    }
}

pub(crate) fn validate_max_turns(max_turns: u32) -> Result<(), AgentError> {
    if max_turns == 0 {
        return Err(AgentError::Configuration(
            "max_turns must be at least 1".into(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_max_rounds(max_rounds: u32) -> Result<(), AgentError> {
    if max_rounds == 0 {
        return Err(AgentError::Configuration(
            "max_rounds must be at least 1".into(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_temperature(temperature: Option<f64>) -> Result<(), AgentError> {
    match temperature {
        Some(t) if !(0.0..=2.0).contains(&t) => Err(AgentError::Configuration(format!(
            "temperature must be between 0.0 and 2.0, got {t}"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_turns, 10);
        assert_eq!(config.max_rounds, 2);
        assert_eq!(config.context_sharing, ContextSharing::StateOnly);
        assert!(config.temperature.is_none());
    }

    #[test]
    fn test_from_json_partial() {
        let config = RuntimeConfig::from_json(r#"{"max_turns": 4, "context_sharing": "forked"}"#)
            .unwrap();
        assert_eq!(config.max_turns, 4);
        assert_eq!(config.max_rounds, 2);
        assert_eq!(config.context_sharing, ContextSharing::Forked);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(matches!(
            RuntimeConfig::from_json(r#"{"max_turns": 0}"#),
            Err(AgentError::Configuration(_))
        ));
        assert!(RuntimeConfig::from_json(r#"{"temperature": 3.5}"#).is_err());
        assert!(RuntimeConfig::from_json("not json").is_err());
    }
}
