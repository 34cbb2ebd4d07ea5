//! Typed request configuration.
//!
//! Replaces the "dynamic option bag" pattern (a `HashMap<String, Value>` of
//! loosely-typed knobs) with an enumerated, validated struct. Unknown keys
//! have nowhere to go — a caller mistyping `top_k` as `topk` gets a compile
//! error, not a silently ignored field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{LlmError, Result};

/// Per-request generation options. All fields are optional; a provider
/// adapter applies its own defaults for anything left `None` and silently
/// drops options it doesn't support (per spec.md's stated tolerance for
/// provider capability gaps — unsupported *models* are an error, unsupported
/// *options* on a supported model are not).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    pub stream: Option<bool>,
    pub tool_choice: Option<ToolChoice>,
    pub reasoning: Option<Reasoning>,
    pub response_format: Option<ResponseFormat>,
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub logit_bias: BTreeMap<String, f32>,
    pub service_tier: Option<String>,
}

impl RequestOptions {
    /// Range and consistency checks that don't depend on a specific
    /// provider. Provider adapters may layer additional checks (e.g.
    /// Anthropic requiring `max_tokens`) on top of this.
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(LlmError::ConfigValidation {
                    field: "temperature".into(),
                    reason: format!("must be between 0.0 and 2.0, got {t}"),
                });
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(LlmError::ConfigValidation {
                    field: "top_p".into(),
                    reason: format!("must be between 0.0 and 1.0, got {p}"),
                });
            }
        }
        if let Some(0) = self.max_tokens {
            return Err(LlmError::ConfigValidation {
                field: "max_tokens".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if let Reasoning::Budget { budget_tokens } = self.reasoning.unwrap_or(Reasoning::Off) {
            if budget_tokens == 0 {
                return Err(LlmError::ConfigValidation {
                    field: "reasoning.budget_tokens".into(),
                    reason: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }
}

/// How the model should decide whether and what to call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    ByName { name: String },
}

/// Extended-thinking configuration. `Budget` and `Effort` are mutually
/// exclusive provider families (Anthropic-style token budgets vs. OpenAI
/// `o`-series effort levels); an adapter ignores whichever shape it doesn't
/// speak rather than erroring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Reasoning {
    Off,
    Budget { budget_tokens: u32 },
    Effort { effort: ReasoningEffort },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

/// Requested output shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonSchema { name: String, schema: Value, strict: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_temperature() {
        let opts = RequestOptions { temperature: Some(2.5), ..Default::default() };
        let err = opts.validate().unwrap_err();
        assert!(matches!(err, LlmError::ConfigValidation { field, .. } if field == "temperature"));
    }

    #[test]
    fn rejects_zero_max_tokens() {
        let opts = RequestOptions { max_tokens: Some(0), ..Default::default() };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn accepts_defaults() {
        assert!(RequestOptions::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_budget_tokens() {
        let opts = RequestOptions {
            reasoning: Some(Reasoning::Budget { budget_tokens: 0 }),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }
}
