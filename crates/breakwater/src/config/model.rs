// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::config::{BreakerConfig, IsolationStrategy, ThreadPoolConfig};
use crate::error::ConfigError;
use crate::fallback::FallbackRole;

/// Operator override that forces the degrade handler regardless of breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DegradeDirective {
    /// Calls go through the breaker.
    #[default]
    Unset,

    /// Every call is answered by the degrade handler. The breaker and the wrapped call are not touched.
    Open,
}

/// Everything known about one command key: switches, handler scripts, and breaker parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandModel {
    /// When `false` calls for the key pass straight through to the invoker.
    pub enabled: bool,
    /// Whether calls are forced into the degrade handler.
    pub directive: DegradeDirective,
    /// Source of the handler answering degraded calls.
    pub degrade_script: Option<String>,
    /// Source of the handler answering rejected and failed calls.
    pub fallback_script: Option<String>,
    /// Breaker parameters for the key.
    pub config: Arc<BreakerConfig>,
}

impl CommandModel {
    /// Parses a configuration document.
    ///
    /// Top-level fields are `enable`, `degrade`, `degradeScript`, `fallbackScript`, and a nested
    /// breaker section named `breakerConfig` (or `hystrixConfig`). Flags accept booleans, `1`/`0`
    /// and their string forms. A document without `enable` describes a disabled key.
    ///
    /// # Errors
    ///
    /// Returns an error when the text is not valid JSON or a field has the wrong type.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use breakwater::{CommandModel, DegradeDirective};
    ///
    /// let model = CommandModel::from_json(
    ///     r#"{
    ///         "enable": "1",
    ///         "degrade": "0",
    ///         "fallbackScript": "\"busy\"",
    ///         "breakerConfig": { "requestVolumeThreshold": 5, "isolationStrategy": "thread" }
    ///     }"#,
    /// )?;
    ///
    /// assert!(model.enabled);
    /// assert_eq!(model.directive, DegradeDirective::Unset);
    /// assert_eq!(model.config.request_volume_threshold, 5);
    /// # Ok::<(), breakwater::ConfigError>(())
    /// ```
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let document: CommandDocument = serde_json::from_str(text)?;
        Ok(document.into())
    }

    /// Returns the script configured for the given handler role, if any.
    #[must_use]
    pub fn script(&self, role: FallbackRole) -> Option<&str> {
        match role {
            FallbackRole::Degrade => self.degrade_script.as_deref(),
            FallbackRole::Fallback => self.fallback_script.as_deref(),
        }
    }
}

impl Default for CommandModel {
    /// The model of an unconfigured key: disabled, no override, no scripts, default parameters.
    fn default() -> Self {
        Self {
            enabled: false,
            directive: DegradeDirective::Unset,
            degrade_script: None,
            fallback_script: None,
            config: Arc::new(BreakerConfig::default()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CommandDocument {
    #[serde(deserialize_with = "flag")]
    enable: bool,
    #[serde(deserialize_with = "flag")]
    degrade: bool,
    degrade_script: Option<String>,
    fallback_script: Option<String>,
    #[serde(alias = "hystrixConfig")]
    breaker_config: Option<BreakerSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BreakerSection {
    #[serde(alias = "sleepWindowInMilliseconds")]
    sleep_window_ms: Option<u64>,
    #[serde(alias = "errorThresholdPercentage")]
    error_threshold_percent: Option<u32>,
    request_volume_threshold: Option<u32>,
    #[serde(alias = "executionIsolationStrategy")]
    isolation_strategy: Option<String>,
    #[serde(alias = "semaphoreMaxConcurrentRequests")]
    max_concurrent_requests: Option<u32>,
    #[serde(alias = "executionTimeoutInMilliseconds")]
    timeout_ms: Option<u64>,
    #[serde(alias = "executionTimeoutEnabled", deserialize_with = "optional_flag")]
    timeout_enabled: Option<bool>,
    #[serde(alias = "threadInterruptOnTimeout", deserialize_with = "optional_flag")]
    interrupt_on_timeout: Option<bool>,
    #[serde(alias = "fallbackSemaphoreMaxConcurrentRequests")]
    fallback_max_concurrent_requests: Option<u32>,
    core_size: Option<u32>,
    maximum_size: Option<u32>,
    max_queue_size: Option<i32>,
}

impl From<CommandDocument> for CommandModel {
    fn from(document: CommandDocument) -> Self {
        Self {
            enabled: document.enable,
            directive: if document.degrade {
                DegradeDirective::Open
            } else {
                DegradeDirective::Unset
            },
            degrade_script: non_blank(document.degrade_script),
            fallback_script: non_blank(document.fallback_script),
            config: Arc::new(document.breaker_config.map(BreakerConfig::from).unwrap_or_default()),
        }
    }
}

impl From<BreakerSection> for BreakerConfig {
    fn from(section: BreakerSection) -> Self {
        let defaults = Self::default();

        Self {
            sleep_window: section
                .sleep_window_ms
                .map_or(defaults.sleep_window, Duration::from_millis),
            error_threshold_percent: section
                .error_threshold_percent
                .map_or(defaults.error_threshold_percent, |v| v.min(100)),
            request_volume_threshold: section
                .request_volume_threshold
                .unwrap_or(defaults.request_volume_threshold),
            isolation_strategy: section
                .isolation_strategy
                .as_deref()
                .map_or(defaults.isolation_strategy, IsolationStrategy::from_name),
            max_concurrent_requests: section
                .max_concurrent_requests
                .unwrap_or(defaults.max_concurrent_requests),
            timeout: section.timeout_ms.map_or(defaults.timeout, Duration::from_millis),
            timeout_enabled: section.timeout_enabled.unwrap_or(defaults.timeout_enabled),
            interrupt_on_timeout: section.interrupt_on_timeout.unwrap_or(defaults.interrupt_on_timeout),
            fallback_max_concurrent_requests: section
                .fallback_max_concurrent_requests
                .unwrap_or(defaults.fallback_max_concurrent_requests),
            thread_pool: ThreadPoolConfig {
                core_size: section.core_size.unwrap_or(defaults.thread_pool.core_size),
                maximum_size: section.maximum_size.unwrap_or(defaults.thread_pool.maximum_size),
                max_queue_size: section.max_queue_size.unwrap_or(defaults.thread_pool.max_queue_size),
            },
        }
    }
}

fn non_blank(script: Option<String>) -> Option<String> {
    script.filter(|s| !s.trim().is_empty())
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    parse_flag(&value).ok_or_else(|| D::Error::custom(format!("expected a flag, found {value}")))
}

fn optional_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    flag(deserializer).map(Some)
}

fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Null => Some(false),
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_i64() == Some(1)),
        Value::String(s) => {
            let s = s.trim();
            Some(s == "1" || s.eq_ignore_ascii_case("true"))
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}
