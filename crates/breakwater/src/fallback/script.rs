// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{Debug, Display};
use std::sync::Arc;

use serde_json::Value;

use crate::constants::HANDLER_METHOD;
use crate::error::{CompileError, ScriptError};

/// Content hash of a script's text.
///
/// Identical scripts have identical fingerprints no matter which command key configured them, so
/// they share one compiled handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u128);

impl Fingerprint {
    /// Computes the fingerprint of `source`.
    #[must_use]
    pub fn of(source: &str) -> Self {
        Self(xxhash_rust::xxh3::xxh3_128(source.as_bytes()))
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Which handler of a key is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackRole {
    /// Answers calls while the operator override is open.
    Degrade,

    /// Answers calls the breaker rejected or that failed.
    Fallback,
}

impl FallbackRole {
    /// Name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Degrade => "degrade",
            Self::Fallback => "fallback",
        }
    }
}

/// A script turned into something that can be invoked.
pub trait CompiledHandler: Debug + Send + Sync + 'static {
    /// Calls `method` on the handler with the original call arguments.
    ///
    /// # Errors
    ///
    /// Returns an error when the method does not exist or fails.
    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, ScriptError>;
}

/// Compiles fallback and degrade scripts.
///
/// The crate does not define a scripting language. Embedders plug in a runtime that understands
/// whatever language their scripts are written in. The dispatcher invokes the method named
/// `fallback` on every compiled handler.
pub trait ScriptRuntime: Debug + Send + Sync + 'static {
    /// Compiles `source`. The fingerprint may be used by the runtime as a cache or class name.
    ///
    /// # Errors
    ///
    /// Returns an error when the script cannot be compiled. The failure is remembered for the
    /// fingerprint until the cache entry expires.
    fn compile(&self, source: &str, fingerprint: &Fingerprint) -> Result<Arc<dyn CompiledHandler>, CompileError>;
}

/// A runtime for scripts that are JSON literals.
///
/// The compiled handler returns the literal from its `fallback` method. This covers static
/// fallback responses without any scripting engine.
///
/// # Examples
///
/// ```rust
/// use breakwater::{Fingerprint, JsonLiteralRuntime, ScriptRuntime};
///
/// let source = r#""Degraded""#;
/// let handler = JsonLiteralRuntime.compile(source, &Fingerprint::of(source))?;
///
/// assert_eq!(handler.invoke("fallback", &[])?, serde_json::json!("Degraded"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLiteralRuntime;

impl ScriptRuntime for JsonLiteralRuntime {
    fn compile(&self, source: &str, _fingerprint: &Fingerprint) -> Result<Arc<dyn CompiledHandler>, CompileError> {
        let value = serde_json::from_str(source).map_err(|e| CompileError::new(e.to_string()))?;
        Ok(Arc::new(LiteralHandler { value }))
    }
}

#[derive(Debug)]
struct LiteralHandler {
    value: Value,
}

impl CompiledHandler for LiteralHandler {
    fn invoke(&self, method: &str, _args: &[Value]) -> Result<Value, ScriptError> {
        if method == HANDLER_METHOD {
            Ok(self.value.clone())
        } else {
            Err(ScriptError::new(format!("no method named '{method}'")))
        }
    }
}

/// The runtime used when none is configured. Every script fails to compile, so keys with scripts
/// behave as if they had no handler.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UnsupportedRuntime;

impl ScriptRuntime for UnsupportedRuntime {
    fn compile(&self, _source: &str, _fingerprint: &Fingerprint) -> Result<Arc<dyn CompiledHandler>, CompileError> {
        Err(CompileError::new("no script runtime configured"))
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn fingerprint_depends_on_content_only() {
        assert_eq!(Fingerprint::of("return 1"), Fingerprint::of("return 1"));
        assert_ne!(Fingerprint::of("return 1"), Fingerprint::of("return 2"));
    }

    #[test]
    fn fingerprint_renders_as_fixed_width_hex() {
        let rendered = Fingerprint::of("").to_string();

        assert_eq!(rendered.len(), 32);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn json_literal_runtime() {
        let source = r#"{"code": 503, "items": []}"#;
        let handler = JsonLiteralRuntime.compile(source, &Fingerprint::of(source)).unwrap();

        assert_eq!(
            handler.invoke("fallback", &[json!("ignored")]).unwrap(),
            json!({"code": 503, "items": []})
        );
        assert!(handler.invoke("other", &[]).is_err());
    }

    #[test]
    fn json_literal_runtime_rejects_non_json() {
        let source = "def fallback() { 'x' }";
        let error = JsonLiteralRuntime.compile(source, &Fingerprint::of(source)).unwrap_err();

        assert!(error.to_string().starts_with("failed to compile fallback script"));
    }

    #[test]
    fn unsupported_runtime_never_compiles() {
        assert!(UnsupportedRuntime.compile("1", &Fingerprint::of("1")).is_err());
    }

    #[test]
    fn role_names() {
        assert_eq!(FallbackRole::Degrade.as_str(), "degrade");
        assert_eq!(FallbackRole::Fallback.as_str(), "fallback");
    }
}
