// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Compiled fallback and degrade handlers.

mod cache;
mod script;

pub(crate) use cache::FallbackCache;
pub use cache::FallbackCacheOptions;
pub(crate) use script::UnsupportedRuntime;
pub use script::{CompiledHandler, FallbackRole, Fingerprint, JsonLiteralRuntime, ScriptRuntime};
