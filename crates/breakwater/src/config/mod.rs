// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-key configuration: the parameter model, the in-memory snapshot, the store it is read
//! from, and the loop that keeps it current.

mod breaker_config;
mod model;
mod refresh;
mod snapshot;
mod source;

pub use breaker_config::{BreakerConfig, IsolationStrategy, ThreadPoolConfig};
pub use model::{CommandModel, DegradeDirective};
pub use refresh::{ConfigRefresher, RefreshReport};
pub use snapshot::ConfigSnapshot;
pub(crate) use source::EmptyConfigSource;
pub use source::{ConfigSource, InMemoryConfigSource};
