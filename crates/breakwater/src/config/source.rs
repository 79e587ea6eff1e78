// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{self, BoxFuture};

use crate::error::SourceError;

/// Key/value store holding one JSON configuration document per command key.
///
/// The store is polled by the refresh loop and never pushes changes. Returning `Ok(None)` means
/// the key has no configuration.
pub trait ConfigSource: Debug + Send + Sync + 'static {
    /// Fetches the document stored under `key`.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, SourceError>>;
}

/// A [`ConfigSource`] backed by a concurrent in-memory map.
///
/// Clones share the same documents, so a clone handed to the registry observes later updates.
///
/// # Examples
///
/// ```rust
/// use breakwater::InMemoryConfigSource;
///
/// let source = InMemoryConfigSource::new();
/// source.insert("com.example.Greeter.sayHi#String", r#"{"enable": "1"}"#);
/// assert_eq!(source.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryConfigSource {
    documents: Arc<DashMap<String, String>>,
}

impl InMemoryConfigSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `document` under `key`, replacing any previous document.
    pub fn insert(&self, key: impl Into<String>, document: impl Into<String>) {
        self.documents.insert(key.into(), document.into());
    }

    /// Removes the document stored under `key`, returning it if present.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.documents.remove(key).map(|(_, document)| document)
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns `true` when no document is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl ConfigSource for InMemoryConfigSource {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, SourceError>> {
        let document = self.documents.get(key).map(|document| document.value().clone());
        Box::pin(future::ready(Ok(document)))
    }
}

/// A source without any documents. Used when no store is configured.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EmptyConfigSource;

impl ConfigSource for EmptyConfigSource {
    fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<Option<String>, SourceError>> {
        Box::pin(future::ready(Ok(None)))
    }
}
