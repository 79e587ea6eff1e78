// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::Ordering;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::constants::{COMMA, HASH_TAG};

/// Identifies one remote call site: an interface, a method, and its parameter signature.
///
/// The canonical form is `Interface.method#Type1,Type2`. Methods without parameters have no
/// suffix and render as `Interface.method`. Every piece of per-key state (breaker statistics,
/// configuration, isolation permits) is keyed by this value.
///
/// Keys are immutable and cheap to clone. Two keys are equal when their canonical forms are equal.
///
/// # Examples
///
/// ```rust
/// use breakwater::CommandKey;
///
/// let key = CommandKey::derive("com.example.Greeter", "sayHi", ["String", "int"]);
/// assert_eq!(key.as_str(), "com.example.Greeter.sayHi#String,int");
/// assert_eq!(key.command_name(), "sayHi#String,int");
/// assert_eq!(key.interface(), "com.example.Greeter");
///
/// let bare = CommandKey::derive("com.example.Greeter", "ping", Vec::<&str>::new());
/// assert_eq!(bare.as_str(), "com.example.Greeter.ping");
/// ```
#[derive(Debug, Clone)]
pub struct CommandKey {
    value: Arc<str>,
    // byte offset of the '.' that separates the interface from the method
    method_start: usize,
}

impl CommandKey {
    /// Derives the canonical key for a call site.
    ///
    /// Empty parameter type names are skipped.
    pub fn derive<I, S>(interface: &str, method: &str, param_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut value = String::with_capacity(interface.len() + method.len() + 16);
        value.push_str(interface);
        let method_start = value.len();
        value.push('.');
        value.push_str(method);
        append_param_types(&mut value, param_types);

        Self {
            value: Arc::from(value),
            method_start,
        }
    }

    /// Returns the full key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Returns the interface (group) part of the key.
    #[must_use]
    pub fn interface(&self) -> &str {
        &self.value[..self.method_start]
    }

    /// Returns the bare command key: method and parameter signature, without the interface.
    ///
    /// This is identical to what [`command_name`] produces for the same method and parameters.
    #[must_use]
    pub fn command_name(&self) -> &str {
        &self.value[self.method_start + 1..]
    }
}

/// Derives the bare command key `method#Type1,Type2` used to label isolation groups.
///
/// # Examples
///
/// ```rust
/// use breakwater::command_name;
///
/// assert_eq!(command_name("sayHi", ["String"]), "sayHi#String");
/// assert_eq!(command_name("ping", Vec::<String>::new()), "ping");
/// ```
pub fn command_name<I, S>(method: &str, param_types: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut value = String::from(method);
    append_param_types(&mut value, param_types);
    value
}

fn append_param_types<I, S>(buffer: &mut String, param_types: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut first = true;

    for param in param_types {
        let param = param.as_ref();
        if param.is_empty() {
            continue;
        }

        buffer.push(if first { HASH_TAG } else { COMMA });
        buffer.push_str(param);
        first = false;
    }
}

impl Display for CommandKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

impl PartialEq for CommandKey {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for CommandKey {}

impl Hash for CommandKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl PartialOrd for CommandKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CommandKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl AsRef<str> for CommandKey {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl From<&CommandKey> for String {
    fn from(value: &CommandKey) -> Self {
        value.value.to_string()
    }
}
