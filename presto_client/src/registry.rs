//! Process-wide registry of caller-supplied HTTP clients.
//!
//! A DSN selects one of these with `custom_client=<key>`; keys that parse as
//! booleans are reserved so they can never collide with flag-style DSN
//! parameters.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::{Error, Result};

static REGISTRY: Lazy<RwLock<HashMap<String, reqwest::Client>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a custom `reqwest::Client` under `key` for later selection via
/// the `custom_client` DSN parameter. Re-registering a key replaces the
/// previous client.
pub fn register_custom_client(key: &str, client: reqwest::Client) -> Result<()> {
    if parses_as_bool(key) {
        return Err(Error::Config(format!(
            "custom client key {key:?} is reserved: it parses as a boolean"
        )));
    }
    REGISTRY.write().insert(key.to_owned(), client);
    Ok(())
}

/// Remove a previously registered client. Unknown keys are a no-op.
pub fn deregister_custom_client(key: &str) {
    REGISTRY.write().remove(key);
}

pub(crate) fn lookup(key: &str) -> Option<reqwest::Client> {
    REGISTRY.read().get(key).cloned()
}

/// The Go-style boolean alphabet: `1/t/T/TRUE/true/True` and friends.
pub(crate) fn parses_as_bool(s: &str) -> bool {
    matches!(
        s,
        "1" | "t" | "T" | "TRUE" | "true" | "True" | "0" | "f" | "F" | "FALSE" | "false" | "False"
    )
}
