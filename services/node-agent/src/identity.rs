//! Node identity resolution.
//!
//! Camera nodes are named `picamXX` where `XX` is a two-digit node number.
//! Any other name falls back to [`DEFAULT_NODE_NUMBER`].

use tracing::{debug, warn};

/// Node number used when the name does not follow the convention.
pub const DEFAULT_NODE_NUMBER: u32 = 3;

const NODE_NAME_PREFIX: &str = "picam";

/// Derive the node number from a host-name hint.
pub fn resolve_node_number(hint: &str) -> u32 {
    let Some(digits) = hint.strip_prefix(NODE_NAME_PREFIX) else {
        return DEFAULT_NODE_NUMBER;
    };

    if digits.len() != 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return DEFAULT_NODE_NUMBER;
    }

    digits.parse().unwrap_or(DEFAULT_NODE_NUMBER)
}

/// Local host name, if it can be read and is valid UTF-8.
pub fn local_hostname() -> Option<String> {
    match hostname::get() {
        Ok(name) => {
            let name = name.into_string().ok();
            debug!(hostname = ?name, "Read local hostname");
            name
        }
        Err(e) => {
            warn!(error = %e, "Failed to read local hostname");
            None
        }
    }
}
