//! Deterministic content hashing.

use sha2::{Digest, Sha256};

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn update_field(hasher: &mut Sha256, field: &str) {
    // Length prefix keeps ("ab","c") and ("a","bc") apart.
    hasher.update((field.len() as u64).to_be_bytes());
    hasher.update(field.as_bytes());
}

/// Hash of a node's identity-bearing content.
///
/// Dependencies are sorted first, so the caller's ordering does not matter.
pub fn content_hash(node_type: &str, statement: &str, inference: &str, deps: &[String]) -> String {
    let mut sorted: Vec<&str> = deps.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    update_field(&mut hasher, node_type);
    update_field(&mut hasher, statement);
    update_field(&mut hasher, inference);
    hasher.update((sorted.len() as u64).to_be_bytes());
    for dep in sorted {
        update_field(&mut hasher, dep);
    }
    format!("{:x}", hasher.finalize())
}
