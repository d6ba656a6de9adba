//! Prefixed opaque identifier minting.
//!
//! Identifiers have the shape `{prefix}_{12 hex chars}`, e.g. `asm_a1b2c3d4e5f6`.

use rand::RngCore;

/// Generate a new identifier with the given prefix (`asm`, `fnd`, `log`, `tun`, `req`).
pub fn generate_id(prefix: &str) -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(12);
    for b in bytes {
        hex.push_str(&format!("{:02x}", b));
    }
    format!("{prefix}_{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_prefixed_id_of_expected_shape() {
        let id = generate_id("asm");
        assert!(id.starts_with("asm_"));
        assert_eq!(id.len(), "asm_".len() + 12);
        assert!(id["asm_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generates_distinct_ids() {
        let a = generate_id("fnd");
        let b = generate_id("fnd");
        assert_ne!(a, b);
    }
}
