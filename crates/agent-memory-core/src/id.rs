//! Content-derived memory ids (spec §3, §9): identical normalized text plus
//! agent must yield the same id, so repeated writes of the same content are
//! dedup candidates by construction rather than by a secondary lookup.

/// Derive the stable id for a `(agent, normalized_text)` pair.
pub fn derive_memory_id(agent: &str, normalized_text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(agent.as_bytes());
    hasher.update(&[0u8]);
    hasher.update(normalized_text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_yields_same_id() {
        let a = derive_memory_id("main", "user prefers dark mode");
        let b = derive_memory_id("main", "user prefers dark mode");
        assert_eq!(a, b);
    }

    #[test]
    fn different_agent_yields_different_id() {
        let a = derive_memory_id("main", "same text");
        let b = derive_memory_id("other", "same text");
        assert_ne!(a, b);
    }

    #[test]
    fn no_agent_text_collision_across_boundary() {
        // "ab" + "" must not collide with "a" + "b" despite naive concatenation.
        let a = derive_memory_id("ab", "");
        let b = derive_memory_id("a", "b");
        assert_ne!(a, b);
    }
}
