//! Normalized numeric encoding of dotted tool versions.
//!
//! Two runs of the tool are compatible when the first three dotted segments
//! match; anything past the patch segment (build metadata, pre-release tags)
//! does not affect compatibility and is ignored by the encoding.

/// Encode `major.minor.patch[...]` as `major * 10_000 + minor * 100 + patch`.
///
/// Each segment is read as its leading decimal digits; a missing or
/// non-numeric segment counts as zero. Minor and patch are clamped to 99 so
/// a segment never carries into its neighbor.
pub fn encode_version(raw: &str) -> u32 {
    let mut parts = raw.trim().split('.');
    let major = segment(parts.next());
    let minor = segment(parts.next()).min(99);
    let patch = segment(parts.next()).min(99);
    major * 10_000 + minor * 100 + patch
}

/// True when the two dotted version strings encode differently.
pub fn version_changed(persisted: u32, current: &str) -> bool {
    persisted != encode_version(current)
}

fn segment(part: Option<&str>) -> u32 {
    let Some(part) = part else {
        return 0;
    };
    let digits: String = part
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_three_segments() {
        assert_eq!(encode_version("1.2.3"), 10_203);
        assert_eq!(encode_version("0.9.0"), 900);
        assert_eq!(encode_version("12.0.1"), 120_001);
    }

    #[test]
    fn missing_segments_count_as_zero() {
        assert_eq!(encode_version("1.2"), encode_version("1.2.0"));
        assert_eq!(encode_version("2"), encode_version("2.0.0"));
        assert_eq!(encode_version(""), 0);
    }

    #[test]
    fn segments_past_patch_are_ignored() {
        assert_eq!(encode_version("1.2.0.9"), encode_version("1.2.0"));
    }

    #[test]
    fn pre_release_suffixes_are_ignored() {
        assert_eq!(encode_version("1.2.3-beta"), encode_version("1.2.3"));
        assert_eq!(encode_version("1.2.3+44"), encode_version("1.2.3"));
    }

    #[test]
    fn minor_bump_changes_encoding() {
        // 1.2.0 -> 1.3.0 must be observable even with identical inputs.
        let persisted = encode_version("1.2.0");
        assert!(version_changed(persisted, "1.3.0"));
        assert!(!version_changed(persisted, "1.2.0"));
    }

    #[test]
    fn oversized_minor_does_not_carry() {
        assert_ne!(encode_version("1.100.0"), encode_version("2.0.0"));
    }
}
