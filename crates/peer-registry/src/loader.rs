use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::registry::validate_peers;
use crate::schema::PeersFile;

/// Load a [`PeersFile`] from a YAML file on disk.
///
/// Validates the list after deserialization (version check, unique labels
/// and ranges, non-empty secrets).
pub fn load_peers(path: impl AsRef<Path>) -> Result<PeersFile> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read peers file: {}", path.display()))?;
    load_peers_from_str(&contents)
        .with_context(|| format!("failed to parse peers file: {}", path.display()))
}

/// Parse and validate a [`PeersFile`] from a YAML string.
pub fn load_peers_from_str(yaml: &str) -> Result<PeersFile> {
    let file: PeersFile = serde_yml::from_str(yaml).context("YAML deserialization failed")?;

    if file.version != "1.0" {
        bail!(
            "unsupported peers file version '{}'; only '1.0' is supported",
            file.version
        );
    }
    validate_peers(&file.peers)?;

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_minimal_file() {
        let file = load_peers_from_str("version: \"1.0\"\npeers: []\n").unwrap();
        assert!(file.peers.is_empty());
    }

    #[test]
    fn load_mixed_families() {
        let yaml = r#"
version: "1.0"
peers:
  - range: "10.0.0.0/8"
    label: "lb-pool"
    secret: "S"
  - range: "2001:db8::/32"
    label: "v6-pool"
  - range: "192.0.2.7"
    label: "bastion"
"#;
        let file = load_peers_from_str(yaml).unwrap();
        assert_eq!(file.peers.len(), 3);
        assert_eq!(file.peers[2].range.to_string(), "192.0.2.7/32");
    }

    #[test]
    fn reject_wrong_version() {
        let err = load_peers_from_str("version: \"2.0\"\npeers: []\n").unwrap_err();
        assert!(
            err.to_string().contains("unsupported peers file version"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn reject_duplicate_labels() {
        let yaml = r#"
version: "1.0"
peers:
  - range: "10.0.0.0/8"
    label: "dup"
  - range: "172.16.0.0/12"
    label: "dup"
"#;
        let err = load_peers_from_str(yaml).unwrap_err();
        assert!(
            err.to_string().contains("duplicate peer label"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn reject_duplicate_ranges() {
        let yaml = r#"
version: "1.0"
peers:
  - range: "10.0.0.5"
    label: "a"
  - range: "10.0.0.5/32"
    label: "b"
"#;
        let err = load_peers_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("listed twice"), "unexpected error: {err}");
    }

    #[test]
    fn reject_bad_range() {
        let yaml = r#"
version: "1.0"
peers:
  - range: "not-an-address"
    label: "a"
"#;
        let err = load_peers_from_str(yaml).unwrap_err();
        assert!(
            err.to_string().contains("YAML deserialization failed"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn load_from_nonexistent_file() {
        let err = load_peers("/does/not/exist.yaml").unwrap_err();
        assert!(
            err.to_string().contains("failed to read peers file"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn load_from_disk() {
        let path = std::env::temp_dir().join(format!("peers-{}.yaml", std::process::id()));
        std::fs::write(&path, "version: \"1.0\"\npeers:\n  - range: \"10.0.0.0/8\"\n    label: \"lb\"\n")
            .unwrap();
        let file = load_peers(&path).unwrap();
        assert_eq!(file.peers[0].label, "lb");
        std::fs::remove_file(&path).unwrap();
    }
}
