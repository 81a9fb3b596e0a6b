//! Developer-project dependency verification.
//!
//! Before any user code is reachable the harness confirms the project's SDK
//! crates are declared, actually resolved into the lockfile, and new enough.
//! Any failure emits exactly one `SYSTEM` event and short-circuits the rest
//! of the pipeline; the harness never partially initializes.

use std::path::Path;

use serde_json::json;

use stratus_core::error::SetupError;
use stratus_core::event::{EventSink, StatusEvent};

/// One required SDK crate.
#[derive(Debug, Clone, Copy)]
pub struct SdkRequirement {
    /// Crate name as it appears in the project manifest.
    pub name: &'static str,
    /// Minimum supported major version.
    pub min_major: u64,
}

/// The SDK crates every functions project must carry.
pub const REQUIRED_SDKS: [SdkRequirement; 2] = [
    SdkRequirement {
        name: "stratus-functions",
        min_major: 2,
    },
    SdkRequirement {
        name: "stratus-admin",
        min_major: 7,
    },
];

/// The optional RPC gateway client some SDK versions pull in.
pub const RPC_CLIENT_CRATE: &str = "gateway-rpc";

/// Verify the project at `cwd` against [`REQUIRED_SDKS`].
pub fn verify_project(cwd: &Path, sink: &dyn EventSink) -> Result<(), SetupError> {
    let manifest_path = cwd.join("Cargo.toml");
    let raw = match std::fs::read_to_string(&manifest_path) {
        Ok(raw) => raw,
        Err(_) => {
            sink.emit(&StatusEvent::system("missing-manifest", ""));
            return Err(SetupError::MissingManifest {
                path: cwd.display().to_string(),
            });
        }
    };
    let manifest: toml::Value = match toml::from_str(&raw) {
        Ok(manifest) => manifest,
        Err(err) => {
            sink.emit(&StatusEvent::system("unreadable-manifest", ""));
            return Err(SetupError::UnreadableManifest {
                path: manifest_path.display().to_string(),
                reason: err.to_string(),
            });
        }
    };

    for requirement in REQUIRED_SDKS {
        if !manifest_declares(&manifest, requirement.name) {
            sink.emit(
                &StatusEvent::system("missing-dependency", "").with_data(json!({
                    "name": requirement.name,
                    "minMajor": requirement.min_major,
                })),
            );
            return Err(SetupError::MissingDependency {
                name: requirement.name.to_owned(),
            });
        }

        let Some(version) = locked_version(cwd, requirement.name) else {
            sink.emit(
                &StatusEvent::system("uninstalled-dependency", "").with_data(json!({
                    "name": requirement.name,
                    "minMajor": requirement.min_major,
                })),
            );
            return Err(SetupError::UnresolvedDependency {
                name: requirement.name.to_owned(),
            });
        };

        if version.major < requirement.min_major {
            sink.emit(
                &StatusEvent::system("outdated-dependency", "").with_data(json!({
                    "name": requirement.name,
                    "found": version.to_string(),
                    "minMajor": requirement.min_major,
                })),
            );
            return Err(SetupError::OutdatedDependency {
                name: requirement.name.to_owned(),
                found: version.major,
                minimum: requirement.min_major,
            });
        }
    }

    Ok(())
}

/// Whether the manifest declares a dependency, directly or for development.
fn manifest_declares(manifest: &toml::Value, name: &str) -> bool {
    ["dependencies", "dev-dependencies"].iter().any(|table| {
        manifest
            .get(table)
            .and_then(toml::Value::as_table)
            .is_some_and(|deps| deps.contains_key(name))
    })
}

/// The resolved version of a crate in the project's lockfile, if any.
///
/// Also how the harness detects the optional [`RPC_CLIENT_CRATE`].
#[must_use]
pub fn locked_version(cwd: &Path, name: &str) -> Option<semver::Version> {
    let raw = std::fs::read_to_string(cwd.join("Cargo.lock")).ok()?;
    let lockfile: toml::Value = toml::from_str(&raw).ok()?;
    lockfile
        .get("package")?
        .as_array()?
        .iter()
        .find(|package| package.get("name").and_then(toml::Value::as_str) == Some(name))
        .and_then(|package| package.get("version")?.as_str()?.parse().ok())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use stratus_core::event::CollectorSink;

    use super::*;

    fn project(manifest: &str, lockfile: Option<&str>) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), manifest).unwrap();
        if let Some(lockfile) = lockfile {
            std::fs::write(dir.path().join("Cargo.lock"), lockfile).unwrap();
        }
        dir
    }

    const GOOD_MANIFEST: &str = r#"
        [package]
        name = "demo-functions"
        version = "0.1.0"

        [dependencies]
        stratus-functions = "2"
        stratus-admin = "7"
    "#;

    const GOOD_LOCKFILE: &str = r#"
        version = 4

        [[package]]
        name = "stratus-functions"
        version = "2.4.0"

        [[package]]
        name = "stratus-admin"
        version = "7.1.2"
    "#;

    #[test]
    fn valid_project_verifies() {
        let dir = project(GOOD_MANIFEST, Some(GOOD_LOCKFILE));
        let sink = CollectorSink::new();
        verify_project(dir.path(), &sink).unwrap();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn missing_manifest_is_one_system_event() {
        let sink = CollectorSink::new();
        let err = verify_project(&PathBuf::from("/nonexistent"), &sink).unwrap_err();
        assert!(matches!(err, SetupError::MissingManifest { .. }));
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.of_kind("missing-manifest").len(), 1);
    }

    #[test]
    fn undeclared_dependency_fails() {
        let dir = project(
            r#"
            [package]
            name = "demo-functions"
            version = "0.1.0"

            [dependencies]
            stratus-functions = "2"
            "#,
            Some(GOOD_LOCKFILE),
        );
        let sink = CollectorSink::new();
        let err = verify_project(dir.path(), &sink).unwrap_err();
        assert!(matches!(err, SetupError::MissingDependency { name } if name == "stratus-admin"));
        assert_eq!(sink.of_kind("missing-dependency").len(), 1);
    }

    #[test]
    fn unlocked_dependency_fails_as_uninstalled() {
        let dir = project(GOOD_MANIFEST, None);
        let sink = CollectorSink::new();
        let err = verify_project(dir.path(), &sink).unwrap_err();
        assert!(matches!(err, SetupError::UnresolvedDependency { .. }));
        assert_eq!(sink.of_kind("uninstalled-dependency").len(), 1);
    }

    #[test]
    fn old_major_version_fails() {
        let dir = project(
            GOOD_MANIFEST,
            Some(
                r#"
                version = 4

                [[package]]
                name = "stratus-functions"
                version = "2.4.0"

                [[package]]
                name = "stratus-admin"
                version = "5.9.9"
                "#,
            ),
        );
        let sink = CollectorSink::new();
        let err = verify_project(dir.path(), &sink).unwrap_err();
        assert!(
            matches!(err, SetupError::OutdatedDependency { found: 5, minimum: 7, .. })
        );
        assert_eq!(sink.of_kind("outdated-dependency").len(), 1);
    }

    #[test]
    fn locked_version_reads_the_lockfile() {
        let dir = project(GOOD_MANIFEST, Some(GOOD_LOCKFILE));
        let version = locked_version(dir.path(), "stratus-admin").unwrap();
        assert_eq!(version.major, 7);
        assert!(locked_version(dir.path(), RPC_CLIENT_CRATE).is_none());
    }
}
