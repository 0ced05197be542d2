//! Manifest templating
//!
//! Manifests carry exactly one placeholder, `${REGISTRY_LOGIN_SERVER}`. Rendered
//! copies are written to a private staging directory that is removed on drop.

use crate::error::{ClusterError, Result};
use std::path::{Path, PathBuf};

pub const REGISTRY_PLACEHOLDER: &str = "${REGISTRY_LOGIN_SERVER}";

/// Substitute the registry login server, verbatim
pub fn render(template: &str, login_server: &str) -> String {
    template.replace(REGISTRY_PLACEHOLDER, login_server)
}

/// Private (0700) directory holding rendered manifests for one run
pub struct StagingDir {
    dir: tempfile::TempDir,
}

impl StagingDir {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("fleetwire-").tempdir()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Read `manifest`, render it and write the result under the staging directory
    pub fn stage(&self, manifest: &Path, login_server: &str) -> Result<PathBuf> {
        let template = std::fs::read_to_string(manifest).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ClusterError::ManifestNotFound(manifest.to_path_buf()),
            _ => ClusterError::IoError(e),
        })?;

        let file_name = manifest
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "manifest.yaml".into());
        let staged = self.dir.path().join(file_name);
        std::fs::write(&staged, render(&template, login_server))?;

        tracing::debug!("Staged {} -> {}", manifest.display(), staged.display());
        Ok(staged)
    }
}
