//! Cache directory layout.
//!
//! Everything the control plane persists lives at a fixed path relative to
//! one cache directory: the engine configuration document, the engine log,
//! the auxiliary route/ACL lists and the preference store. The paths are
//! stable so the engine and external tooling can find them between runs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Bundled default route-exclusion list, seeded when no file exists yet.
const DEFAULT_CHNROUTES: &str = "# Route exclusion list (one prefix per line)\n";

/// Bundled default access-control list.
const DEFAULT_ACL: &str = "# Access control list (one rule per line)\n";

/// Fixed file layout under one cache directory.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Engine configuration document.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("tproxy.yml")
    }

    /// Rotating engine log.
    pub fn log_file(&self) -> PathBuf {
        self.root.join("tunnel.log")
    }

    /// Route-exclusion list referenced by the `chnroutes` section.
    pub fn chnroutes_file(&self) -> PathBuf {
        self.root.join("chnroutes.txt")
    }

    /// Access-control list referenced by the `acl` section.
    pub fn acl_file(&self) -> PathBuf {
        self.root.join("acl.txt")
    }

    /// Preference store backing file.
    pub fn prefs_file(&self) -> PathBuf {
        self.root.join("prefs.json")
    }

    /// Create the cache directory and seed the auxiliary text files that the
    /// configuration document references. Existing files are left untouched.
    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        for (path, contents) in [
            (self.chnroutes_file(), DEFAULT_CHNROUTES),
            (self.acl_file(), DEFAULT_ACL),
        ] {
            if !path.exists() {
                debug!("Seeding {}", path.display());
                fs::write(&path, contents)?;
            }
        }
        Ok(())
    }
}
