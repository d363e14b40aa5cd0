// src/manifests/mod.rs

pub mod apiserver;
pub mod args;
pub mod cidr;
pub mod controller_manager;
pub mod etcd;
pub mod pod;
pub mod scheduler;

use crate::utils::logging::Logger;
use pod::Pod;
use std::path::Path;
use std::{fs, io};

#[derive(Debug)]
pub enum ManifestError {
    Io(io::Error),
    Encode(String),
}

impl std::fmt::Display for ManifestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "cannot write manifest: {}", e),
            Self::Encode(msg) => write!(f, "cannot serialize manifest: {}", msg),
        }
    }
}

impl std::error::Error for ManifestError {}

impl From<io::Error> for ManifestError {
    fn from(error: io::Error) -> Self {
        ManifestError::Io(error)
    }
}

/// Serializes a pod and writes it only when the on-disk bytes differ, so
/// the kubelet's file watcher never sees a spurious restart.
pub fn write_manifest(dir: &Path, pod: &Pod, logger: &mut dyn Logger) -> Result<(), ManifestError> {
    let rendered =
        serde_yaml::to_string(pod).map_err(|e| ManifestError::Encode(e.to_string()))?;
    let path = dir.join(format!("{}.yaml", pod.metadata.name));

    if let Ok(existing) = fs::read_to_string(&path) {
        if existing == rendered {
            logger.log(&format!(
                "[control-plane] Manifest {} is up to date",
                pod.metadata.name
            ));
            return Ok(());
        }
    }

    fs::create_dir_all(dir)?;
    fs::write(&path, rendered)?;
    logger.log(&format!("[control-plane] Wrote manifest {}", pod.metadata.name));
    Ok(())
}
