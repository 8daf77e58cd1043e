// src/artifacts.rs
//
// Keyed persistence of robust-PCA models and mixture-run aggregates.

use crate::error::{FaciesError, FaciesResult};
use crate::mixture::RunAggregate;
use crate::pca::RobustPca;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Directory of binary artifacts belonging to one run identifier.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    directory: PathBuf,
    run_id: String,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(directory: P, run_id: &str) -> Self {
        ArtifactStore {
            directory: directory.as_ref().to_path_buf(),
            run_id: run_id.to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn robust_pca_path(&self, n_pcs: usize) -> PathBuf {
        self.directory.join(format!("{}_rpca_{}PC.bin", self.run_id, n_pcs))
    }

    pub fn mixture_path(&self, n_pcs: usize, n_clusters: usize) -> PathBuf {
        self.directory
            .join(format!("{}_mixture_{}PC_{}.bin", self.run_id, n_pcs, n_clusters))
    }

    /// Saves the first `n_pcs` components of `model`.
    pub fn save_robust_pca(&self, model: &RobustPca, n_pcs: usize) -> FaciesResult<PathBuf> {
        self.ensure_directory()?;
        let path = self.robust_pca_path(n_pcs);
        model.truncated(n_pcs)?.save_model(&path)?;
        debug!("Saved robust PCA artifact to {:?}.", path);
        Ok(path)
    }

    pub fn load_robust_pca(&self, n_pcs: usize) -> FaciesResult<RobustPca> {
        RobustPca::load_model(self.robust_pca_path(n_pcs))
    }

    pub fn save_mixture_run(&self, n_pcs: usize, aggregate: &RunAggregate) -> FaciesResult<PathBuf> {
        self.ensure_directory()?;
        let path = self.mixture_path(n_pcs, aggregate.n_pdfs());
        write_bincode(&path, aggregate)?;
        debug!("Saved mixture artifact to {:?}.", path);
        Ok(path)
    }

    pub fn load_mixture_run(&self, n_pcs: usize, n_clusters: usize) -> FaciesResult<RunAggregate> {
        let aggregate: RunAggregate = read_bincode(&self.mixture_path(n_pcs, n_clusters))?;
        if aggregate.n_pdfs() != n_clusters {
            return Err(FaciesError::Artifact(format!(
                "Mixture artifact for G={} holds a G={} run.",
                n_clusters,
                aggregate.n_pdfs()
            )));
        }
        Ok(aggregate)
    }

    fn ensure_directory(&self) -> FaciesResult<()> {
        fs::create_dir_all(&self.directory).map_err(|e| {
            FaciesError::Artifact(format!("Failed to create directory {:?}: {}", self.directory, e))
        })
    }
}

fn write_bincode<T: Serialize>(path: &Path, value: &T) -> FaciesResult<()> {
    let file = File::create(path)
        .map_err(|e| FaciesError::Artifact(format!("Failed to create file at {:?}: {}", path, e)))?;
    let mut writer = BufWriter::new(file);
    bincode::serde::encode_into_std_write(value, &mut writer, bincode::config::standard())
        .map_err(|e| FaciesError::Artifact(format!("Failed to serialize {:?}: {}", path, e)))?;
    Ok(())
}

fn read_bincode<T: DeserializeOwned>(path: &Path) -> FaciesResult<T> {
    let file = File::open(path)
        .map_err(|e| FaciesError::Artifact(format!("Failed to open file at {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
        .map_err(|e| FaciesError::Artifact(format!("Failed to deserialize {:?}: {}", path, e)))
}
