//! Memory-mapped vector storage for cluster indexes.
//!
//! Each cluster's embeddings live in one file next to the cluster's entries
//! file. Files are written once per index generation and then only read.
//!
//! # Storage Format
//!
//! - Header (16 bytes): magic `CCVC`, version, dimension, vector count
//! - Records: entry id (u32) followed by `dimension` f32 values, all
//!   little-endian

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use thiserror::Error;

use crate::vector::types::{ClusterId, EntryId, VectorDimension, VectorError};

/// Current storage format version.
const STORAGE_VERSION: u32 = 1;

/// Size of the storage header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes to identify cluster vector files.
const MAGIC_BYTES: &[u8; 4] = b"CCVC";

const BYTES_PER_F32: usize = 4;
const BYTES_PER_ID: usize = 4;

/// Errors specific to vector storage operations.
#[derive(Error, Debug)]
pub enum VectorStorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid storage format in {path}: {reason}")]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// Memory-mapped vector storage for a single cluster.
#[derive(Debug)]
pub struct MmapVectorStorage {
    path: PathBuf,
    mmap: Option<Mmap>,
    dimension: VectorDimension,
    vector_count: usize,
    cluster: ClusterId,
}

impl MmapVectorStorage {
    /// Creates an empty, not yet written storage for `cluster` under `base_path`.
    #[must_use]
    pub fn new(base_path: impl AsRef<Path>, cluster: ClusterId, dimension: VectorDimension) -> Self {
        Self {
            path: Self::cluster_path(base_path.as_ref(), cluster),
            mmap: None,
            dimension,
            vector_count: 0,
            cluster,
        }
    }

    /// Opens existing vector storage from disk.
    ///
    /// Returns an error if the file doesn't exist, has the wrong magic or
    /// version, or is shorter than its header claims.
    pub fn open(base_path: impl AsRef<Path>, cluster: ClusterId) -> Result<Self, VectorStorageError> {
        let path = Self::cluster_path(base_path.as_ref(), cluster);

        let file = File::open(&path).map_err(|e| {
            io::Error::new(e.kind(), format!("Vector storage file {}: {e}", path.display()))
        })?;
        // SAFETY: generation files are never modified after publish
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let (version, dimension, vector_count) = Self::read_header(&path, &mmap)?;
        if version != STORAGE_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: STORAGE_VERSION,
                actual: version,
            }
            .into());
        }

        let expected_len = HEADER_SIZE + vector_count * Self::record_size(dimension);
        if mmap.len() < expected_len {
            return Err(VectorStorageError::InvalidFormat {
                path,
                reason: format!(
                    "truncated file: {} bytes, header claims {vector_count} vectors ({expected_len} bytes)",
                    mmap.len()
                ),
            });
        }

        Ok(Self {
            path,
            mmap: Some(mmap),
            dimension,
            vector_count,
            cluster,
        })
    }

    /// Writes a batch of vectors to storage.
    ///
    /// Creates the file (and header) on first write.
    pub fn write_batch(&mut self, vectors: &[(EntryId, &[f32])]) -> Result<(), VectorStorageError> {
        for (_, vector) in vectors {
            self.dimension.validate_vector(vector)?;
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if file.metadata()?.len() == 0 {
            self.write_header(&mut file)?;
        }

        let mut buffer = Vec::with_capacity(vectors.len() * Self::record_size(self.dimension));
        for (id, vector) in vectors {
            buffer.extend_from_slice(&id.to_bytes());
            for &value in *vector {
                buffer.extend_from_slice(&value.to_le_bytes());
            }
        }
        file.write_all(&buffer)?;
        file.flush()?;
        drop(file);

        self.vector_count += vectors.len();
        self.update_header_count()?;
        self.mmap = None;
        Ok(())
    }

    /// Reads all vectors in write order.
    pub fn read_all_vectors(&mut self) -> Result<Vec<(EntryId, Vec<f32>)>, VectorStorageError> {
        self.ensure_mapped()?;
        let Some(mmap) = self.mmap.as_ref() else {
            return Ok(Vec::new());
        };

        let dimension = self.dimension.get();
        let record_size = Self::record_size(self.dimension);
        let records_end = HEADER_SIZE + self.vector_count * record_size;

        mmap[HEADER_SIZE..records_end]
            .chunks_exact(record_size)
            .map(|record| {
                let id = EntryId::from_bytes([record[0], record[1], record[2], record[3]])
                    .ok_or_else(|| VectorStorageError::InvalidFormat {
                        path: self.path.clone(),
                        reason: "zero entry id".to_string(),
                    })?;
                let mut vector = Vec::with_capacity(dimension);
                vector.extend(
                    record[BYTES_PER_ID..]
                        .chunks_exact(BYTES_PER_F32)
                        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                );
                Ok((id, vector))
            })
            .collect()
    }

    /// Returns the number of vectors stored.
    #[must_use]
    pub fn vector_count(&self) -> usize {
        self.vector_count
    }

    /// Returns the vector dimension.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Returns the cluster this storage belongs to.
    #[must_use]
    pub fn cluster(&self) -> ClusterId {
        self.cluster
    }

    /// Checks if the storage file exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Path of the storage file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the vector file for `cluster` inside a generation.
    #[must_use]
    pub fn file_name(cluster: ClusterId) -> String {
        format!("cluster_{}.vec", cluster.get())
    }

    fn cluster_path(base_path: &Path, cluster: ClusterId) -> PathBuf {
        base_path.join(Self::file_name(cluster))
    }

    fn record_size(dimension: VectorDimension) -> usize {
        BYTES_PER_ID + dimension.get() * BYTES_PER_F32
    }

    fn write_header(&self, file: &mut File) -> Result<(), io::Error> {
        file.write_all(MAGIC_BYTES)?;
        file.write_all(&STORAGE_VERSION.to_le_bytes())?;
        file.write_all(&(self.dimension.get() as u32).to_le_bytes())?;
        // count is patched after the records are appended
        file.write_all(&0u32.to_le_bytes())?;
        Ok(())
    }

    fn read_header(
        path: &Path,
        mmap: &Mmap,
    ) -> Result<(u32, VectorDimension, usize), VectorStorageError> {
        if mmap.len() < HEADER_SIZE {
            return Err(VectorStorageError::InvalidFormat {
                path: path.to_path_buf(),
                reason: "file too small to contain header".to_string(),
            });
        }
        if &mmap[0..4] != MAGIC_BYTES {
            return Err(VectorStorageError::InvalidFormat {
                path: path.to_path_buf(),
                reason: "invalid magic bytes".to_string(),
            });
        }

        let version = u32::from_le_bytes([mmap[4], mmap[5], mmap[6], mmap[7]]);
        let dim_value = u32::from_le_bytes([mmap[8], mmap[9], mmap[10], mmap[11]]);
        let dimension = VectorDimension::new(dim_value as usize)?;
        let vector_count = u32::from_le_bytes([mmap[12], mmap[13], mmap[14], mmap[15]]) as usize;

        Ok((version, dimension, vector_count))
    }

    fn ensure_mapped(&mut self) -> Result<(), VectorStorageError> {
        if self.mmap.is_none() && self.path.exists() {
            let file = File::open(&self.path)?;
            // SAFETY: generation files are never modified after publish
            let mmap = unsafe { MmapOptions::new().map(&file)? };
            let (_, _, count) = Self::read_header(&self.path, &mmap)?;
            self.vector_count = count;
            self.mmap = Some(mmap);
        }
        Ok(())
    }

    fn update_header_count(&self) -> Result<(), VectorStorageError> {
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(12))?;
        file.write_all(&(self.vector_count as u32).to_le_bytes())?;
        file.flush()?;
        Ok(())
    }
}
