//! Pipeline cache files storing the environments needed to rebuild each pipeline.
//!
//! The file starts with a small header followed by records until the end of the file.
//! Records are appended as new pipelines are built, so the record count is not stored.
use std::io::{Cursor, Write};
use std::path::Path;

use binrw::{binrw, helpers::until_eof, BinReaderExt, BinResult, BinWrite};
use log::warn;

use crate::environment::EnvironmentBlob;
use crate::error::{LoadPipelineCacheError, ReadFileError};
use crate::key::{ComputePipelineKey, GraphicsPipelineKey};
use crate::{parse_count32, write_count32};

/// Files with any other version are discarded and created again.
pub const CACHE_VERSION: u32 = 1;

#[binrw]
#[derive(Debug, PartialEq, Clone)]
#[brw(magic(b"MXPC"))]
pub struct PipelineCacheHeader {
    pub version: u32,
}

#[derive(Debug, PartialEq, Clone)]
pub struct PipelineCacheFile {
    pub version: u32,
    pub records: Vec<PipelineRecord>,
}

#[binrw]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[brw(repr(u8))]
pub enum PipelineKind {
    Graphics = 0,
    Compute = 1,
}

#[binrw]
#[derive(Debug, PartialEq, Clone)]
pub struct PipelineRecord {
    pub kind: PipelineKind,

    /// The significant bytes of the pipeline key.
    #[br(parse_with = parse_count32)]
    #[bw(write_with = write_count32)]
    pub key: Vec<u8>,

    /// One environment for each enabled program in stage order.
    #[br(parse_with = parse_count32)]
    #[bw(write_with = write_count32)]
    pub environments: Vec<EnvironmentBlob>,
}

#[binrw]
struct Records {
    #[br(parse_with = until_eof)]
    records: Vec<PipelineRecord>,
}

impl PipelineCacheFile {
    pub fn new() -> Self {
        Self {
            version: CACHE_VERSION,
            records: Vec::new(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadPipelineCacheError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadPipelineCacheError> {
        let mut reader = Cursor::new(bytes);
        let header: PipelineCacheHeader = reader.read_le()?;
        if header.version != CACHE_VERSION {
            return Err(LoadPipelineCacheError::Version {
                version: header.version,
                expected: CACHE_VERSION,
            });
        }

        let records: Records = reader.read_le()?;
        Ok(Self {
            version: header.version,
            records: records.records,
        })
    }

    pub fn to_bytes(&self) -> BinResult<Vec<u8>> {
        let mut bytes = crate::write_le(&PipelineCacheHeader {
            version: self.version,
        })?;
        for record in &self.records {
            bytes.extend(record.to_bytes()?);
        }
        Ok(bytes)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> BinResult<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Append a single record to the cache file at `path`.
    /// A new file with only the header is created first if needed.
    pub fn append_record<P: AsRef<Path>>(
        path: P,
        record: &PipelineRecord,
    ) -> Result<(), ReadFileError> {
        let path = path.as_ref();
        let is_empty = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

        let mut bytes = Vec::new();
        if is_empty {
            bytes = crate::write_le(&PipelineCacheHeader {
                version: CACHE_VERSION,
            })?;
        }
        bytes.extend(record.to_bytes()?);

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Load the cache at `path`, recreating the file if it is missing, outdated or corrupt.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ReadFileError> {
        let path = path.as_ref();
        match Self::from_file(path) {
            Ok(cache) => Ok(cache),
            Err(e) => {
                if path.exists() {
                    warn!("Discarding pipeline cache {path:?}: {e}");
                }
                let cache = Self::new();
                cache.save(path)?;
                Ok(cache)
            }
        }
    }
}

impl Default for PipelineCacheFile {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRecord {
    pub fn graphics(key: &GraphicsPipelineKey, environments: Vec<EnvironmentBlob>) -> Self {
        Self {
            kind: PipelineKind::Graphics,
            key: key.as_bytes().to_vec(),
            environments,
        }
    }

    pub fn compute(key: &ComputePipelineKey, environment: EnvironmentBlob) -> Self {
        Self {
            kind: PipelineKind::Compute,
            key: key.as_bytes().to_vec(),
            environments: vec![environment],
        }
    }

    pub fn graphics_key(&self) -> Result<GraphicsPipelineKey, LoadPipelineCacheError> {
        GraphicsPipelineKey::from_bytes(&self.key).ok_or(LoadPipelineCacheError::KeySize {
            actual: self.key.len(),
            expected: std::mem::size_of::<GraphicsPipelineKey>(),
        })
    }

    pub fn compute_key(&self) -> Result<ComputePipelineKey, LoadPipelineCacheError> {
        ComputePipelineKey::from_bytes(&self.key).ok_or(LoadPipelineCacheError::KeySize {
            actual: self.key.len(),
            expected: std::mem::size_of::<ComputePipelineKey>(),
        })
    }

    fn to_bytes(&self) -> BinResult<Vec<u8>> {
        let mut writer = Cursor::new(Vec::new());
        self.write_le(&mut writer)?;
        Ok(writer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ProgramHeader;
    use crate::Stage;
    use hexlit::hex;
    use pretty_assertions::assert_eq;

    fn environment(stage: Stage, code: Vec<u64>) -> EnvironmentBlob {
        EnvironmentBlob {
            stage,
            start_address: 0,
            read_lowest: 0,
            texture_bound: 0,
            local_memory_size: 0,
            shared_memory_size: 0,
            workgroup_size: [1, 1, 1],
            sph: ProgramHeader::from_bytes(&[0u8; 0x50]).unwrap(),
            code,
            cbuf_values: Vec::new(),
            texture_types: Vec::new(),
        }
    }

    fn cache() -> PipelineCacheFile {
        let key = ComputePipelineKey {
            unique_hash: 1,
            shared_memory_size: 0,
            workgroup_size: [8, 8, 1],
        };
        let graphics_key = GraphicsPipelineKey {
            unique_hashes: [1, 2, 0, 0, 0, 3],
            ..Default::default()
        };
        PipelineCacheFile {
            version: CACHE_VERSION,
            records: vec![
                PipelineRecord::compute(&key, environment(Stage::Compute, vec![1, 2])),
                PipelineRecord::graphics(
                    &graphics_key,
                    vec![
                        environment(Stage::VertexB, vec![3]),
                        environment(Stage::Fragment, vec![4]),
                    ],
                ),
            ],
        }
    }

    #[test]
    fn read_write_cache() {
        let cache = cache();
        let bytes = cache.to_bytes().unwrap();
        assert_eq!(&hex!(0x4d585043 01000000 01180000), &bytes[..12]);
        assert_eq!(cache, PipelineCacheFile::from_bytes(&bytes).unwrap());
    }

    #[test]
    fn read_empty_cache() {
        let cache = PipelineCacheFile::from_bytes(&hex!(0x4d585043 01000000)).unwrap();
        assert!(cache.records.is_empty());
    }

    #[test]
    fn read_cache_wrong_version() {
        let result = PipelineCacheFile::from_bytes(&hex!(0x4d585043 02000000));
        assert!(matches!(
            result,
            Err(LoadPipelineCacheError::Version {
                version: 2,
                expected: CACHE_VERSION
            })
        ));
    }

    #[test]
    fn record_keys() {
        let cache = cache();
        assert_eq!([8, 8, 1], cache.records[0].compute_key().unwrap().workgroup_size);
        assert_eq!(
            [1, 2, 0, 0, 0, 3],
            cache.records[1].graphics_key().unwrap().unique_hashes
        );
        assert!(cache.records[0].graphics_key().is_err());
    }

    #[test]
    fn append_records_to_file() {
        let path = std::env::temp_dir().join(format!("mxw_lib_cache_{}.bin", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let cache = cache();
        for record in &cache.records {
            PipelineCacheFile::append_record(&path, record).unwrap();
        }
        let loaded = PipelineCacheFile::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(cache, loaded);
    }
}
