use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use crate::{MergeError, Result};

/// Binary payload embedded in a merge mod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAsset {
    /// Bytes already in memory.
    Materialized(Vec<u8>),
    /// Bytes still in the backing stream, read on first use.
    Deferred { offset: u64, size: u32 },
}

impl MergeAsset {
    pub fn size(&self) -> u64 {
        match self {
            MergeAsset::Materialized(data) => data.len() as u64,
            MergeAsset::Deferred { size, .. } => u64::from(*size),
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, MergeAsset::Deferred { .. })
    }
}

#[derive(Debug)]
struct AssetEntry {
    name: String, // Name as written in the container
    asset: MergeAsset,
}

/// Case-insensitive asset name -> payload mapping.
///
/// Deferred assets are read from `source`, which the table owns. Once the
/// source is released, deferred assets can no longer be resolved.
#[derive(Debug)]
pub struct AssetTable<R> {
    source: Option<R>,
    entries: HashMap<String, AssetEntry>,
}

impl<R> Default for AssetTable<R> {
    fn default() -> Self {
        Self {
            source: None,
            entries: HashMap::new(),
        }
    }
}

impl<R> AssetTable<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(source: R) -> Self {
        Self {
            source: Some(source),
            entries: HashMap::new(),
        }
    }

    /// Adds an in-memory asset, replacing any asset with the same name.
    pub fn insert(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.insert_asset(name.into(), MergeAsset::Materialized(data));
    }

    /// Adds an asset located at `offset` in the backing stream.
    pub fn insert_deferred(&mut self, name: impl Into<String>, size: u32, offset: u64) {
        self.insert_asset(name.into(), MergeAsset::Deferred { offset, size });
    }

    fn insert_asset(&mut self, name: String, asset: MergeAsset) {
        self.entries
            .insert(name.to_lowercase(), AssetEntry { name, asset });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&MergeAsset> {
        self.entries.get(&name.to_lowercase()).map(|e| &e.asset)
    }

    /// Asset names in ordinal order, which is also their serialization order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.values().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub(crate) fn attach_source(&mut self, source: R) {
        self.source = Some(source);
    }

    /// Closes the backing stream. Deferred assets fail to resolve afterwards.
    pub fn release_source(&mut self) -> Option<R> {
        self.source.take()
    }
}

impl<R: Read + Seek> AssetTable<R> {
    /// Returns the content of an asset, reading it from the backing stream if
    /// it hasn't been read yet.
    pub fn resolve(&mut self, name: &str) -> Result<&[u8]> {
        let source = &mut self.source;
        let entry = self
            .entries
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| MergeError::AssetNotFound(name.to_string()))?;
        if let MergeAsset::Deferred { offset, size } = entry.asset {
            let reader = source
                .as_mut()
                .ok_or_else(|| MergeError::StreamClosed(entry.name.clone()))?;
            let data = read_deferred_asset(reader, &entry.name, offset, size)?;
            log::trace!("Read asset '{}' ({} bytes)", entry.name, data.len());
            entry.asset = MergeAsset::Materialized(data);
        }
        match &entry.asset {
            MergeAsset::Materialized(data) => Ok(data.as_slice()),
            MergeAsset::Deferred { .. } => Err(MergeError::StreamClosed(entry.name.clone())),
        }
    }

    /// Resolves an asset and removes it from the table.
    pub fn take(&mut self, name: &str) -> Result<Vec<u8>> {
        self.resolve(name)?;
        match self.entries.remove(&name.to_lowercase()) {
            Some(AssetEntry {
                asset: MergeAsset::Materialized(data),
                ..
            }) => Ok(data),
            _ => Err(MergeError::AssetNotFound(name.to_string())),
        }
    }

    /// Reads every deferred asset so that the table no longer depends on its
    /// backing stream.
    pub fn materialize_all(&mut self) -> Result<()> {
        let deferred: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.asset.is_deferred())
            .map(|e| e.name.clone())
            .collect();
        for name in deferred {
            self.resolve(&name)?;
        }
        Ok(())
    }
}

fn read_deferred_asset<R: Read + Seek>(
    reader: &mut R,
    name: &str,
    offset: u64,
    size: u32,
) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut content: Vec<u8> = Vec::with_capacity(size as usize);
    let mut asset_chunk = reader.by_ref().take(u64::from(size));
    asset_chunk.read_to_end(&mut content)?;
    if content.len() != size as usize {
        return Err(MergeError::TruncatedStream {
            name: name.to_string(),
            expected: u64::from(size),
            available: content.len() as u64,
        });
    }
    Ok(content)
}
