use std::io::{Read, Seek, SeekFrom};

use crate::assets::AssetTable;
use crate::container::ASSET_MAGIC;
use crate::game::{Game, LocalizationProvider};
use crate::manifest::MergeModManifest;
use crate::strings::{deserialize_length_prefixed_str, payload_size};
use crate::{MergeError, Result};

/// A loaded merge mod: its manifest and the assets it embeds.
///
/// When decoded lazily, assets are read from the stream the mod was decoded
/// from, which the mod keeps until it is dropped or `release_source` is called.
#[derive(Debug)]
pub struct MergeMod<R> {
    name: String,
    manifest: MergeModManifest,
    assets: AssetTable<R>,
}

impl<R> MergeMod<R> {
    pub fn new(name: impl Into<String>, manifest: MergeModManifest, assets: AssetTable<R>) -> Self {
        Self {
            name: name.into(),
            manifest,
            assets,
        }
    }

    /// File name of the merge mod, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn game(&self) -> Game {
        self.manifest.game
    }

    pub fn manifest(&self) -> &MergeModManifest {
        &self.manifest
    }

    pub fn assets(&self) -> &AssetTable<R> {
        &self.assets
    }

    pub fn merge_count(&self) -> usize {
        self.manifest.merge_count()
    }

    pub fn merge_weight(&self) -> u32 {
        self.manifest.merge_weight()
    }

    pub fn target_files(&self, localizations: &dyn LocalizationProvider) -> Vec<String> {
        self.manifest.target_files(localizations)
    }

    pub fn release_source(&mut self) -> Option<R> {
        self.assets.release_source()
    }

    pub(crate) fn parts_mut(&mut self) -> (&MergeModManifest, &mut AssetTable<R>) {
        (&self.manifest, &mut self.assets)
    }

    pub fn into_parts(self) -> (String, MergeModManifest, AssetTable<R>) {
        (self.name, self.manifest, self.assets)
    }
}

impl<R: Read + Seek> MergeMod<R> {
    /// Decodes a merge mod body (manifest and assets) starting at the
    /// reader's current position. The header is expected to have been
    /// consumed already.
    ///
    /// With `eager`, asset bytes are read right away and the reader is
    /// dropped. Otherwise only their location is recorded and the reader is
    /// kept to read them on demand.
    pub fn decode(mut reader: R, name: impl Into<String>, eager: bool) -> Result<Self> {
        let name = name.into();
        let start = reader.seek(SeekFrom::Current(0))?;
        let length = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(start))?;

        let mut body = BodyReader {
            reader: &mut reader,
            position: start,
            length,
        };
        let manifest_text = body.read_string()?;
        let manifest = MergeModManifest::from_json(&manifest_text)?;
        manifest.validate()?;

        let asset_count = body.read_u32()?;
        log::debug!("'{}' declares {} asset(s)", name, asset_count);
        let mut assets = AssetTable::new();
        for _ in 0..asset_count {
            let magic = body.read_magic()?;
            if &magic != ASSET_MAGIC {
                return Err(MergeError::BadAssetMagic(magic));
            }
            let asset_name = body.read_string()?;
            let size = body.read_u32()?;
            if eager {
                // Read now
                let data = body.read_bytes(size)?;
                assets.insert(asset_name, data);
            } else {
                // Will be read on first use
                let offset = body.skip(size)?;
                assets.insert_deferred(asset_name, size, offset);
            }
        }

        if body.position != length {
            return Err(MergeError::SerialSizeMismatch {
                position: body.position,
                length,
            });
        }
        if !eager {
            assets.attach_source(reader);
        }
        Ok(Self {
            name,
            manifest,
            assets,
        })
    }

    pub fn resolve_asset(&mut self, name: &str) -> Result<&[u8]> {
        self.assets.resolve(name)
    }

    /// Reads every deferred asset and closes the backing stream, so the mod
    /// can outlive it.
    pub fn materialize(&mut self) -> Result<()> {
        self.assets.materialize_all()?;
        self.assets.release_source();
        Ok(())
    }
}

/// Bounds-checked reader over a merge mod body.
///
/// Any read going past the end of the stream is reported as a serial size
/// mismatch: the container is shorter than what it declares.
struct BodyReader<'a, R> {
    reader: &'a mut R,
    position: u64,
    length: u64,
}

impl<'a, R: Read + Seek> BodyReader<'a, R> {
    fn ensure_available(&self, size: u64) -> Result<()> {
        let end = self.position.saturating_add(size);
        if end > self.length {
            return Err(MergeError::SerialSizeMismatch {
                position: end,
                length: self.length,
            });
        }
        Ok(())
    }

    fn read_u32(&mut self) -> Result<u32> {
        self.ensure_available(4)?;
        let value: u32 = bincode::deserialize_from(self.reader.by_ref())?;
        self.position += 4;
        Ok(value)
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.ensure_available(4)?;
        let value: i32 = bincode::deserialize_from(self.reader.by_ref())?;
        self.position += 4;
        Ok(value)
    }

    fn read_magic(&mut self) -> Result<[u8; 4]> {
        self.ensure_available(4)?;
        let mut magic = [0_u8; 4];
        self.reader.read_exact(&mut magic)?;
        self.position += 4;
        Ok(magic)
    }

    fn read_bytes(&mut self, size: u32) -> Result<Vec<u8>> {
        let size = u64::from(size);
        self.ensure_available(size)?;
        let mut content: Vec<u8> = Vec::with_capacity(size as usize);
        let mut chunk = self.reader.by_ref().take(size);
        chunk.read_to_end(&mut content)?;
        self.position += size;
        Ok(content)
    }

    fn read_string(&mut self) -> Result<String> {
        let length_prefix = self.read_i32()?;
        let size = payload_size(length_prefix);
        self.ensure_available(size)?;
        let mut payload: Vec<u8> = Vec::with_capacity(size as usize);
        let mut chunk = self.reader.by_ref().take(size);
        chunk.read_to_end(&mut payload)?;
        self.position += size;
        deserialize_length_prefixed_str(length_prefix, &payload)
    }

    /// Skips `size` bytes without reading them and returns the offset at
    /// which they start.
    fn skip(&mut self, size: u32) -> Result<u64> {
        let offset = self.position;
        self.position = self.position.saturating_add(u64::from(size));
        self.reader.seek(SeekFrom::Start(self.position))?;
        Ok(offset)
    }
}
