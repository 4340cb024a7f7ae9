use std::convert::TryFrom;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::container::{MergeMod, ASSET_MAGIC};
use crate::manifest::MergeModManifest;
use crate::strings::serialize_length_prefixed_str_into;
use crate::Result;

/// Writes a merge mod body: the manifest followed by the asset records.
///
/// The asset count is written as a placeholder and patched by `finish`, which
/// also runs on drop.
pub struct MergeModBuilder<W: Write + Seek> {
    obj: Box<W>,
    asset_count_offset: u64,
    asset_count: u32,
    finished: bool,
}

impl<W: Write + Seek> MergeModBuilder<W> {
    pub fn new(mut obj: W, manifest: &MergeModManifest) -> Result<Self> {
        let manifest_text = manifest.to_json()?;
        serialize_length_prefixed_str_into(obj.by_ref(), &manifest_text)?;
        let asset_count_offset = obj.seek(SeekFrom::Current(0))?;
        // Placeholder for the asset count
        bincode::serialize_into(obj.by_ref(), &0_u32)?;
        Ok(Self {
            obj: Box::new(obj),
            asset_count_offset,
            asset_count: 0,
            finished: false,
        })
    }

    /// Appends an asset record. Records are written in call order.
    pub fn append_asset<R>(&mut self, asset_name: &str, mut data: R) -> Result<()>
    where
        R: Read,
    {
        self.obj.write_all(ASSET_MAGIC)?;
        serialize_length_prefixed_str_into(self.obj.by_ref(), asset_name)?;
        let size_offset = self.obj.seek(SeekFrom::Current(0))?;
        // Placeholder for the asset size
        bincode::serialize_into(self.obj.by_ref(), &0_u32)?;
        let data_size = io::copy(data.by_ref(), self.obj.by_ref())?;
        let end_offset = self.obj.seek(SeekFrom::Current(0))?;
        self.obj.seek(SeekFrom::Start(size_offset))?;
        bincode::serialize_into(self.obj.by_ref(), &u32::try_from(data_size)?)?;
        self.obj.seek(SeekFrom::Start(end_offset))?;
        self.asset_count += 1;
        log::trace!("Serialized asset '{}' ({} bytes)", asset_name, data_size);
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let end_offset = self.obj.seek(SeekFrom::Current(0))?;
        self.obj.seek(SeekFrom::Start(self.asset_count_offset))?;
        bincode::serialize_into(self.obj.by_ref(), &self.asset_count)?;
        self.obj.seek(SeekFrom::Start(end_offset))?;
        self.obj.flush()?;
        Ok(())
    }
}

impl<W: Write + Seek> Drop for MergeModBuilder<W> {
    // Automatically call finish on destruction
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// Serializes a loaded merge mod body. Assets are written sorted by name so
/// identical mods always produce identical bytes.
pub fn encode<R, W>(merge_mod: &mut MergeMod<R>, writer: W) -> Result<()>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let (manifest, assets) = merge_mod.parts_mut();
    let mut builder = MergeModBuilder::new(writer, manifest)?;
    let names: Vec<String> = assets.names().into_iter().map(String::from).collect();
    for name in names {
        let data = assets.resolve(&name)?;
        builder.append_asset(&name, data)?;
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetTable;
    use crate::MergeError;
    use std::io::Cursor;

    const MANIFEST: &str = r#"{"game":"LE2","files":[{"filename":"SFXGame.pcc","changes":[
        {"entryname":"a","assetupdate":{"assetname":"b.pcc","entryname":"a"}},
        {"entryname":"b","assetupdate":{"assetname":"A.pcc","entryname":"b"}}
    ]}]}"#;

    fn sample_merge_mod() -> MergeMod<Cursor<Vec<u8>>> {
        let mut assets = AssetTable::new();
        assets.insert("b.pcc", vec![2; 300]);
        assets.insert("A.pcc", vec![1; 10]);
        MergeMod::new(
            "sample.m3m",
            MergeModManifest::from_json(MANIFEST).unwrap(),
            assets,
        )
    }

    fn encode_to_vec(merge_mod: &mut MergeMod<Cursor<Vec<u8>>>) -> Vec<u8> {
        let mut output = Cursor::new(Vec::new());
        encode(merge_mod, &mut output).unwrap();
        output.into_inner()
    }

    #[test]
    fn test_empty_body() {
        let manifest = MergeModManifest::from_json(MANIFEST).unwrap();
        let mut output = Cursor::new(Vec::new());
        {
            let _builder = MergeModBuilder::new(&mut output, &manifest).unwrap();
        }
        let data = output.into_inner();
        assert_eq!(&data[data.len() - 4..], &[0, 0, 0, 0]);
        let merge_mod = MergeMod::decode(Cursor::new(data), "empty.m3m", true).unwrap();
        assert!(merge_mod.assets().is_empty());
        assert_eq!(merge_mod.manifest(), &manifest);
    }

    #[test]
    fn test_round_trip() {
        let mut original = sample_merge_mod();
        let encoded = encode_to_vec(&mut original);
        for &eager in &[true, false] {
            let mut decoded = MergeMod::decode(Cursor::new(encoded.clone()), "sample.m3m", eager)
                .unwrap();
            assert_eq!(decoded.manifest(), original.manifest());
            assert_eq!(decoded.assets().names(), vec!["A.pcc", "b.pcc"]);
            assert_eq!(decoded.resolve_asset("a.pcc").unwrap(), &[1_u8; 10][..]);
            assert_eq!(decoded.resolve_asset("B.PCC").unwrap(), &[2_u8; 300][..]);
        }
    }

    #[test]
    fn test_deterministic_output() {
        let first = encode_to_vec(&mut sample_merge_mod());
        let mut assets = AssetTable::new();
        // Reverse insertion order
        assets.insert("A.pcc", vec![1; 10]);
        assets.insert("b.pcc", vec![2; 300]);
        let mut second = MergeMod::new(
            "sample.m3m",
            MergeModManifest::from_json(MANIFEST).unwrap(),
            assets,
        );
        assert_eq!(first, encode_to_vec(&mut second));
        // Assets sorted ordinally: 'A' < 'b'
        let a = first.windows(4).position(|w| w == b"MMV1").unwrap();
        assert_eq!(&first[a + 8..a + 10], &[b'A', 0]);
    }

    #[test]
    fn test_reencode_lazy_mod() {
        let encoded = encode_to_vec(&mut sample_merge_mod());
        let mut lazy = MergeMod::decode(Cursor::new(encoded.clone()), "sample.m3m", false).unwrap();
        assert_eq!(encode_to_vec(&mut lazy), encoded);
    }

    #[test]
    fn test_asset_count_corruption() {
        let encoded = encode_to_vec(&mut sample_merge_mod());
        let count_offset = encoded.windows(4).position(|w| w == b"MMV1").unwrap() - 4;
        let mut corrupted = encoded.clone();
        corrupted[count_offset] += 1;
        for &eager in &[true, false] {
            let result = MergeMod::decode(Cursor::new(corrupted.clone()), "sample.m3m", eager);
            assert!(matches!(
                result,
                Err(MergeError::SerialSizeMismatch { .. }) | Err(MergeError::BadAssetMagic(_))
            ));
        }
    }
}
