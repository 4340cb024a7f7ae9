use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;

use crate::container::{encode, MergeMod};
use crate::{MergeError, Result};
use nom::number::complete::le_u8;
use nom::*;

pub const MERGE_MOD_MAGIC: &[u8; 4] = b"M3MM";
pub const MERGE_MOD_VERSION: u8 = 1;
const HEADER_SIZE: usize = MERGE_MOD_MAGIC.len() + 1;

/// File extension used by compiled merge mods.
pub const MERGE_MOD_EXTENSION: &str = "m3m";

named!(parse_merge_mod_header<&[u8], u8>,
    do_parse!(
        tag!(MERGE_MOD_MAGIC)
            >> version: le_u8
            >> (version)
));

/// Opens a compiled merge mod file.
///
/// With `eager` unset, the file stays open for as long as the returned mod
/// lives so that assets can be read when needed.
pub fn load_merge_mod(path: &Path, eager: bool) -> Result<MergeMod<BufReader<File>>> {
    let file = File::open(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    read_merge_mod(BufReader::new(file), name, eager)
}

/// Reads a merge mod (header and body) from `reader`.
pub fn read_merge_mod<R: Read + Seek>(
    mut reader: R,
    name: impl Into<String>,
    eager: bool,
) -> Result<MergeMod<R>> {
    let mut header_buf = Vec::with_capacity(HEADER_SIZE);
    let mut header_chunk = reader.by_ref().take(HEADER_SIZE as u64);
    header_chunk.read_to_end(&mut header_buf)?;
    let (_, version) = parse_merge_mod_header(&header_buf).map_err(|_| MergeError::BadMagic)?;
    match version {
        MERGE_MOD_VERSION => MergeMod::decode(reader, name, eager),
        v => Err(MergeError::UnsupportedVersion(v)),
    }
}

/// Writes a merge mod (header and body) into `writer`.
pub fn write_merge_mod<R, W>(merge_mod: &mut MergeMod<R>, mut writer: W) -> Result<()>
where
    R: Read + Seek,
    W: Write + Seek,
{
    writer.write_all(MERGE_MOD_MAGIC)?;
    writer.write_all(&[MERGE_MOD_VERSION])?;
    encode(merge_mod, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetTable;
    use crate::manifest::MergeModManifest;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn sample_merge_mod() -> MergeMod<Cursor<Vec<u8>>> {
        let manifest = MergeModManifest::from_json(
            r#"{"game":"LE3","files":[{"filename":"BioP_Nor.pcc","changes":[
                {"entryname":"x","scriptupdate":{"scriptfilename":"x.uc","scripttext":"function X();"}}
            ]}]}"#,
        )
        .unwrap();
        let mut assets = AssetTable::new();
        assets.insert("unused.bin", vec![9; 64]);
        MergeMod::new("sample.m3m", manifest, assets)
    }

    #[test]
    fn test_header() {
        let mut output = Cursor::new(Vec::new());
        write_merge_mod(&mut sample_merge_mod(), &mut output).unwrap();
        let data = output.into_inner();
        assert_eq!(&data[..5], b"M3MM\x01");

        let merge_mod = read_merge_mod(Cursor::new(data.clone()), "sample.m3m", true).unwrap();
        assert_eq!(merge_mod.merge_count(), 1);

        let mut bad_magic = data.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            read_merge_mod(Cursor::new(bad_magic), "sample.m3m", true),
            Err(MergeError::BadMagic)
        ));
        let mut bad_version = data;
        bad_version[4] = 2;
        assert!(matches!(
            read_merge_mod(Cursor::new(bad_version), "sample.m3m", true),
            Err(MergeError::UnsupportedVersion(2))
        ));
        assert!(matches!(
            read_merge_mod(Cursor::new(b"M3".to_vec()), "sample.m3m", true),
            Err(MergeError::BadMagic)
        ));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("sample.m3m");
        {
            let file = File::create(&path).unwrap();
            write_merge_mod(&mut sample_merge_mod(), file).unwrap();
        }
        let mut merge_mod = load_merge_mod(&path, false).unwrap();
        assert_eq!(merge_mod.name(), "sample.m3m");
        assert!(merge_mod.assets().get("unused.bin").unwrap().is_deferred());
        assert_eq!(merge_mod.resolve_asset("unused.bin").unwrap(), &[9_u8; 64][..]);
        merge_mod.materialize().unwrap();
        assert!(!merge_mod.assets().has_source());
        assert_eq!(merge_mod.resolve_asset("unused.bin").unwrap().len(), 64);
    }
}
