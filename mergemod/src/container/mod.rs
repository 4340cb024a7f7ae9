pub mod builder;
pub mod reader;

pub use builder::{encode, MergeModBuilder};
pub use reader::MergeMod;

const ASSET_MAGIC: &[u8; 4] = b"MMV1";
