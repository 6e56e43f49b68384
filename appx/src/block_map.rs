use crate::compress;
use crate::zip::METHOD_DEFLATE;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;

#[derive(Default)]
pub struct BlockMapBuilder {
    block_map: AppxBlockMap,
}

impl BlockMapBuilder {
    /// Records one emitted entry. `name` is the sanitized archive name; the
    /// block map spells it with backslashes.
    pub(crate) fn add(&mut self, name: &str, method: u16, entry: &compress::EntryData) {
        let file = File {
            name: name.replace('/', "\\"),
            size: entry.uncompressed_size,
            blocks: entry
                .blocks
                .iter()
                .map(|block| Block {
                    hash: BASE64.encode(block.digest),
                    size: (method == METHOD_DEFLATE).then_some(block.compressed_size as u32),
                })
                .collect(),
        };
        self.block_map.files.push(file);
    }

    pub fn finish(self) -> AppxBlockMap {
        self.block_map
    }
}

/// Defines the root element of the app package block map. The BlockMap element
/// specifies the algorithm that is used to compute cryptographic hashes and
/// contains a sequence of File child elements that are associated with each
/// file that is stored in the package.
#[derive(Clone, Debug, Serialize)]
#[serde(rename = "BlockMap")]
pub struct AppxBlockMap {
    #[serde(rename = "xmlns")]
    ns: String,
    #[serde(rename = "HashMethod")]
    hash_method: String,
    /// Files in the package.
    #[serde(rename = "File")]
    pub files: Vec<File>,
}

impl Default for AppxBlockMap {
    fn default() -> Self {
        Self {
            ns: default_namespace(),
            hash_method: default_hash_method(),
            files: Default::default(),
        }
    }
}

/// Represents a file contained in the package.
#[derive(Clone, Debug, Default, Serialize)]
pub struct File {
    /// Root path and file name, backslash separated.
    #[serde(rename = "Name")]
    pub name: String,
    /// Size, in bytes, of the file's uncompressed data.
    #[serde(rename = "Size")]
    pub size: u64,
    /// Blocks that make up the file.
    #[serde(rename = "Block")]
    pub blocks: Vec<Block>,
}

/// Represents a 64kib block of binary data contained in a file.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Block {
    /// The hash value of the uncompressed data block.
    #[serde(rename = "Hash")]
    pub hash: String,
    /// The size, in bytes, of the data block when stored in the package. Only
    /// present for deflated files; the size of each compressed block
    /// potentially varies.
    #[serde(rename = "Size")]
    pub size: Option<u32>,
}

fn default_namespace() -> String {
    "http://schemas.microsoft.com/appx/2010/blockmap".into()
}

fn default_hash_method() -> String {
    "http://www.w3.org/2001/04/xmlenc#sha256".into()
}
