use std::io::Cursor;
use std::path::Path;

use crate::error::PlistError;

const BINARY_MAGIC: &[u8] = b"bplist";

pub fn is_binary_plist(bytes: &[u8]) -> bool {
    bytes.starts_with(BINARY_MAGIC)
}

/// Re-encodes a binary property list as XML so it can be diffed and redacted.
pub fn binary_to_xml(path: &Path, bytes: &[u8]) -> Result<String, PlistError> {
    let value =
        plist::Value::from_reader(Cursor::new(bytes)).map_err(|source| PlistError::Convert {
            path: path.to_path_buf(),
            source,
        })?;

    let mut xml = Vec::new();
    value
        .to_writer_xml(&mut xml)
        .map_err(|source| PlistError::Convert {
            path: path.to_path_buf(),
            source,
        })?;
    String::from_utf8(xml).map_err(|_| PlistError::Encoding {
        path: path.to_path_buf(),
    })
}
