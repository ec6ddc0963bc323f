//! Container file layout.
//!
//! A container is an HDF5 file:
//!
//! ```text
//! /data               f64 [rows, cols]   chunked (window, cols), deflate, fill NaN
//! /variables/names    S{maxlen} [cols]   NUL-padded ASCII
//! /variables/ids      i32 [cols]
//! /timestamps         i64 [rows]         epoch milliseconds, deflate
//! @start, @end        i64 scalars        epoch milliseconds
//! ```
//!
//! Chunks of `data` that were never written stay unallocated and read back as
//! the NaN fill value.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use hdf5::types::FixedAscii;

use crate::{Error, Result};

pub const CONTAINER_EXTENSION: &str = "h5";

/// First eight bytes of every HDF5 file without a user block.
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];

pub const DATA: &str = "data";
pub const VARIABLES: &str = "variables";
pub const NAMES: &str = "names";
pub const IDS: &str = "ids";
pub const TIMESTAMPS: &str = "timestamps";
pub const ATTR_START: &str = "start";
pub const ATTR_END: &str = "end";

/// Longest variable name a container can hold. Names are stored with the
/// exact width of the longest one; this only bounds the in-memory buffer.
pub const NAME_CAPACITY: usize = 255;

pub type StoredName = FixedAscii<NAME_CAPACITY>;

pub fn stored_name(name: &str) -> Result<StoredName> {
    StoredName::from_ascii(name.as_bytes())
        .map_err(|err| Error::Format(format!("variable name {name:?} cannot be stored: {err}")))
}

/// Width of the `variables/names` string type.
pub fn name_width<'a>(names: impl IntoIterator<Item = &'a str>) -> usize {
    names.into_iter().map(str::len).max().unwrap_or(0).max(1)
}

pub fn chunk_count(rows: usize, chunk_rows: usize) -> usize {
    if chunk_rows == 0 {
        return 0;
    }
    rows.div_ceil(chunk_rows)
}

/// Reject files that are not HDF5 before handing them to the library.
pub fn check_signature(path: &Path) -> Result<()> {
    let mut magic = [0u8; HDF5_SIGNATURE.len()];
    match File::open(path)?.read_exact(&mut magic) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
            return Err(Error::Corrupt("container shorter than HDF5 signature"));
        }
        Err(err) => return Err(err.into()),
    }
    if magic != HDF5_SIGNATURE {
        return Err(Error::Corrupt("missing HDF5 signature"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(chunk_count(0, 1000), 0);
        assert_eq!(chunk_count(2500, 1000), 3);
        assert_eq!(chunk_count(2000, 1000), 2);
        assert_eq!(chunk_count(5, 0), 0);
    }

    #[test]
    fn names_fit_the_longest() {
        assert_eq!(name_width(["rpm", "coolant"]), 7);
        assert_eq!(name_width([]), 1);
        assert_eq!(stored_name("EngineRPM").unwrap().as_str(), "EngineRPM");
        assert!(stored_name("température").is_err());
        assert!(stored_name(&"x".repeat(NAME_CAPACITY + 1)).is_err());
    }

    #[test]
    fn signature_check() {
        let dir = tempfile::tempdir().unwrap();
        let short = dir.path().join("short.h5");
        std::fs::write(&short, b"\x89HDF").unwrap();
        assert!(matches!(check_signature(&short), Err(Error::Corrupt(_))));

        let other = dir.path().join("other.h5");
        std::fs::write(&other, b"TLMRUN01 and more").unwrap();
        assert!(matches!(check_signature(&other), Err(Error::Corrupt(_))));

        let good = dir.path().join("good.h5");
        std::fs::write(&good, HDF5_SIGNATURE).unwrap();
        assert!(check_signature(&good).is_ok());
    }
}
