// SPDX-License-Identifier: MPL-2.0

//! Host file primitives. All failures are fatal resource errors naming the
//! path and the system error.

use std::{fs, path::Path};

use log::debug;

use crate::{
    error::{Error, ErrorKind, Result},
    return_errno_with_message,
};

/// Returns the size of the file at `path` in bytes.
pub fn image_size(path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let metadata = fs::metadata(path).map_err(|err| Error::io("stat", path, err))?;
    if !metadata.is_file() {
        return_errno_with_message!(
            ErrorKind::Resource,
            "cannot read `{}`: not a regular file",
            path.display()
        );
    }
    match usize::try_from(metadata.len()) {
        Ok(size) => Ok(size),
        Err(_) => return_errno_with_message!(
            ErrorKind::Capacity,
            "`{}` is too large to embed",
            path.display()
        ),
    }
}

/// Reads the whole file at `path`.
pub fn read_image(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    debug!("reading {}", path.display());
    fs::read(path).map_err(|err| Error::io("read", path, err))
}

/// Reads the file at `path` into the start of `dst`.
///
/// `dst` was sized from an earlier [`image_size`]; a file that grew since
/// then no longer fits the planned layout.
pub fn load_image(path: impl AsRef<Path>, dst: &mut [u8]) -> Result<usize> {
    let path = path.as_ref();
    let data = read_image(path)?;
    if data.len() > dst.len() {
        return_errno_with_message!(
            ErrorKind::Resource,
            "`{}` changed size while building (0x{:x} > 0x{:x})",
            path.display(),
            data.len(),
            dst.len()
        );
    }
    dst[..data.len()].copy_from_slice(&data);
    Ok(data.len())
}
