// SPDX-License-Identifier: MPL-2.0

//! Compression of the core image and attachment of the decompressor stub.

use std::{io::Write, path::Path, str::FromStr};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use liblzma::{
    stream::{Check, Filters, LzmaOptions, Stream},
    write::XzEncoder,
};

use crate::{
    error::{Error, ErrorKind, Result},
    file, return_errno_with_message,
    target::{PatchField, TargetDescriptor, patch_u32},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compression {
    /// Use the default of the target.
    #[default]
    Auto,
    None,
    Xz,
    Lzma,
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Self::Auto),
            "none" => Ok(Self::None),
            "xz" => Ok(Self::Xz),
            "lzma" => Ok(Self::Lzma),
            _ => return_errno_with_message!(ErrorKind::Config, "unknown compression format {}", s),
        }
    }
}

impl Compression {
    pub fn resolve(self, target: &TargetDescriptor) -> Compression {
        match self {
            Compression::Auto => target.default_compression,
            comp => comp,
        }
    }

    /// The file name of the decompressor stub that undoes this scheme.
    pub fn decompressor_name(self) -> Result<&'static str> {
        match self {
            Compression::Xz => Ok("xz_decompress.img"),
            Compression::Lzma => Ok("lzma_decompress.img"),
            Compression::None => Ok("none_decompress.img"),
            Compression::Auto => return_errno_with_message!(
                ErrorKind::Config,
                "compression must be resolved before choosing a decompressor"
            ),
        }
    }
}

/// Dictionary size for boot-time decompressors, which run with little memory.
pub const LZMA_DICT_SIZE: u32 = 1 << 16;

fn lzma_options() -> Result<LzmaOptions> {
    let mut opts = LzmaOptions::new_preset(6).map_err(codec_error)?;
    opts.dict_size(LZMA_DICT_SIZE)
        .literal_context_bits(3)
        .literal_position_bits(0)
        .position_bits(2);
    Ok(opts)
}

/// The filter chain of the raw LZMA stream expected by `lzma_decompress.img`.
pub fn lzma_filters() -> Result<Filters> {
    let opts = lzma_options()?;
    let mut filters = Filters::new();
    filters.lzma1(&opts);
    Ok(filters)
}

fn codec_error(err: liblzma::stream::Error) -> Error {
    Error::with_message(
        ErrorKind::Format,
        format!("cannot compress the kernel image: {}", err),
    )
}

fn encode(stream: Stream, input: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = XzEncoder::new_stream(Vec::with_capacity(input.len() / 2), stream);
    let write_err = |err: std::io::Error| {
        Error::with_message(
            ErrorKind::Format,
            format!("cannot compress the kernel image: {}", err),
        )
    };
    encoder.write_all(input).map_err(write_err)?;
    encoder.finish().map_err(write_err)
}

fn compress_lzma(input: &[u8]) -> Result<Vec<u8>> {
    let stream = Stream::new_raw_encoder(&lzma_filters()?).map_err(codec_error)?;
    encode(stream, input)
}

fn compress_xz(input: &[u8]) -> Result<Vec<u8>> {
    let mut filters = Filters::new();
    filters.lzma2(&lzma_options()?);
    let stream = Stream::new_stream_encoder(&filters, Check::Crc32).map_err(codec_error)?;
    encode(stream, input)
}

/// Compresses the kernel blob together with its module region.
///
/// Only targets with a decompressor stub can undo a compression, so for
/// every other target this is the identity.
pub fn compress_core(
    target: &TargetDescriptor,
    kernel: Vec<u8>,
    comp: Compression,
) -> Result<Vec<u8>> {
    if !target.needs_decompressor() {
        if comp != Compression::None {
            debug!(
                "{} has no decompressor, ignoring compression {:?}",
                target, comp
            );
        }
        return Ok(kernel);
    }

    match comp {
        Compression::None => Ok(kernel),
        Compression::Lzma => compress_lzma(&kernel),
        Compression::Xz => compress_xz(&kernel),
        Compression::Auto => {
            return_errno_with_message!(ErrorKind::Config, "unknown compression {:?}", comp)
        }
    }
}

/// Values patched into the decompressor stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubFields {
    pub compressed_size: usize,
    pub uncompressed_size: usize,
    pub uncompressed_addr: u64,
}

impl StubFields {
    pub fn new(
        target: &TargetDescriptor,
        core_size: usize,
        kernel_size: usize,
        total_module_size: usize,
    ) -> Result<Self> {
        let uncompressed_addr = if target.modules_before_kernel() {
            target.link_addr.checked_sub(total_module_size as u64)
        } else {
            Some(target.link_addr)
        };
        let Some(uncompressed_addr) = uncompressed_addr else {
            return_errno_with_message!(
                ErrorKind::Capacity,
                "modules (0x{:x} bytes) do not fit below the link address 0x{:x}",
                total_module_size,
                target.link_addr
            );
        };
        Ok(StubFields {
            compressed_size: core_size,
            uncompressed_size: kernel_size + total_module_size,
            uncompressed_addr,
        })
    }
}

fn to_u32<T: TryInto<u32> + Copy + std::fmt::LowerHex>(value: T, what: &str) -> Result<u32> {
    match value.try_into() {
        Ok(v) => Ok(v),
        Err(_) => return_errno_with_message!(
            ErrorKind::Capacity,
            "{} 0x{:x} does not fit in 32 bits",
            what,
            value
        ),
    }
}

/// Patches `stub` in place with the sizes and address of the core image.
pub fn patch_decompressor(
    target: &TargetDescriptor,
    stub: &mut [u8],
    fields: &StubFields,
) -> Result<()> {
    patch_u32(
        stub,
        target,
        PatchField::CompressedSize,
        to_u32(fields.compressed_size, "compressed size")?,
    )?;
    patch_u32(
        stub,
        target,
        PatchField::UncompressedSize,
        to_u32(fields.uncompressed_size, "uncompressed size")?,
    )?;
    patch_u32(
        stub,
        target,
        PatchField::UncompressedAddr,
        to_u32(fields.uncompressed_addr, "uncompressed address")?,
    )?;
    Ok(())
}

/// Reads the stub matching `comp` from `dir`, patches it and puts it in
/// front of `core`.
pub fn attach_decompressor(
    target: &TargetDescriptor,
    dir: &Path,
    comp: Compression,
    core: &[u8],
    fields: &StubFields,
) -> Result<Vec<u8>> {
    let stub_path = dir.join(comp.decompressor_name()?);
    let mut image = file::read_image(&stub_path)?;
    let stub_size = image.len();
    patch_decompressor(target, &mut image, fields)?;

    image.extend_from_slice(core);
    info!(
        "the decompressor {} is 0x{:x} bytes, the full image 0x{:x} bytes",
        stub_path.display(),
        stub_size,
        image.len()
    );
    Ok(image)
}
