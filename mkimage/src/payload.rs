// SPDX-License-Identifier: MPL-2.0

//! Packing of the auxiliary payloads into the module region.
//!
//! The region starts with a module-info record and continues with one
//! headered block per payload:
//!
//! ```text
//! +-------------+--------+-----------+--------+-----------+-----
//! | module info | header | payload 0 | header | payload 1 | ...
//! +-------------+--------+-----------+--------+-----------+-----
//! ```
//!
//! Packing happens in two phases. [`ModulePlan::new`] computes every size
//! and offset without touching the kernel blob; [`ModulePlan::place`] then
//! writes the region exactly as planned.

use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::{
    align::AlignExt,
    error::{ErrorKind, Result},
    file,
    geometry::{Geometry, ModuleInfoField},
    return_errno_with_message,
    target::TargetDescriptor,
};

/// The magic of the module-info record ("mimg").
pub const MODULE_MAGIC: u32 = 0x676d_696d;

/// Size of the `{ type: u32, size: u32 }` header in front of each payload.
pub const MODULE_HEADER_SIZE: usize = 8;

const MEMDISK_ALIGN: usize = 512;

/// The type tag of a payload, as understood by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ObjType {
    Elf = 0,
    Memdisk = 1,
    Config = 2,
    Prefix = 3,
    Pubkey = 4,
    Dtb = 5,
    Font = 6,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// One auxiliary input and its place in the module region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub typ: ObjType,
    pub source: PayloadSource,
    /// Size of the input as found on disk or in memory.
    pub raw_size: usize,
    /// Size the payload occupies in the module region.
    pub padded_size: usize,
}

impl Payload {
    /// Describes `raw_size` bytes of `typ` for `target`.
    ///
    /// The size recorded in the module header includes the header itself,
    /// and for public keys it is the exact key length, not the padded one.
    pub fn new(
        target: &TargetDescriptor,
        typ: ObjType,
        source: PayloadSource,
        raw_size: usize,
    ) -> Result<Self> {
        let padded_size = match typ {
            ObjType::Memdisk => target.align_addr(raw_size.align_up(MEMDISK_ALIGN))?,
            // The kernel reads the config as a C string.
            ObjType::Config => target.align_addr(raw_size + 1)?,
            _ => target.align_addr(raw_size)?,
        };
        Ok(Payload {
            typ,
            source,
            raw_size,
            padded_size,
        })
    }

    /// Describes the file at `path`, which must exist and be readable.
    pub fn from_file(
        target: &TargetDescriptor,
        typ: ObjType,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let raw_size = file::image_size(path)?;
        Self::new(target, typ, PayloadSource::File(path.to_path_buf()), raw_size)
    }

    /// Describes the prefix string, stored NUL-terminated.
    pub fn prefix(target: &TargetDescriptor, prefix: &str) -> Result<Self> {
        let mut bytes = prefix.as_bytes().to_vec();
        bytes.push(0);
        let raw_size = bytes.len();
        Self::new(target, ObjType::Prefix, PayloadSource::Bytes(bytes), raw_size)
    }

    pub fn header_size_field(&self) -> usize {
        let payload = match self.typ {
            ObjType::Pubkey => self.raw_size,
            _ => self.padded_size,
        };
        payload + MODULE_HEADER_SIZE
    }

    pub fn footprint(&self) -> usize {
        MODULE_HEADER_SIZE + self.padded_size
    }
}

/// The auxiliary inputs of one build, grouped by kind.
#[derive(Debug, Clone, Default)]
pub struct PayloadInputs<'a> {
    pub modules: &'a [PathBuf],
    pub pubkeys: &'a [PathBuf],
    pub memdisk: Option<&'a Path>,
    pub dtb: Option<&'a Path>,
    pub font: Option<&'a Path>,
    pub config: Option<&'a Path>,
    pub prefix: Option<&'a str>,
}

/// Describes all inputs in emission order: modules, public keys, memdisk,
/// device tree, font, config, prefix.
pub fn collect_payloads(
    target: &TargetDescriptor,
    inputs: &PayloadInputs<'_>,
) -> Result<Vec<Payload>> {
    let mut payloads = Vec::new();

    for path in inputs.modules {
        payloads.push(Payload::from_file(target, ObjType::Elf, path)?);
    }
    for (i, path) in inputs.pubkeys.iter().enumerate() {
        let key = Payload::from_file(target, ObjType::Pubkey, path)?;
        info!("the size of public key {} is 0x{:x}", i, key.padded_size);
        payloads.push(key);
    }
    if let Some(path) = inputs.memdisk {
        let memdisk = Payload::from_file(target, ObjType::Memdisk, path)?;
        info!("the size of memory disk is 0x{:x}", memdisk.padded_size);
        payloads.push(memdisk);
    }
    if let Some(path) = inputs.dtb {
        payloads.push(Payload::from_file(target, ObjType::Dtb, path)?);
    }
    if let Some(path) = inputs.font {
        payloads.push(Payload::from_file(target, ObjType::Font, path)?);
    }
    if let Some(path) = inputs.config {
        let config = Payload::from_file(target, ObjType::Config, path)?;
        info!("the size of config file is 0x{:x}", config.padded_size);
        payloads.push(config);
    }
    if let Some(prefix) = inputs.prefix {
        payloads.push(Payload::prefix(target, prefix)?);
    }

    Ok(payloads)
}

/// A payload with its offset from the start of the module region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPayload {
    pub payload: Payload,
    /// Offset of the module header.
    pub offset: usize,
}

/// The computed layout of a module region.
#[derive(Debug, Clone)]
pub struct ModulePlan {
    geometry: Geometry,
    entries: Vec<PlannedPayload>,
    total_size: usize,
}

impl ModulePlan {
    pub fn new(geometry: Geometry, payloads: Vec<Payload>) -> Result<Self> {
        let mut cursor = geometry.module_info_size();
        let mut entries = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let offset = cursor;
            cursor = match cursor.checked_add(payload.footprint()) {
                Some(next) => next,
                None => return_errno_with_message!(
                    ErrorKind::Capacity,
                    "the module region overflows"
                ),
            };
            entries.push(PlannedPayload { payload, offset });
        }
        info!("the total module size is 0x{:x}", cursor);
        Ok(ModulePlan {
            geometry,
            entries,
            total_size: cursor,
        })
    }

    /// Size of the whole region, module-info record included.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn entries(&self) -> &[PlannedPayload] {
        &self.entries
    }

    /// Puts the region into `image`, whose first `kernel_size` bytes are the
    /// kernel blob followed by `total_size` reserved bytes.
    ///
    /// When the target wants modules in front of the kernel, the kernel
    /// blob is moved up first and the region takes its place.
    pub fn place(
        &self,
        target: &TargetDescriptor,
        image: &mut [u8],
        kernel_size: usize,
    ) -> Result<()> {
        let full_size = kernel_size + self.total_size;
        if image.len() < full_size {
            return_errno_with_message!(
                ErrorKind::Format,
                "kernel image of 0x{:x} bytes has no room for 0x{:x} bytes of modules",
                image.len(),
                self.total_size
            );
        }

        let region = if target.modules_before_kernel() {
            image.copy_within(0..kernel_size, self.total_size);
            image[..self.total_size].fill(0);
            &mut image[..self.total_size]
        } else {
            &mut image[kernel_size..full_size]
        };
        let end = self.write(region)?;
        debug_assert_eq!(end, self.total_size);
        Ok(())
    }

    /// Writes the module-info record and every payload into `region`,
    /// returning the offset right after the last payload.
    pub fn write(&self, region: &mut [u8]) -> Result<usize> {
        let geometry = &self.geometry;
        let endian = geometry.endian();
        if region.len() < self.total_size {
            return_errno_with_message!(
                ErrorKind::Format,
                "module region of 0x{:x} bytes is smaller than planned 0x{:x}",
                region.len(),
                self.total_size
            );
        }

        geometry.put(
            region,
            0,
            geometry.module_info_field(ModuleInfoField::Magic),
            MODULE_MAGIC as u64,
        )?;
        geometry.put(
            region,
            0,
            geometry.module_info_field(ModuleInfoField::Offset),
            geometry.module_info_size() as u64,
        )?;
        geometry.put(
            region,
            0,
            geometry.module_info_field(ModuleInfoField::Size),
            self.total_size as u64,
        )?;

        let mut cursor = geometry.module_info_size();
        for PlannedPayload { payload, offset } in &self.entries {
            debug_assert_eq!(cursor, *offset);
            endian.put_u32(region, cursor, payload.typ as u32)?;
            endian.put_u32(region, cursor + 4, header_u32(payload.header_size_field())?)?;
            cursor += MODULE_HEADER_SIZE;

            let dst = &mut region[cursor..cursor + payload.padded_size];
            match &payload.source {
                PayloadSource::File(path) => {
                    debug!(
                        "embedding {:?} {} at 0x{:x}",
                        payload.typ,
                        path.display(),
                        cursor
                    );
                    file::load_image(path, dst)?;
                }
                PayloadSource::Bytes(bytes) => dst[..bytes.len()].copy_from_slice(bytes),
            }
            cursor += payload.padded_size;
        }

        Ok(cursor)
    }
}

fn header_u32(size: usize) -> Result<u32> {
    match u32::try_from(size) {
        Ok(size) => Ok(size),
        Err(_) => return_errno_with_message!(
            ErrorKind::Capacity,
            "payload of 0x{:x} bytes does not fit a module header",
            size
        ),
    }
}
