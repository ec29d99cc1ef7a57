// SPDX-License-Identifier: MPL-2.0

//! The table of image targets the builder knows how to produce.

use std::fmt::{self, Display, Formatter};

use crate::{
    compress::Compression,
    endian::Endian,
    error::{ErrorKind, Result},
    return_errno_with_message,
};

/// The width of a target pointer, which is also the payload alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum WordWidth {
    W32 = 4,
    W64 = 8,
}

impl WordWidth {
    pub const fn bytes(self) -> usize {
        self as usize
    }
}

/// The CPU architecture the image runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    I386,
    X86_64,
    Arm,
    Arm64,
    RiscV32,
    RiscV64,
}

/// The `machine` field values of the COFF header. Not exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PeMachine {
    I386 = 0x014c,
    ArmThumbMixed = 0x01c2,
    RiscV32 = 0x5032,
    RiscV64 = 0x5064,
    Amd64 = 0x8664,
    Arm64 = 0xaa64,
}

/// How the core image is wrapped on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Coreboot-style raw image: the core image is the whole file.
    Raw,
    /// A PE32 or PE32+ EFI application, depending on the word width.
    Pe { machine: PeMachine },
}

bitflags::bitflags! {
    pub struct PlatformFlags: u32 {
        /// The core image is prefixed by a decompressor stub.
        const DECOMPRESSORS          = 1 << 0;
        /// The module region is placed in front of the kernel blob.
        const MODULES_BEFORE_KERNEL  = 1 << 1;
    }
}

/// A 32-bit field that is only known after layout and must be patched
/// into an already produced buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchField {
    TotalModuleSize,
    CompressedSize,
    UncompressedSize,
    UncompressedAddr,
}

/// Byte offsets of the [`PatchField`]s a target carries.
///
/// `TotalModuleSize` lives in the kernel blob, the others in the
/// decompressor stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchOffsets {
    pub total_module_size: Option<usize>,
    pub compressed_size: Option<usize>,
    pub uncompressed_size: Option<usize>,
    pub uncompressed_addr: Option<usize>,
}

impl PatchOffsets {
    pub const NONE: Self = PatchOffsets {
        total_module_size: None,
        compressed_size: None,
        uncompressed_size: None,
        uncompressed_addr: None,
    };

    pub fn offset(&self, field: PatchField) -> Option<usize> {
        match field {
            PatchField::TotalModuleSize => self.total_module_size,
            PatchField::CompressedSize => self.compressed_size,
            PatchField::UncompressedSize => self.uncompressed_size,
            PatchField::UncompressedAddr => self.uncompressed_addr,
        }
    }
}

/// An immutable description of one image target.
#[derive(Debug, Clone)]
pub struct TargetDescriptor {
    /// The name of the platform directory holding `kernel.img` and modules.
    pub dirname: &'static str,
    /// Accepted names; the first one is the display name.
    pub names: &'static [&'static str],
    pub arch: Arch,
    pub word: WordWidth,
    pub endian: Endian,
    pub container: ContainerKind,
    pub flags: PlatformFlags,
    pub patches: PatchOffsets,
    pub default_compression: Compression,
    pub link_addr: u64,
    pub section_align: u32,
    pub file_align: u32,
}

pub const PE_SECTION_ALIGNMENT: u32 = 0x1000;
pub const PE_FILE_ALIGNMENT: u32 = 0x200;

const I386_COREBOOT_LINK_ADDR: u64 = 0x8200;

const fn efi_target(
    name: &'static [&'static str],
    arch: Arch,
    word: WordWidth,
    machine: PeMachine,
) -> TargetDescriptor {
    TargetDescriptor {
        dirname: name[0],
        names: name,
        arch,
        word,
        endian: Endian::Little,
        container: ContainerKind::Pe { machine },
        flags: PlatformFlags::empty(),
        patches: PatchOffsets::NONE,
        default_compression: Compression::None,
        link_addr: 0,
        section_align: PE_SECTION_ALIGNMENT,
        file_align: PE_FILE_ALIGNMENT,
    }
}

static TARGETS: [TargetDescriptor; 7] = [
    TargetDescriptor {
        dirname: "i386-multiboot",
        names: &["i386-multiboot"],
        arch: Arch::I386,
        word: WordWidth::W32,
        endian: Endian::Little,
        container: ContainerKind::Raw,
        flags: PlatformFlags::empty(),
        patches: PatchOffsets::NONE,
        default_compression: Compression::None,
        link_addr: I386_COREBOOT_LINK_ADDR,
        section_align: 1,
        file_align: 4,
    },
    efi_target(&["i386-efi"], Arch::I386, WordWidth::W32, PeMachine::I386),
    efi_target(&["x86_64-efi"], Arch::X86_64, WordWidth::W64, PeMachine::Amd64),
    efi_target(
        &["arm-efi"],
        Arch::Arm,
        WordWidth::W32,
        PeMachine::ArmThumbMixed,
    ),
    efi_target(&["arm64-efi"], Arch::Arm64, WordWidth::W64, PeMachine::Arm64),
    efi_target(
        &["riscv32-efi"],
        Arch::RiscV32,
        WordWidth::W32,
        PeMachine::RiscV32,
    ),
    efi_target(
        &["riscv64-efi"],
        Arch::RiscV64,
        WordWidth::W64,
        PeMachine::RiscV64,
    ),
];

/// Finds the target accepting `name` as one of its aliases.
pub fn lookup(name: &str) -> Option<&'static TargetDescriptor> {
    TARGETS
        .iter()
        .find(|target| target.names.iter().any(|alias| *alias == name))
}

/// Display names of all targets, in table order.
pub fn list_names() -> impl Iterator<Item = &'static str> {
    TARGETS.iter().map(|target| target.name())
}

/// The display names joined for help and diagnostic text.
pub fn targets_string() -> String {
    list_names().collect::<Vec<_>>().join(", ")
}

impl TargetDescriptor {
    pub fn name(&self) -> &'static str {
        self.names[0]
    }

    pub fn dirname(&self) -> &'static str {
        self.dirname
    }

    pub fn is_pe(&self) -> bool {
        matches!(self.container, ContainerKind::Pe { .. })
    }

    pub fn needs_decompressor(&self) -> bool {
        self.flags.contains(PlatformFlags::DECOMPRESSORS)
    }

    pub fn modules_before_kernel(&self) -> bool {
        self.flags.contains(PlatformFlags::MODULES_BEFORE_KERNEL)
    }

    /// Rounds `size` up to the target word size.
    pub fn align_addr(&self, size: usize) -> Result<usize> {
        use crate::align::AlignExt;
        match size.checked_align_up(self.word.bytes()) {
            Some(aligned) => Ok(aligned),
            None => return_errno_with_message!(
                ErrorKind::Capacity,
                "size 0x{:x} overflows when aligned",
                size
            ),
        }
    }
}

impl Display for TargetDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Writes `value` into `buf` at the target's offset for `field`.
///
/// Returns `false` without touching `buf` when the target does not carry
/// the field.
pub fn patch_u32(
    buf: &mut [u8],
    target: &TargetDescriptor,
    field: PatchField,
    value: u32,
) -> Result<bool> {
    let Some(offset) = target.patches.offset(field) else {
        return Ok(false);
    };
    log::debug!("patching {:?} at 0x{:x} with 0x{:x}", field, offset, value);
    target.endian.put_u32(buf, offset, value)?;
    Ok(true)
}
