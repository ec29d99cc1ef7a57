// SPDX-License-Identifier: MPL-2.0

//! Word-width dependent record layouts.
//!
//! The module-info record and the PE optional header come in a 32-bit and a
//! 64-bit shape. A [`Geometry`] is selected once per build from the target
//! and hands out [`FieldRef`]s, so the code filling these records never
//! branches on the word width itself.
//!
//! The PE32 and PE32+ optional header layouts are defined in the Microsoft
//! PE/COFF specification:
//! <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format>

use crate::{
    endian::Endian,
    error::Result,
    target::{TargetDescriptor, WordWidth},
};

/// Location and width of a field inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    pub offset: usize,
    pub width: usize,
}

const fn field(offset: usize, width: usize) -> FieldRef {
    FieldRef { offset, width }
}

/// Fields of the record the kernel uses to find its module region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleInfoField {
    Magic,
    Offset,
    Size,
}

/// Fields of the PE optional header filled in by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptHdrField {
    Magic,
    CodeSize,
    DataSize,
    BssSize,
    EntryAddr,
    CodeBase,
    /// Only present in PE32.
    DataBase,
    ImageBase,
    SectionAlignment,
    FileAlignment,
    ImageSize,
    HeaderSize,
    Subsystem,
    StackReserveSize,
    StackCommitSize,
    HeapReserveSize,
    HeapCommitSize,
    NumDataDirectories,
    BaseRelocationRva,
    BaseRelocationSize,
}

/// The number of data directories, which is fixed regardless of which of
/// them are used.
pub const PE_NUM_DATA_DIRECTORIES: u32 = 16;
const PE_DATA_DIRECTORY_SIZE: usize = 8;
const PE_BASE_RELOCATION_DIRECTORY: usize = 5;

const PE32_MAGIC: u16 = 0x010b;
const PE32PLUS_MAGIC: u16 = 0x020b;

struct OptHdrLayout {
    magic: u16,
    data_base: Option<FieldRef>,
    image_base: FieldRef,
    /// Width of the stack and heap size fields.
    reserve_width: usize,
    /// Offset of the stack reserve field; the other three follow.
    reserve_offset: usize,
    /// Offset of `loader_flags`, followed by the data directory count.
    loader_flags: usize,
}

impl OptHdrLayout {
    fn data_dirs(&self) -> usize {
        self.loader_flags + 8
    }

    fn size(&self) -> usize {
        self.data_dirs() + PE_NUM_DATA_DIRECTORIES as usize * PE_DATA_DIRECTORY_SIZE
    }
}

static PE32_OPT_HDR: OptHdrLayout = OptHdrLayout {
    magic: PE32_MAGIC,
    data_base: Some(field(24, 4)),
    image_base: field(28, 4),
    reserve_width: 4,
    reserve_offset: 72,
    loader_flags: 88,
};

static PE32PLUS_OPT_HDR: OptHdrLayout = OptHdrLayout {
    magic: PE32PLUS_MAGIC,
    data_base: None,
    image_base: field(24, 8),
    reserve_width: 8,
    reserve_offset: 72,
    loader_flags: 104,
};

#[derive(Clone, Copy)]
pub struct Geometry {
    word: WordWidth,
    endian: Endian,
    opt_hdr: &'static OptHdrLayout,
}

impl core::fmt::Debug for Geometry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Geometry")
            .field("word", &self.word)
            .field("endian", &self.endian)
            .finish()
    }
}

impl Geometry {
    pub fn new(word: WordWidth, endian: Endian) -> Self {
        let opt_hdr = match word {
            WordWidth::W32 => &PE32_OPT_HDR,
            WordWidth::W64 => &PE32PLUS_OPT_HDR,
        };
        Geometry {
            word,
            endian,
            opt_hdr,
        }
    }

    pub fn of(target: &TargetDescriptor) -> Self {
        Self::new(target.word, target.endian)
    }

    pub fn word(&self) -> WordWidth {
        self.word
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn module_info_size(&self) -> usize {
        match self.word {
            WordWidth::W32 => 12,
            WordWidth::W64 => 24,
        }
    }

    pub fn module_info_field(&self, which: ModuleInfoField) -> FieldRef {
        match (self.word, which) {
            (_, ModuleInfoField::Magic) => field(0, 4),
            (WordWidth::W32, ModuleInfoField::Offset) => field(4, 4),
            (WordWidth::W32, ModuleInfoField::Size) => field(8, 4),
            (WordWidth::W64, ModuleInfoField::Offset) => field(8, 8),
            (WordWidth::W64, ModuleInfoField::Size) => field(16, 8),
        }
    }

    pub fn optional_header_size(&self) -> usize {
        self.opt_hdr.size()
    }

    pub fn optional_header_magic(&self) -> u16 {
        self.opt_hdr.magic
    }

    /// Returns `None` for fields the header shape does not have.
    pub fn optional_header_field(&self, which: OptHdrField) -> Option<FieldRef> {
        let layout = self.opt_hdr;
        let reserve = |index: usize| {
            field(
                layout.reserve_offset + index * layout.reserve_width,
                layout.reserve_width,
            )
        };
        let data_dir = |index: usize, second: bool| {
            field(
                layout.data_dirs()
                    + index * PE_DATA_DIRECTORY_SIZE
                    + if second { 4 } else { 0 },
                4,
            )
        };
        let found = match which {
            OptHdrField::Magic => field(0, 2),
            OptHdrField::CodeSize => field(4, 4),
            OptHdrField::DataSize => field(8, 4),
            OptHdrField::BssSize => field(12, 4),
            OptHdrField::EntryAddr => field(16, 4),
            OptHdrField::CodeBase => field(20, 4),
            OptHdrField::DataBase => return layout.data_base,
            OptHdrField::ImageBase => layout.image_base,
            OptHdrField::SectionAlignment => field(32, 4),
            OptHdrField::FileAlignment => field(36, 4),
            OptHdrField::ImageSize => field(56, 4),
            OptHdrField::HeaderSize => field(60, 4),
            OptHdrField::Subsystem => field(68, 2),
            OptHdrField::StackReserveSize => reserve(0),
            OptHdrField::StackCommitSize => reserve(1),
            OptHdrField::HeapReserveSize => reserve(2),
            OptHdrField::HeapCommitSize => reserve(3),
            OptHdrField::NumDataDirectories => field(layout.loader_flags + 4, 4),
            OptHdrField::BaseRelocationRva => data_dir(PE_BASE_RELOCATION_DIRECTORY, false),
            OptHdrField::BaseRelocationSize => data_dir(PE_BASE_RELOCATION_DIRECTORY, true),
        };
        Some(found)
    }

    /// Writes `value` into the field `at` of a record starting at `base`.
    pub fn put(&self, buf: &mut [u8], base: usize, at: FieldRef, value: u64) -> Result<()> {
        self.endian.put_uint(buf, base + at.offset, at.width, value)
    }
}
