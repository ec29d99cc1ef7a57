// SPDX-License-Identifier: MPL-2.0

//! PE32 and PE32+ EFI applications.
//!
//! The definition of the PE/COFF format is in the Microsoft PE/COFF specification:
//! <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format>
//!
//! The file looks like this, every part after the headers starting at a
//! multiple of [`PE_FILE_ALIGNMENT`]:
//!
//! ```text
//! +---------+-------+-------+------+-------+--------+
//! | headers | .text | .data | mods | .sbat | .reloc |
//! +---------+-------+-------+------+-------+--------+
//! ```
//!
//! `.text` and `.data` cover the kernel blob, `mods` the module region and
//! any padding up to the optional `.sbat` metadata.

use std::path::Path;

use log::{debug, info};

use crate::{
    align::AlignExt,
    error::{ErrorKind, Result},
    file,
    geometry::{Geometry, OptHdrField, PE_NUM_DATA_DIRECTORIES},
    kernel::Layout,
    return_errno_with_message,
    target::{PE_FILE_ALIGNMENT, PeMachine, TargetDescriptor, WordWidth},
};

const PE_FILE_ALIGN: usize = PE_FILE_ALIGNMENT as usize;

// The MS-DOS header and stub, with `e_lfanew` pointing right behind it.
const MSDOS_STUB: [u8; 128] = [
    0x4d, 0x5a, 0x90, 0x00, 0x03, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0xff, 0xff, 0x00, 0x00,
    0xb8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00,
    0x0e, 0x1f, 0xba, 0x0e, 0x00, 0xb4, 0x09, 0xcd, 0x21, 0xb8, 0x01, 0x4c, 0xcd, 0x21, 0x54, 0x68,
    0x69, 0x73, 0x20, 0x70, 0x72, 0x6f, 0x67, 0x72, 0x61, 0x6d, 0x20, 0x63, 0x61, 0x6e, 0x6e, 0x6f,
    0x74, 0x20, 0x62, 0x65, 0x20, 0x72, 0x75, 0x6e, 0x20, 0x69, 0x6e, 0x20, 0x44, 0x4f, 0x53, 0x20,
    0x6d, 0x6f, 0x64, 0x65, 0x2e, 0x0d, 0x0d, 0x0a, 0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

// The `magic` field in PE header.
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";

pub const COFF_HEADER_OFFSET: usize = MSDOS_STUB.len() + PE_SIGNATURE.len();
const COFF_HEADER_SIZE: usize = 20;
const SECTION_HEADER_SIZE: usize = 40;
const SECTION_NAME_SIZE: usize = 8;
// The header is sized for this many section headers; `.sbat` fits in the
// padding up to the file alignment.
const RESERVED_SECTION_HEADERS: usize = 4;

/// 2015-01-01T00:00:00+0000, so that builds are reproducible.
pub const STABLE_EMBEDDING_TIMESTAMP: u32 = 1_420_070_400;

const STACK_HEAP_SIZE: u64 = 0x10000;

// The `subsystem` field choices in the optional header. Not exhaustive.
#[derive(Clone, Copy)]
#[repr(u16)]
enum PeImageSubsystem {
    EfiApplication = 10,
}

// The `characteristics` field choices in the COFF header. Not exhaustive.
bitflags::bitflags! {
    pub struct PeFlags: u16 {
        const EXECUTABLE_IMAGE          = 1 << 1;
        const LINE_NUMS_STRIPPED        = 1 << 2;
        const LOCAL_SYMS_STRIPPED       = 1 << 3;
        const THIRTY_TWO_BIT_MACHINE    = 1 << 8;
        const DEBUG_STRIPPED            = 1 << 9;
    }
}

// The `characteristics` field choices in the section header. Not exhaustive.
bitflags::bitflags! {
    pub struct PeSectionHdrFlags: u32 {
        const CNT_CODE                  = 1 << 5;
        const CNT_INITIALIZED_DATA      = 1 << 6;
        const MEM_DISCARDABLE           = 1 << 25;
        const MEM_EXECUTE               = 1 << 29;
        const MEM_READ                  = 1 << 30;
        const MEM_WRITE                 = 1 << 31;
    }
}

/// Size of all headers for the given word width, rounded up to the file
/// alignment.
pub fn header_size(geometry: &Geometry) -> usize {
    (COFF_HEADER_OFFSET
        + COFF_HEADER_SIZE
        + geometry.optional_header_size()
        + RESERVED_SECTION_HEADERS * SECTION_HEADER_SIZE)
        .align_up(PE_FILE_ALIGN)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeSectionHdr {
    pub name: &'static str,
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub raw_data_size: u32,
    pub raw_data_offset: u32,
    pub flags: PeSectionHdrFlags,
}

impl PeSectionHdr {
    fn write(&self, buf: &mut [u8], at: usize, geometry: &Geometry) -> Result<()> {
        let endian = geometry.endian();
        let name = self.name.as_bytes();
        buf[at..at + name.len()].copy_from_slice(name);
        endian.put_u32(buf, at + 8, self.virtual_size)?;
        endian.put_u32(buf, at + 12, self.virtual_address)?;
        endian.put_u32(buf, at + 16, self.raw_data_size)?;
        endian.put_u32(buf, at + 20, self.raw_data_offset)?;
        // Relocations and line numbers are left zero.
        endian.put_u32(buf, at + 36, self.flags.bits())?;
        Ok(())
    }
}

/// The virtual address and file offset the next section starts at.
struct SectionCursor {
    vma: u32,
    raw_data: u32,
    section_align: u32,
}

impl SectionCursor {
    fn append(
        &mut self,
        name: &'static str,
        size: u32,
        flags: PeSectionHdrFlags,
    ) -> Result<PeSectionHdr> {
        if name.len() > SECTION_NAME_SIZE {
            return_errno_with_message!(
                ErrorKind::Config,
                "section name {} length is bigger than {}",
                name,
                SECTION_NAME_SIZE
            );
        }
        debug_assert!(self.raw_data.is_aligned_to(PE_FILE_ALIGNMENT));
        let section = PeSectionHdr {
            name,
            virtual_size: size,
            virtual_address: self.vma,
            raw_data_size: size,
            raw_data_offset: self.raw_data,
            flags,
        };
        self.vma = advance(self.vma, size, self.section_align)?;
        self.raw_data = advance(self.raw_data, size, PE_FILE_ALIGNMENT)?;
        debug!(
            "section {} at va 0x{:x}, file offset 0x{:x}, 0x{:x} bytes",
            name, section.virtual_address, section.raw_data_offset, size
        );
        Ok(section)
    }
}

fn advance(pos: u32, size: u32, align: u32) -> Result<u32> {
    match pos.checked_add(size).and_then(|end| end.checked_align_up(align)) {
        Some(next) => Ok(next),
        None => return_errno_with_message!(
            ErrorKind::Capacity,
            "the PE image exceeds the 32-bit address space"
        ),
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    match u32::try_from(value) {
        Ok(value) => Ok(value),
        Err(_) => return_errno_with_message!(
            ErrorKind::Capacity,
            "{} 0x{:x} does not fit in a PE header",
            what,
            value
        ),
    }
}

fn align_file(value: usize) -> Result<usize> {
    match value.checked_align_up(PE_FILE_ALIGN) {
        Some(value) => Ok(value),
        None => return_errno_with_message!(ErrorKind::Capacity, "size 0x{:x} overflows", value),
    }
}

/// The complete layout of a PE image, computed before any byte is written.
#[derive(Debug, Clone)]
pub struct PePlan {
    geometry: Geometry,
    header_size: usize,
    image_size: usize,
    section_align: u32,
    entry_addr: u64,
    code_base: u32,
    code_size: u32,
    data_size: u32,
    /// The file-aligned size of `.sbat`, present whenever metadata is
    /// embedded, even an empty file.
    sbat_size: Option<usize>,
    sections: Vec<PeSectionHdr>,
    reloc_rva: u32,
}

impl PePlan {
    /// Lays out a core image of `core_size` bytes holding the kernel
    /// described by `layout` and `total_module_size` bytes of modules.
    ///
    /// `sbat_size` is the size of the secure-boot metadata file, if any.
    pub fn new(
        target: &TargetDescriptor,
        core_size: usize,
        layout: &Layout,
        total_module_size: usize,
        sbat_size: Option<usize>,
    ) -> Result<Self> {
        let geometry = Geometry::of(target);
        let header_size = header_size(&geometry);
        let sbat_size = match sbat_size {
            Some(size) => Some(align_file(target.align_addr(size)?)?),
            None => None,
        };
        let sbat_space = sbat_size.unwrap_or(0);
        let reloc_size = layout.reloc_size();
        let reloc_space = align_file(reloc_size)?;
        let image_size = align_file(header_size + core_size)? + reloc_space + sbat_space;
        info!(
            "the PE header is 0x{:x} bytes, the image 0x{:x} bytes",
            header_size, image_size
        );

        let mut cursor = SectionCursor {
            vma: to_u32(header_size, "header size")?,
            raw_data: to_u32(header_size, "header size")?,
            section_align: target.section_align,
        };
        let mut sections = Vec::with_capacity(RESERVED_SECTION_HEADERS + 1);

        let code_base = cursor.vma;
        let code_size = to_u32(layout.exec_size, "executable size")?;
        sections.push(cursor.append(
            ".text",
            code_size,
            PeSectionHdrFlags::CNT_CODE | PeSectionHdrFlags::MEM_EXECUTE | PeSectionHdrFlags::MEM_READ,
        )?);

        let Some(data) = layout.kernel_size.checked_sub(layout.exec_size) else {
            return_errno_with_message!(
                ErrorKind::Format,
                "executable size 0x{:x} exceeds kernel size 0x{:x}",
                layout.exec_size,
                layout.kernel_size
            );
        };
        let data_scn = align_file(data)?;
        let data_size = to_u32(
            data_scn + sbat_space + align_file(total_module_size)?,
            "data size",
        )?;
        sections.push(cursor.append(
            ".data",
            to_u32(data_scn, "data section size")?,
            PeSectionHdrFlags::CNT_INITIALIZED_DATA
                | PeSectionHdrFlags::MEM_READ
                | PeSectionHdrFlags::MEM_WRITE,
        )?);

        let mods_end = image_size - reloc_space - sbat_space;
        let Some(mods_size) = mods_end.checked_sub(cursor.raw_data as usize) else {
            return_errno_with_message!(
                ErrorKind::Format,
                "core image of 0x{:x} bytes is smaller than the kernel sections",
                core_size
            );
        };
        sections.push(cursor.append(
            "mods",
            to_u32(mods_size, "module section size")?,
            PeSectionHdrFlags::CNT_INITIALIZED_DATA
                | PeSectionHdrFlags::MEM_READ
                | PeSectionHdrFlags::MEM_WRITE,
        )?);

        if let Some(size) = sbat_size {
            sections.push(cursor.append(
                ".sbat",
                to_u32(size, "sbat size")?,
                PeSectionHdrFlags::CNT_INITIALIZED_DATA | PeSectionHdrFlags::MEM_READ,
            )?);
        }

        let reloc_rva = cursor.vma;
        sections.push(cursor.append(
            ".reloc",
            to_u32(reloc_size, "relocation size")?,
            PeSectionHdrFlags::CNT_INITIALIZED_DATA
                | PeSectionHdrFlags::MEM_DISCARDABLE
                | PeSectionHdrFlags::MEM_READ,
        )?);

        Ok(PePlan {
            geometry,
            header_size,
            image_size,
            section_align: target.section_align,
            entry_addr: layout.start_address,
            code_base,
            code_size,
            data_size,
            sbat_size,
            sections,
            reloc_rva,
        })
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn sections(&self) -> &[PeSectionHdr] {
        &self.sections
    }

    fn section(&self, name: &str) -> Option<&PeSectionHdr> {
        self.sections.iter().find(|section| section.name == name)
    }

    /// Produces the image. `sbat` must be given exactly when the plan was
    /// made with an sbat size, zero included.
    pub fn write(
        &self,
        machine: PeMachine,
        core: &[u8],
        layout: &Layout,
        sbat: Option<&Path>,
    ) -> Result<Vec<u8>> {
        let geometry = &self.geometry;
        let endian = geometry.endian();
        let mut image = vec![0u8; self.image_size];

        let core_end = self.header_size + core.len();
        if core_end > self.image_size {
            return_errno_with_message!(
                ErrorKind::Format,
                "core image of 0x{:x} bytes does not match the planned layout",
                core.len()
            );
        }
        image[self.header_size..core_end].copy_from_slice(core);

        image[..MSDOS_STUB.len()].copy_from_slice(&MSDOS_STUB);
        image[MSDOS_STUB.len()..COFF_HEADER_OFFSET].copy_from_slice(PE_SIGNATURE);

        // The COFF file header.
        let coff = COFF_HEADER_OFFSET;
        let mut flags = PeFlags::EXECUTABLE_IMAGE
            | PeFlags::LINE_NUMS_STRIPPED
            | PeFlags::LOCAL_SYMS_STRIPPED
            | PeFlags::DEBUG_STRIPPED;
        if geometry.word() == WordWidth::W32 {
            flags |= PeFlags::THIRTY_TWO_BIT_MACHINE;
        }
        endian.put_u16(&mut image, coff, machine as u16)?;
        endian.put_u16(&mut image, coff + 2, self.sections.len() as u16)?;
        endian.put_u32(&mut image, coff + 4, STABLE_EMBEDDING_TIMESTAMP)?;
        endian.put_u16(&mut image, coff + 16, geometry.optional_header_size() as u16)?;
        endian.put_u16(&mut image, coff + 18, flags.bits())?;

        // The optional header.
        let opt = coff + COFF_HEADER_SIZE;
        let fields = [
            (OptHdrField::Magic, geometry.optional_header_magic() as u64),
            (OptHdrField::CodeSize, self.code_size as u64),
            (OptHdrField::DataSize, self.data_size as u64),
            (OptHdrField::EntryAddr, self.entry_addr),
            (OptHdrField::CodeBase, self.code_base as u64),
            (
                OptHdrField::DataBase,
                (self.header_size + layout.exec_size) as u64,
            ),
            (OptHdrField::ImageBase, 0),
            (OptHdrField::SectionAlignment, self.section_align as u64),
            (OptHdrField::FileAlignment, PE_FILE_ALIGNMENT as u64),
            (OptHdrField::ImageSize, self.image_size as u64),
            (OptHdrField::HeaderSize, self.header_size as u64),
            (
                OptHdrField::Subsystem,
                PeImageSubsystem::EfiApplication as u64,
            ),
            (OptHdrField::StackReserveSize, STACK_HEAP_SIZE),
            (OptHdrField::StackCommitSize, STACK_HEAP_SIZE),
            (OptHdrField::HeapReserveSize, STACK_HEAP_SIZE),
            (OptHdrField::HeapCommitSize, STACK_HEAP_SIZE),
            (
                OptHdrField::NumDataDirectories,
                PE_NUM_DATA_DIRECTORIES as u64,
            ),
            (OptHdrField::BaseRelocationRva, self.reloc_rva as u64),
            (
                OptHdrField::BaseRelocationSize,
                layout.reloc_size() as u64,
            ),
        ];
        for (which, value) in fields {
            if let Some(at) = geometry.optional_header_field(which) {
                geometry.put(&mut image, opt, at, value)?;
            }
        }

        // The section table.
        let table = opt + geometry.optional_header_size();
        for (i, section) in self.sections.iter().enumerate() {
            section.write(&mut image, table + i * SECTION_HEADER_SIZE, geometry)?;
        }

        match (self.section(".sbat"), self.sbat_size, sbat) {
            (Some(section), Some(size), Some(path)) => {
                let start = section.raw_data_offset as usize;
                file::load_image(path, &mut image[start..start + size])?;
            }
            (None, None, None) => {}
            _ => return_errno_with_message!(
                ErrorKind::Format,
                "the .sbat section does not match the planned layout"
            ),
        }

        if let Some(section) = self.section(".reloc") {
            let start = section.raw_data_offset as usize;
            let end = start + layout.reloc_size();
            if end > image.len() {
                return_errno_with_message!(
                    ErrorKind::Format,
                    "relocation table of 0x{:x} bytes does not fit the image",
                    layout.reloc_size()
                );
            }
            image[start..end].copy_from_slice(&layout.reloc_section);
        }

        Ok(image)
    }
}
