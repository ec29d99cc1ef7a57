// SPDX-License-Identifier: MPL-2.0

//! The common utils for the image tests.

use std::{
    fs,
    path::{Path, PathBuf},
};

use mkimage::endian::Endian;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates an empty scratch directory for the test `name`.
pub fn scratch_dir(name: &str) -> PathBuf {
    init_logger();
    let dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join("mkimage").join(name);
    if dir.exists() {
        fs::remove_dir_all(&dir).unwrap();
    }
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Creates a platform directory holding a flat `kernel.img` of `kernel`.
pub fn platform_dir(name: &str, kernel: &[u8]) -> PathBuf {
    let dir = scratch_dir(name);
    fs::write(dir.join("kernel.img"), kernel).unwrap();
    dir
}

pub fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

/// A kernel blob whose bytes differ from the zero padding around it.
pub fn kernel_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 250) as u8 + 1).collect()
}

/// A module header read back from an image.
#[derive(Debug, PartialEq, Eq)]
pub struct ModuleEntry {
    pub typ: u32,
    pub size: u32,
    pub offset: usize,
}

/// Walks the module region starting at `base`, whose module-info record is
/// `info_size` bytes long.
pub fn read_modules(image: &[u8], base: usize, info_size: usize) -> Vec<ModuleEntry> {
    let le = Endian::Little;
    let total = if info_size == 12 {
        le.get_u32(image, base + 8).unwrap() as usize
    } else {
        le.get_u64(image, base + 16).unwrap() as usize
    };
    let mut entries = Vec::new();
    let mut cursor = info_size;
    while cursor < total {
        let typ = le.get_u32(image, base + cursor).unwrap();
        let size = le.get_u32(image, base + cursor + 4).unwrap();
        entries.push(ModuleEntry {
            typ,
            size,
            offset: cursor,
        });
        // Public key headers record the exact key length.
        let advance = if typ == 4 {
            (size as usize - 8).next_multiple_of(info_size / 3) + 8
        } else {
            size as usize
        };
        cursor += advance;
    }
    assert_eq!(cursor, total);
    entries
}

/// A section header read back from a PE image.
#[derive(Debug)]
pub struct Section {
    pub name: String,
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub raw_data_size: u32,
    pub raw_data_offset: u32,
    pub flags: u32,
}

pub struct PeView<'a> {
    pub image: &'a [u8],
}

impl<'a> PeView<'a> {
    pub fn new(image: &'a [u8]) -> Self {
        assert_eq!(&image[..2], b"MZ");
        assert_eq!(&image[0x80..0x84], b"PE\0\0");
        PeView { image }
    }

    fn u16_at(&self, at: usize) -> u16 {
        Endian::Little.get_u16(self.image, at).unwrap()
    }

    pub fn u32_at(&self, at: usize) -> u32 {
        Endian::Little.get_u32(self.image, at).unwrap()
    }

    pub fn machine(&self) -> u16 {
        self.u16_at(0x84)
    }

    pub fn section_count(&self) -> usize {
        self.u16_at(0x86) as usize
    }

    pub fn optional_header_size(&self) -> usize {
        self.u16_at(0x94) as usize
    }

    pub fn optional_header(&self) -> usize {
        0x98
    }

    pub fn optional_header_magic(&self) -> u16 {
        self.u16_at(self.optional_header())
    }

    pub fn header_size(&self) -> u32 {
        self.u32_at(self.optional_header() + 60)
    }

    pub fn sections(&self) -> Vec<Section> {
        let table = self.optional_header() + self.optional_header_size();
        (0..self.section_count())
            .map(|i| {
                let at = table + i * 40;
                let raw_name = &self.image[at..at + 8];
                let len = raw_name.iter().position(|b| *b == 0).unwrap_or(8);
                Section {
                    name: String::from_utf8(raw_name[..len].to_vec()).unwrap(),
                    virtual_size: self.u32_at(at + 8),
                    virtual_address: self.u32_at(at + 12),
                    raw_data_size: self.u32_at(at + 16),
                    raw_data_offset: self.u32_at(at + 20),
                    flags: self.u32_at(at + 36),
                }
            })
            .collect()
    }

    pub fn section(&self, name: &str) -> Section {
        self.sections()
            .into_iter()
            .find(|section| section.name == name)
            .unwrap()
    }
}
