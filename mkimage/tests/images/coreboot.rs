// SPDX-License-Identifier: MPL-2.0

use std::path::Path;

use mkimage::{
    ErrorKind, FlatKernelLoader, ImageConfig, KernelLoader, Layout, LoadedKernel, TargetDescriptor, build_image, generate_image, payload::MODULE_MAGIC, target::lookup,
};

use crate::util::{kernel_bytes, platform_dir, read_modules, scratch_dir, write_file};

/// Hands out a blank kernel with the given sizes instead of reading one.
/// Only the first page is code; the rest is data.
struct SizedKernel {
    kernel_size: usize,
    bss_size: usize,
}

const TEXT_SIZE: usize = 0x1000;

impl KernelLoader for SizedKernel {
    fn load(
        &self,
        _path: &Path,
        reserved_module_size: usize,
        _target: &TargetDescriptor,
    ) -> mkimage::Result<LoadedKernel> {
        Ok(LoadedKernel {
            image: vec![0xf4; self.kernel_size + reserved_module_size],
            layout: Layout {
                kernel_size: self.kernel_size,
                exec_size: TEXT_SIZE.min(self.kernel_size),
                bss_size: self.bss_size,
                ..Default::default()
            },
        })
    }
}

#[test]
fn raw_image_is_the_core_image() {
    let kernel = kernel_bytes(0x801);
    let dir = platform_dir("coreboot-raw", &kernel);
    let dtb = write_file(&dir, "board.dtb", &[0xd0, 0x0d, 0xfe, 0xed, 0, 0]);
    let font = write_file(&dir, "unicode.pf2", &[0x46; 9]);
    let mut config = ImageConfig::new(lookup("i386-multiboot").unwrap(), &dir);
    config.dtb = Some(dtb);
    config.font = Some(font);

    let image = build_image(&config, &FlatKernelLoader).unwrap();
    assert_eq!(&image[..kernel.len()], &kernel[..]);
    assert_eq!(image.len(), 0x804 + 12 + (8 + 8) + (8 + 12));

    let le = mkimage::endian::Endian::Little;
    assert_eq!(le.get_u32(&image, 0x804), Some(MODULE_MAGIC));
    let types: Vec<_> = read_modules(&image, 0x804, 12)
        .iter()
        .map(|m| m.typ)
        .collect();
    assert_eq!(types, [5, 6]);
}

#[test]
fn sbat_is_rejected_before_anything_is_read() {
    // Neither the kernel nor the metadata exist: the target check must
    // come first.
    let dir = scratch_dir("coreboot-sbat");
    let mut config = ImageConfig::new(lookup("i386-multiboot").unwrap(), &dir);
    config.sbat = Some(dir.join("sbat.csv"));

    let mut out = Vec::new();
    let err = generate_image(&config, &FlatKernelLoader, &mut out, "core.img").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains("sbat.csv"));
    assert!(out.is_empty());
}

#[test]
fn kernel_at_the_ceiling_fits() {
    let dir = scratch_dir("coreboot-at-ceiling");
    let config = ImageConfig::new(lookup("i386-multiboot").unwrap(), &dir);
    let loader = SizedKernel {
        kernel_size: 0x5f000,
        bss_size: 0,
    };
    let image = build_image(&config, &loader).unwrap();
    assert_eq!(image.len(), 0x5f000 + 12);
}

#[test]
fn kernel_one_byte_over_the_ceiling() {
    let dir = scratch_dir("coreboot-over-ceiling");
    let config = ImageConfig::new(lookup("i386-multiboot").unwrap(), &dir);
    let loader = SizedKernel {
        kernel_size: 0x5f000,
        bss_size: 1,
    };

    let mut out = Vec::new();
    let err = generate_image(&config, &loader, &mut out, "core.img").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capacity);
    let msg = err.to_string();
    assert!(msg.contains("0x68001"), "{}", msg);
    assert!(msg.contains("0x68000"), "{}", msg);
    assert!(out.is_empty());
}

#[test]
fn missing_module_names_its_path() {
    let dir = platform_dir("coreboot-missing", &kernel_bytes(0x10));
    let mut config = ImageConfig::new(lookup("i386-multiboot").unwrap(), &dir);
    config.modules = vec![dir.join("nonexistent.mod")];

    let err = build_image(&config, &FlatKernelLoader).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert!(err.to_string().contains("nonexistent.mod"));
}
