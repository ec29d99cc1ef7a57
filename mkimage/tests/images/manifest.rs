// SPDX-License-Identifier: MPL-2.0

use std::{
    fs,
    io::{self, Write},
};

use mkimage::{
    Compression, ErrorKind, FlatKernelLoader, ImageConfig, SyncOutput, build_image,
    generate_image,
};

use crate::util::{PeView, kernel_bytes, scratch_dir, write_file};

#[test]
fn manifest_paths_are_relative_to_the_manifest() {
    let dir = scratch_dir("manifest-build");
    let platform = dir.join("x86_64-efi");
    fs::create_dir_all(&platform).unwrap();
    write_file(&platform, "kernel.img", &kernel_bytes(0x600));
    write_file(&platform, "normal.mod", &[0x11; 0x40]);
    write_file(&dir, "early.cfg", b"configfile $prefix/grub.cfg\n");
    let manifest = write_file(
        &dir,
        "image.toml",
        br#"
target = "x86_64-efi"
compression = "auto"
prefix = "/EFI/BOOT"
modules = ["normal"]
config = "early.cfg"
"#,
    );

    let config = ImageConfig::load(&manifest).unwrap();
    assert_eq!(config.directory, platform);
    assert_eq!(config.compression, Compression::Auto);
    assert_eq!(config.modules, [platform.join("normal.mod")]);
    assert_eq!(config.config, Some(dir.join("early.cfg")));

    let image = build_image(&config, &FlatKernelLoader).unwrap();
    assert_eq!(PeView::new(&image).section_count(), 4);
}

/// Counts the syncs requested on an in-memory output.
#[derive(Default)]
struct SyncCounter {
    data: Vec<u8>,
    syncs: usize,
}

impl Write for SyncCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SyncOutput for SyncCounter {
    fn sync(&mut self) -> io::Result<()> {
        self.syncs += 1;
        Ok(())
    }
}

#[test]
fn manifest_sync_reaches_the_output() {
    let dir = scratch_dir("manifest-sync");
    let platform = dir.join("i386-multiboot");
    fs::create_dir_all(&platform).unwrap();
    write_file(&platform, "kernel.img", &kernel_bytes(0x100));
    let manifest = write_file(
        &dir,
        "image.toml",
        b"target = \"i386-multiboot\"\nsync = true\n",
    );

    let config = ImageConfig::load(&manifest).unwrap();
    assert!(config.sync);
    let out = generate_image(&config, &FlatKernelLoader, SyncCounter::default(), "core.img")
        .unwrap();
    assert_eq!(out.syncs, 1);
    assert_eq!(out.data, build_image(&config, &FlatKernelLoader).unwrap());
}

#[test]
fn manifest_with_unknown_target() {
    let dir = scratch_dir("manifest-unknown");
    let manifest = write_file(&dir, "image.toml", b"target = \"mips-arc\"\n");
    let err = ImageConfig::load(&manifest).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.message().contains("i386-multiboot"));
}

#[test]
fn malformed_manifest_names_the_file() {
    let dir = scratch_dir("manifest-malformed");
    let manifest = write_file(&dir, "broken.toml", b"target = [\n");
    let err = ImageConfig::load(&manifest).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.message().contains("broken.toml"));
}

#[test]
fn missing_manifest_is_a_resource_error() {
    let dir = scratch_dir("manifest-missing");
    let err = ImageConfig::load(dir.join("absent.toml")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
}
