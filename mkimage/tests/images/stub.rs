// SPDX-License-Identifier: MPL-2.0

use std::io::Read;

use mkimage::{
    Compression, ErrorKind, FlatKernelLoader, ImageConfig, TargetDescriptor, build_image,
    compress::lzma_filters,
    endian::Endian,
    payload::MODULE_MAGIC,
    target::{PlatformFlags, lookup},
};
use liblzma::{read::XzDecoder, stream::Stream};

use crate::util::{kernel_bytes, platform_dir, write_file};

const STUB_SIZE: usize = 0x20;
const LINK_ADDR: u64 = 0x8020_0000;

fn stub_target(flags: PlatformFlags) -> &'static TargetDescriptor {
    let mut target = lookup("i386-multiboot").unwrap().clone();
    target.flags = flags;
    target.link_addr = LINK_ADDR;
    target.patches.total_module_size = Some(0x4);
    target.patches.compressed_size = Some(0x8);
    target.patches.uncompressed_size = Some(0xc);
    target.patches.uncompressed_addr = Some(0x10);
    Box::leak(Box::new(target))
}

fn write_stubs(dir: &std::path::Path) {
    for name in [
        "lzma_decompress.img",
        "xz_decompress.img",
        "none_decompress.img",
    ] {
        write_file(dir, name, &[0xeb; STUB_SIZE]);
    }
}

fn unpack_lzma(packed: &[u8]) -> Vec<u8> {
    let stream = Stream::new_raw_decoder(&lzma_filters().unwrap()).unwrap();
    let mut unpacked = Vec::new();
    XzDecoder::new_stream(packed, stream)
        .read_to_end(&mut unpacked)
        .unwrap();
    unpacked
}

#[test]
fn lzma_core_behind_patched_stub() {
    let kernel = kernel_bytes(0x2000);
    let dir = platform_dir("stub-lzma", &kernel);
    write_stubs(&dir);
    let mut config = ImageConfig::new(stub_target(PlatformFlags::DECOMPRESSORS), &dir);
    config.compression = Compression::Lzma;
    config.prefix = Some("(cbfsdisk)/boot".to_owned());

    let image = build_image(&config, &FlatKernelLoader).unwrap();
    let le = Endian::Little;
    let total = 12 + 8 + 16;
    let core = &image[STUB_SIZE..];
    assert_eq!(le.get_u32(&image, 0x8), Some(core.len() as u32));
    assert_eq!(le.get_u32(&image, 0xc), Some(0x2000 + total));
    assert_eq!(le.get_u32(&image, 0x10), Some(LINK_ADDR as u32));
    assert_eq!(&image[..0x4], &[0xeb; 4]);

    let unpacked = unpack_lzma(core);
    assert_eq!(unpacked.len(), 0x2000 + total as usize);
    // The total module size is patched into the kernel before compression.
    assert_eq!(le.get_u32(&unpacked, 0x4), Some(total));
    assert_eq!(&unpacked[0x8..0x2000], &kernel[0x8..]);
    assert_eq!(le.get_u32(&unpacked, 0x2000), Some(MODULE_MAGIC));
}

#[test]
fn xz_core_is_a_checked_xz_stream() {
    let kernel = kernel_bytes(0x1000);
    let dir = platform_dir("stub-xz", &kernel);
    write_stubs(&dir);
    let mut config = ImageConfig::new(stub_target(PlatformFlags::DECOMPRESSORS), &dir);
    config.compression = Compression::Xz;

    let image = build_image(&config, &FlatKernelLoader).unwrap();
    let core = &image[STUB_SIZE..];
    assert_eq!(&core[..6], &[0xfd, b'7', b'z', b'X', b'Z', 0x00]);

    let mut unpacked = Vec::new();
    XzDecoder::new(core).read_to_end(&mut unpacked).unwrap();
    assert_eq!(unpacked.len(), 0x1000 + 12);
    assert_eq!(&unpacked[0x8..0x1000], &kernel[0x8..]);
}

#[test]
fn modules_before_kernel_lower_the_load_address() {
    let kernel = kernel_bytes(0x800);
    let dir = platform_dir("stub-before", &kernel);
    write_stubs(&dir);
    let target = stub_target(PlatformFlags::DECOMPRESSORS | PlatformFlags::MODULES_BEFORE_KERNEL);
    let mut config = ImageConfig::new(target, &dir);
    config.compression = Compression::None;
    config.prefix = Some("/grub".to_owned());

    let image = build_image(&config, &FlatKernelLoader).unwrap();
    let le = Endian::Little;
    let total = 12 + 8 + 8;
    assert_eq!(le.get_u32(&image, 0x10), Some(LINK_ADDR as u32 - total));

    let core = &image[STUB_SIZE..];
    assert_eq!(core.len(), 0x800 + total as usize);
    assert_eq!(le.get_u32(core, 0), Some(MODULE_MAGIC));
    assert_eq!(&core[12 + 8..12 + 8 + 6], b"/grub\0");
    let moved = &core[total as usize..];
    assert_eq!(&moved[0x8..], &kernel[0x8..]);
}

#[test]
fn missing_stub_is_a_resource_error() {
    let dir = platform_dir("stub-missing", &kernel_bytes(0x100));
    let mut config = ImageConfig::new(stub_target(PlatformFlags::DECOMPRESSORS), &dir);
    config.compression = Compression::Lzma;

    let err = build_image(&config, &FlatKernelLoader).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert!(err.to_string().contains("lzma_decompress.img"));
}
