// SPDX-License-Identifier: MPL-2.0

//! Builds bootable core images.
//!
//! A core image is a kernel blob followed by a region of embedded payloads
//! (modules, public keys, a memory disk, a device tree, a font, an early
//! configuration file and the prefix), optionally compressed behind a
//! decompressor stub, and wrapped in a container the firmware can load:
//! a raw coreboot-style image or a PE32/PE32+ EFI application.
//!
//! The entry points are [`build::build_image`] and
//! [`build::generate_image`], driven by an [`ImageConfig`].

pub mod error;

pub mod align;
pub mod build;
pub mod compress;
pub mod config;
pub mod container;
pub mod endian;
pub mod file;
pub mod geometry;
pub mod kernel;
pub mod payload;
pub mod target;
pub mod writer;

pub use self::{
    build::{build_image, generate_image},
    compress::Compression,
    config::{ImageConfig, ImageScheme},
    error::{Error, ErrorKind, Result},
    kernel::{FlatKernelLoader, KernelLoader, Layout, LoadedKernel},
    target::TargetDescriptor,
    writer::{ImageWriter, SyncOutput},
};
