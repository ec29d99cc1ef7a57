// SPDX-License-Identifier: MPL-2.0

//! The contract with the kernel loader.
//!
//! Turning the compiled kernel object into a flat blob (applying
//! relocations, resolving symbols, generating the PE fixup table) is the
//! job of a [`KernelLoader`]. The builder only consumes what it returns.

use std::path::Path;

use log::info;

use crate::{
    error::{ErrorKind, Result},
    file, return_errno_with_message,
    target::TargetDescriptor,
};

/// Sizes and addresses describing a loaded kernel blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    /// Size of the kernel blob, excluding the reserved module region.
    pub kernel_size: usize,
    /// Size of the executable part at the start of the blob.
    pub exec_size: usize,
    pub bss_size: usize,
    /// The relocation table for the `.reloc` section of PE images.
    pub reloc_section: Vec<u8>,
    pub start_address: u64,
}

impl Layout {
    pub fn reloc_size(&self) -> usize {
        self.reloc_section.len()
    }
}

/// A kernel blob with room for the module region behind it.
#[derive(Debug)]
pub struct LoadedKernel {
    pub image: Vec<u8>,
    pub layout: Layout,
}

impl LoadedKernel {
    /// Checks the blob against its layout and grows it to exactly
    /// `kernel_size + reserved_module_size` zero-filled bytes.
    pub fn fit_to(mut self, reserved_module_size: usize) -> Result<Self> {
        let layout = &self.layout;
        if layout.exec_size > layout.kernel_size {
            return_errno_with_message!(
                ErrorKind::Format,
                "executable size 0x{:x} exceeds kernel size 0x{:x}",
                layout.exec_size,
                layout.kernel_size
            );
        }
        if self.image.len() < layout.kernel_size {
            return_errno_with_message!(
                ErrorKind::Format,
                "kernel blob is 0x{:x} bytes but its layout claims 0x{:x}",
                self.image.len(),
                layout.kernel_size
            );
        }
        let full_size = layout.kernel_size + reserved_module_size;
        self.image.resize(full_size, 0);
        // Bytes past the kernel may be left over from the loader; the module
        // region must start out zeroed.
        self.image[layout.kernel_size..].fill(0);
        Ok(self)
    }
}

pub trait KernelLoader {
    /// Loads the kernel at `path`, reserving `reserved_module_size` bytes
    /// for the module region.
    fn load(
        &self,
        path: &Path,
        reserved_module_size: usize,
        target: &TargetDescriptor,
    ) -> Result<LoadedKernel>;
}

/// Loads `kernel.img` files that are already linked flat binaries.
///
/// The whole file is executable, there is no bss and no relocation, and the
/// entry point is at the start of the blob.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatKernelLoader;

impl KernelLoader for FlatKernelLoader {
    fn load(
        &self,
        path: &Path,
        reserved_module_size: usize,
        target: &TargetDescriptor,
    ) -> Result<LoadedKernel> {
        let mut image = file::read_image(path)?;
        let kernel_size = target.align_addr(image.len())?;
        image.resize(kernel_size + reserved_module_size, 0);
        info!(
            "loaded flat kernel {} (0x{:x} bytes)",
            path.display(),
            kernel_size
        );
        Ok(LoadedKernel {
            image,
            layout: Layout {
                kernel_size,
                exec_size: kernel_size,
                bss_size: 0,
                reloc_section: Vec::new(),
                start_address: 0,
            },
        })
    }
}
