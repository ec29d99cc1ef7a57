// SPDX-License-Identifier: MPL-2.0

//! Coreboot-style raw images.
//!
//! The core image is the whole file. The only thing to check is that the
//! kernel still fits below the area the legacy loader reserves for itself.

use log::info;

use crate::{
    error::{ErrorKind, Result},
    kernel::Layout,
    return_errno_with_message,
    target::{Arch, TargetDescriptor},
};

/// Where the legacy x86 loader places the kernel.
pub const PC_LINK_ADDR: u64 = 0x9000;
/// The end of the memory the kernel may occupy, exclusive.
pub const RAW_SIZE_CEILING: u64 = 0x68000;

/// Checks that the whole kernel blob and its bss end below
/// [`RAW_SIZE_CEILING`]. Data following the executable part counts too.
///
/// ARM boards load the kernel elsewhere and are not limited.
pub fn check_size(target: &TargetDescriptor, layout: &Layout) -> Result<()> {
    if target.arch == Arch::Arm {
        return Ok(());
    }
    let end = layout.kernel_size as u64 + layout.bss_size as u64 + PC_LINK_ADDR;
    if end > RAW_SIZE_CEILING {
        return_errno_with_message!(
            ErrorKind::Capacity,
            "kernel image is too big (0x{:x} > 0x{:x})",
            end,
            RAW_SIZE_CEILING
        );
    }
    Ok(())
}

pub fn make_raw_image(target: &TargetDescriptor, core: Vec<u8>, layout: &Layout) -> Result<Vec<u8>> {
    check_size(target, layout)?;
    info!("the raw image for {} is 0x{:x} bytes", target, core.len());
    Ok(core)
}
