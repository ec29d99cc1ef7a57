// SPDX-License-Identifier: MPL-2.0

//! The outer wrappers that make a core image loadable by firmware.

pub mod pe;
pub mod raw;

use std::path::Path;

use crate::{
    error::{ErrorKind, Result},
    kernel::Layout,
    return_errno_with_message,
    target::{ContainerKind, TargetDescriptor},
};

/// Rejects a secure-boot metadata file for targets that cannot carry it.
pub fn check_sbat(target: &TargetDescriptor, sbat: Option<&Path>) -> Result<()> {
    if let (Some(path), false) = (sbat, target.is_pe()) {
        return_errno_with_message!(
            ErrorKind::Config,
            "`{}` cannot be embedded: .sbat is only supported on EFI targets, not {}",
            path.display(),
            target
        );
    }
    Ok(())
}

/// Wraps `core` according to the container kind of `target`.
pub fn make_container(
    target: &TargetDescriptor,
    core: Vec<u8>,
    layout: &Layout,
    total_module_size: usize,
    sbat: Option<&Path>,
) -> Result<Vec<u8>> {
    check_sbat(target, sbat)?;
    match target.container {
        ContainerKind::Raw => raw::make_raw_image(target, core, layout),
        ContainerKind::Pe { machine } => {
            let sbat_size = sbat.map(crate::file::image_size).transpose()?;
            let plan = pe::PePlan::new(target, core.len(), layout, total_module_size, sbat_size)?;
            plan.write(machine, &core, layout, sbat)
        }
    }
}
