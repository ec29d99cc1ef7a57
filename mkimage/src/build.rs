// SPDX-License-Identifier: MPL-2.0

//! Assembling an image from a [`ImageConfig`].
//!
//! The stages run strictly in order and any failure aborts the build:
//!
//! 1. plan the module region from the payload sizes;
//! 2. load the kernel with room for that region and fill it in;
//! 3. compress the core image, prefixing a decompressor where needed;
//! 4. wrap the result in the container of the target.

use std::io::Write;

use log::info;

use crate::{
    compress::{self, StubFields},
    config::ImageConfig,
    container,
    error::{ErrorKind, Result},
    geometry::Geometry,
    kernel::{KernelLoader, LoadedKernel},
    payload::{self, ModulePlan},
    return_errno_with_message,
    target::{PatchField, patch_u32},
    writer::{ImageWriter, SyncOutput},
};

/// Builds the image described by `config` and returns its bytes.
pub fn build_image(config: &ImageConfig, loader: &dyn KernelLoader) -> Result<Vec<u8>> {
    let target = config.target;
    let comp = config.compression.resolve(target);
    info!("building a {} image, compression {:?}", target, comp);

    container::check_sbat(target, config.sbat.as_deref())?;

    let payloads = payload::collect_payloads(target, &config.payload_inputs())?;
    let plan = ModulePlan::new(Geometry::of(target), payloads)?;
    let total_module_size = plan.total_size();
    let Ok(total_module_size_u32) = u32::try_from(total_module_size) else {
        return_errno_with_message!(
            ErrorKind::Capacity,
            "modules of 0x{:x} bytes do not fit in 32 bits",
            total_module_size
        );
    };

    let LoadedKernel { mut image, layout } = loader
        .load(&config.kernel_path(), total_module_size, target)?
        .fit_to(total_module_size)?;
    info!("the kernel image is 0x{:x} bytes", layout.kernel_size);

    if target.needs_decompressor() {
        patch_u32(
            &mut image,
            target,
            PatchField::TotalModuleSize,
            total_module_size_u32,
        )?;
    }
    plan.place(target, &mut image, layout.kernel_size)?;

    let mut core = compress::compress_core(target, image, comp)?;
    info!("the core image is 0x{:x} bytes", core.len());

    if target.needs_decompressor() {
        let fields = StubFields::new(
            target,
            core.len(),
            layout.kernel_size,
            total_module_size,
        )?;
        core = compress::attach_decompressor(target, &config.directory, comp, &core, &fields)?;
    } else {
        patch_u32(
            &mut core,
            target,
            PatchField::TotalModuleSize,
            total_module_size_u32,
        )?;
    }

    container::make_container(
        target,
        core,
        &layout,
        total_module_size,
        config.sbat.as_deref(),
    )
}

/// Builds the image described by `config` and writes it to `out`, which
/// is called `name` in errors.
///
/// Nothing is written unless the whole image was built. With `config.sync`
/// set, the output is synced to stable storage before it is handed back.
pub fn generate_image<W: Write + SyncOutput>(
    config: &ImageConfig,
    loader: &dyn KernelLoader,
    out: W,
    name: &str,
) -> Result<W> {
    let image = build_image(config, loader)?;
    let mut writer = ImageWriter::new(out, name, config.sync);
    writer.write(&image)?;
    writer.finish()
}
