// SPDX-License-Identifier: MPL-2.0

//! Build manifests.
//!
//! An image is described by a TOML manifest such as
//!
//! ```toml
//! target = "x86_64-efi"
//! prefix = "/EFI/BOOT"
//! modules = ["part_gpt", "fat", "normal"]
//! config = "early.cfg"
//! ```
//!
//! which deserializes into an [`ImageScheme`]. Schemes can inherit from
//! each other and are finalized into an [`ImageConfig`] once the target is
//! known.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    compress::Compression,
    error::{Error, ErrorKind, Result},
    file,
    payload::PayloadInputs,
    return_errno_with_message,
    target::{self, TargetDescriptor},
};

/// The extension of module object files in the platform directory.
const MODULE_EXTENSION: &str = "mod";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageScheme {
    /// The name or an alias of the image target
    pub target: Option<String>,
    /// The directory holding `kernel.img`, the modules and the decompressors
    pub directory: Option<PathBuf>,
    /// The directory the kernel loads further files from
    pub prefix: Option<String>,
    pub compression: Option<Compression>,
    /// Modules to embed, relative to `directory`
    #[serde(default)]
    pub modules: Vec<PathBuf>,
    /// Public keys for signature verification
    #[serde(default)]
    pub pubkeys: Vec<PathBuf>,
    /// The memory disk image
    pub memdisk: Option<PathBuf>,
    /// The device tree blob
    pub dtb: Option<PathBuf>,
    pub font: Option<PathBuf>,
    /// The early configuration file
    pub config: Option<PathBuf>,
    /// The secure-boot metadata, EFI targets only
    pub sbat: Option<PathBuf>,
    /// Whether to sync the output to stable storage
    pub sync: Option<bool>,
}

/// A fully resolved build description.
#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub target: &'static TargetDescriptor,
    pub directory: PathBuf,
    pub prefix: Option<String>,
    pub compression: Compression,
    /// Module object files, resolved against `directory`.
    pub modules: Vec<PathBuf>,
    pub pubkeys: Vec<PathBuf>,
    pub memdisk: Option<PathBuf>,
    pub dtb: Option<PathBuf>,
    pub font: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub sbat: Option<PathBuf>,
    pub sync: bool,
}

fn rebase(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

fn lookup_target(name: &str) -> Result<&'static TargetDescriptor> {
    match target::lookup(name) {
        Some(target) => Ok(target),
        None => return_errno_with_message!(
            ErrorKind::Config,
            "unknown target format {}; expected one of: {}",
            name,
            target::targets_string()
        ),
    }
}

impl ImageScheme {
    /// Fills in what `self` leaves open from `from`. Lists are concatenated
    /// with the entries of `from` first.
    pub fn inherit(&mut self, from: &Self) {
        self.modules = {
            let mut modules = from.modules.clone();
            modules.extend(self.modules.clone());
            modules
        };
        self.pubkeys = {
            let mut pubkeys = from.pubkeys.clone();
            pubkeys.extend(self.pubkeys.clone());
            pubkeys
        };
        if self.target.is_none() {
            self.target.clone_from(&from.target);
        }
        if self.directory.is_none() {
            self.directory.clone_from(&from.directory);
        }
        if self.prefix.is_none() {
            self.prefix.clone_from(&from.prefix);
        }
        if self.compression.is_none() {
            self.compression = from.compression;
        }
        if self.memdisk.is_none() {
            self.memdisk.clone_from(&from.memdisk);
        }
        if self.dtb.is_none() {
            self.dtb.clone_from(&from.dtb);
        }
        if self.font.is_none() {
            self.font.clone_from(&from.font);
        }
        if self.config.is_none() {
            self.config.clone_from(&from.config);
        }
        if self.sbat.is_none() {
            self.sbat.clone_from(&from.sbat);
        }
        if self.sync.is_none() {
            self.sync = from.sync;
        }
    }

    /// Makes the file paths relative to `base`, the directory of the
    /// manifest. Without an explicit directory, the platform directory is
    /// the one named after the target.
    pub fn canonicalize_paths(&mut self, base: impl AsRef<Path>) {
        let base = base.as_ref();
        if self.directory.is_none() {
            self.directory = self
                .target
                .as_deref()
                .and_then(target::lookup)
                .map(|target| PathBuf::from(target.dirname()));
        }
        let files = self
            .directory
            .iter_mut()
            .chain(self.pubkeys.iter_mut())
            .chain(self.memdisk.iter_mut())
            .chain(self.dtb.iter_mut())
            .chain(self.font.iter_mut())
            .chain(self.config.iter_mut())
            .chain(self.sbat.iter_mut());
        for path in files {
            rebase(path, base);
        }
    }

    pub fn finalize(self) -> Result<ImageConfig> {
        let Some(name) = self.target else {
            return_errno_with_message!(
                ErrorKind::Config,
                "no target format given; expected one of: {}",
                target::targets_string()
            );
        };
        let target = lookup_target(&name)?;
        let directory = self
            .directory
            .unwrap_or_else(|| PathBuf::from(target.dirname()));
        let modules = self
            .modules
            .into_iter()
            .map(|module| {
                let mut path = directory.join(module);
                if path.extension().is_none() {
                    path.set_extension(MODULE_EXTENSION);
                }
                path
            })
            .collect();

        Ok(ImageConfig {
            target,
            directory,
            prefix: self.prefix,
            compression: self.compression.unwrap_or_default(),
            modules,
            pubkeys: self.pubkeys,
            memdisk: self.memdisk,
            dtb: self.dtb,
            font: self.font,
            config: self.config,
            sbat: self.sbat,
            sync: self.sync.unwrap_or(false),
        })
    }
}

impl ImageConfig {
    /// A configuration without any payload.
    pub fn new(target: &'static TargetDescriptor, directory: impl Into<PathBuf>) -> Self {
        ImageConfig {
            target,
            directory: directory.into(),
            prefix: None,
            compression: Compression::Auto,
            modules: Vec::new(),
            pubkeys: Vec::new(),
            memdisk: None,
            dtb: None,
            font: None,
            config: None,
            sbat: None,
            sync: false,
        }
    }

    /// Reads the manifest at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = String::from_utf8(file::read_image(path)?).map_err(|_| {
            Error::with_message(
                ErrorKind::Config,
                format!("`{}` is not valid UTF-8", path.display()),
            )
        })?;
        let mut scheme: ImageScheme = toml::from_str(&text).map_err(|err| {
            Error::with_message(
                ErrorKind::Config,
                format!("cannot parse `{}`: {}", path.display(), err),
            )
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        scheme.canonicalize_paths(base);
        scheme.finalize()
    }

    pub fn kernel_path(&self) -> PathBuf {
        self.directory.join("kernel.img")
    }

    pub fn payload_inputs(&self) -> PayloadInputs<'_> {
        PayloadInputs {
            modules: &self.modules,
            pubkeys: &self.pubkeys,
            memdisk: self.memdisk.as_deref(),
            dtb: self.dtb.as_deref(),
            font: self.font.as_deref(),
            config: self.config.as_deref(),
            prefix: self.prefix.as_deref(),
        }
    }
}
