// SPDX-License-Identifier: MPL-2.0

mod coreboot;
mod manifest;
mod stub;
