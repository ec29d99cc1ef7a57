// SPDX-License-Identifier: MPL-2.0

//! Host-to-target integer encoding.
//!
//! Every multi-byte field of a produced image goes through [`Endian`], so the
//! byte order of the output is decided by the target and never by the layout
//! of a host struct in memory.

use crate::{
    error::{ErrorKind, Result},
    return_errno_with_message,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

macro_rules! impl_put_get {
    ($( ($put:ident, $get:ident, $ty:ty) ),+ $(,)?) => {
        $(
            pub fn $put(self, buf: &mut [u8], offset: usize, value: $ty) -> Result<()> {
                let bytes = match self {
                    Endian::Little => value.to_le_bytes(),
                    Endian::Big => value.to_be_bytes(),
                };
                let dst = field_mut(buf, offset, bytes.len())?;
                dst.copy_from_slice(&bytes);
                Ok(())
            }

            pub fn $get(self, buf: &[u8], offset: usize) -> Option<$ty> {
                const N: usize = core::mem::size_of::<$ty>();
                let end = offset.checked_add(N)?;
                let bytes: [u8; N] = buf.get(offset..end)?.try_into().ok()?;
                Some(match self {
                    Endian::Little => <$ty>::from_le_bytes(bytes),
                    Endian::Big => <$ty>::from_be_bytes(bytes),
                })
            }
        )*
    };
}

impl Endian {
    impl_put_get! {
        (put_u16, get_u16, u16),
        (put_u32, get_u32, u32),
        (put_u64, get_u64, u64),
    }

    /// Writes an unsigned integer of `width` bytes (2, 4 or 8).
    pub fn put_uint(self, buf: &mut [u8], offset: usize, width: usize, value: u64) -> Result<()> {
        match width {
            2 => self.put_u16(buf, offset, narrow(value)?),
            4 => self.put_u32(buf, offset, narrow(value)?),
            8 => self.put_u64(buf, offset, value),
            _ => return_errno_with_message!(ErrorKind::Format, "unsupported field width {}", width),
        }
    }
}

fn field_mut(buf: &mut [u8], offset: usize, len: usize) -> Result<&mut [u8]> {
    let buf_len = buf.len();
    match offset.checked_add(len) {
        Some(end) if end <= buf_len => Ok(&mut buf[offset..end]),
        _ => return_errno_with_message!(
            ErrorKind::Format,
            "field at 0x{:x} (+{}) is outside of a 0x{:x}-byte buffer",
            offset,
            len,
            buf_len
        ),
    }
}

fn narrow<T: TryFrom<u64>>(value: u64) -> Result<T> {
    match T::try_from(value) {
        Ok(v) => Ok(v),
        Err(_) => return_errno_with_message!(
            ErrorKind::Capacity,
            "value 0x{:x} does not fit its field",
            value
        ),
    }
}
