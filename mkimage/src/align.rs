// SPDX-License-Identifier: MPL-2.0

//! Power-of-two alignment helpers for layout arithmetic.

/// An extension trait for unsigned integers to round them to a power of two.
///
/// Unlike the usual page-alignment helpers, an alignment of 1 is accepted:
/// raw targets declare a section alignment of one byte.
pub trait AlignExt: Sized {
    /// Returns the smallest multiple of `align` that is greater than or
    /// equal to `self`.
    ///
    /// Panics if `align` is not a power of two or the result overflows.
    ///
    /// ```
    /// use mkimage::align::AlignExt;
    /// assert_eq!(13usize.align_up(4), 16);
    /// assert_eq!(13usize.align_up(1), 13);
    /// assert_eq!(512usize.align_up(512), 512);
    /// ```
    fn align_up(self, align: Self) -> Self;

    /// Like [`AlignExt::align_up`] but returns `None` on overflow.
    fn checked_align_up(self, align: Self) -> Option<Self>;

    fn is_aligned_to(&self, align: Self) -> bool;
}

macro_rules! impl_align_ext {
    ($( $uint_type:ty ),+ $(,)?) => {
        $(
            impl AlignExt for $uint_type {
                #[inline]
                fn align_up(self, align: Self) -> Self {
                    self.checked_align_up(align).unwrap()
                }

                #[inline]
                fn checked_align_up(self, align: Self) -> Option<Self> {
                    assert!(align.is_power_of_two());
                    Some(self.checked_add(align - 1)? & !(align - 1))
                }

                #[inline]
                fn is_aligned_to(&self, align: Self) -> bool {
                    assert!(align.is_power_of_two());
                    *self & (align - 1) == 0
                }
            }
        )*
    }
}

impl_align_ext! {
    u32,
    u64,
    usize,
}
