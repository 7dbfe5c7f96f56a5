//! Control bytes and group-wide scans.
//!
//! Every slot in the table has one control byte stored in a dense array
//! separate from the slots themselves. A byte is either [`EMPTY`],
//! [`TOMBSTONE`], or a 7-bit hash fragment marking the slot occupied. Probing
//! always inspects a whole [`Group`] of `GROUP_WIDTH` bytes at once and only
//! touches slot memory for bytes whose fragment matched.

/// Marks a slot that was never used since the last rehash or clear.
///
/// Chosen as 0x80 (sign bit set) so SSE2 `movemask` can pick out special
/// bytes in one instruction.
pub(crate) const EMPTY: u8 = 0x80;

/// Marks a slot vacated by an erase that must keep probes running past it.
///
/// Shares the sign bit with [`EMPTY`]; occupied tags never have it set.
pub(crate) const TOMBSTONE: u8 = 0xFE;

/// Number of control bytes scanned together as one probing step.
pub(crate) const GROUP_WIDTH: usize = 16;

/// Extracts the 7-bit tag stored in the control byte of an occupied slot.
#[inline(always)]
pub(crate) fn h2(hash: u64) -> u8 {
    (hash >> 57) as u8
}

#[inline(always)]
pub(crate) fn is_occupied(ctrl: u8) -> bool {
    ctrl & 0x80 == 0
}

/// A set of slot offsets within a group, one bit per control byte.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct BitMask(pub(crate) u16);

impl BitMask {
    #[inline(always)]
    pub(crate) fn any(self) -> bool {
        self.0 != 0
    }

    #[inline(always)]
    pub(crate) fn lowest(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }
}

impl Iterator for BitMask {
    type Item = usize;

    #[inline(always)]
    fn next(&mut self) -> Option<usize> {
        let bit = self.lowest()?;
        self.0 &= self.0 - 1;
        Some(bit)
    }
}

/// One aligned window of `GROUP_WIDTH` control bytes.
#[derive(Clone, Copy)]
#[repr(C, align(16))]
pub(crate) struct Group {
    bytes: [u8; GROUP_WIDTH],
}

impl Group {
    /// Copies a group out of the control array.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `GROUP_WIDTH` bytes and aligned to
    /// `GROUP_WIDTH`.
    #[inline(always)]
    pub(crate) unsafe fn load(ptr: *const u8) -> Self {
        debug_assert_eq!(ptr as usize % GROUP_WIDTH, 0);
        // SAFETY: Caller guarantees `ptr` is valid and aligned for a whole group.
        unsafe { (ptr as *const Group).read() }
    }

    /// Slots whose control byte equals `tag`.
    #[inline(always)]
    pub(crate) fn match_tag(&self, tag: u8) -> BitMask {
        #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
        {
            return self.match_tag_sse2(tag);
        }

        #[allow(unreachable_code)]
        {
            self.match_byte_scalar(tag)
        }
    }

    /// Slots that are `EMPTY`. Any hit ends a lookup probe.
    #[inline(always)]
    pub(crate) fn match_empty(&self) -> BitMask {
        self.match_tag(EMPTY)
    }

    /// Slots that are either `EMPTY` or `TOMBSTONE`, i.e. insertion candidates.
    #[inline(always)]
    pub(crate) fn match_empty_or_tombstone(&self) -> BitMask {
        #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
        {
            return self.special_sse2();
        }

        #[allow(unreachable_code)]
        {
            let mut bits: u16 = 0;
            for (i, &b) in self.bytes.iter().enumerate() {
                if !is_occupied(b) {
                    bits |= 1 << i;
                }
            }
            BitMask(bits)
        }
    }

    /// Slots holding a live entry.
    #[inline(always)]
    pub(crate) fn match_occupied(&self) -> BitMask {
        BitMask(!self.match_empty_or_tombstone().0)
    }

    #[allow(dead_code)]
    #[inline(always)]
    fn match_byte_scalar(&self, tag: u8) -> BitMask {
        let mut bits: u16 = 0;
        for (i, &b) in self.bytes.iter().enumerate() {
            if b == tag {
                bits |= 1 << i;
            }
        }
        BitMask(bits)
    }

    #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
    #[inline(always)]
    fn match_tag_sse2(&self, tag: u8) -> BitMask {
        use core::arch::x86_64::*;
        // SAFETY: `Group` is `#[repr(C, align(16))]` with `bytes` at offset 0,
        // so an aligned 128-bit load covers exactly the group.
        unsafe {
            let data = _mm_load_si128(self.bytes.as_ptr() as *const __m128i);
            let cmp = _mm_cmpeq_epi8(data, _mm_set1_epi8(tag as i8));
            BitMask(_mm_movemask_epi8(cmp) as u16)
        }
    }

    /// Relies on `EMPTY` and `TOMBSTONE` both having the sign bit set while
    /// occupied tags never do.
    #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
    #[inline(always)]
    fn special_sse2(&self) -> BitMask {
        use core::arch::x86_64::*;
        // SAFETY: See `match_tag_sse2`.
        unsafe {
            let data = _mm_load_si128(self.bytes.as_ptr() as *const __m128i);
            BitMask(_mm_movemask_epi8(data) as u16)
        }
    }
}

/// Triangular probe over group indices.
///
/// Jumps by one more group every step. For a power-of-two number of groups
/// this visits every group exactly once before repeating.
pub(crate) struct ProbeSeq {
    pub(crate) group: usize,
    stride: usize,
}

impl ProbeSeq {
    #[inline(always)]
    pub(crate) fn new(hash: u64, group_mask: usize) -> Self {
        ProbeSeq {
            group: hash as usize & group_mask,
            stride: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn move_next(&mut self, group_mask: usize) {
        // An `EMPTY` byte always exists somewhere, so the probe must have
        // stopped before wrapping.
        debug_assert!(self.stride <= group_mask, "probe sequence exhausted");
        self.stride += 1;
        self.group = (self.group + self.stride) & group_mask;
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    fn group_of(bytes: [u8; GROUP_WIDTH]) -> Group {
        Group { bytes }
    }

    #[test]
    fn tag_fits_in_seven_bits() {
        assert_eq!(h2(u64::MAX), 0x7F);
        assert_eq!(h2(0), 0);
        assert!(is_occupied(h2(u64::MAX)));
        assert!(!is_occupied(EMPTY));
        assert!(!is_occupied(TOMBSTONE));
    }

    #[test]
    fn masks_partition_the_group() {
        let mut bytes = [EMPTY; GROUP_WIDTH];
        bytes[1] = 0x12;
        bytes[3] = TOMBSTONE;
        bytes[7] = 0x12;
        bytes[15] = 0x7F;
        let group = group_of(bytes);

        assert_eq!(group.match_tag(0x12).collect::<Vec<_>>(), [1, 7]);
        assert_eq!(group.match_occupied().collect::<Vec<_>>(), [1, 7, 15]);
        assert_eq!(group.match_empty().0.count_ones(), 12);
        assert_eq!(group.match_empty().0 & (1 << 3), 0);
        assert_eq!(group.match_empty_or_tombstone().0.count_ones(), 13);
        assert_eq!(
            group.match_occupied().0 | group.match_empty_or_tombstone().0,
            u16::MAX
        );
    }

    #[test]
    fn scalar_and_simd_agree() {
        let mut bytes = [0u8; GROUP_WIDTH];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = match i % 4 {
                0 => EMPTY,
                1 => TOMBSTONE,
                _ => i as u8,
            };
        }
        let group = group_of(bytes);
        for tag in [EMPTY, TOMBSTONE, 2, 3, 6, 0x7F] {
            assert_eq!(group.match_tag(tag), group.match_byte_scalar(tag));
        }
    }

    #[test]
    fn bitmask_iterates_low_to_high() {
        let mask = BitMask(0b1000_0000_0010_0101);
        assert_eq!(mask.lowest(), Some(0));
        assert_eq!(mask.collect::<Vec<_>>(), [0, 2, 5, 15]);
        assert!(!BitMask(0).any());
        assert_eq!(BitMask(0).lowest(), None);
    }

    #[test]
    fn probe_visits_every_group_once() {
        for groups in [1usize, 2, 4, 8, 64, 1024] {
            let mask = groups - 1;
            let mut seen = alloc::vec![false; groups];
            let mut probe = ProbeSeq::new(0xDEAD_BEEF, mask);
            for step in 0..groups {
                assert!(!seen[probe.group], "group revisited at step {step}");
                seen[probe.group] = true;
                if step + 1 < groups {
                    probe.move_next(mask);
                }
            }
            assert!(seen.into_iter().all(|s| s));
        }
    }
}
