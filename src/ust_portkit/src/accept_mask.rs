//! The serial instance's `mask` bitset (spec §3, §4.8): which mutex-member
//! entries are currently acceptable. Bit 0 is reserved for timeout, bit 1
//! for the destructor, matching `__U_TIMEOUTPOSN__`/`__U_DESTRUCTORPOSN__`
//! in `uC++.h`.
use std::fmt;

pub const TIMEOUT_BIT: u32 = 0;
pub const DESTRUCTOR_BIT: u32 = 1;

/// A 64-entry bitset (spec §6: "the reference uses 64"), replacing
/// `r3_kernel`'s const-generic `FixedPrioBitmap<LEN>` — see DESIGN.md for why
/// that machinery is dropped in favor of a plain `u64` here.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct AcceptMask(u64);

impl AcceptMask {
    pub const EMPTY: AcceptMask = AcceptMask(0);

    pub const fn new() -> Self {
        Self::EMPTY
    }

    pub fn get(&self, bit: u32) -> bool {
        debug_assert!(bit < 64);
        self.0 & (1 << bit) != 0
    }

    pub fn set(&mut self, bit: u32) {
        debug_assert!(bit < 64);
        self.0 |= 1 << bit;
    }

    pub fn clear_bit(&mut self, bit: u32) {
        debug_assert!(bit < 64);
        self.0 &= !(1 << bit);
    }

    /// Clear every bit (spec §3 invariant: "`mask` is cleared on entry").
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Reopen every entry except the timeout bit (spec §4.8.2 "leave":
    /// release with an empty entry list re-opens all entries except
    /// timeout).
    pub fn set_all_except_timeout(&mut self, max_bit: u32) {
        debug_assert!(max_bit <= 64);
        self.0 = if max_bit == 64 { u64::MAX } else { (1u64 << max_bit) - 1 };
        self.clear_bit(TIMEOUT_BIT);
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Position of the lowest set bit, if any — used to read back which
    /// entry an accept statement selected.
    pub fn find_set(&self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros())
        }
    }
}

impl fmt::Debug for AcceptMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AcceptMask({:#066b})", self.0)
    }
}
