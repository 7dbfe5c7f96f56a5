use core::alloc::Layout;

use thiserror::Error;

/// The error returned by `try_reserve` when the table cannot grow.
///
/// Looking up or erasing an absent key is never an error; running out of
/// address space or memory while resizing is the only failure a table
/// reports.
#[derive(Error, Clone, PartialEq, Eq, Debug)]
pub enum TryReserveError {
    /// The requested number of slots does not fit in `usize` or exceeds the
    /// maximum allocation size.
    #[error("capacity overflow")]
    CapacityOverflow,

    /// The allocator returned an error for the given layout.
    #[error("memory allocation of {} bytes failed", .layout.size())]
    AllocError {
        /// Layout of the allocation request that failed.
        layout: Layout,
    },
}

impl TryReserveError {
    /// Converts a failed resize into the abort/panic behaviour of infallible
    /// collection methods.
    #[cold]
    pub(crate) fn raise(self) -> ! {
        match self {
            TryReserveError::CapacityOverflow => panic!("capacity overflow"),
            TryReserveError::AllocError { layout } => alloc::alloc::handle_alloc_error(layout),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::*;

    #[test]
    fn messages() {
        assert_eq!(
            TryReserveError::CapacityOverflow.to_string(),
            "capacity overflow"
        );

        let layout = Layout::array::<u64>(4).unwrap();
        assert_eq!(
            TryReserveError::AllocError { layout }.to_string(),
            "memory allocation of 32 bytes failed"
        );
    }

    #[test]
    #[should_panic(expected = "capacity overflow")]
    fn overflow_panics_when_raised() {
        TryReserveError::CapacityOverflow.raise();
    }
}
