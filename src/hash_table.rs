use alloc::vec::Vec;
use core::alloc::Layout;
use core::fmt::Debug;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::control::BitMask;
use crate::control::EMPTY;
use crate::control::GROUP_WIDTH;
use crate::control::Group;
use crate::control::ProbeSeq;
use crate::control::TOMBSTONE;
use crate::control::h2;
use crate::control::is_occupied;
use crate::error::TryReserveError;

cfg_if::cfg_if! {
    if #[cfg(feature = "density-seventy-five")] {
        const LOAD_NUM: usize = 3;
        const LOAD_DEN: usize = 4;
    } else {
        const LOAD_NUM: usize = 7;
        const LOAD_DEN: usize = 8;
    }
}

/// Number of occupied plus tombstoned slots allowed before the table must
/// grow. Always leaves at least one `EMPTY` byte so probes terminate.
#[inline(always)]
fn max_load(buckets: usize) -> usize {
    buckets / LOAD_DEN * LOAD_NUM
}

/// Smallest power-of-two slot count whose load bound admits `items` entries.
fn buckets_for(items: usize) -> Result<usize, TryReserveError> {
    if items == 0 {
        return Ok(0);
    }

    let adjusted = items
        .checked_mul(LOAD_DEN)
        .ok_or(TryReserveError::CapacityOverflow)?
        .div_ceil(LOAD_NUM);
    adjusted
        .max(GROUP_WIDTH)
        .checked_next_power_of_two()
        .ok_or(TryReserveError::CapacityOverflow)
}

#[derive(Debug, Clone, Copy)]
struct DataLayout {
    layout: Layout,
    slots_offset: usize,
}

impl DataLayout {
    fn new<V>(buckets: usize) -> Result<Self, TryReserveError> {
        let ctrl_layout = Layout::from_size_align(buckets, GROUP_WIDTH)
            .map_err(|_| TryReserveError::CapacityOverflow)?;
        let slots_layout = Layout::array::<MaybeUninit<V>>(buckets)
            .map_err(|_| TryReserveError::CapacityOverflow)?;

        let (layout, slots_offset) = ctrl_layout
            .extend(slots_layout)
            .map_err(|_| TryReserveError::CapacityOverflow)?;

        Ok(DataLayout {
            layout: layout.pad_to_align(),
            slots_offset,
        })
    }
}

/// Allocates storage for `buckets` slots with every control byte `EMPTY`.
fn allocate<V>(buckets: usize) -> Result<(DataLayout, NonNull<u8>), TryReserveError> {
    let layout = DataLayout::new::<V>(buckets)?;
    if layout.layout.size() == 0 {
        return Ok((layout, NonNull::dangling()));
    }

    // SAFETY: The layout has a non-zero size. A null return is reported as an
    // allocation failure, and the first `buckets` bytes are the control array.
    unsafe {
        let raw = alloc::alloc::alloc(layout.layout);
        let Some(ptr) = NonNull::new(raw) else {
            return Err(TryReserveError::AllocError {
                layout: layout.layout,
            });
        };
        core::ptr::write_bytes(raw, EMPTY, buckets);
        Ok((layout, ptr))
    }
}

/// A position in a [`HashTable`], as produced by [`HashTable::begin`],
/// [`HashTable::find_cursor`] and friends.
///
/// A cursor does not borrow the table. It records the storage generation it
/// was created under, so a cursor taken before the table grew or was cleared
/// simply stops resolving instead of pointing at unrelated memory. Erasing a
/// *different* entry never disturbs it: entries do not move on erase.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Cursor {
    index: usize,
    generation: u64,
}

impl Cursor {
    /// The slot index this cursor refers to. Equal to [`HashTable::buckets`]
    /// for the end cursor.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Low-level statistics about slot usage and probe lengths.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct TableStats {
    /// Number of live entries.
    pub items: usize,
    /// Number of slots holding a tombstone.
    pub tombstones: usize,
    /// Number of never-used slots.
    pub empty_slots: usize,
    /// Total number of slots allocated.
    pub buckets: usize,
    /// Maximum number of entries before the table grows.
    pub capacity: usize,
    /// `items / buckets`.
    pub load_factor: f64,
    /// `(items + tombstones) / buckets`, the quantity that triggers growth.
    pub used_factor: f64,
    /// `probe_histogram[n]` counts entries found `n` groups after their home
    /// group.
    pub probe_histogram: Vec<usize>,
    /// Total bytes allocated for control bytes and slots.
    pub total_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl TableStats {
    /// Pretty-print the statistics, including a horizontal bar chart of
    /// probe lengths.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Hash Table Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% of {} slots)",
            self.items,
            self.capacity,
            self.load_factor * 100.0,
            self.buckets
        );
        println!(
            "Tombstones: {} (slots in use {:.2}%)",
            self.tombstones,
            self.used_factor * 100.0
        );
        println!("Empty: {} slots", self.empty_slots);
        println!("Total Allocated: {} bytes", self.total_bytes);

        let max = self.probe_histogram.iter().copied().max().unwrap_or(0);
        if max == 0 {
            println!("probe histogram: empty");
            return;
        }

        let max_bar = 60usize;
        let total_units = max_bar * 8;
        let make_bar = |count: usize| -> alloc::string::String {
            if count == 0 {
                return alloc::string::String::new();
            }
            let units = ((count as u128 * total_units as u128).div_ceil(max as u128)) as usize;
            let mut bar = "█".repeat(units / 8);
            let partial = match units % 8 {
                1 => Some('▏'),
                2 => Some('▎'),
                3 => Some('▍'),
                4 => Some('▌'),
                5 => Some('▋'),
                6 => Some('▊'),
                7 => Some('▉'),
                _ => None,
            };
            if let Some(ch) = partial {
                bar.push(ch);
            }
            bar
        };

        println!("probe histogram (groups past home):");
        for (distance, &count) in self.probe_histogram.iter().enumerate() {
            println!("{:>3} | {} ({})", distance, make_bar(count), count);
        }
    }
}

/// A flat open-addressing hash table storing values of type `V`.
///
/// Like `hashbrown::HashTable`, the table does not know how to hash or
/// compare its values: every operation takes the 64-bit hash of the value
/// being looked up and an equality predicate, and operations that may move
/// entries into new storage also take a `hasher` to recompute hashes of
/// stored values.
///
/// Slots are grouped sixteen at a time. Each slot has one control byte in a
/// dense array kept apart from the values, so most non-matching slots are
/// rejected by a single vector compare without touching value memory.
///
/// ## Example
///
/// ```rust
/// # use core::hash::Hash;
/// # use core::hash::Hasher;
/// #
/// # use siphasher::sip::SipHasher;
/// # use swiss_hash::hash_table::Entry;
/// # use swiss_hash::hash_table::HashTable;
/// #
/// # fn hash_u64(n: u64) -> u64 {
/// #     let mut hasher = SipHasher::new();
/// #     n.hash(&mut hasher);
/// #     hasher.finish()
/// # }
/// #
/// let mut table: HashTable<(u64, &str)> = HashTable::with_capacity(16);
/// let rehash = |&(k, _): &(u64, &str)| hash_u64(k);
///
/// match table.entry(hash_u64(7), |&(k, _)| k == 7, rehash) {
///     Entry::Vacant(entry) => {
///         entry.insert((7, "seven"));
///     }
///     Entry::Occupied(_) => unreachable!(),
/// }
///
/// assert_eq!(table.find(hash_u64(7), |&(k, _)| k == 7), Some(&(7, "seven")));
/// assert_eq!(table.remove(hash_u64(7), |&(k, _)| k == 7), Some((7, "seven")));
/// assert!(table.is_empty());
/// ```
pub struct HashTable<V> {
    layout: DataLayout,
    alloc: NonNull<u8>,

    buckets: usize,
    items: usize,
    tombstones: usize,
    generation: u64,

    _phantom: PhantomData<V>,
}

// SAFETY: The table owns its values exactly like `Vec<V>` does.
unsafe impl<V: Send> Send for HashTable<V> {}
// SAFETY: Shared access only hands out `&V`.
unsafe impl<V: Sync> Sync for HashTable<V> {}

impl<V> Debug for HashTable<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use alloc::format;
        use alloc::string::String;

        let ctrl = self
            .ctrl()
            .chunks(GROUP_WIDTH)
            .map(|group| {
                group
                    .iter()
                    .map(|&b| match b {
                        EMPTY => String::from(".."),
                        TOMBSTONE => String::from("xx"),
                        tag => format!("{tag:02x}"),
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>();

        f.debug_struct("HashTable")
            .field("ctrl", &ctrl)
            .field("items", &self.items)
            .field("tombstones", &self.tombstones)
            .field("buckets", &self.buckets)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<V> Clone for HashTable<V>
where
    V: Clone,
{
    fn clone(&self) -> Self {
        let mut new_table = Self::with_buckets(self.buckets).unwrap_or_else(|e| e.raise());
        new_table.generation = self.generation;

        // SAFETY: Both tables have `self.buckets` slots. Each slot is written
        // before its control byte is marked occupied, so a panicking `clone`
        // leaves `new_table` consistent.
        unsafe {
            for index in 0..self.buckets {
                let tag = *self.ctrl().get_unchecked(index);
                if is_occupied(tag) {
                    let value = self.slot(index).clone();
                    (*new_table.slots_ptr().add(index)).write(value);
                    new_table.set_ctrl(index, tag);
                    new_table.items += 1;
                } else if tag == TOMBSTONE {
                    new_table.set_ctrl(index, TOMBSTONE);
                    new_table.tombstones += 1;
                }
            }
        }

        debug_assert_eq!(new_table.items, self.items);
        new_table
    }
}

impl<V> Drop for HashTable<V> {
    fn drop(&mut self) {
        // SAFETY: Only slots whose control byte is occupied are dropped, and the
        // allocation is released with the layout it was created with.
        unsafe {
            if core::mem::needs_drop::<V>() && self.items > 0 {
                for index in 0..self.buckets {
                    if is_occupied(*self.ctrl().get_unchecked(index)) {
                        (*self.slots_ptr().add(index)).assume_init_drop();
                    }
                }
            }

            if self.layout.layout.size() != 0 {
                alloc::alloc::dealloc(self.alloc.as_ptr(), self.layout.layout);
            }
        }
    }
}

impl<V> Default for HashTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> HashTable<V> {
    /// Creates an empty table. No memory is allocated until the first insert.
    pub const fn new() -> Self {
        Self {
            layout: DataLayout {
                layout: Layout::new::<()>(),
                slots_offset: 0,
            },
            alloc: NonNull::dangling(),
            buckets: 0,
            items: 0,
            tombstones: 0,
            generation: 0,
            _phantom: PhantomData,
        }
    }

    /// Creates an empty table able to hold at least `capacity` entries
    /// without growing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use swiss_hash::hash_table::HashTable;
    /// #
    /// let table: HashTable<String> = HashTable::with_capacity(100);
    /// assert!(table.capacity() >= 100);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        buckets_for(capacity)
            .and_then(Self::with_buckets)
            .unwrap_or_else(|e| e.raise())
    }

    fn with_buckets(buckets: usize) -> Result<Self, TryReserveError> {
        let (layout, alloc) = allocate::<V>(buckets)?;
        Ok(Self {
            layout,
            alloc,
            buckets,
            items: 0,
            tombstones: 0,
            generation: 0,
            _phantom: PhantomData,
        })
    }

    #[inline(always)]
    fn ctrl(&self) -> &[u8] {
        // SAFETY: The first `buckets` bytes of the allocation are the control
        // array; for an unallocated table the slice is empty.
        unsafe { core::slice::from_raw_parts(self.alloc.as_ptr(), self.buckets) }
    }

    #[inline(always)]
    fn slots_ptr(&self) -> *mut MaybeUninit<V> {
        // SAFETY: `slots_offset` lies within (or one past) the allocation.
        unsafe { self.alloc.as_ptr().add(self.layout.slots_offset).cast() }
    }

    /// # Safety
    ///
    /// `index` must be below `buckets`.
    #[inline(always)]
    unsafe fn set_ctrl(&mut self, index: usize, value: u8) {
        debug_assert!(index < self.buckets);
        // SAFETY: Caller ensures `index` is within the control array.
        unsafe { *self.alloc.as_ptr().add(index) = value }
    }

    /// # Safety
    ///
    /// `group` must be below `buckets / GROUP_WIDTH`.
    #[inline(always)]
    unsafe fn load_group(&self, group: usize) -> Group {
        debug_assert!(group * GROUP_WIDTH < self.buckets);
        // SAFETY: Groups are `GROUP_WIDTH`-aligned windows of the control array,
        // which itself is aligned to `GROUP_WIDTH`.
        unsafe { Group::load(self.alloc.as_ptr().add(group * GROUP_WIDTH)) }
    }

    /// # Safety
    ///
    /// `index` must name an occupied slot.
    #[inline(always)]
    unsafe fn slot(&self, index: usize) -> &V {
        // SAFETY: Occupied slots are initialized.
        unsafe { (*self.slots_ptr().add(index)).assume_init_ref() }
    }

    /// # Safety
    ///
    /// `index` must name an occupied slot.
    #[inline(always)]
    unsafe fn slot_mut(&mut self, index: usize) -> &mut V {
        // SAFETY: Occupied slots are initialized.
        unsafe { (*self.slots_ptr().add(index)).assume_init_mut() }
    }

    #[inline(always)]
    fn group_mask(&self) -> usize {
        debug_assert!(self.buckets != 0);
        self.buckets / GROUP_WIDTH - 1
    }

    #[inline(always)]
    fn is_occupied_at(&self, index: usize) -> bool {
        self.ctrl().get(index).is_some_and(|&b| is_occupied(b))
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        self.items
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// Returns the number of entries the table can hold before it grows,
    /// assuming no tombstones.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use swiss_hash::hash_table::HashTable;
    /// #
    /// let table: HashTable<u32> = HashTable::with_capacity(14);
    /// assert!(table.capacity() >= 14);
    /// assert!(table.buckets().is_power_of_two());
    /// ```
    pub fn capacity(&self) -> usize {
        max_load(self.buckets)
    }

    /// Returns the number of slots allocated. Always zero or a power of two
    /// of at least sixteen.
    pub fn buckets(&self) -> usize {
        self.buckets
    }

    /// Walks the probe sequence of `hash` looking for a value accepted by `eq`.
    ///
    /// Stops at the first group containing an `EMPTY` byte: insertion always
    /// fills the first free slot on a key's sequence, so a live key is never
    /// stored past such a group.
    #[inline]
    fn find_index(&self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<usize> {
        if self.items == 0 {
            return None;
        }

        let mask = self.group_mask();
        let tag = h2(hash);
        let mut probe = ProbeSeq::new(hash, mask);
        loop {
            // SAFETY: `probe.group` is masked to the group count.
            let group = unsafe { self.load_group(probe.group) };
            let base = probe.group * GROUP_WIDTH;

            for bit in group.match_tag(tag) {
                // SAFETY: A matching tag means the slot is occupied.
                if eq(unsafe { self.slot(base + bit) }) {
                    return Some(base + bit);
                }
            }

            if group.match_empty().any() {
                return None;
            }
            probe.move_next(mask);
        }
    }

    /// Like [`find_index`](Self::find_index), but on a miss returns the first
    /// `EMPTY` or `TOMBSTONE` slot seen along the way.
    ///
    /// Requires an allocated table.
    #[inline]
    fn find_or_find_insert_slot(
        &self,
        hash: u64,
        eq: impl Fn(&V) -> bool,
    ) -> Result<usize, usize> {
        let mask = self.group_mask();
        let tag = h2(hash);
        let mut probe = ProbeSeq::new(hash, mask);
        let mut candidate = None;
        loop {
            // SAFETY: `probe.group` is masked to the group count.
            let group = unsafe { self.load_group(probe.group) };
            let base = probe.group * GROUP_WIDTH;

            for bit in group.match_tag(tag) {
                // SAFETY: A matching tag means the slot is occupied.
                if eq(unsafe { self.slot(base + bit) }) {
                    return Ok(base + bit);
                }
            }

            if candidate.is_none() {
                candidate = group.match_empty_or_tombstone().lowest().map(|bit| base + bit);
            }

            // A group holding an `EMPTY` byte always produced a candidate above.
            if let Some(candidate) = candidate
                && group.match_empty().any()
            {
                return Err(candidate);
            }
            probe.move_next(mask);
        }
    }

    /// Returns the first `EMPTY` or `TOMBSTONE` slot on the probe sequence of
    /// `hash`, without comparing keys.
    ///
    /// Requires an allocated table.
    #[inline]
    fn find_insert_slot(&self, hash: u64) -> usize {
        let mask = self.group_mask();
        let mut probe = ProbeSeq::new(hash, mask);
        loop {
            // SAFETY: `probe.group` is masked to the group count.
            let group = unsafe { self.load_group(probe.group) };
            if let Some(bit) = group.match_empty_or_tombstone().lowest() {
                return probe.group * GROUP_WIDTH + bit;
            }
            probe.move_next(mask);
        }
    }

    /// Writes `value` into the free slot `index`.
    ///
    /// # Safety
    ///
    /// `index` must be an `EMPTY` or `TOMBSTONE` slot on the probe sequence of
    /// `hash`, and taking it must not break the load bound.
    #[inline]
    unsafe fn insert_in_slot(&mut self, hash: u64, index: usize, value: V) -> &mut V {
        // SAFETY: Caller ensures `index` is a free slot within bounds.
        unsafe {
            let old = *self.ctrl().get_unchecked(index);
            debug_assert!(!is_occupied(old));
            if old == TOMBSTONE {
                self.tombstones -= 1;
            }
            self.set_ctrl(index, h2(hash));
            self.items += 1;
            (*self.slots_ptr().add(index)).write(value)
        }
    }

    /// Removes the value in the occupied slot `index`.
    ///
    /// The slot becomes `EMPTY` when its group already holds an `EMPTY` byte:
    /// every probe through that group stops there anyway. Otherwise it becomes
    /// a `TOMBSTONE` so probes for keys stored further along keep going. A
    /// group without `EMPTY` bytes cannot regain one before the next rehash,
    /// so no key placed past it ever becomes unreachable.
    ///
    /// # Safety
    ///
    /// `index` must name an occupied slot.
    #[inline]
    unsafe fn erase_index(&mut self, index: usize) -> V {
        // SAFETY: Caller ensures `index` is occupied and therefore in bounds.
        unsafe {
            let group = self.load_group(index / GROUP_WIDTH);
            let ctrl = if group.match_empty().any() {
                EMPTY
            } else {
                self.tombstones += 1;
                TOMBSTONE
            };
            self.set_ctrl(index, ctrl);
            self.items -= 1;
            (*self.slots_ptr().add(index)).assume_init_read()
        }
    }

    #[inline(always)]
    fn needs_growth(&self) -> bool {
        self.items + self.tombstones >= max_load(self.buckets)
    }

    /// Makes room for `additional` more entries.
    ///
    /// When the pressure comes mostly from tombstones the table is rebuilt at
    /// the same size, otherwise it at least doubles.
    #[cold]
    #[inline(never)]
    fn reserve_rehash(
        &mut self,
        additional: usize,
        hasher: impl Fn(&V) -> u64,
    ) -> Result<(), TryReserveError> {
        let new_items = self
            .items
            .checked_add(additional)
            .ok_or(TryReserveError::CapacityOverflow)?;
        let full = max_load(self.buckets);

        if new_items <= full / 2 {
            log::debug!(
                "rehashing {} buckets in place to reclaim {} tombstones ({} items)",
                self.buckets,
                self.tombstones,
                self.items
            );
            self.resize(self.buckets, hasher)
        } else {
            let buckets = buckets_for(new_items.max(full + 1))?;
            log::debug!(
                "growing from {} to {} buckets ({} items, {} tombstones)",
                self.buckets,
                buckets,
                self.items,
                self.tombstones
            );
            self.resize(buckets, hasher)
        }
    }

    /// Moves every entry into fresh storage of `buckets` slots.
    fn resize(
        &mut self,
        buckets: usize,
        hasher: impl Fn(&V) -> u64,
    ) -> Result<(), TryReserveError> {
        debug_assert!(max_load(buckets) >= self.items);

        let (new_layout, new_alloc) = allocate::<V>(buckets)?;
        let old_layout = core::mem::replace(&mut self.layout, new_layout);
        let old_alloc = core::mem::replace(&mut self.alloc, new_alloc);
        let old_buckets = core::mem::replace(&mut self.buckets, buckets);

        self.generation = self.generation.wrapping_add(1);
        self.tombstones = 0;
        let expected = core::mem::replace(&mut self.items, 0);

        // SAFETY: The old allocation stays valid until the end of this block.
        // Values are moved bitwise into the new storage and the old allocation
        // is released without dropping them. `items` counts only moved values,
        // so a panicking `hasher` leaks the rest instead of double-dropping.
        unsafe {
            let old_ctrl = core::slice::from_raw_parts(old_alloc.as_ptr(), old_buckets);
            let old_slots: *const MaybeUninit<V> =
                old_alloc.as_ptr().add(old_layout.slots_offset).cast();

            for (index, &tag) in old_ctrl.iter().enumerate() {
                if !is_occupied(tag) {
                    continue;
                }

                let hash = hasher((*old_slots.add(index)).assume_init_ref());
                let slot = self.find_insert_slot(hash);
                core::ptr::copy_nonoverlapping(old_slots.add(index), self.slots_ptr().add(slot), 1);
                self.set_ctrl(slot, h2(hash));
                self.items += 1;
            }

            if old_layout.layout.size() != 0 {
                alloc::alloc::dealloc(old_alloc.as_ptr(), old_layout.layout);
            }
        }

        debug_assert_eq!(self.items, expected);
        Ok(())
    }

    /// Reserves room for at least `additional` more entries.
    ///
    /// # Panics
    ///
    /// Panics if the new slot count overflows `usize`; aborts through
    /// [`handle_alloc_error`](alloc::alloc::handle_alloc_error) if the
    /// allocator fails.
    pub fn reserve(&mut self, additional: usize, hasher: impl Fn(&V) -> u64) {
        if let Err(e) = self.try_reserve(additional, hasher) {
            e.raise();
        }
    }

    /// Fallible version of [`reserve`](Self::reserve).
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use swiss_hash::TryReserveError;
    /// # use swiss_hash::hash_table::HashTable;
    /// #
    /// let mut table: HashTable<u64> = HashTable::new();
    /// assert!(table.try_reserve(100, |&v| v).is_ok());
    /// assert!(table.capacity() >= 100);
    ///
    /// assert_eq!(
    ///     table.try_reserve(usize::MAX, |&v| v),
    ///     Err(TryReserveError::CapacityOverflow)
    /// );
    /// ```
    pub fn try_reserve(
        &mut self,
        additional: usize,
        hasher: impl Fn(&V) -> u64,
    ) -> Result<(), TryReserveError> {
        let free = max_load(self.buckets) - self.items - self.tombstones;
        if additional > free {
            self.reserve_rehash(additional, hasher)
        } else {
            Ok(())
        }
    }

    /// Shrinks the allocation to the smallest size that holds the current
    /// entries, dropping all tombstones. An empty table releases its memory.
    pub fn shrink_to_fit(&mut self, hasher: impl Fn(&V) -> u64) {
        if self.items == 0 {
            if self.buckets != 0 {
                log::debug!("releasing {} empty buckets", self.buckets);
            }
            let generation = self.generation.wrapping_add(1);
            // Dropping the old table releases its allocation.
            *self = Self::new();
            self.generation = generation;
            return;
        }

        let buckets = match buckets_for(self.items) {
            Ok(buckets) => buckets,
            Err(e) => e.raise(),
        };
        if buckets < self.buckets || self.tombstones > 0 {
            log::debug!(
                "shrinking from {} to {} buckets ({} items)",
                self.buckets,
                buckets,
                self.items
            );
            if let Err(e) = self.resize(buckets, hasher) {
                e.raise();
            }
        }
    }

    /// Removes every entry, keeping the allocation. Outstanding cursors stop
    /// resolving.
    pub fn clear(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if self.buckets == 0 {
            return;
        }

        log::trace!(
            "clearing {} items and {} tombstones",
            self.items,
            self.tombstones
        );

        if core::mem::needs_drop::<V>() && self.items > 0 {
            for index in 0..self.buckets {
                if self.is_occupied_at(index) {
                    // SAFETY: The slot is occupied. Its control byte is cleared
                    // first so a panicking destructor cannot cause a double drop.
                    unsafe {
                        self.set_ctrl(index, EMPTY);
                        self.items -= 1;
                        (*self.slots_ptr().add(index)).assume_init_drop();
                    }
                }
            }
        }

        // SAFETY: The control array spans the first `buckets` bytes.
        unsafe { core::ptr::write_bytes(self.alloc.as_ptr(), EMPTY, self.buckets) };
        self.items = 0;
        self.tombstones = 0;
    }

    /// Gets the entry for `hash`/`eq`, for in-place insertion or access.
    ///
    /// On a miss the returned [`VacantEntry`] already owns a free slot. If
    /// taking a never-used slot would exceed the load bound, the table grows
    /// (rehashing existing entries with `hasher`) before the entry is
    /// returned. Reusing a tombstone never grows the table.
    #[inline]
    pub fn entry(
        &mut self,
        hash: u64,
        eq: impl Fn(&V) -> bool,
        hasher: impl Fn(&V) -> u64,
    ) -> Entry<'_, V> {
        if self.buckets == 0 {
            if let Err(e) = self.reserve_rehash(1, &hasher) {
                e.raise();
            }
        }

        match self.find_or_find_insert_slot(hash, &eq) {
            Ok(index) => Entry::Occupied(OccupiedEntry { table: self, index }),
            Err(mut index) => {
                // SAFETY: `index` comes from the probe and is within bounds.
                let reuses_tombstone = unsafe { *self.ctrl().get_unchecked(index) } == TOMBSTONE;
                if !reuses_tombstone && self.needs_growth() {
                    if let Err(e) = self.reserve_rehash(1, &hasher) {
                        e.raise();
                    }
                    index = self.find_insert_slot(hash);
                }
                Entry::Vacant(VacantEntry {
                    table: self,
                    hash,
                    index,
                })
            }
        }
    }

    /// Finds a value by hash and equality predicate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use swiss_hash::hash_table::HashTable;
    /// #
    /// let mut table = HashTable::new();
    /// table.entry(42, |&n: &u64| n == 42, |&n| n).or_insert(42);
    ///
    /// assert_eq!(table.find(42, |&n| n == 42), Some(&42));
    /// assert_eq!(table.find(99, |&n| n == 99), None);
    /// ```
    #[inline]
    pub fn find(&self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<&V> {
        let index = self.find_index(hash, eq)?;
        // SAFETY: `find_index` only returns occupied slots.
        Some(unsafe { self.slot(index) })
    }

    /// Finds a value by hash and equality predicate, returning a mutable
    /// reference.
    #[inline]
    pub fn find_mut(&mut self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<&mut V> {
        let index = self.find_index(hash, eq)?;
        // SAFETY: `find_index` only returns occupied slots.
        Some(unsafe { self.slot_mut(index) })
    }

    /// Finds a value and returns a cursor to it, or [`end`](Self::end) if no
    /// value matches.
    #[inline]
    pub fn find_cursor(&self, hash: u64, eq: impl Fn(&V) -> bool) -> Cursor {
        match self.find_index(hash, eq) {
            Some(index) => self.cursor(index),
            None => self.end(),
        }
    }

    /// Removes and returns a value by hash and equality predicate.
    ///
    /// No other entry moves, so cursors to other entries stay valid.
    pub fn remove(&mut self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<V> {
        let index = self.find_index(hash, eq)?;
        // SAFETY: `find_index` only returns occupied slots.
        Some(unsafe { self.erase_index(index) })
    }

    #[inline(always)]
    fn cursor(&self, index: usize) -> Cursor {
        Cursor {
            index,
            generation: self.generation,
        }
    }

    #[inline]
    fn resolve(&self, cursor: Cursor) -> Option<usize> {
        (cursor.generation == self.generation && self.is_occupied_at(cursor.index))
            .then_some(cursor.index)
    }

    /// Index of the first occupied slot at or after `start`, or `buckets`.
    fn next_occupied(&self, start: usize) -> usize {
        if self.items == 0 {
            return self.buckets;
        }

        let mut group = start / GROUP_WIDTH;
        let mut skip = start % GROUP_WIDTH;
        while group * GROUP_WIDTH < self.buckets {
            // SAFETY: The loop condition keeps `group` within the control array.
            let occupied = unsafe { self.load_group(group) }.match_occupied();
            if let Some(bit) = BitMask(occupied.0 & (u16::MAX << skip)).lowest() {
                return group * GROUP_WIDTH + bit;
            }
            group += 1;
            skip = 0;
        }
        self.buckets
    }

    /// Cursor to the first occupied slot, or [`end`](Self::end).
    pub fn begin(&self) -> Cursor {
        self.cursor(self.next_occupied(0))
    }

    /// The past-the-end cursor.
    pub fn end(&self) -> Cursor {
        self.cursor(self.buckets)
    }

    /// Cursor to the next occupied slot after `cursor`, in slot order.
    /// Returns [`end`](Self::end) when there is none or when `cursor` belongs
    /// to an earlier generation.
    pub fn advance(&self, cursor: Cursor) -> Cursor {
        if cursor.generation != self.generation || cursor.index >= self.buckets {
            return self.end();
        }
        self.cursor(self.next_occupied(cursor.index + 1))
    }

    /// Returns the value at `cursor`, or `None` for the end cursor, a cursor
    /// whose slot was erased, or a cursor from before a resize or clear.
    pub fn get_at(&self, cursor: Cursor) -> Option<&V> {
        let index = self.resolve(cursor)?;
        // SAFETY: `resolve` only returns occupied slots.
        Some(unsafe { self.slot(index) })
    }

    /// Mutable version of [`get_at`](Self::get_at).
    pub fn get_at_mut(&mut self, cursor: Cursor) -> Option<&mut V> {
        let index = self.resolve(cursor)?;
        // SAFETY: `resolve` only returns occupied slots.
        Some(unsafe { self.slot_mut(index) })
    }

    /// Removes the value at `cursor`, if the cursor still resolves.
    pub fn erase_at(&mut self, cursor: Cursor) -> Option<V> {
        let index = self.resolve(cursor)?;
        // SAFETY: `resolve` only returns occupied slots.
        Some(unsafe { self.erase_index(index) })
    }

    /// Returns an iterator over all values, in slot order.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            table: self,
            raw: RawIter::new(self),
        }
    }

    /// Returns an iterator over mutable references to all values.
    pub fn iter_mut(&mut self) -> IterMut<'_, V> {
        IterMut {
            slots: self.slots_ptr(),
            raw: RawIter::new(self),
            _marker: PhantomData,
        }
    }

    /// Removes and yields every value. The table is empty afterwards, even if
    /// the iterator is dropped early.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use swiss_hash::hash_table::HashTable;
    /// #
    /// let mut table = HashTable::new();
    /// for n in 0..10u64 {
    ///     table.entry(n, |&v: &u64| v == n, |&v| v).or_insert(n);
    /// }
    ///
    /// let mut values: Vec<u64> = table.drain().collect();
    /// values.sort();
    /// assert_eq!(values, (0..10).collect::<Vec<_>>());
    /// assert!(table.is_empty());
    /// ```
    pub fn drain(&mut self) -> Drain<'_, V> {
        Drain {
            raw: RawIter::new(self),
            table: self,
        }
    }

    /// Collects slot usage and probe-length statistics.
    #[cfg(any(test, feature = "stats"))]
    pub fn stats(&self, hasher: impl Fn(&V) -> u64) -> TableStats {
        let mut probe_histogram = alloc::vec![0usize; 1];
        let mut empty_slots = 0;

        for (index, &tag) in self.ctrl().iter().enumerate() {
            if tag == EMPTY {
                empty_slots += 1;
            }
            if !is_occupied(tag) {
                continue;
            }

            // SAFETY: The slot is occupied.
            let hash = hasher(unsafe { self.slot(index) });
            let mask = self.group_mask();
            let mut probe = ProbeSeq::new(hash, mask);
            let mut distance = 0;
            while probe.group != index / GROUP_WIDTH {
                probe.move_next(mask);
                distance += 1;
            }

            if probe_histogram.len() <= distance {
                probe_histogram.resize(distance + 1, 0);
            }
            probe_histogram[distance] += 1;
        }

        TableStats {
            items: self.items,
            tombstones: self.tombstones,
            empty_slots,
            buckets: self.buckets,
            capacity: self.capacity(),
            load_factor: if self.buckets == 0 {
                0.0
            } else {
                self.items as f64 / self.buckets as f64
            },
            used_factor: if self.buckets == 0 {
                0.0
            } else {
                (self.items + self.tombstones) as f64 / self.buckets as f64
            },
            probe_histogram,
            total_bytes: self.layout.layout.size(),
        }
    }
}

/// A view into a single entry in the table, which may be vacant or occupied.
///
/// Constructed by [`HashTable::entry`].
pub enum Entry<'a, V> {
    /// The value is not present; the entry holds a free slot for it.
    Vacant(VacantEntry<'a, V>),
    /// The value is present.
    Occupied(OccupiedEntry<'a, V>),
}

impl<'a, V> Entry<'a, V> {
    /// Inserts `default` if the entry is vacant and returns a mutable
    /// reference to the value in the entry.
    pub fn or_insert(self, default: V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }

    /// Inserts the result of `default` if the entry is vacant.
    pub fn or_insert_with(self, default: impl FnOnce() -> V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Applies `f` to an occupied entry. Vacant entries return `None` and
    /// insert nothing.
    pub fn and_modify(self, f: impl FnOnce(&mut V)) -> Option<&'a mut V> {
        match self {
            Entry::Occupied(entry) => {
                let value = entry.into_mut();
                f(value);
                Some(value)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Inserts `V::default()` if the entry is vacant.
    pub fn or_default(self) -> &'a mut V
    where
        V: Default,
    {
        self.or_insert_with(Default::default)
    }
}

/// A vacant entry, holding the free slot the value will be written to.
pub struct VacantEntry<'a, V> {
    table: &'a mut HashTable<V>,
    hash: u64,
    index: usize,
}

impl<'a, V> VacantEntry<'a, V> {
    /// Inserts the value and returns a mutable reference to it.
    pub fn insert(self, value: V) -> &'a mut V {
        let table = self.table;
        // SAFETY: `entry` picked a free slot on this hash's probe sequence and
        // grew the table beforehand if the slot was never used.
        unsafe { table.insert_in_slot(self.hash, self.index, value) }
    }

    /// Inserts the value and returns an [`OccupiedEntry`] for it.
    pub fn insert_entry(self, value: V) -> OccupiedEntry<'a, V> {
        let index = self.index;
        // SAFETY: See `insert`.
        unsafe { self.table.insert_in_slot(self.hash, index, value) };
        OccupiedEntry {
            table: self.table,
            index,
        }
    }
}

/// An occupied entry.
pub struct OccupiedEntry<'a, V> {
    table: &'a mut HashTable<V>,
    index: usize,
}

impl<'a, V> OccupiedEntry<'a, V> {
    /// Gets a reference to the value in the entry.
    pub fn get(&self) -> &V {
        // SAFETY: The entry was built from an occupied slot.
        unsafe { self.table.slot(self.index) }
    }

    /// Gets a mutable reference to the value in the entry.
    pub fn get_mut(&mut self) -> &mut V {
        // SAFETY: The entry was built from an occupied slot.
        unsafe { self.table.slot_mut(self.index) }
    }

    /// Converts the entry into a mutable reference with the entry's lifetime.
    pub fn into_mut(self) -> &'a mut V {
        let table = self.table;
        // SAFETY: The entry was built from an occupied slot.
        unsafe { table.slot_mut(self.index) }
    }

    /// Removes the entry from the table and returns its value.
    pub fn remove(self) -> V {
        // SAFETY: The entry was built from an occupied slot.
        unsafe { self.table.erase_index(self.index) }
    }

    /// Returns a cursor to this entry.
    pub fn cursor(&self) -> Cursor {
        self.table.cursor(self.index)
    }
}

/// Yields the indices of occupied slots, one group at a time.
struct RawIter {
    ctrl: *const u8,
    buckets: usize,
    next_group: usize,
    current: BitMask,
    base: usize,
    remaining: usize,
}

impl RawIter {
    fn new<V>(table: &HashTable<V>) -> Self {
        RawIter {
            ctrl: table.alloc.as_ptr(),
            buckets: table.buckets,
            next_group: 0,
            current: BitMask(0),
            base: 0,
            remaining: table.items,
        }
    }
}

impl Iterator for RawIter {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        loop {
            if let Some(bit) = self.current.next() {
                self.remaining = self.remaining.saturating_sub(1);
                return Some(self.base + bit);
            }

            if self.remaining == 0 || self.next_group * GROUP_WIDTH >= self.buckets {
                return None;
            }

            self.base = self.next_group * GROUP_WIDTH;
            // SAFETY: `base` is a group boundary below `buckets`, and the control
            // array outlives the iterator through the borrow held by its owner.
            self.current = unsafe { Group::load(self.ctrl.add(self.base)) }.match_occupied();
            self.next_group += 1;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

/// An iterator over the values of a [`HashTable`].
pub struct Iter<'a, V> {
    table: &'a HashTable<V>,
    raw: RawIter,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = &'a V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let index = self.raw.next()?;
        // SAFETY: `RawIter` only yields occupied slots.
        Some(unsafe { self.table.slot(index) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.raw.size_hint()
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}
impl<V> FusedIterator for Iter<'_, V> {}

/// A mutable iterator over the values of a [`HashTable`].
pub struct IterMut<'a, V> {
    slots: *mut MaybeUninit<V>,
    raw: RawIter,
    _marker: PhantomData<&'a mut V>,
}

impl<'a, V> Iterator for IterMut<'a, V> {
    type Item = &'a mut V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let index = self.raw.next()?;
        // SAFETY: `RawIter` yields each occupied slot once, so the mutable
        // references never alias.
        Some(unsafe { (*self.slots.add(index)).assume_init_mut() })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.raw.size_hint()
    }
}

impl<V> ExactSizeIterator for IterMut<'_, V> {}
impl<V> FusedIterator for IterMut<'_, V> {}

/// A draining iterator over the values of a [`HashTable`].
///
/// Created by [`HashTable::drain`].
pub struct Drain<'a, V> {
    table: &'a mut HashTable<V>,
    raw: RawIter,
}

impl<V> Iterator for Drain<'_, V> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.raw.next()?;
        // SAFETY: `RawIter` only yields occupied slots; the control byte is
        // cleared before the value is moved out.
        unsafe {
            self.table.set_ctrl(index, EMPTY);
            self.table.items -= 1;
            Some((*self.table.slots_ptr().add(index)).assume_init_read())
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.raw.size_hint()
    }
}

impl<V> ExactSizeIterator for Drain<'_, V> {}
impl<V> FusedIterator for Drain<'_, V> {}

impl<V> Drop for Drain<'_, V> {
    fn drop(&mut self) {
        for _ in &mut *self {}
        self.table.clear();
    }
}

/// An owning iterator over the values of a [`HashTable`].
pub struct IntoIter<V> {
    table: HashTable<V>,
    raw: RawIter,
}

impl<V> Iterator for IntoIter<V> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.raw.next()?;
        // SAFETY: As for `Drain`; whatever is left is dropped by the table.
        unsafe {
            self.table.set_ctrl(index, EMPTY);
            self.table.items -= 1;
            Some((*self.table.slots_ptr().add(index)).assume_init_read())
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.raw.size_hint()
    }
}

impl<V> ExactSizeIterator for IntoIter<V> {}
impl<V> FusedIterator for IntoIter<V> {}

impl<V> IntoIterator for HashTable<V> {
    type Item = V;
    type IntoIter = IntoIter<V>;

    fn into_iter(self) -> IntoIter<V> {
        IntoIter {
            raw: RawIter::new(&self),
            table: self,
        }
    }
}

impl<'a, V> IntoIterator for &'a HashTable<V> {
    type Item = &'a V;
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Iter<'a, V> {
        self.iter()
    }
}

impl<'a, V> IntoIterator for &'a mut HashTable<V> {
    type Item = &'a mut V;
    type IntoIter = IterMut<'a, V>;

    fn into_iter(self) -> IterMut<'a, V> {
        self.iter_mut()
    }
}
