use core::borrow::Borrow;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::iter::FusedIterator;
use core::ops::Index;

use crate::error::TryReserveError;
use crate::hash_table::Cursor;
use crate::hash_table::Entry as TableEntry;
use crate::hash_table::HashTable;

cfg_if::cfg_if! {
    if #[cfg(any(feature = "foldhash", feature = "std"))] {
        use crate::DefaultHashBuilder;

        /// A hash map storing key-value pairs inline in a flat, open-addressed
        /// [`HashTable`].
        ///
        /// Keys implement `Hash + Eq` and are hashed with the configurable
        /// builder `S`, [`DefaultHashBuilder`] unless specified.
        ///
        /// Besides the usual key-based API, the map exposes [`Cursor`]s:
        /// lightweight positions returned by [`try_emplace`](Self::try_emplace),
        /// [`find`](Self::find) and [`begin`](Self::begin). A cursor stays valid
        /// across erasure of *other* keys and becomes unresolvable (rather than
        /// dangling) once the map grows or is cleared.
        ///
        /// # Performance Characteristics
        ///
        /// - **Memory**: 1 control byte per slot plus the size of `(K, V)`; at
        ///   most 7/8 of slots are in use (3/4 with `density-seventy-five`).
        /// - **Lookup**: one 16-byte vector compare per probed group; only slots
        ///   whose 7-bit tag matches are compared by key.
        #[derive(Clone)]
        pub struct HashMap<K, V, S = DefaultHashBuilder> {
            table: HashTable<(K, V)>,
            hash_builder: S,
        }
    } else {
        /// A hash map storing key-value pairs inline in a flat, open-addressed
        /// [`HashTable`].
        ///
        /// Without the `std` or `foldhash` feature there is no default hasher,
        /// so `S` must always be named.
        #[derive(Clone)]
        pub struct HashMap<K, V, S> {
            table: HashTable<(K, V)>,
            hash_builder: S,
        }
    }
}

/// Hashes the key of a stored pair. Used to rehome entries on resize.
#[inline(always)]
fn make_hasher<K: Hash, V, S: BuildHasher>(hash_builder: &S) -> impl Fn(&(K, V)) -> u64 + '_ {
    move |entry| hash_builder.hash_one(&entry.0)
}

#[inline(always)]
fn equivalent_key<Q, K, V>(key: &Q) -> impl Fn(&(K, V)) -> bool + '_
where
    Q: Eq + ?Sized,
    K: Borrow<Q>,
{
    move |entry| <K as Borrow<Q>>::borrow(&entry.0) == key
}

impl<K, V, S> Debug for HashMap<K, V, S>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> HashMap<K, V, S> {
    /// Creates a new hash map with the given hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use swiss_hash::HashMap;
    /// #
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let map: HashMap<i32, String, _> = HashMap::with_hasher(SimpleHasher);
    /// assert!(map.is_empty());
    /// ```
    pub const fn with_hasher(hash_builder: S) -> Self {
        Self {
            table: HashTable::new(),
            hash_builder,
        }
    }

    /// Creates a new hash map with room for at least `capacity` entries and
    /// the given hasher builder.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self {
            table: HashTable::with_capacity(capacity),
            hash_builder,
        }
    }

    /// Returns a reference to the map's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Returns the number of entries in the map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use swiss_hash::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// assert_eq!(map.len(), 0);
    /// map.insert(1, "a");
    /// assert_eq!(map.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of entries the map can hold without growing.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Removes all entries, keeping the allocated storage.
    ///
    /// Cursors obtained before the call no longer resolve.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use swiss_hash::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// let (cursor, _) = map.try_emplace(1, "a");
    /// map.clear();
    /// assert!(map.is_empty());
    /// assert_eq!(map.get_at(cursor), None);
    /// ```
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Cursor to the first entry in slot order, or [`end`](Self::end) if the
    /// map is empty.
    pub fn begin(&self) -> Cursor {
        self.table.begin()
    }

    /// The past-the-end cursor. Returned by [`find`](Self::find) on a miss.
    pub fn end(&self) -> Cursor {
        self.table.end()
    }

    /// Cursor to the entry after `cursor` in slot order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use swiss_hash::HashMap;
    /// #
    /// let map: HashMap<u32, u32> = (0..10).map(|k| (k, k * k)).collect();
    ///
    /// let mut visited = 0;
    /// let mut cursor = map.begin();
    /// while cursor != map.end() {
    ///     let (k, v) = map.get_at(cursor).unwrap();
    ///     assert_eq!(*v, k * k);
    ///     visited += 1;
    ///     cursor = map.advance(cursor);
    /// }
    /// assert_eq!(visited, 10);
    /// ```
    pub fn advance(&self, cursor: Cursor) -> Cursor {
        self.table.advance(cursor)
    }

    /// Returns the entry at `cursor`.
    ///
    /// `None` for the end cursor, for a cursor whose entry was erased, and for
    /// any cursor taken before the map last grew, shrank or was cleared.
    pub fn get_at(&self, cursor: Cursor) -> Option<(&K, &V)> {
        self.table.get_at(cursor).map(|(k, v)| (k, v))
    }

    /// Returns the entry at `cursor` with a mutable value.
    pub fn get_at_mut(&mut self, cursor: Cursor) -> Option<(&K, &mut V)> {
        self.table.get_at_mut(cursor).map(|(k, v)| (&*k, v))
    }

    /// Removes the entry at `cursor`, if it still resolves.
    pub fn erase_at(&mut self, cursor: Cursor) -> Option<(K, V)> {
        self.table.erase_at(cursor)
    }

    /// Returns an iterator over the entries of the map, in slot order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use swiss_hash::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert(1, "a");
    /// map.insert(2, "b");
    ///
    /// for (key, value) in map.iter() {
    ///     println!("Key: {}, Value: {}", key, value);
    /// }
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.table.iter(),
        }
    }

    /// Returns an iterator over the entries with mutable values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: self.table.iter_mut(),
        }
    }

    /// Returns an iterator over the keys of the map.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Returns an iterator over the values of the map.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Returns an iterator over mutable references to the values of the map.
    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V> {
        ValuesMut {
            inner: self.iter_mut(),
        }
    }

    /// Removes and yields every entry. The map is empty afterwards, even if
    /// the iterator is dropped before it is exhausted.
    pub fn drain(&mut self) -> Drain<'_, K, V> {
        Drain {
            inner: self.table.drain(),
        }
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Inserts `key` with `value` unless the key is already present.
    ///
    /// Returns a cursor to the entry holding `key` and whether an insertion
    /// happened. An existing value is left untouched and `value` is dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use swiss_hash::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// let (first, inserted) = map.try_emplace(1, 100);
    /// assert!(inserted);
    ///
    /// let (second, inserted) = map.try_emplace(1, 200);
    /// assert!(!inserted);
    /// assert_eq!(first, second);
    /// assert_eq!(map.get_at(second), Some((&1, &100)));
    /// ```
    pub fn try_emplace(&mut self, key: K, value: V) -> (Cursor, bool) {
        let hash = self.hash_builder.hash_one(&key);
        match self.table.entry(
            hash,
            equivalent_key(&key),
            make_hasher(&self.hash_builder),
        ) {
            TableEntry::Occupied(entry) => (entry.cursor(), false),
            TableEntry::Vacant(entry) => (entry.insert_entry((key, value)).cursor(), true),
        }
    }

    /// Inserts a key-value pair, returning the previous value if the key was
    /// present. The stored key is not replaced.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use swiss_hash::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// assert_eq!(map.insert(37, "a"), None);
    /// assert_eq!(map.insert(37, "b"), Some("a"));
    /// assert_eq!(map.get(&37), Some(&"b"));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = self.hash_builder.hash_one(&key);
        match self.table.entry(
            hash,
            equivalent_key(&key),
            make_hasher(&self.hash_builder),
        ) {
            TableEntry::Occupied(mut entry) => {
                Some(core::mem::replace(&mut entry.get_mut().1, value))
            }
            TableEntry::Vacant(entry) => {
                entry.insert((key, value));
                None
            }
        }
    }

    /// Gets the given key's entry for in-place manipulation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use swiss_hash::HashMap;
    /// #
    /// let mut counts = HashMap::new();
    /// for word in ["a", "b", "a"] {
    ///     *counts.entry(word).or_insert(0) += 1;
    /// }
    /// assert_eq!(counts.get("a"), Some(&2));
    /// assert_eq!(counts.get("b"), Some(&1));
    /// ```
    pub fn entry(&mut self, key: K) -> Entry<'_, K, V> {
        let hash = self.hash_builder.hash_one(&key);
        match self.table.entry(
            hash,
            equivalent_key(&key),
            make_hasher(&self.hash_builder),
        ) {
            TableEntry::Occupied(entry) => Entry::Occupied(OccupiedEntry { entry }),
            TableEntry::Vacant(entry) => Entry::Vacant(VacantEntry { entry, key }),
        }
    }

    /// Returns a cursor to the entry for `key`, or [`end`](Self::end) if the
    /// key is absent.
    pub fn find<Q>(&self, key: &Q) -> Cursor
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        let hash = self.hash_builder.hash_one(key);
        self.table.find_cursor(hash, equivalent_key(key))
    }

    /// Removes `key`, returning how many entries were removed (0 or 1).
    ///
    /// Cursors to other entries remain valid.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use swiss_hash::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.erase(&1), 1);
    /// assert_eq!(map.erase(&1), 0);
    /// ```
    pub fn erase<Q>(&mut self, key: &Q) -> usize
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        usize::from(self.remove_entry(key).is_some())
    }

    /// Returns a reference to the value for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        self.get_key_value(key).map(|(_, v)| v)
    }

    /// Returns the stored key and value for `key`.
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        let hash = self.hash_builder.hash_one(key);
        self.table
            .find(hash, equivalent_key(key))
            .map(|(k, v)| (k, v))
    }

    /// Returns a mutable reference to the value for `key`.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        let hash = self.hash_builder.hash_one(key);
        self.table
            .find_mut(hash, equivalent_key(key))
            .map(|(_, v)| v)
    }

    /// Returns `true` if the map holds `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        self.get_key_value(key).is_some()
    }

    /// Removes `key`, returning its value if it was present.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Removes `key`, returning the stored key and value if it was present.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        let hash = self.hash_builder.hash_one(key);
        self.table.remove(hash, equivalent_key(key))
    }

    /// Reserves room for at least `additional` more entries.
    ///
    /// # Panics
    ///
    /// Panics if the new slot count overflows `usize`.
    pub fn reserve(&mut self, additional: usize) {
        self.table
            .reserve(additional, make_hasher(&self.hash_builder));
    }

    /// Fallible version of [`reserve`](Self::reserve).
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        self.table
            .try_reserve(additional, make_hasher(&self.hash_builder))
    }

    /// Shrinks the storage to the smallest size that holds the current
    /// entries. An empty map releases its allocation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use swiss_hash::HashMap;
    /// #
    /// let mut map = HashMap::with_capacity(100);
    /// map.insert(1, "one");
    /// map.insert(2, "two");
    /// assert!(map.capacity() >= 100);
    ///
    /// map.shrink_to_fit();
    /// assert!(map.capacity() >= 2);
    /// assert!(map.capacity() < 100);
    /// ```
    pub fn shrink_to_fit(&mut self) {
        self.table.shrink_to_fit(make_hasher(&self.hash_builder));
    }

    /// Collects slot usage and probe-length statistics for the map.
    #[cfg(feature = "stats")]
    pub fn stats(&self) -> crate::hash_table::TableStats {
        self.table.stats(make_hasher(&self.hash_builder))
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(feature = "foldhash", feature = "std"))] {
        impl<K, V> HashMap<K, V, DefaultHashBuilder> {
            /// Creates an empty map with the default hasher builder. Nothing is
            /// allocated until the first insertion.
            ///
            /// # Examples
            ///
            /// ```rust
            /// # use swiss_hash::HashMap;
            /// #
            /// let map: HashMap<i32, String> = HashMap::new();
            /// assert!(map.is_empty());
            /// assert_eq!(map.capacity(), 0);
            /// ```
            pub fn new() -> Self {
                Self::with_hasher(DefaultHashBuilder::default())
            }

            /// Creates an empty map with room for at least `capacity` entries.
            pub fn with_capacity(capacity: usize) -> Self {
                Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
            }
        }
    } else {
        impl<K, V, S> HashMap<K, V, S>
        where
            S: Default,
        {
            /// Creates an empty map using `S::default()` as the hasher builder.
            pub fn new() -> Self {
                Self::with_hasher(S::default())
            }

            /// Creates an empty map with room for at least `capacity` entries.
            pub fn with_capacity(capacity: usize) -> Self {
                Self::with_capacity_and_hasher(capacity, S::default())
            }
        }
    }
}

impl<K, V, S> Default for HashMap<K, V, S>
where
    S: Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> PartialEq for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| v == o))
    }
}

impl<K, V, S> Eq for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: Eq,
    S: BuildHasher,
{
}

impl<K, Q, V, S> Index<&Q> for HashMap<K, V, S>
where
    K: Hash + Eq + Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    S: BuildHasher,
{
    type Output = V;

    /// # Panics
    ///
    /// Panics if the key is not present.
    fn index(&self, key: &Q) -> &V {
        match self.get(key) {
            Some(value) => value,
            None => panic!("key not found in HashMap"),
        }
    }
}

impl<K, V, S> Extend<(K, V)> for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        // Duplicates in the input are likely when the map already has entries.
        let additional = if self.is_empty() {
            iter.size_hint().0
        } else {
            iter.size_hint().0.div_ceil(2)
        };
        self.reserve(additional);
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::with_hasher(S::default());
        map.extend(iter);
        map
    }
}

impl<K, V, S> IntoIterator for HashMap<K, V, S> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> IntoIter<K, V> {
        IntoIter {
            inner: self.table.into_iter(),
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a HashMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut HashMap<K, V, S> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> IterMut<'a, K, V> {
        self.iter_mut()
    }
}

/// A view into a single entry in the map, which may either be vacant or
/// occupied.
///
/// This enum is constructed from the [`entry`] method on [`HashMap`].
///
/// [`entry`]: HashMap::entry
pub enum Entry<'a, K, V> {
    /// A vacant entry.
    Vacant(VacantEntry<'a, K, V>),
    /// An occupied entry.
    Occupied(OccupiedEntry<'a, K, V>),
}

impl<'a, K, V> Entry<'a, K, V> {
    /// Inserts a default value if the entry is vacant and returns a mutable
    /// reference.
    pub fn or_insert(self, default: V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }

    /// Inserts a value computed from a closure if the entry is vacant and
    /// returns a mutable reference.
    pub fn or_insert_with<F>(self, default: F) -> &'a mut V
    where
        F: FnOnce() -> V,
    {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Provides in-place mutable access to an occupied entry before any
    /// potential inserts.
    pub fn and_modify<F>(self, f: F) -> Self
    where
        F: FnOnce(&mut V),
    {
        match self {
            Entry::Occupied(mut entry) => {
                f(entry.get_mut());
                Entry::Occupied(entry)
            }
            Entry::Vacant(entry) => Entry::Vacant(entry),
        }
    }

    /// Returns a reference to this entry's key.
    pub fn key(&self) -> &K {
        match self {
            Entry::Occupied(entry) => entry.key(),
            Entry::Vacant(entry) => entry.key(),
        }
    }
}

impl<'a, K, V> Entry<'a, K, V>
where
    V: Default,
{
    /// Inserts the default value if the entry is vacant and returns a mutable
    /// reference.
    pub fn or_default(self) -> &'a mut V {
        self.or_insert_with(Default::default)
    }
}

/// A view into a vacant entry in the map.
pub struct VacantEntry<'a, K, V> {
    entry: crate::hash_table::VacantEntry<'a, (K, V)>,
    key: K,
}

impl<'a, K, V> VacantEntry<'a, K, V> {
    /// Gets a reference to the key that would be used when inserting a value.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Take ownership of the key.
    pub fn into_key(self) -> K {
        self.key
    }

    /// Inserts the value into the map and returns a mutable reference to it.
    pub fn insert(self, value: V) -> &'a mut V {
        &mut self.entry.insert((self.key, value)).1
    }

    /// Inserts the value and returns a cursor to the new entry.
    pub fn insert_cursor(self, value: V) -> Cursor {
        self.entry.insert_entry((self.key, value)).cursor()
    }
}

/// A view into an occupied entry in the map.
pub struct OccupiedEntry<'a, K, V> {
    entry: crate::hash_table::OccupiedEntry<'a, (K, V)>,
}

impl<'a, K, V> OccupiedEntry<'a, K, V> {
    /// Gets a reference to the key in the entry.
    pub fn key(&self) -> &K {
        &self.entry.get().0
    }

    /// Gets a reference to the value in the entry.
    pub fn get(&self) -> &V {
        &self.entry.get().1
    }

    /// Gets a mutable reference to the value in the entry.
    pub fn get_mut(&mut self) -> &mut V {
        &mut self.entry.get_mut().1
    }

    /// Converts the entry into a mutable reference to the value.
    pub fn into_mut(self) -> &'a mut V {
        &mut self.entry.into_mut().1
    }

    /// Replaces the value in the entry and returns the old value.
    pub fn insert(&mut self, value: V) -> V {
        core::mem::replace(&mut self.entry.get_mut().1, value)
    }

    /// Removes the entry from the map and returns the value.
    pub fn remove(self) -> V {
        self.entry.remove().1
    }

    /// Removes the entry from the map and returns the key and value.
    pub fn remove_entry(self) -> (K, V) {
        self.entry.remove()
    }

    /// Returns a cursor to this entry.
    pub fn cursor(&self) -> Cursor {
        self.entry.cursor()
    }
}

/// An iterator over the key-value pairs of a `HashMap`.
pub struct Iter<'a, K, V> {
    inner: crate::hash_table::Iter<'a, (K, V)>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, v)| (k, v))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// An iterator over the key-value pairs of a `HashMap` with mutable values.
pub struct IterMut<'a, K, V> {
    inner: crate::hash_table::IterMut<'a, (K, V)>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, v)| (&*k, v))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}
impl<K, V> FusedIterator for IterMut<'_, K, V> {}

/// An iterator over the keys of a `HashMap`.
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

/// An iterator over the values of a `HashMap`.
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}

/// An iterator over mutable references to the values of a `HashMap`.
pub struct ValuesMut<'a, K, V> {
    inner: IterMut<'a, K, V>,
}

impl<'a, K, V> Iterator for ValuesMut<'a, K, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for ValuesMut<'_, K, V> {}

/// A draining iterator over the key-value pairs of a `HashMap`.
pub struct Drain<'a, K, V> {
    inner: crate::hash_table::Drain<'a, (K, V)>,
}

impl<K, V> Iterator for Drain<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Drain<'_, K, V> {}

/// An owning iterator over the key-value pairs of a `HashMap`.
pub struct IntoIter<K, V> {
    inner: crate::hash_table::IntoIter<(K, V)>,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {}

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec::Vec;
    use core::hash::BuildHasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;

    #[derive(Clone)]
    struct SipHashBuilder {
        k1: u64,
        k2: u64,
    }

    impl BuildHasher for SipHashBuilder {
        type Hasher = SipHasher;

        fn build_hasher(&self) -> Self::Hasher {
            SipHasher::new_with_keys(self.k1, self.k2)
        }
    }

    impl Default for SipHashBuilder {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k1: rng.try_next_u64().unwrap_or(0),
                k2: rng.try_next_u64().unwrap_or(0),
            }
        }
    }

    /// Sends every key to the same group with the same tag.
    #[derive(Clone, Default)]
    struct ConstantHashBuilder;

    struct ConstantHasher;

    impl core::hash::Hasher for ConstantHasher {
        fn finish(&self) -> u64 {
            0
        }

        fn write(&mut self, _bytes: &[u8]) {}
    }

    impl BuildHasher for ConstantHashBuilder {
        type Hasher = ConstantHasher;

        fn build_hasher(&self) -> Self::Hasher {
            ConstantHasher
        }
    }

    type SipMap<K, V> = HashMap<K, V, SipHashBuilder>;

    #[test]
    fn test_new_and_with_hasher() {
        let map: SipMap<i32, String> = HashMap::with_hasher(SipHashBuilder::default());
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert_eq!(map.capacity(), 0);
        assert_eq!(map.begin(), map.end());
    }

    #[test]
    fn test_with_capacity() {
        let map: SipMap<i32, String> =
            HashMap::with_capacity_and_hasher(200, SipHashBuilder::default());
        assert!(map.capacity() >= 200);
        assert!(map.is_empty());
    }

    #[test]
    fn test_try_emplace_keeps_first_value() {
        let mut map = SipMap::default();
        let (c1, inserted) = map.try_emplace(1, 100);
        assert!(inserted);
        let (c2, inserted) = map.try_emplace(1, 200);
        assert!(!inserted);
        assert_eq!(c1, c2);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get_at(c1), Some((&1, &100)));
        assert_eq!(map.get(&1), Some(&100));
    }

    #[test]
    fn test_insert_and_get() {
        let mut map = SipMap::default();

        assert_eq!(map.insert(1, "hello".to_string()), None);
        assert_eq!(map.len(), 1);
        assert!(!map.is_empty());

        assert_eq!(map.get(&1), Some(&"hello".to_string()));
        assert_eq!(map.get(&2), None);

        assert_eq!(
            map.insert(1, "world".to_string()),
            Some("hello".to_string())
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&1), Some(&"world".to_string()));
    }

    #[test]
    fn test_borrowed_lookup() {
        let mut map: SipMap<String, usize> = SipMap::default();
        map.insert("alpha".to_string(), 1);
        map.insert("beta".to_string(), 2);

        assert_eq!(map.get("alpha"), Some(&1));
        assert!(map.contains_key("beta"));
        assert_ne!(map.find("beta"), map.end());
        assert_eq!(map.find("gamma"), map.end());
        assert_eq!(map["beta"], 2);
        assert_eq!(map.erase("alpha"), 1);
        assert_eq!(map.remove_entry("beta"), Some(("beta".to_string(), 2)));
        assert!(map.is_empty());
    }

    #[test]
    fn test_get_mut_and_get_at_mut() {
        let mut map = SipMap::default();
        map.insert(1, "hello".to_string());

        if let Some(value) = map.get_mut(&1) {
            value.push_str(" world");
        }
        assert_eq!(map.get(&1), Some(&"hello world".to_string()));
        assert_eq!(map.get_mut(&2), None);

        let cursor = map.find(&1);
        if let Some((_, value)) = map.get_at_mut(cursor) {
            value.push('!');
        }
        assert_eq!(map.get(&1).map(String::as_str), Some("hello world!"));
    }

    #[test]
    fn test_erase_counts() {
        let mut map = SipMap::default();
        for i in 0..1000 {
            map.insert(i, i * 10);
        }
        for i in (0..1000).step_by(2) {
            assert_eq!(map.erase(&i), 1);
        }
        assert_eq!(map.erase(&1100), 0);
        assert_eq!(map.erase(&0), 0);
        assert_eq!(map.len(), 500);
        for i in 0..1000 {
            assert_eq!(map.get(&i).copied(), (i % 2 == 1).then_some(i * 10));
        }
    }

    #[test]
    fn test_cursor_stable_across_other_erases() {
        let mut map = SipMap::default();
        for i in 0..10 {
            map.insert(i, i);
        }
        let it5 = map.find(&5);
        assert_eq!(map.erase(&3), 1);
        assert_eq!(map.erase(&4), 1);
        assert_eq!(map.find(&5), it5);
        assert_eq!(map.get_at(it5), Some((&5, &5)));
    }

    #[test]
    fn test_erase_at() {
        let mut map = SipMap::default();
        let (cursor, _) = map.try_emplace(7, "seven");
        assert_eq!(map.erase_at(cursor), Some((7, "seven")));
        assert_eq!(map.erase_at(cursor), None);
        assert_eq!(map.get_at(cursor), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_cursor_walk_visits_every_entry() {
        let mut map = SipMap::default();
        for i in 0..257u32 {
            map.insert(i, ());
        }
        let mut keys = Vec::new();
        let mut cursor = map.begin();
        while cursor != map.end() {
            if let Some((k, _)) = map.get_at(cursor) {
                keys.push(*k);
            }
            cursor = map.advance(cursor);
        }
        keys.sort_unstable();
        assert_eq!(keys, (0..257).collect::<Vec<_>>());
        assert_eq!(map.advance(map.end()), map.end());
    }

    #[test]
    fn test_high_collision() {
        let mut map: HashMap<u32, u32, ConstantHashBuilder> = HashMap::default();
        for i in 0..200 {
            map.insert(i, i % 10);
        }
        assert_eq!(map.len(), 200);
        for i in 0..200 {
            assert_eq!(map.get(&i), Some(&(i % 10)));
        }
        for i in (0..200).step_by(3) {
            assert_eq!(map.erase(&i), 1);
        }
        for i in 0..200 {
            assert_eq!(map.contains_key(&i), i % 3 != 0);
        }
    }

    #[test]
    fn test_entry_api() {
        let mut map = SipMap::default();
        *map.entry("a").or_insert(0) += 1;
        *map.entry("a").or_insert(0) += 1;
        *map.entry("b").or_default() += 5;
        map.entry("c").and_modify(|v| *v += 100).or_insert(7);
        map.entry("c").and_modify(|v| *v += 100).or_insert(7);

        assert_eq!(map.get("a"), Some(&2));
        assert_eq!(map.get("b"), Some(&5));
        assert_eq!(map.get("c"), Some(&107));
        assert_eq!(map.entry("z").key(), &"z");

        match map.entry("a") {
            Entry::Occupied(mut entry) => {
                assert_eq!(entry.insert(10), 2);
                assert_eq!(entry.remove_entry(), ("a", 10));
            }
            Entry::Vacant(_) => panic!("expected occupied entry"),
        }
        let cursor = match map.entry("d") {
            Entry::Vacant(entry) => entry.insert_cursor(4),
            Entry::Occupied(_) => panic!("expected vacant entry"),
        };
        assert_eq!(map.get_at(cursor), Some((&"d", &4)));
    }

    #[test]
    fn test_iterators() {
        let mut map: SipMap<u32, u32> = (0..100).map(|i| (i, i)).collect();
        assert_eq!(map.iter().len(), 100);
        assert_eq!(map.keys().map(|&k| k as u64).sum::<u64>(), 4950);

        for v in map.values_mut() {
            *v *= 2;
        }
        for (_, v) in &mut map {
            *v += 1;
        }
        assert_eq!(map.values().map(|&v| v as u64).sum::<u64>(), 9900 + 100);

        let mut owned: Vec<(u32, u32)> = map.into_iter().collect();
        owned.sort_unstable();
        assert_eq!(owned[10], (10, 21));
    }

    #[test]
    fn test_drain() {
        let mut map: SipMap<u32, String> = (0..50).map(|i| (i, i.to_string())).collect();
        let (cursor, _) = map.try_emplace(0, String::new());

        let mut drained: Vec<_> = map.drain().collect();
        drained.sort_unstable();
        assert_eq!(drained.len(), 50);
        assert_eq!(drained[49], (49, "49".to_string()));
        assert!(map.is_empty());
        assert_eq!(map.get_at(cursor), None);

        map.insert(1, "one".to_string());
        drop(map.drain());
        assert!(map.is_empty());
    }

    #[test]
    fn test_clear_then_reuse() {
        let mut map = SipMap::default();
        for i in 0..100 {
            map.insert(i, i);
        }
        let capacity = map.capacity();
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.capacity(), capacity);
        assert_eq!(map.begin(), map.end());

        map.insert(1, 100);
        assert_eq!(map.get(&1), Some(&100));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_erase_all_then_reinsert() {
        let mut map = SipMap::default();
        for i in 0..100 {
            map.insert(i, i);
        }
        for i in 0..100 {
            assert_eq!(map.erase(&i), 1);
        }
        assert!(map.is_empty());
        assert_eq!(map.begin(), map.end());
        assert!(map.try_emplace(1, 100).1);
        assert_eq!(map.get(&1), Some(&100));
    }

    #[test]
    fn test_clone_eq_and_debug() {
        let mut map = SipMap::default();
        map.insert(1, "a");
        map.insert(2, "b");

        let mut other = map.clone();
        assert_eq!(map, other);
        other.insert(3, "c");
        assert_ne!(map, other);
        other.remove(&3);
        other.insert(2, "z");
        assert_ne!(map, other);

        map.remove(&2);
        let printed = format!("{map:?}");
        assert_eq!(printed, "{1: \"a\"}");
    }

    #[test]
    fn test_extend() {
        let mut map = SipMap::default();
        map.extend([(1, 1), (2, 2)]);
        map.extend([(2, 20), (3, 30)]);
        assert_eq!(map.len(), 3);
        assert_eq!(map[&2], 20);
    }

    #[test]
    #[should_panic(expected = "key not found")]
    fn test_index_missing_panics() {
        let map: SipMap<u32, u32> = SipMap::default();
        assert_eq!(map[&1], 0);
    }

    #[test]
    fn test_reserve_and_shrink() {
        let mut map: SipMap<u32, u32> = SipMap::default();
        map.reserve(1000);
        let capacity = map.capacity();
        assert!(capacity >= 1000);
        for i in 0..1000 {
            map.insert(i, i);
        }
        assert_eq!(map.capacity(), capacity);

        for i in 10..1000 {
            map.remove(&i);
        }
        map.shrink_to_fit();
        assert!(map.capacity() < capacity);
        for i in 0..10 {
            assert_eq!(map.get(&i), Some(&i));
        }

        assert_eq!(
            map.try_reserve(usize::MAX),
            Err(TryReserveError::CapacityOverflow)
        );
    }

    #[test]
    fn test_growth_invalidates_cursor_but_not_contents() {
        let mut map = SipMap::default();
        let (cursor, _) = map.try_emplace(0u64, 0u64);
        let capacity = map.capacity() as u64;
        for i in 1..=capacity {
            map.insert(i, i);
        }
        assert_eq!(map.get_at(cursor), None);
        let fresh = map.find(&0);
        assert_eq!(map.get_at(fresh), Some((&0, &0)));
        assert_eq!(map.len() as u64, capacity + 1);
    }
}
