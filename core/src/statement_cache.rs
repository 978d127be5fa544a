use crate::error::Result;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

const ABSENT: i32 = -1;

/// Disposal runs exactly once per evicted value, whether eviction came from
/// capacity pressure, an explicit evict, or teardown of the whole cache.
pub type Disposal<V> = Box<dyn FnMut(V) + Send>;

fn hash_of(state: &RandomState, sql: &str) -> u64 {
    let mut hasher = state.build_hasher();
    sql.hash(&mut hasher);
    hasher.finish()
}

fn bucket_count_for(max_size: usize) -> usize {
    max_size.next_power_of_two().max(2)
}

struct Entry<V> {
    sql: String,
    value: Option<V>,
    hash: u64,
    bucket_next: i32,
    lru_prev: i32,
    lru_next: i32,
}

/// A bounded, access-ordered map from SQL text to a compiled statement.
///
/// Entries live in an index-based arena. Each entry chains within its hash
/// bucket through `bucket_next` and is threaded on an intrusive LRU list
/// through `lru_prev`/`lru_next`, so eviction never chases owning pointers.
/// Evicted entry slots are reused through a freelist.
pub struct StatementCache<V> {
    entries: Vec<Entry<V>>,
    buckets: Box<[i32]>,
    state: RandomState,
    head: i32,
    tail: i32,
    free: i32,
    len: usize,
    max_size: usize,
    disposal: Disposal<V>,
}

impl<V> StatementCache<V> {
    pub fn new(max_size: usize, disposal: Disposal<V>) -> Self {
        let max_size = max_size.max(1);
        let buckets = vec![ABSENT; bucket_count_for(max_size)].into_boxed_slice();
        StatementCache {
            entries: Vec::with_capacity(max_size),
            buckets,
            state: RandomState::new(),
            head: ABSENT,
            tail: ABSENT,
            free: ABSENT,
            len: 0,
            max_size,
            disposal,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Looks up `sql`, compiling on a miss. A hit is promoted to the head of
    /// the access order; a miss at capacity evicts the tail first.
    pub fn get_or_compile<F>(&mut self, sql: &str, compile: F) -> Result<&mut V>
    where
        F: FnOnce() -> Result<V>,
    {
        let hash = hash_of(&self.state, sql);
        if let Some(index) = self.find(hash, sql) {
            self.unlink_lru(index);
            self.push_front(index);
            return Ok(self.entries[index as usize].value.as_mut().expect("live entry"));
        }
        let value = compile()?;
        if self.len >= self.max_size {
            let victim = self.tail;
            debug_assert_ne!(ABSENT, victim);
            self.evict_index(victim);
        }
        let index = self.insert(hash, sql, value);
        Ok(self.entries[index as usize].value.as_mut().expect("live entry"))
    }

    /// Disposes the entry for `sql`, if present.
    pub fn evict(&mut self, sql: &str) -> bool {
        let hash = hash_of(&self.state, sql);
        match self.find(hash, sql) {
            Some(index) => {
                self.evict_index(index);
                true
            }
            None => false,
        }
    }

    pub fn evict_all(&mut self) {
        while self.tail != ABSENT {
            self.evict_index(self.tail);
        }
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    fn find(&self, hash: u64, sql: &str) -> Option<i32> {
        let mut index = self.buckets[self.bucket_of(hash)];
        while index != ABSENT {
            let entry = &self.entries[index as usize];
            if entry.hash == hash && entry.sql == sql {
                return Some(index);
            }
            index = entry.bucket_next;
        }
        None
    }

    fn insert(&mut self, hash: u64, sql: &str, value: V) -> i32 {
        let index = if self.free != ABSENT {
            let index = self.free;
            self.free = self.entries[index as usize].bucket_next;
            let entry = &mut self.entries[index as usize];
            entry.sql.clear();
            entry.sql.push_str(sql);
            entry.value = Some(value);
            entry.hash = hash;
            index
        } else {
            self.entries.push(Entry {
                sql: sql.to_owned(),
                value: Some(value),
                hash,
                bucket_next: ABSENT,
                lru_prev: ABSENT,
                lru_next: ABSENT,
            });
            i32::try_from(self.entries.len() - 1).expect("cache size fits i32")
        };
        let bucket = self.bucket_of(hash);
        self.entries[index as usize].bucket_next = self.buckets[bucket];
        self.buckets[bucket] = index;
        self.push_front(index);
        self.len += 1;
        index
    }

    fn evict_index(&mut self, index: i32) {
        self.unlink_lru(index);
        self.unlink_bucket(index);
        let entry = &mut self.entries[index as usize];
        let value = entry.value.take().expect("evicting a live entry");
        entry.sql.clear();
        entry.bucket_next = self.free;
        self.free = index;
        self.len -= 1;
        (self.disposal)(value);
    }

    fn unlink_bucket(&mut self, index: i32) {
        let hash = self.entries[index as usize].hash;
        let bucket = self.bucket_of(hash);
        let mut current = self.buckets[bucket];
        if current == index {
            self.buckets[bucket] = self.entries[index as usize].bucket_next;
            return;
        }
        while current != ABSENT {
            let next = self.entries[current as usize].bucket_next;
            if next == index {
                self.entries[current as usize].bucket_next =
                    self.entries[index as usize].bucket_next;
                return;
            }
            current = next;
        }
    }

    fn unlink_lru(&mut self, index: i32) {
        let (prev, next) = {
            let entry = &self.entries[index as usize];
            (entry.lru_prev, entry.lru_next)
        };
        if prev != ABSENT {
            self.entries[prev as usize].lru_next = next;
        } else if self.head == index {
            self.head = next;
        }
        if next != ABSENT {
            self.entries[next as usize].lru_prev = prev;
        } else if self.tail == index {
            self.tail = prev;
        }
        let entry = &mut self.entries[index as usize];
        entry.lru_prev = ABSENT;
        entry.lru_next = ABSENT;
    }

    fn push_front(&mut self, index: i32) {
        let old_head = self.head;
        {
            let entry = &mut self.entries[index as usize];
            entry.lru_prev = ABSENT;
            entry.lru_next = old_head;
        }
        if old_head != ABSENT {
            self.entries[old_head as usize].lru_prev = index;
        }
        self.head = index;
        if self.tail == ABSENT {
            self.tail = index;
        }
    }
}

impl<V> Drop for StatementCache<V> {
    fn drop(&mut self) {
        self.evict_all();
    }
}

struct StampedEntry<V> {
    sql: String,
    value: Option<V>,
    hash: u64,
    bucket_next: i32,
    stamp: u64,
}

/// The single-thread-optimized variant of [`StatementCache`].
///
/// Eviction semantics are identical, but instead of re-linking an intrusive
/// list on every access, a hit just takes a fresh monotonic stamp; the
/// least-recently-stamped entry is located only when an eviction is actually
/// needed.
pub struct StampedStatementCache<V> {
    entries: Vec<StampedEntry<V>>,
    buckets: Box<[i32]>,
    state: RandomState,
    free: i32,
    len: usize,
    max_size: usize,
    clock: u64,
    disposal: Disposal<V>,
}

impl<V> StampedStatementCache<V> {
    pub fn new(max_size: usize, disposal: Disposal<V>) -> Self {
        let max_size = max_size.max(1);
        let buckets = vec![ABSENT; bucket_count_for(max_size)].into_boxed_slice();
        StampedStatementCache {
            entries: Vec::with_capacity(max_size),
            buckets,
            state: RandomState::new(),
            free: ABSENT,
            len: 0,
            max_size,
            clock: 0,
            disposal,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn get_or_compile<F>(&mut self, sql: &str, compile: F) -> Result<&mut V>
    where
        F: FnOnce() -> Result<V>,
    {
        let hash = hash_of(&self.state, sql);
        self.clock += 1;
        let stamp = self.clock;
        if let Some(index) = self.find(hash, sql) {
            let entry = &mut self.entries[index as usize];
            entry.stamp = stamp;
            return Ok(entry.value.as_mut().expect("live entry"));
        }
        let value = compile()?;
        if self.len >= self.max_size {
            let victim = self.oldest().expect("full cache has entries");
            self.evict_index(victim);
        }
        let index = self.insert(hash, sql, value, stamp);
        Ok(self.entries[index as usize].value.as_mut().expect("live entry"))
    }

    pub fn evict(&mut self, sql: &str) -> bool {
        let hash = hash_of(&self.state, sql);
        match self.find(hash, sql) {
            Some(index) => {
                self.evict_index(index);
                true
            }
            None => false,
        }
    }

    pub fn evict_all(&mut self) {
        for index in 0..self.entries.len() {
            if self.entries[index].value.is_some() {
                self.evict_index(i32::try_from(index).expect("cache size fits i32"));
            }
        }
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    fn find(&self, hash: u64, sql: &str) -> Option<i32> {
        let mut index = self.buckets[self.bucket_of(hash)];
        while index != ABSENT {
            let entry = &self.entries[index as usize];
            if entry.hash == hash && entry.sql == sql {
                return Some(index);
            }
            index = entry.bucket_next;
        }
        None
    }

    fn oldest(&self) -> Option<i32> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.value.is_some())
            .min_by_key(|(_, entry)| entry.stamp)
            .map(|(index, _)| i32::try_from(index).expect("cache size fits i32"))
    }

    fn insert(&mut self, hash: u64, sql: &str, value: V, stamp: u64) -> i32 {
        let index = if self.free != ABSENT {
            let index = self.free;
            self.free = self.entries[index as usize].bucket_next;
            let entry = &mut self.entries[index as usize];
            entry.sql.clear();
            entry.sql.push_str(sql);
            entry.value = Some(value);
            entry.hash = hash;
            entry.stamp = stamp;
            index
        } else {
            self.entries.push(StampedEntry {
                sql: sql.to_owned(),
                value: Some(value),
                hash,
                bucket_next: ABSENT,
                stamp,
            });
            i32::try_from(self.entries.len() - 1).expect("cache size fits i32")
        };
        let bucket = self.bucket_of(hash);
        self.entries[index as usize].bucket_next = self.buckets[bucket];
        self.buckets[bucket] = index;
        self.len += 1;
        index
    }

    fn evict_index(&mut self, index: i32) {
        let hash = self.entries[index as usize].hash;
        let bucket = self.bucket_of(hash);
        let mut current = self.buckets[bucket];
        if current == index {
            self.buckets[bucket] = self.entries[index as usize].bucket_next;
        } else {
            while current != ABSENT {
                let next = self.entries[current as usize].bucket_next;
                if next == index {
                    self.entries[current as usize].bucket_next =
                        self.entries[index as usize].bucket_next;
                    break;
                }
                current = next;
            }
        }
        let entry = &mut self.entries[index as usize];
        let value = entry.value.take().expect("evicting a live entry");
        entry.sql.clear();
        entry.bucket_next = self.free;
        self.free = index;
        self.len -= 1;
        (self.disposal)(value);
    }
}

impl<V> Drop for StampedStatementCache<V> {
    fn drop(&mut self) {
        self.evict_all();
    }
}
