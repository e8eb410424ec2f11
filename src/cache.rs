//! In-memory decode cache shared by every conversion in a process.
//!
//! Decoding is the expensive half of a conversion, and a single conversion
//! asks for the same file several times: once per inspected mip level, once for
//! the pixels. This module keeps specifications and decoded pixel buffers so
//! repeated requests are answered from memory.
//!
//! # Design
//!
//! The cache is an explicitly constructed value. The binary builds one per
//! run and hands a reference to the [`Converter`](crate::thumbnail::Converter)
//! and to [`convert_sequence`](crate::sequence::convert_sequence); nothing
//! here is global.
//!
//! ## Keys
//!
//! Entries are keyed by `(path, subimage, miplevel)`. A specification lookup
//! that the backend answered with `None` (the pair does not exist) is cached
//! too, so mip probing touches the file once per level.
//!
//! ## Budget
//!
//! Pixel buffers count against a byte budget (`[cache] max_memory_mb`). When
//! an insert pushes the total over budget the oldest buffers are evicted
//! first. A buffer larger than the whole budget is returned to the caller but
//! never stored. Specifications are small and are not counted.
//!
//! ## Invalidation
//!
//! [`ImageCache::invalidate`] drops every entry for a path. The pipeline
//! calls it for both the input and the output on every exit path, so a file
//! rewritten by a later conversion is never served stale.

use crate::imaging::{BackendError, ImageBackend, ImageSpec, PixelBuffer};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default budget for decoded pixels.
pub const DEFAULT_MAX_MEMORY_MB: u64 = 2048;

type Key = (PathBuf, u32, u32);

#[derive(Default)]
struct CacheState {
    specs: HashMap<Key, Option<ImageSpec>>,
    pixels: HashMap<Key, Arc<PixelBuffer>>,
    /// Pixel keys, oldest first.
    order: VecDeque<Key>,
    bytes: usize,
    stats: CacheStats,
}

/// Process-wide decode cache with a pixel byte budget.
pub struct ImageCache {
    max_bytes: usize,
    state: Mutex<CacheState>,
}

impl ImageCache {
    pub fn new(max_memory_mb: u64) -> Self {
        let max_bytes = max_memory_mb.saturating_mul(1024 * 1024);
        Self {
            max_bytes: usize::try_from(max_bytes).unwrap_or(usize::MAX),
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Entries are plain data, a panic mid-update cannot leave them torn.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Specification for `(subimage, miplevel)`, or `None` if the pair does
    /// not exist in the file.
    pub fn spec<B: ImageBackend + ?Sized>(
        &self,
        backend: &B,
        path: &Path,
        subimage: u32,
        miplevel: u32,
    ) -> Result<Option<ImageSpec>, BackendError> {
        let key = (path.to_path_buf(), subimage, miplevel);
        {
            let mut state = self.lock();
            if let Some(spec) = state.specs.get(&key).cloned() {
                state.stats.hit();
                return Ok(spec);
            }
            state.stats.miss();
        }
        // Decode outside the lock so other workers keep going.
        let spec = backend.spec(path, subimage, miplevel)?;
        self.lock().specs.insert(key, spec.clone());
        Ok(spec)
    }

    /// Decoded pixels for `(subimage, miplevel)`.
    pub fn pixels<B: ImageBackend + ?Sized>(
        &self,
        backend: &B,
        path: &Path,
        subimage: u32,
        miplevel: u32,
    ) -> Result<Arc<PixelBuffer>, BackendError> {
        let key = (path.to_path_buf(), subimage, miplevel);
        {
            let mut state = self.lock();
            if let Some(buffer) = state.pixels.get(&key).cloned() {
                state.stats.hit();
                return Ok(buffer);
            }
            state.stats.miss();
        }
        let buffer = Arc::new(backend.read(path, subimage, miplevel)?);
        self.store(key, Arc::clone(&buffer));
        Ok(buffer)
    }

    fn store(&self, key: Key, buffer: Arc<PixelBuffer>) {
        let size = buffer.memory_bytes();
        if size > self.max_bytes {
            return;
        }
        let mut state = self.lock();
        if let Some(previous) = state.pixels.insert(key.clone(), buffer) {
            state.bytes -= previous.memory_bytes();
            state.order.retain(|k| k != &key);
        }
        state.order.push_back(key);
        state.bytes += size;

        while state.bytes > self.max_bytes {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            if let Some(evicted) = state.pixels.remove(&oldest) {
                state.bytes -= evicted.memory_bytes();
                tracing::debug!(
                    path = %oldest.0.display(),
                    subimage = oldest.1,
                    miplevel = oldest.2,
                    "evicted decoded pixels"
                );
            }
        }
    }

    /// Drop every cached entry for `path`.
    pub fn invalidate(&self, path: &Path) {
        let mut state = self.lock();
        state.specs.retain(|k, _| k.0 != path);
        let mut freed = 0;
        state.pixels.retain(|k, buffer| {
            let keep = k.0 != path;
            if !keep {
                freed += buffer.memory_bytes();
            }
            keep
        });
        state.bytes -= freed;
        state.order.retain(|k| k.0 != path);
    }

    /// Bytes of pixel data currently held.
    pub fn memory_bytes(&self) -> usize {
        self.lock().bytes
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MEMORY_MB)
    }
}

/// Hit/miss counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn miss(&mut self) {
        self.misses += 1;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} decoded ({} total)",
                self.hits,
                self.misses,
                self.total()
            )
        } else {
            write!(f, "{} decoded", self.misses)
        }
    }
}
