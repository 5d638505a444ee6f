//! Two-pool scratch allocator.
//!
//! Large coder buffers (datastream, segment index, wavelet column batch) are
//! hinted towards the auxiliary pool, a secondary on-die memory of bounded
//! size; per-scanline buffers stay in the primary pool. When the auxiliary
//! pool has no room the allocation transparently falls back to primary. The
//! free path is symmetric: a [`ScratchBuf`] releases whatever pool actually
//! served it when dropped, and callers never need to know which one that was.

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::error::IcerError;

/// Which pool an allocation should come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolHint {
    Primary,
    Auxiliary,
}

/// Pool that actually served an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Primary,
    Auxiliary,
}

/// Process-wide (but single-threaded) scratch allocator.
pub struct ScratchAllocator {
    aux_capacity: usize,
    aux_in_use: Rc<Cell<usize>>,
}

impl ScratchAllocator {
    /// `aux_capacity` is the byte size of the auxiliary pool; 0 disables it.
    pub fn new(aux_capacity: usize) -> Self {
        Self {
            aux_capacity,
            aux_in_use: Rc::new(Cell::new(0)),
        }
    }

    pub fn aux_available(&self) -> usize {
        self.aux_capacity - self.aux_in_use.get()
    }

    /// Allocate `len` zeroed `u16` samples.
    pub fn alloc_u16(&self, len: usize, hint: PoolHint) -> Result<ScratchBuf<u16>, IcerError> {
        self.alloc_with(len, hint)
    }

    /// Allocate `len` zeroed bytes.
    pub fn alloc_u8(&self, len: usize, hint: PoolHint) -> Result<ScratchBuf<u8>, IcerError> {
        self.alloc_with(len, hint)
    }

    fn alloc_with<T: Default + Clone>(
        &self,
        len: usize,
        hint: PoolHint,
    ) -> Result<ScratchBuf<T>, IcerError> {
        let bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(IcerError::ScratchAllocFailed)?;
        let pool = match hint {
            PoolHint::Auxiliary if bytes <= self.aux_available() => {
                self.aux_in_use.set(self.aux_in_use.get() + bytes);
                Pool::Auxiliary
            }
            _ => Pool::Primary,
        };
        Ok(ScratchBuf {
            data: vec![T::default(); len],
            bytes,
            pool,
            aux_in_use: self.aux_in_use.clone(),
        })
    }
}

/// A scratch allocation. Dereferences to a slice; returns its pool
/// accounting on drop regardless of which pool served it.
pub struct ScratchBuf<T> {
    data: Vec<T>,
    bytes: usize,
    pool: Pool,
    aux_in_use: Rc<Cell<usize>>,
}

impl<T> ScratchBuf<T> {
    pub fn pool(&self) -> Pool {
        self.pool
    }
}

impl<T> Deref for ScratchBuf<T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for ScratchBuf<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> Drop for ScratchBuf<T> {
    fn drop(&mut self) {
        if self.pool == Pool::Auxiliary {
            self.aux_in_use.set(self.aux_in_use.get() - self.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auxiliary_preferred_then_falls_back() {
        let alloc = ScratchAllocator::new(100);
        let a = alloc.alloc_u16(20, PoolHint::Auxiliary).unwrap();
        assert_eq!(a.pool(), Pool::Auxiliary);
        assert_eq!(alloc.aux_available(), 60);

        // 80 bytes do not fit in the remaining 60, so this lands in primary.
        let b = alloc.alloc_u16(40, PoolHint::Auxiliary).unwrap();
        assert_eq!(b.pool(), Pool::Primary);
        assert_eq!(alloc.aux_available(), 60);
    }

    #[test]
    fn drop_releases_auxiliary_budget() {
        let alloc = ScratchAllocator::new(64);
        {
            let _a = alloc.alloc_u8(64, PoolHint::Auxiliary).unwrap();
            assert_eq!(alloc.aux_available(), 0);
        }
        assert_eq!(alloc.aux_available(), 64);
    }

    #[test]
    fn disabled_pool_always_primary() {
        let alloc = ScratchAllocator::new(0);
        let a = alloc.alloc_u16(8, PoolHint::Auxiliary).unwrap();
        assert_eq!(a.pool(), Pool::Primary);
    }

    #[test]
    fn buffers_are_zeroed() {
        let alloc = ScratchAllocator::new(0);
        let a = alloc.alloc_u16(16, PoolHint::Primary).unwrap();
        assert!(a.iter().all(|&v| v == 0));
    }
}
