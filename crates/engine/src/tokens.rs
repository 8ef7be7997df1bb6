// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concurrency tokens.
//!
//! A [`Token`] is a move-only permit to run one job. Only the pool can mint
//! one, and [`TokenPool::release`] consumes it, so a token cannot be returned
//! twice.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Permit to run one job.
#[must_use = "a dropped token is never returned to the pool"]
#[derive(Debug)]
pub struct Token {
    _private: (),
}

/// Fixed-capacity token pool.
#[derive(Debug)]
pub struct TokenPool {
    capacity: usize,
    available: AtomicUsize,
}

impl TokenPool {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, available: AtomicUsize::new(capacity) }
    }

    pub fn try_acquire(&self) -> Option<Token> {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|_| Token { _private: () })
    }

    pub fn release(&self, token: Token) {
        let Token { _private: () } = token;
        self.available.fetch_add(1, Ordering::AcqRel);
    }

    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_until_exhausted() {
        let pool = TokenPool::new(2);
        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.in_use(), 2);

        pool.release(a);
        assert_eq!(pool.available(), 1);
        let c = pool.try_acquire().unwrap();
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn zero_capacity_never_grants() {
        let pool = TokenPool::new(0);
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.in_use(), 0);
    }
}
