use std::sync::Arc;

/// Reference-counted, offset-addressed pixel storage shared between an
/// `Image` and every `window` taken from it.
///
/// `window()` clones the `Arc` and shifts `offset`; no pixels move. Because
/// the backing `Vec` is only ever reached through this wrapper, a `clear`
/// or other in-place mutation must first call [`DenseBuffer::make_mut`],
/// which copies onto a private allocation whenever another owner (a window,
/// a `shallowCopy`) could observe the buffer. That copy-on-write is how
/// "writes through aliases are disallowed by construction" (§3.1, §9) holds
/// without a runtime check: a window's `Arc` keeps pointing at the
/// untouched original after the owner's next write.
#[derive(Clone)]
pub struct DenseBuffer<T> {
    storage: Arc<Vec<T>>,
    offset: usize,
}

impl<T: Clone> DenseBuffer<T> {
    pub fn from_vec(values: Vec<T>) -> Self {
        DenseBuffer { storage: Arc::new(values), offset: 0 }
    }

    pub fn as_slice(&self, len: usize) -> &[T] {
        &self.storage[self.offset..self.offset + len]
    }

    /// Shares storage, shifting the logical start by `delta`.
    pub fn window(&self, delta: usize) -> Self {
        DenseBuffer { storage: self.storage.clone(), offset: self.offset + delta }
    }

    /// Deep-copies the `[0, len)` sub-range into a freshly owned buffer.
    pub fn copy_subrange(&self, len: usize) -> Self {
        DenseBuffer::from_vec(self.as_slice(len).to_vec())
    }

    /// Exclusive, possibly-copying access to `[0, len)` for in-place writes.
    pub fn make_mut(&mut self, len: usize) -> &mut [T] {
        let needs_copy = self.offset != 0 || self.storage.len() != len || Arc::strong_count(&self.storage) > 1;
        if needs_copy {
            let owned = self.as_slice(len).to_vec();
            self.storage = Arc::new(owned);
            self.offset = 0;
        }
        Arc::get_mut(&mut self.storage)
            .expect("DenseBuffer::make_mut: copy-on-write just established unique ownership")
            .as_mut_slice()
    }

    pub fn len(&self) -> usize {
        self.storage.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_shares_storage_until_mutated() {
        let mut original = DenseBuffer::from_vec(vec![1, 2, 3, 4]);
        let window = original.window(1); // logically [2,3,4]
        assert_eq!(window.as_slice(3), &[2, 3, 4]);

        original.make_mut(4)[0] = 99;
        // The window, created before the mutation, is unaffected.
        assert_eq!(window.as_slice(3), &[2, 3, 4]);
        assert_eq!(original.as_slice(4), &[99, 2, 3, 4]);
    }

    #[test]
    fn copy_subrange_is_independent_storage() {
        let original = DenseBuffer::from_vec(vec![5, 6, 7]);
        let mut copy = original.copy_subrange(2);
        copy.make_mut(2)[0] = 0;
        assert_eq!(original.as_slice(3), &[5, 6, 7]);
        assert_eq!(copy.as_slice(2), &[0, 6]);
    }
}
