//! Least recently used ordering of the bond record slots

/// The LRU order table
///
/// This is a permutation of the slot indices where the front is the most recently used slot and the
/// back is the least recently used slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LruOrder<const N: usize> {
    order: [u8; N],
}

impl<const N: usize> LruOrder<N> {
    /// Create the initial order (slot zero is the most recent)
    pub fn new() -> Self {
        LruOrder {
            order: core::array::from_fn(|index| index as u8),
        }
    }

    /// Create an order from a persisted table
    ///
    /// `None` is returned if `persisted` is not a permutation of the slot indices.
    pub fn from_persisted(persisted: &[u8]) -> Option<Self> {
        if persisted.len() != N {
            return None;
        }

        let mut seen = [false; N];

        for &slot in persisted {
            match seen.get_mut(slot as usize) {
                Some(flag) if !*flag => *flag = true,
                _ => return None,
            }
        }

        let mut order = [0u8; N];

        order.copy_from_slice(persisted);

        Some(LruOrder { order })
    }

    fn position(&self, slot: u8) -> Option<usize> {
        self.order.iter().position(|s| *s == slot)
    }

    /// Mark `slot` as the most recently used
    pub fn touch(&mut self, slot: u8) {
        if let Some(position) = self.position(slot) {
            self.order[..=position].rotate_right(1);
        }
    }

    /// Mark `slot` as the least recently used
    pub fn demote(&mut self, slot: u8) {
        if let Some(position) = self.position(slot) {
            self.order[position..].rotate_left(1);
        }
    }

    /// The least recently used slot
    pub fn least_recent(&self) -> Option<u8> {
        self.order.last().copied()
    }

    /// The least recently used slot for which `excluded` returns false
    pub fn least_recent_excluding<F>(&self, excluded: F) -> Option<u8>
    where
        F: Fn(u8) -> bool,
    {
        self.order.iter().rev().copied().find(|slot| !excluded(*slot))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.order
    }
}

impl<const N: usize> Default for LruOrder<N> {
    fn default() -> Self {
        Self::new()
    }
}
