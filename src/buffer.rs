use crate::encoding::EncodedId;

/// Growable id array with an explicit logical length.
///
/// Storage only ever grows, by doubling; `clear` and `truncate` move the
/// length cursor and leave stale ids in place until they are overwritten.
#[derive(Debug, Clone)]
pub struct Buffer {
    ids: Vec<EncodedId>,
    len: usize,
}

impl Buffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Buffer { ids: vec![EncodedId::default(); capacity.max(1)], len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn as_slice(&self) -> &[EncodedId] {
        &self.ids[..self.len]
    }

    #[inline]
    pub fn push(&mut self, id: EncodedId) {
        if self.len == self.ids.len() {
            self.grow(self.len + 1);
        }
        self.ids[self.len] = id;
        self.len += 1;
    }

    #[inline]
    pub fn extend_from_slice(&mut self, ids: &[EncodedId]) {
        let end = self.len + ids.len();
        if end > self.ids.len() {
            self.grow(end);
        }
        self.ids[self.len..end].copy_from_slice(ids);
        self.len = end;
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    #[cold]
    fn grow(&mut self, needed: usize) {
        let mut capacity = self.ids.len().max(1);
        while capacity < needed {
            capacity *= 2;
        }
        self.ids.resize(capacity, EncodedId::default());
    }
}
