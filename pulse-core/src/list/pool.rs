//! Template-keyed pool of released render resources.

use std::collections::HashMap;

use super::backend::TemplateId;

/// Released handles waiting to be re-bound, grouped by template.
#[derive(Debug)]
pub struct ResourcePool<H> {
    free: HashMap<TemplateId, Vec<H>>,
    /// Maximum pooled handles per template.
    capacity: usize,
}

impl<H> ResourcePool<H> {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: HashMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a pooled handle for `template`, most recently released first.
    pub fn acquire(&mut self, template: TemplateId) -> Option<H> {
        self.free.get_mut(&template).and_then(Vec::pop)
    }

    /// Return a handle to the pool.
    ///
    /// When the template's bucket is full the handle is handed back so the
    /// caller can dispose it.
    pub fn release(&mut self, template: TemplateId, handle: H) -> Option<H> {
        let bucket = self.free.entry(template).or_default();
        if bucket.len() >= self.capacity {
            return Some(handle);
        }
        bucket.push(handle);
        None
    }

    /// Pooled handles across all templates.
    pub fn len(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len_for(&self, template: TemplateId) -> usize {
        self.free.get(&template).map_or(0, Vec::len)
    }

    /// Empty the pool.
    pub fn drain(&mut self) -> Vec<H> {
        self.free.drain().flat_map(|(_, bucket)| bucket).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_reused_per_template() {
        let mut pool = ResourcePool::new(4);
        assert_eq!(pool.release(TemplateId(1), "a"), None);
        assert_eq!(pool.release(TemplateId(2), "b"), None);

        assert_eq!(pool.acquire(TemplateId(3)), None);
        assert_eq!(pool.acquire(TemplateId(1)), Some("a"));
        assert_eq!(pool.acquire(TemplateId(1)), None);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn overflow_is_handed_back() {
        let mut pool = ResourcePool::new(1);
        assert_eq!(pool.release(TemplateId(0), 1), None);
        assert_eq!(pool.release(TemplateId(0), 2), Some(2));
        assert_eq!(pool.len_for(TemplateId(0)), 1);

        assert_eq!(pool.drain(), vec![1]);
        assert!(pool.is_empty());
    }
}
