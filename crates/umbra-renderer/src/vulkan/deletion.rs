//! Deferred destruction of long-lived GPU objects.
//!
//! Objects whose lifetime is not tied to one owner register a closure here;
//! `flush` runs them newest first, so anything registered later (and
//! possibly depending on earlier objects) is destroyed first.

use super::{MemoryManager, VulkanContext};

type Deleter<A, B> = Box<dyn FnOnce(&A, &B)>;

pub struct DeletionQueue<A = VulkanContext, B = MemoryManager> {
    deleters: Vec<(&'static str, Deleter<A, B>)>,
}

impl<A, B> Default for DeletionQueue<A, B> {
    fn default() -> Self {
        Self { deleters: Vec::new() }
    }
}

impl<A, B> DeletionQueue<A, B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: &'static str, deleter: impl FnOnce(&A, &B) + 'static) {
        self.deleters.push((label, Box::new(deleter)));
    }

    pub fn len(&self) -> usize {
        self.deleters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deleters.is_empty()
    }

    /// Run every deleter exactly once, in reverse registration order.
    pub fn flush(&mut self, a: &A, b: &B) {
        while let Some((label, deleter)) = self.deleters.pop() {
            log::trace!("destroying {label}");
            deleter(a, b);
        }
    }
}

impl<A, B> Drop for DeletionQueue<A, B> {
    fn drop(&mut self) {
        if !self.deleters.is_empty() {
            let labels: Vec<_> = self.deleters.iter().map(|(label, _)| *label).collect();
            log::warn!("deletion queue dropped unflushed: {labels:?}");
        }
    }
}
