//! GPU pass timings from timestamp queries.
//!
//! Each frame slot owns one pool. A pass writes a timestamp when it begins
//! and one when it ends; after the slot's fence signals the pairs are read
//! back and converted to milliseconds.

use ash::vk;

use crate::error::{Result, VkResultExt};
use crate::vulkan::VulkanContext;

/// Query bookkeeping: which label owns which pair of query indices.
#[derive(Debug, Clone)]
pub struct LabelBook {
    capacity: u32,
    next: u32,
    entries: Vec<LabelEntry>,
}

#[derive(Debug, Clone)]
struct LabelEntry {
    label: String,
    start: u32,
    end: Option<u32>,
}

impl LabelBook {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            next: 0,
            entries: Vec::new(),
        }
    }

    fn take_query(&mut self) -> u32 {
        assert!(
            self.next < self.capacity,
            "timestamp pool exhausted ({} queries)",
            self.capacity
        );
        let query = self.next;
        self.next += 1;
        query
    }

    /// Reserve the start query of `label`.
    pub fn begin(&mut self, label: &str) -> u32 {
        assert!(
            self.entries.iter().all(|e| e.label != label),
            "timestamp label {label:?} written twice without a reset"
        );
        let start = self.take_query();
        self.entries.push(LabelEntry {
            label: label.to_string(),
            start,
            end: None,
        });
        start
    }

    /// Reserve the end query of an open `label`.
    pub fn end(&mut self, label: &str) -> u32 {
        let position = self
            .entries
            .iter()
            .position(|e| e.label == label && e.end.is_none())
            .unwrap_or_else(|| panic!("timestamp label {label:?} ended without being begun"));
        let end = self.take_query();
        self.entries[position].end = Some(end);
        end
    }

    /// Queries handed out since the last reset.
    pub fn used(&self) -> u32 {
        self.next
    }

    pub fn reset(&mut self) {
        self.next = 0;
        self.entries.clear();
    }

    /// Completed (label, start, end) triples in the order they began.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, u32, u32)> {
        self.entries
            .iter()
            .filter_map(|e| e.end.map(|end| (e.label.as_str(), e.start, end)))
    }
}

/// Milliseconds between two raw timestamps.
pub fn elapsed_ms(start: u64, end: u64, timestamp_period_ns: f32) -> f64 {
    end.saturating_sub(start) as f64 * f64::from(timestamp_period_ns) / 1e6
}

/// Timestamp query pool of one frame slot.
pub struct TimingQueryPool {
    pool: vk::QueryPool,
    book: LabelBook,
    period: f32,
    supported: bool,
}

impl TimingQueryPool {
    pub unsafe fn new(ctx: &VulkanContext, capacity: u32) -> Result<Self> {
        let limits = &ctx.device_properties.limits;
        let supported = limits.timestamp_compute_and_graphics == vk::TRUE && limits.timestamp_period > 0.0;
        if !supported {
            log::warn!("device has no graphics timestamps; pass timings disabled");
        }

        let info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(capacity.max(1));
        let pool = ctx.device.create_query_pool(&info, None).vk("create timestamp pool")?;

        Ok(Self {
            pool,
            book: LabelBook::new(capacity),
            period: ctx.timestamp_period(),
            supported,
        })
    }

    /// Reset every query; recorded first in the frame.
    pub unsafe fn reset(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        self.book.reset();
        if self.supported {
            device.cmd_reset_query_pool(cmd, self.pool, 0, self.book.capacity.max(1));
        }
    }

    pub unsafe fn begin(&mut self, device: &ash::Device, cmd: vk::CommandBuffer, label: &str) {
        if !self.supported {
            return;
        }
        let query = self.book.begin(label);
        device.cmd_write_timestamp2(cmd, vk::PipelineStageFlags2::TOP_OF_PIPE, self.pool, query);
    }

    pub unsafe fn end(&mut self, device: &ash::Device, cmd: vk::CommandBuffer, label: &str) {
        if !self.supported {
            return;
        }
        let query = self.book.end(label);
        device.cmd_write_timestamp2(cmd, vk::PipelineStageFlags2::BOTTOM_OF_PIPE, self.pool, query);
    }

    /// Read back the last submission's timings. Call only after the slot's
    /// fence has signalled.
    pub unsafe fn fetch(&self, device: &ash::Device) -> Result<Vec<(String, f64)>> {
        let used = self.book.used() as usize;
        if !self.supported || used == 0 {
            return Ok(Vec::new());
        }

        let mut raw = vec![0u64; used];
        device
            .get_query_pool_results(
                self.pool,
                0,
                &mut raw,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )
            .vk("read timestamps")?;

        Ok(self
            .book
            .pairs()
            .map(|(label, start, end)| {
                let ms = elapsed_ms(raw[start as usize], raw[end as usize], self.period);
                (label.to_string(), ms)
            })
            .collect())
    }

    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_query_pool(self.pool, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // LabelBook
    // ============================================================

    #[test]
    fn test_labels_get_consecutive_queries() {
        let mut book = LabelBook::new(8);
        assert_eq!(book.begin("Depth Prepass"), 0);
        assert_eq!(book.end("Depth Prepass"), 1);
        assert_eq!(book.begin("Post Processing"), 2);
        assert_eq!(book.begin("vignette"), 3);
        assert_eq!(book.end("vignette"), 4);
        assert_eq!(book.end("Post Processing"), 5);

        let pairs: Vec<_> = book.pairs().collect();
        assert_eq!(
            pairs,
            vec![("Depth Prepass", 0, 1), ("Post Processing", 2, 5), ("vignette", 3, 4)]
        );
        assert_eq!(book.used(), 6);
    }

    #[test]
    fn test_open_label_is_not_reported() {
        let mut book = LabelBook::new(4);
        book.begin("Lighting");
        assert_eq!(book.pairs().count(), 0);
    }

    #[test]
    #[should_panic(expected = "written twice")]
    fn test_same_label_twice_panics() {
        let mut book = LabelBook::new(8);
        book.begin("GBuffer");
        book.end("GBuffer");
        book.begin("GBuffer");
    }

    #[test]
    fn test_reset_allows_label_reuse() {
        let mut book = LabelBook::new(2);
        book.begin("GBuffer");
        book.end("GBuffer");
        book.reset();
        assert_eq!(book.begin("GBuffer"), 0);
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn test_capacity_is_enforced() {
        let mut book = LabelBook::new(3);
        book.begin("a");
        book.end("a");
        book.begin("b");
        book.end("b");
    }

    #[test]
    #[should_panic(expected = "without being begun")]
    fn test_end_without_begin_panics() {
        LabelBook::new(4).end("Lighting");
    }

    #[test]
    fn test_elapsed_ms() {
        // 2.5 million ticks of 1ns each.
        assert!((elapsed_ms(1_000, 2_501_000, 1.0) - 2.5).abs() < 1e-9);
        assert!((elapsed_ms(0, 1_000_000, 0.5) - 0.5).abs() < 1e-9);
        assert_eq!(elapsed_ms(10, 5, 1.0), 0.0);
    }
}
