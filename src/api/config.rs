//! Allocator configuration.

use crate::util::size::mib;

/// Configuration for the device memory allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Size of a pooled page (default: 128 MiB). Larger requests get a
    /// dedicated page of their own size.
    pub page_size: u64,

    /// Frames the GPU may lag behind the CPU; a freed range is reused only
    /// after this many `tick()` calls (default: 3)
    pub frames_in_flight: usize,

    /// Empty pages are only evicted while more than this many pages are live
    /// (default: 2). Eviction never takes the page count below this mark.
    pub min_pages: usize,

    /// Cap on live pages below the device's reservation limit (None = device limit)
    pub max_pages: Option<u32>,

    /// Fill reclaimed host-visible ranges with a poison pattern
    pub poison_on_free: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            page_size: mib(128),
            frames_in_flight: 3,
            min_pages: 2,
            max_pages: None,
            poison_on_free: cfg!(feature = "debug"),
        }
    }
}

impl AllocatorConfig {
    /// Create a minimal config for testing or constrained environments.
    pub fn minimal() -> Self {
        Self {
            page_size: mib(1),
            frames_in_flight: 2,
            min_pages: 0,
            max_pages: None,
            poison_on_free: false,
        }
    }

    /// Create a config for scenes with many large resources.
    pub fn high_performance() -> Self {
        Self {
            page_size: mib(256),
            frames_in_flight: 3,
            min_pages: 8,
            max_pages: None,
            poison_on_free: false,
        }
    }

    /// Builder pattern: set page size.
    pub fn with_page_size(mut self, size: u64) -> Self {
        self.page_size = size;
        self
    }

    /// Builder pattern: set frames in flight.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Builder pattern: set the eviction low-water mark.
    pub fn with_min_pages(mut self, pages: usize) -> Self {
        self.min_pages = pages;
        self
    }

    /// Builder pattern: cap live pages.
    pub fn with_max_pages(mut self, pages: u32) -> Self {
        self.max_pages = Some(pages);
        self
    }

    /// Builder pattern: poison reclaimed host-visible memory.
    pub fn with_poison(mut self, enable: bool) -> Self {
        self.poison_on_free = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AllocatorConfig::default();
        assert_eq!(config.page_size, 128 * 1024 * 1024);
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.max_pages, None);
    }

    #[test]
    fn test_builder() {
        let config = AllocatorConfig::minimal()
            .with_page_size(4096)
            .with_frames_in_flight(4)
            .with_min_pages(1)
            .with_max_pages(8)
            .with_poison(true);

        assert_eq!(config.page_size, 4096);
        assert_eq!(config.frames_in_flight, 4);
        assert_eq!(config.min_pages, 1);
        assert_eq!(config.max_pages, Some(8));
        assert!(config.poison_on_free);
    }
}
