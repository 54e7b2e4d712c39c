//! # Physical Frame Allocator
//!
//! One bit per 4 KiB frame of physical memory; a set bit means the frame
//! backs exactly one page. Frames are handed out lowest-first, which makes
//! the boot-time identity map come out naturally: mapping pages `0..n` in
//! order before anything else is allocated assigns them frames `0..n`.

use kernel_info::memory::PAGE_SIZE;
use kernel_vmem::PageEntry;
use log::trace;

const BITS_PER_WORD: u32 = u32::BITS;

/// Frame allocation failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("out of physical frames (all {total} frames in use)")]
    Exhausted { total: u32 },
}

/// Bitset over all physical frames.
pub struct FrameAllocator<'a> {
    words: &'a mut [u32],
    total: u32,
    used: u32,
}

impl<'a> FrameAllocator<'a> {
    /// Words of bitset storage needed for `memory_size` bytes of RAM.
    #[must_use]
    pub const fn words_for(memory_size: u32) -> usize {
        (memory_size / PAGE_SIZE).div_ceil(BITS_PER_WORD) as usize
    }

    /// Tracks `memory_size` bytes of RAM in `words`, all frames free.
    ///
    /// Bits past the last real frame are set so they are never handed out.
    ///
    /// # Panics
    /// If `words` is smaller than [`words_for`](Self::words_for).
    pub fn new(words: &'a mut [u32], memory_size: u32) -> Self {
        let total = memory_size / PAGE_SIZE;
        let needed = Self::words_for(memory_size);
        assert!(
            words.len() >= needed,
            "frame bitset needs {needed} words, got {}",
            words.len()
        );

        let words = &mut words[..needed];
        words.fill(0);

        let tail = total % BITS_PER_WORD;
        if tail != 0
            && let Some(last) = words.last_mut()
        {
            *last = !0 << tail;
        }

        Self {
            words,
            total,
            used: 0,
        }
    }

    /// Backs `page` with the lowest free frame.
    ///
    /// Does nothing if `page` already references a frame.
    ///
    /// # Errors
    /// [`FrameError::Exhausted`] if every frame is in use.
    pub fn allocate_frame(
        &mut self,
        page: &mut PageEntry,
        is_kernel: bool,
        is_writable: bool,
    ) -> Result<(), FrameError> {
        if page.present() {
            return Ok(());
        }

        let frame = self
            .first_free_frame()
            .ok_or(FrameError::Exhausted { total: self.total })?;
        self.set(frame);
        page.map_frame(frame, is_writable, !is_kernel);
        trace!("frame {frame:#x} allocated");
        Ok(())
    }

    /// Returns the frame behind `page` and clears the entry.
    ///
    /// Does nothing if `page` has no frame.
    pub fn free_frame(&mut self, page: &mut PageEntry) {
        let Some(frame) = page.frame_index() else {
            return;
        };
        self.clear(frame);
        page.clear();
        trace!("frame {frame:#x} freed");
    }

    /// The lowest frame not in use.
    ///
    /// Fully-set words are skipped without looking at their bits.
    #[must_use]
    pub fn first_free_frame(&self) -> Option<u32> {
        self.words
            .iter()
            .enumerate()
            .find(|&(_, &word)| word != u32::MAX)
            .map(|(i, &word)| {
                #[allow(clippy::cast_possible_truncation)]
                let base = (i as u32) * BITS_PER_WORD;
                base + word.trailing_ones()
            })
    }

    /// # Panics
    /// If `frame` lies beyond physical memory.
    #[must_use]
    pub fn is_frame_used(&self, frame: u32) -> bool {
        assert!(frame < self.total, "frame {frame:#x} beyond physical memory");
        let (word, bit) = Self::locate(frame);
        self.words[word] & bit != 0
    }

    #[must_use]
    pub const fn total_frames(&self) -> u32 {
        self.total
    }

    #[must_use]
    pub const fn used_frames(&self) -> u32 {
        self.used
    }

    #[must_use]
    pub const fn free_frames(&self) -> u32 {
        self.total - self.used
    }

    fn set(&mut self, frame: u32) {
        let (word, bit) = Self::locate(frame);
        debug_assert_eq!(self.words[word] & bit, 0, "frame {frame:#x} already used");
        self.words[word] |= bit;
        self.used += 1;
    }

    fn clear(&mut self, frame: u32) {
        assert!(frame < self.total, "frame {frame:#x} beyond physical memory");
        let (word, bit) = Self::locate(frame);
        if self.words[word] & bit != 0 {
            self.words[word] &= !bit;
            self.used -= 1;
        }
    }

    const fn locate(frame: u32) -> (usize, u32) {
        (
            (frame / BITS_PER_WORD) as usize,
            1 << (frame % BITS_PER_WORD),
        )
    }
}
