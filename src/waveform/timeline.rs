//! The growable, seekable sequence of chunk heights behind the waveform
//!
//! Recording appends (or overwrites from the pivot), playback advances the
//! pivot one chunk per window, and scrubbing moves it freely. The pivot is
//! always a valid index while there are chunks.

/// Up to two user-selected pivot positions delimiting a replay region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionMarkers {
    pub first: Option<usize>,
    pub second: Option<usize>,
    count: u8,
}

impl SectionMarkers {
    /// How many markers are currently placed (0, 1 or 2)
    pub fn count(&self) -> u8 {
        self.count
    }

    /// Both markers, ordered, once the region is complete
    pub fn region(&self) -> Option<(usize, usize)> {
        match (self.first, self.second) {
            (Some(first), Some(second)) => Some((first, second)),
            _ => None,
        }
    }

    fn select(&mut self, pivot: usize) {
        self.count += 1;
        match self.count {
            1 => self.first = Some(pivot),
            2 => {
                self.second = Some(pivot);
                if let (Some(first), Some(second)) = (self.first, self.second) {
                    if first > second {
                        self.first = Some(second);
                        self.second = Some(first);
                    }
                }
            }
            _ => *self = Self::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timeline {
    chunks: Vec<f32>,
    pivot: usize,
    overwrite_chunks: Vec<f32>,
    start_overwriting: usize,
    overwriting: bool,
    sections: SectionMarkers,
    update_interval_millis: u64,
}

impl Timeline {
    pub fn new(update_interval_millis: u64) -> Self {
        Self {
            chunks: Vec::new(),
            pivot: 0,
            overwrite_chunks: Vec::new(),
            start_overwriting: 0,
            overwriting: false,
            sections: SectionMarkers::default(),
            update_interval_millis,
        }
    }

    pub fn chunks(&self) -> &[f32] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn pivot(&self) -> usize {
        self.pivot
    }

    fn last_index(&self) -> usize {
        self.chunks.len().saturating_sub(1)
    }

    /// Push a chunk and move the pivot onto it
    pub fn append(&mut self, height: f32) {
        self.chunks.push(height);
        self.pivot = self.last_index();
    }

    /// Load heights read from an existing file, leaving the pivot at the start
    pub fn preload(&mut self, heights: impl IntoIterator<Item = f32>) {
        for height in heights {
            self.append(height);
        }
        self.pivot = 0;
    }

    /// Replace the chunk under the pivot and advance, or extend past the end
    ///
    /// Never shortens the timeline.
    pub fn overwrite(&mut self, height: f32) {
        if self.pivot >= self.last_index() {
            self.append(height);
        } else {
            self.chunks[self.pivot] = height;
            self.pivot = (self.pivot + 1).min(self.last_index());
        }
        self.overwrite_chunks.push(height);
    }

    /// Start an overwrite session at the current pivot
    pub fn begin_overwrite(&mut self) {
        self.overwrite_chunks.clear();
        self.start_overwriting = self.pivot;
        self.overwriting = true;
    }

    /// Drop the overwrite buffer when an overwrite session pauses or stops
    pub fn end_overwrite(&mut self) {
        self.overwrite_chunks.clear();
        self.start_overwriting = 0;
        self.overwriting = false;
    }

    pub fn is_overwriting(&self) -> bool {
        self.overwriting
    }

    pub fn start_overwriting(&self) -> usize {
        self.start_overwriting
    }

    pub fn overwrite_chunks(&self) -> &[f32] {
        &self.overwrite_chunks
    }

    /// Whether the chunk at `index` was replaced by the running overwrite session
    pub fn is_overwritten(&self, index: usize) -> bool {
        self.overwriting && index >= self.start_overwriting && index < self.chunks.len()
    }

    /// Height the next chunk is smoothed against
    pub fn smoothing_reference(&self, overwriting: bool) -> Option<f32> {
        if overwriting {
            self.overwrite_chunks.last().copied()
        } else {
            self.chunks.get(self.pivot).copied()
        }
    }

    /// Move the pivot by `delta`, clamped to the timeline
    pub fn shift(&mut self, delta: i64) {
        let target = (self.pivot as i64).saturating_add(delta);
        self.pivot = target.clamp(0, self.last_index() as i64) as usize;
    }

    /// Jump to `index`, clamped to the timeline; returns the applied pivot
    pub fn set_pivot(&mut self, index: usize) -> usize {
        self.pivot = index.min(self.last_index());
        self.pivot
    }

    /// True when the pivot sits on the last chunk, or there are no chunks
    pub fn is_at_end(&self) -> bool {
        self.pivot >= self.last_index()
    }

    pub fn select_section(&mut self) {
        self.sections.select(self.pivot);
    }

    pub fn sections(&self) -> SectionMarkers {
        self.sections
    }

    /// Forget every chunk and marker
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.pivot = 0;
        self.sections = SectionMarkers::default();
        self.end_overwrite();
    }

    pub fn update_interval_millis(&self) -> u64 {
        self.update_interval_millis
    }

    pub fn elapsed_time(&self) -> u64 {
        self.pivot as u64 * self.update_interval_millis
    }

    pub fn total_time(&self) -> u64 {
        self.last_index() as u64 * self.update_interval_millis
    }
}
