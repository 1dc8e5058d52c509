//! Chunk planning for ranged downloads.

use serde::Serialize;

/// Chunk lengths are rounded down to this grain when every chunk can hold one.
pub const CHUNK_GRAIN: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Active,
    Done,
    Failed,
}

/// One contiguous byte range `[offset, offset + length)` of the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
    pub attempts: u32,
    pub status: ChunkStatus,
}

impl Chunk {
    /// End offset (exclusive).
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// libcurl range string (inclusive end) for the part of this chunk not yet
    /// written: `start-(end-1)` where start = offset + `written`.
    pub fn remaining_range(&self, written: u64) -> String {
        let start = self.offset + written.min(self.length);
        format!("{}-{}", start, self.end().saturating_sub(1))
    }
}

/// Ordered partition of a resource into chunks: contiguous, no gaps, no overlaps.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    total: u64,
    chunks: Vec<Chunk>,
}

impl ChunkPlan {
    /// Split `total` bytes into `count` chunks.
    ///
    /// Chunks are as equal as possible and the last one absorbs the remainder.
    /// When the equal share is at least [`CHUNK_GRAIN`] it is rounded down to
    /// a whole number of grains. `count` is clamped to `1..=total`; a zero
    /// total yields an empty plan.
    pub fn new(total: u64, count: usize) -> Self {
        if total == 0 {
            return Self {
                total,
                chunks: Vec::new(),
            };
        }
        let count = (count.max(1) as u64).min(total);
        let mut base = total / count;
        if base >= CHUNK_GRAIN {
            base -= base % CHUNK_GRAIN;
        }

        let mut chunks = Vec::with_capacity(count as usize);
        let mut offset = 0u64;
        for i in 0..count {
            let length = if i + 1 == count { total - offset } else { base };
            chunks.push(Chunk {
                index: i as usize,
                offset,
                length,
                attempts: 0,
                status: ChunkStatus::Pending,
            });
            offset += length;
        }

        Self { total, chunks }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk_mut(&mut self, index: usize) -> Option<&mut Chunk> {
        self.chunks.get_mut(index)
    }

    pub fn all_done(&self) -> bool {
        self.chunks.iter().all(|c| c.status == ChunkStatus::Done)
    }
}

/// Number of chunks for a resource of `size` bytes:
/// `min(ceil(size / target), per_host, available_global)`, at least 1.
pub fn chunk_count(size: u64, target_chunk_size: u64, per_host: usize, available_global: usize) -> usize {
    let by_size = size.div_ceil(target_chunk_size.max(1));
    let by_size = usize::try_from(by_size).unwrap_or(usize::MAX);
    by_size.min(per_host).min(available_global).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn assert_partition(plan: &ChunkPlan) {
        let mut expected_offset = 0;
        for (i, c) in plan.chunks().iter().enumerate() {
            assert_eq!(c.index, i);
            assert_eq!(c.offset, expected_offset, "gap or overlap at chunk {i}");
            assert!(c.length > 0);
            expected_offset = c.end();
        }
        assert_eq!(expected_offset, plan.total());
    }

    #[test]
    fn hundred_and_one_mib_over_four_connections() {
        let plan = ChunkPlan::new(101 * MIB, 4);
        let lens: Vec<u64> = plan.chunks().iter().map(|c| c.length).collect();
        assert_eq!(lens, vec![25 * MIB, 25 * MIB, 25 * MIB, 26 * MIB]);
        assert_partition(&plan);
    }

    #[test]
    fn partitions_are_contiguous_for_many_shapes() {
        let sizes = [1, 2, 7, 1000, MIB - 1, MIB, 3 * MIB + 17, 101 * MIB, 4096 * MIB + 5];
        for &size in &sizes {
            for count in 1..=9 {
                let plan = ChunkPlan::new(size, count);
                assert!(plan.len() <= count);
                assert_partition(&plan);
            }
        }
    }

    #[test]
    fn small_resources_split_without_grain() {
        let plan = ChunkPlan::new(10, 4);
        let lens: Vec<u64> = plan.chunks().iter().map(|c| c.length).collect();
        assert_eq!(lens, vec![2, 2, 2, 4]);
    }

    #[test]
    fn count_is_clamped_to_size() {
        let plan = ChunkPlan::new(3, 8);
        assert_eq!(plan.len(), 3);
        assert!(ChunkPlan::new(0, 4).is_empty());
        assert_eq!(ChunkPlan::new(100, 0).len(), 1);
    }

    #[test]
    fn remaining_range_skips_written_bytes() {
        let c = Chunk {
            index: 1,
            offset: 100,
            length: 50,
            attempts: 0,
            status: ChunkStatus::Pending,
        };
        assert_eq!(c.remaining_range(0), "100-149");
        assert_eq!(c.remaining_range(20), "120-149");
    }

    #[test]
    fn chunk_count_takes_the_tightest_limit() {
        assert_eq!(chunk_count(101 * MIB, 8 * MIB, 4, 32), 4);
        assert_eq!(chunk_count(10 * MIB, 8 * MIB, 4, 32), 2);
        assert_eq!(chunk_count(101 * MIB, 8 * MIB, 16, 3), 3);
        assert_eq!(chunk_count(101 * MIB, 8 * MIB, 4, 0), 1);
        assert_eq!(chunk_count(5, 0, 4, 4), 4);
    }
}
