//! Segment arithmetic: planning a byte partition across N connections and
//! re-planning it when the connection count changes mid-download.

use serde::{Deserialize, Serialize};

/// Sentinel `end` for an open-ended segment (total size unknown).
pub const OPEN_END: u64 = i64::MAX as u64;

/// One byte range of a file assigned to a single connection.
///
/// `start..=end` is inclusive; `downloaded_bytes` counts the contiguous
/// prefix already written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub downloaded_bytes: u64,
}

impl Segment {
    pub fn new(index: usize, start: u64, end: u64) -> Self {
        Self {
            index,
            start,
            end,
            downloaded_bytes: 0,
        }
    }

    /// Total bytes covered by this segment. `OPEN_END` for open-ended ones.
    pub fn total_bytes(&self) -> u64 {
        if self.is_open_ended() {
            OPEN_END
        } else {
            self.end - self.start + 1
        }
    }

    /// Next byte offset to fetch: `start + downloaded_bytes`.
    pub fn current_offset(&self) -> u64 {
        self.start + self.downloaded_bytes
    }

    pub fn is_open_ended(&self) -> bool {
        self.end == OPEN_END
    }

    pub fn is_complete(&self) -> bool {
        !self.is_open_ended() && self.downloaded_bytes >= self.total_bytes()
    }
}

/// Partitions `[0, total_bytes)` into at most `connections` contiguous
/// segments whose sizes differ by at most one byte. Collapses to fewer
/// segments when there are fewer bytes than connections.
pub fn plan(total_bytes: u64, connections: u32) -> Vec<Segment> {
    if total_bytes == 0 {
        return Vec::new();
    }
    let count = u64::from(connections.max(1)).min(total_bytes);
    let base = total_bytes / count;
    let remainder = total_bytes % count;

    let mut out = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    for i in 0..count {
        let len = base + u64::from(i < remainder);
        out.push(Segment::new(i as usize, offset, offset + len - 1));
        offset += len;
    }
    out
}

/// Single-segment plan: the whole file on one connection. Used when the
/// server refuses ranges or the total size is unknown.
pub fn single(total_bytes: Option<u64>) -> Vec<Segment> {
    match total_bytes {
        Some(0) => Vec::new(),
        Some(n) => vec![Segment::new(0, 0, n - 1)],
        None => vec![Segment::new(0, 0, OPEN_END)],
    }
}

/// Sum of `downloaded_bytes` across segments.
pub fn downloaded_total(segments: &[Segment]) -> u64 {
    segments.iter().map(|s| s.downloaded_bytes).sum()
}

pub fn all_complete(segments: &[Segment]) -> bool {
    segments.iter().all(Segment::is_complete)
}

/// Re-partitions the remaining bytes across `new_k` connections while
/// preserving every byte already downloaded.
///
/// Completed prefixes of the current segments become fully-downloaded
/// prefixes of the new ones; the uncovered remainder is split into ~`new_k`
/// near-equal pieces. No byte is re-downloaded and none is skipped. The
/// result has exactly `new_k` entries whenever the layout of completed runs
/// allows it (a completed run can only sit at the start of a segment, which
/// may force an extra split).
pub fn resegment(segments: &[Segment], new_k: u32) -> Vec<Segment> {
    if segments.is_empty() || segments.iter().any(Segment::is_open_ended) {
        // Unknown total: nothing sensible to split.
        return segments.to_vec();
    }
    let total = segments.iter().map(|s| s.end + 1).max().unwrap_or(0);

    // Merge the completed prefixes into maximal covered runs.
    let mut runs: Vec<(u64, u64)> = segments
        .iter()
        .filter(|s| s.downloaded_bytes > 0)
        .map(|s| (s.start, s.start + s.downloaded_bytes - 1))
        .collect();
    runs.sort_unstable();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(runs.len());
    for (start, end) in runs {
        match merged.last_mut() {
            Some((_, prev_end)) if start <= prev_end.saturating_add(1) => {
                *prev_end = (*prev_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }

    let covered: u64 = merged.iter().map(|(s, e)| e - s + 1).sum();
    let mut remaining = total - covered;
    if remaining == 0 {
        // Everything is downloaded; emit the covered runs as complete segments.
        return merged
            .into_iter()
            .enumerate()
            .map(|(i, (s, e))| Segment {
                index: i,
                start: s,
                end: e,
                downloaded_bytes: e - s + 1,
            })
            .collect();
    }

    let k = new_k.max(1) as usize;
    let mut out: Vec<Segment> = Vec::with_capacity(k);
    let mut run_iter = merged.into_iter().peekable();
    let mut pos = 0u64;

    while pos < total {
        let seg_start = pos;
        let mut downloaded = 0u64;
        if let Some(&(rs, re)) = run_iter.peek() {
            if rs == pos {
                downloaded = re - rs + 1;
                pos = re + 1;
                run_iter.next();
            }
        }
        // Contiguous uncovered stretch available for this segment.
        let next_covered = run_iter.peek().map(|r| r.0).unwrap_or(total);
        let gap = next_covered - pos;
        // Spread what is left over the slots still open.
        let slots_left = k.saturating_sub(out.len()).max(1) as u64;
        let quota = remaining.div_ceil(slots_left).max(1);
        let take = gap.min(quota);
        pos += take;
        remaining -= take;

        out.push(Segment {
            index: out.len(),
            start: seg_start,
            end: pos - 1,
            downloaded_bytes: downloaded,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(segments: &[Segment], total: u64) {
        let mut pos = 0u64;
        for (i, s) in segments.iter().enumerate() {
            assert_eq!(s.index, i, "indexes must be dense");
            assert_eq!(s.start, pos, "segments must be contiguous");
            assert!(s.start <= s.end);
            pos = s.end + 1;
        }
        assert_eq!(pos, total, "segments must cover [0, total)");
    }

    #[test]
    fn plan_even_split() {
        let segs = plan(100_000, 4);
        assert_eq!(segs.len(), 4);
        assert_partition(&segs, 100_000);
        for s in &segs {
            assert_eq!(s.total_bytes(), 25_000);
        }
    }

    #[test]
    fn plan_remainder_differs_by_at_most_one() {
        for total in [1u64, 2, 7, 10, 1000, 99_999, 100_001] {
            for k in 1..=64u32 {
                let segs = plan(total, k);
                assert_partition(&segs, total);
                let min = segs.iter().map(|s| s.total_bytes()).min().unwrap();
                let max = segs.iter().map(|s| s.total_bytes()).max().unwrap();
                assert!(max - min <= 1, "total={total} k={k}: {min}..{max}");
            }
        }
    }

    #[test]
    fn plan_collapses_when_fewer_bytes_than_connections() {
        let segs = plan(1, 8);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].start, 0);
        assert_eq!(segs[0].end, 0);
    }

    #[test]
    fn plan_zero_bytes_is_empty() {
        assert!(plan(0, 4).is_empty());
    }

    #[test]
    fn single_known_and_unknown() {
        let segs = single(Some(1000));
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].end, 999);

        let segs = single(None);
        assert_eq!(segs.len(), 1);
        assert!(segs[0].is_open_ended());
        assert!(!segs[0].is_complete());

        assert!(single(Some(0)).is_empty());
    }

    #[test]
    fn segment_offsets_and_completion() {
        let mut s = Segment::new(0, 100, 199);
        assert_eq!(s.total_bytes(), 100);
        assert_eq!(s.current_offset(), 100);
        s.downloaded_bytes = 40;
        assert_eq!(s.current_offset(), 140);
        assert!(!s.is_complete());
        s.downloaded_bytes = 100;
        assert!(s.is_complete());
    }

    #[test]
    fn segment_serializes_camel_case_fields() {
        let s = Segment {
            index: 1,
            start: 10,
            end: 19,
            downloaded_bytes: 5,
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["downloadedBytes"], 5);
        assert_eq!(json["start"], 10);
    }

    #[test]
    fn resegment_preserves_downloaded_bytes() {
        let mut segs = plan(1_000_000, 2);
        segs[0].downloaded_bytes = 200_000;
        segs[1].downloaded_bytes = 100_000;

        let out = resegment(&segs, 8);
        assert_eq!(out.len(), 8);
        assert_partition(&out, 1_000_000);
        assert_eq!(downloaded_total(&out), 300_000);
    }

    #[test]
    fn resegment_never_redownloads_or_skips() {
        // Every downloaded byte must stay inside some segment's prefix and
        // every byte must be covered exactly once (checked by the partition).
        let mut segs = plan(10_000, 4);
        segs[0].downloaded_bytes = 2_500; // complete
        segs[1].downloaded_bytes = 100;
        segs[3].downloaded_bytes = 999;

        for k in [1u32, 2, 3, 5, 8, 16] {
            let out = resegment(&segs, k);
            assert_partition(&out, 10_000);
            assert_eq!(downloaded_total(&out), 3_599, "k={k}");
            // Downloaded prefixes must land on previously covered bytes only.
            for s in &out {
                if s.downloaded_bytes > 0 {
                    let covered_end = s.start + s.downloaded_bytes - 1;
                    let was_covered = |b: u64| {
                        (b < 2_500)
                            || (2_500..2_600).contains(&b)
                            || (7_500..8_499).contains(&b)
                    };
                    assert!(was_covered(s.start) && was_covered(covered_end), "k={k}");
                }
            }
        }
    }

    #[test]
    fn resegment_sum_preserved_across_repeated_calls() {
        let mut segs = plan(500_000, 3);
        segs[0].downloaded_bytes = 50_000;
        segs[1].downloaded_bytes = 1;
        let baseline = downloaded_total(&segs);

        for k in [7u32, 2, 13, 1, 64, 4] {
            segs = resegment(&segs, k);
            assert_eq!(downloaded_total(&segs), baseline, "after k={k}");
            assert_partition(&segs, 500_000);
        }
    }

    #[test]
    fn resegment_fresh_plan_matches_plan_shape() {
        let segs = plan(1000, 4);
        let out = resegment(&segs, 2);
        assert_eq!(out.len(), 2);
        assert_partition(&out, 1000);
        assert_eq!(downloaded_total(&out), 0);
    }

    #[test]
    fn resegment_all_downloaded_collapses_to_complete_runs() {
        let mut segs = plan(1000, 4);
        for s in &mut segs {
            s.downloaded_bytes = s.total_bytes();
        }
        let out = resegment(&segs, 8);
        assert!(all_complete(&out));
        assert_eq!(downloaded_total(&out), 1000);
        assert_partition(&out, 1000);
    }

    #[test]
    fn resegment_open_ended_is_identity() {
        let segs = single(None);
        let out = resegment(&segs, 8);
        assert_eq!(out, segs);
    }
}
