use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{FogWalletError, FogWalletResult};

/// Half-open interval `[start, end)` of ledger positions
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
#[serde(try_from = "RawBlockRange")]
pub struct BlockRange {
    start: u64,
    end: u64,
}

#[derive(Deserialize)]
struct RawBlockRange {
    start: u64,
    end: u64,
}

impl TryFrom<RawBlockRange> for BlockRange {
    type Error = FogWalletError;

    fn try_from(raw: RawBlockRange) -> Result<Self, Self::Error> {
        BlockRange::new(raw.start, raw.end)
    }
}

impl BlockRange {
    /// Fails unless `end > start`
    pub fn new(start: u64, end: u64) -> FogWalletResult<Self> {
        if end <= start {
            return Err(FogWalletError::InvalidBlockRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    pub fn contains(&self, position: u64) -> bool {
        self.start <= position && position < self.end
    }

    /// Whether `other` lies entirely inside this range
    pub fn covers(&self, other: &BlockRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &BlockRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Parts of this range not covered by `other`
    pub fn difference(&self, other: &BlockRange) -> Vec<BlockRange> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let mut out = Vec::with_capacity(2);
        if self.start < other.start {
            out.push(BlockRange {
                start: self.start,
                end: other.start,
            });
        }
        if other.end < self.end {
            out.push(BlockRange {
                start: other.end,
                end: self.end,
            });
        }
        out
    }

    /// Split into consecutive ranges of at most `max_size` positions
    pub fn chunks(&self, max_size: u64) -> Vec<BlockRange> {
        let max_size = max_size.max(1);
        let mut out = Vec::new();
        let mut start = self.start;
        while start < self.end {
            let end = self.end.min(start.saturating_add(max_size));
            out.push(BlockRange { start, end });
            start = end;
        }
        out
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_inverted() {
        assert!(matches!(
            BlockRange::new(10, 10),
            Err(FogWalletError::InvalidBlockRange { start: 10, end: 10 })
        ));
        assert!(BlockRange::new(11, 10).is_err());
    }

    #[test]
    fn test_size_and_containment() {
        let range = BlockRange::new(10, 20).unwrap();
        assert_eq!(range.size(), 10);
        assert!(range.contains(10));
        assert!(range.contains(19));
        assert!(!range.contains(20));
        assert!(range.covers(&BlockRange::new(12, 20).unwrap()));
        assert!(!range.covers(&BlockRange::new(12, 21).unwrap()));
        assert!(range.overlaps(&BlockRange::new(19, 30).unwrap()));
        assert!(!range.overlaps(&BlockRange::new(20, 30).unwrap()));
        assert_eq!(range.to_string(), "[10, 20)");
    }

    #[test]
    fn test_chunks() {
        let range = BlockRange::new(0, 25).unwrap();
        let chunks = range.chunks(10);
        assert_eq!(
            chunks,
            vec![
                BlockRange::new(0, 10).unwrap(),
                BlockRange::new(10, 20).unwrap(),
                BlockRange::new(20, 25).unwrap(),
            ]
        );
        assert_eq!(chunks.iter().map(BlockRange::size).sum::<u64>(), range.size());
    }

    #[test]
    fn test_difference() {
        let range = BlockRange::new(10, 20).unwrap();
        assert_eq!(range.difference(&BlockRange::new(0, 5).unwrap()), vec![range]);
        assert!(range.difference(&BlockRange::new(0, 30).unwrap()).is_empty());
        assert_eq!(
            range.difference(&BlockRange::new(12, 15).unwrap()),
            vec![BlockRange::new(10, 12).unwrap(), BlockRange::new(15, 20).unwrap()]
        );
        assert_eq!(
            range.difference(&BlockRange::new(15, 25).unwrap()),
            vec![BlockRange::new(10, 15).unwrap()]
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let range: BlockRange = serde_json::from_str(r#"{"start": 3, "end": 9}"#).unwrap();
        assert_eq!(range, BlockRange::new(3, 9).unwrap());
        assert!(serde_json::from_str::<BlockRange>(r#"{"start": 9, "end": 9}"#).is_err());
    }
}
