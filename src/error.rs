// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::fmt;

/// Errors that can occur while operating on the index.
///
/// Miss and the `LslotExtended` control-flow case are not represented here:
/// reads never fail on a missing key (they return `None`), and a block
/// asking its segment to consult the extension layer is resolved internally
/// before it would ever reach a caller.
#[derive(Debug)]
pub enum Error {
    /// A block's trie region has no room left for another leaf.
    BlockSpaceExhausted,

    /// A block's payload list has no room left for another entry.
    PayloadSpaceExhausted,

    /// A segment's extension pool has no free physical slot left to absorb
    /// another primary block's overflow.
    ExtensionPoolFull,

    /// A segment could not be split because the fingerprint has no bits
    /// left above its `FP_index` to discriminate on.
    SplitImpossible,

    /// `write(.., guarantee_update = true)` was called for a fingerprint
    /// that does not already exist, or whose update could not be applied
    /// in place.
    UpdateNotPossible,

    /// The external log returned an error while appending or reading a
    /// record.
    Log(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockSpaceExhausted => write!(f, "block has no trie space left"),
            Self::PayloadSpaceExhausted => write!(f, "block has no payload space left"),
            Self::ExtensionPoolFull => write!(f, "segment's extension pool is full"),
            Self::SplitImpossible => write!(f, "fingerprint space exhausted at this depth"),
            Self::UpdateNotPossible => write!(f, "not a valid update for this key"),
            Self::Log(inner) => write!(f, "log error: {inner}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Log(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
