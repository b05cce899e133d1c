//! Record types shared by every tier.

mod record;
mod tag;

pub use record::{
    validate_hash, MediaKind, MediaRecord, RecordFile, RecordKind, DEFAULT_ASPECT_RATIO,
    SIMILAR_RELATION,
};
pub use tag::Tag;
