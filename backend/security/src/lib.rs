//! Student-data privacy: anonymization cache, payload anonymizer and the
//! text deanonymizer used for human-facing output.

pub mod anonymizer;
pub mod cache;
pub mod deanonymizer;

pub use anonymizer::Anonymizer;
pub use cache::{
    synthetic_email, AnonymizationCache, CacheStats, OriginalIdentity, RealId, EXTENDED_SUFFIX_LEN,
    PLACEHOLDER_DOMAIN, TOKEN_PREFIX, TOKEN_SUFFIX_LEN,
};
pub use deanonymizer::{Deanonymizer, DEANONYMIZE_METHOD};
