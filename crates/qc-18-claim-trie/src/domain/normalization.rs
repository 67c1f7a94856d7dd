//! # Name Normalization Service
//!
//! Canonical decomposition (NFD) followed by Unicode default case folding
//! (full mappings, so `ß` becomes `ss` and final `ς` becomes `σ`). The engine is
//! constructed once, verified against a probe string, and then shared by
//! every fork layer that needs it.
//!
//! Malformed input is not an error: anything that is not valid UTF-8 (or
//! is empty) keeps its raw bytes. Only a broken engine fails.

use super::NormalizationError;
use std::borrow::Cow;
use caseless::Caseless;
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

/// Maps valid UTF-8 text to its normalized form.
pub trait NameNormalizer {
    fn normalize(&self, name: &str) -> Result<String, NormalizationError>;
}

impl<N: NameNormalizer + ?Sized> NameNormalizer for Arc<N> {
    fn normalize(&self, name: &str) -> Result<String, NormalizationError> {
        (**self).normalize(name)
    }
}

impl<N: NameNormalizer + ?Sized> NameNormalizer for &N {
    fn normalize(&self, name: &str) -> Result<String, NormalizationError> {
        (**self).normalize(name)
    }
}

const PROBE: &str = "\u{00C0}BC";
const PROBE_EXPECTED: &str = "a\u{0300}bc";

/// NFD, default case fold, then NFD again so the output is always NFD.
#[derive(Debug)]
pub struct UnicodeNameNormalizer {
    _verified: (),
}

impl UnicodeNameNormalizer {
    /// Build and verify the engine. Do this once per process.
    pub fn new() -> Result<Self, NormalizationError> {
        let engine = Self { _verified: () };
        let probe = engine.fold(PROBE);
        if probe != PROBE_EXPECTED {
            return Err(NormalizationError::EngineUnavailable(format!(
                "probe {PROBE:?} normalized to {probe:?}"
            )));
        }
        Ok(engine)
    }

    fn fold(&self, text: &str) -> String {
        text.nfd().default_case_fold().nfd().collect()
    }
}

impl NameNormalizer for UnicodeNameNormalizer {
    fn normalize(&self, name: &str) -> Result<String, NormalizationError> {
        Ok(self.fold(name))
    }
}

/// Normalized bytes of `name`, or `None` if normalization leaves it
/// unchanged or it is not normalizable text.
pub fn normalized_name<N: NameNormalizer + ?Sized>(
    normalizer: &N,
    name: &[u8],
) -> Result<Option<Vec<u8>>, NormalizationError> {
    let Ok(text) = std::str::from_utf8(name) else {
        return Ok(None);
    };
    if text.is_empty() {
        return Ok(None);
    }
    let normalized = normalizer.normalize(text)?;
    if normalized.as_bytes() == name {
        Ok(None)
    } else {
        Ok(Some(normalized.into_bytes()))
    }
}

/// `name` in normalized form, borrowing when nothing changes.
pub fn normalize_key<'a, N: NameNormalizer + ?Sized>(
    normalizer: &N,
    name: &'a [u8],
) -> Result<Cow<'a, [u8]>, NormalizationError> {
    Ok(match normalized_name(normalizer, name)? {
        Some(normalized) => Cow::Owned(normalized),
        None => Cow::Borrowed(name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn engine() -> UnicodeNameNormalizer {
        UnicodeNameNormalizer::new().unwrap()
    }

    #[test]
    fn test_decomposes_and_folds() {
        let key = normalize_key(&engine(), "ÀBC".as_bytes()).unwrap();
        assert_eq!(key.as_ref(), "a\u{0300}bc".as_bytes());
    }

    #[test]
    fn test_already_normalized_borrows() {
        let name = b"already-lower";
        let key = normalize_key(&engine(), name).unwrap();
        assert!(matches!(key, Cow::Borrowed(_)));
    }

    #[test]
    fn test_precomposed_and_decomposed_collide() {
        let precomposed = normalize_key(&engine(), "Café".as_bytes()).unwrap().into_owned();
        let decomposed = normalize_key(&engine(), "CAFE\u{0301}".as_bytes()).unwrap().into_owned();
        assert_eq!(precomposed, decomposed);
    }

    #[test]
    fn test_invalid_utf8_kept() {
        let name = [0x66, 0x6f, 0xff, 0x6f];
        assert_eq!(normalized_name(&engine(), &name).unwrap(), None);
    }

    #[test]
    fn test_empty_kept() {
        assert_eq!(normalized_name(&engine(), b"").unwrap(), None);
    }

    #[test]
    fn test_full_case_folding() {
        let fold = |name: &str| normalize_key(&engine(), name.as_bytes()).unwrap().into_owned();
        assert_eq!(fold("Stra\u{00DF}e"), b"strasse".to_vec());
        assert_eq!(fold("Stra\u{00DF}e"), fold("STRASSE"));
        assert_eq!(fold("\u{03C3}\u{03BF}\u{03C6}\u{03BF}\u{03C2}"), fold("\u{03A3}\u{039F}\u{03A6}\u{039F}\u{03A3}"));
        assert_eq!(fold("\u{FB01}le"), b"file".to_vec());
    }

    struct BrokenEngine;

    impl NameNormalizer for BrokenEngine {
        fn normalize(&self, _name: &str) -> Result<String, NormalizationError> {
            Err(NormalizationError::EngineUnavailable("no tables".into()))
        }
    }

    #[test]
    fn test_engine_failure_propagates() {
        let result = normalized_name(&BrokenEngine, b"Name");
        assert!(matches!(result, Err(NormalizationError::EngineUnavailable(_))));
    }

    proptest! {
        #[test]
        fn prop_normalization_idempotent(name in "[a-zA-Z0-9 À-ÿ\u{0300}-\u{036F}\u{00DF}\u{1E9E}\u{03A3}\u{03C3}\u{03C2}\u{FB01}-]{0,24}") {
            let engine = engine();
            let once = normalize_key(&engine, name.as_bytes()).unwrap().into_owned();
            let twice = normalize_key(&engine, &once).unwrap().into_owned();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_malformed_bytes_fall_back(mut bytes in proptest::collection::vec(any::<u8>(), 0..32)) {
            // 0xFF never appears in UTF-8
            bytes.push(0xFF);
            let key = normalize_key(&engine(), &bytes).unwrap();
            prop_assert_eq!(key.as_ref(), bytes.as_slice());
        }
    }
}
