//! Session code recovery.
//!
//! A portal link carries its session code in the `id` query parameter as
//! `<leading>_<suffix>`, where `leading` is numeric. An expired code is
//! re-issued with a different last digit of `leading`; the evening session's
//! code is the morning `leading` value plus a fixed offset.

use std::fmt;

use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::Url;

use crate::error::AgentError;

/// A parsed `leading_suffix` session code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCode {
    leading: String,
    suffix: String,
}

impl SessionCode {
    /// Parses a raw `leading_suffix` token.
    pub fn parse(token: &str) -> Result<Self, AgentError> {
        let mut parts = token.split('_');
        let (Some(leading), Some(suffix), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(AgentError::Format(format!(
                "Invalid ID format - expected exactly one '_' separator: {token}"
            )));
        };

        if leading.is_empty() || !leading.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AgentError::Format(format!(
                "Invalid first part - must be numeric: {leading}"
            )));
        }

        Ok(Self {
            leading: leading.to_string(),
            suffix: suffix.to_string(),
        })
    }

    /// Extracts and parses the code from the `id` parameter of a portal link.
    ///
    /// The value is taken as written in the query, without percent-decoding,
    /// so the suffix is carried over byte for byte.
    pub fn from_link(link: &str) -> Result<Self, AgentError> {
        let url = Url::parse(link)
            .map_err(|e| AgentError::Format(format!("Invalid QR link format - {e}: {link}")))?;
        let id = url
            .query()
            .unwrap_or_default()
            .split('&')
            .find_map(|pair| pair.strip_prefix("id="))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AgentError::Format("Invalid QR link format - no ID found".into()))?;
        Self::parse(id)
    }

    pub fn leading(&self) -> &str {
        &self.leading
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// The last digit of the leading segment.
    pub fn trailing_digit(&self) -> u8 {
        // Leading is non-empty and all ASCII digits by construction.
        self.leading.as_bytes()[self.leading.len() - 1] - b'0'
    }

    /// Returns a copy with only the trailing digit replaced.
    pub fn with_trailing_digit(&self, digit: u8) -> Self {
        let mut leading = self.leading[..self.leading.len() - 1].to_string();
        leading.push(char::from(b'0' + digit));
        Self {
            leading,
            suffix: self.suffix.clone(),
        }
    }

    /// Returns a copy whose leading value is increased by `offset`.
    pub fn offset_by(&self, offset: u64) -> Result<Self, AgentError> {
        let value: u64 = self.leading.parse().map_err(|_| {
            AgentError::Format(format!(
                "Invalid QR ID format - first part must be numeric: {}",
                self.leading
            ))
        })?;
        let shifted = value.checked_add(offset).ok_or_else(|| {
            AgentError::Format(format!(
                "Leading value {value} overflows when adding offset {offset}"
            ))
        })?;
        Ok(Self {
            leading: shifted.to_string(),
            suffix: self.suffix.clone(),
        })
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.leading, self.suffix)
    }
}

/// Digits other than `current`, in ascending order.
fn replacement_digits(current: u8) -> Vec<u8> {
    (0..=9).filter(|&d| d != current).collect()
}

/// Rebuilds portal links around recovered session codes.
#[derive(Debug, Clone)]
pub struct CodeTransformer {
    portal_url: String,
    evening_offset: u64,
}

impl CodeTransformer {
    pub fn new(portal_url: impl Into<String>, evening_offset: u64) -> Self {
        Self {
            portal_url: portal_url.into(),
            evening_offset,
        }
    }

    pub fn evening_offset(&self) -> u64 {
        self.evening_offset
    }

    fn link_for(&self, code: &SessionCode) -> String {
        format!("{}?id={code}", self.portal_url)
    }

    /// Replaces the trailing digit of an expired code with a different one,
    /// chosen uniformly from the remaining nine.
    pub fn convert_expired<R: Rng + ?Sized>(
        &self,
        link: &str,
        rng: &mut R,
    ) -> Result<String, AgentError> {
        let code = SessionCode::from_link(link)?;
        let current = code.trailing_digit();
        let candidates = replacement_digits(current);
        let digit = candidates[rng.random_range(0..candidates.len())];
        let converted = code.with_trailing_digit(digit);

        tracing::info!(
            original = %code,
            converted = %converted,
            "changed last digit from {current} to {digit}"
        );
        Ok(self.link_for(&converted))
    }

    /// Derives the evening session link from a morning link.
    pub fn create_evening(&self, morning_link: &str) -> Result<String, AgentError> {
        let code = SessionCode::from_link(morning_link)?;
        let evening = code.offset_by(self.evening_offset)?;

        tracing::info!(
            morning = %code,
            evening = %evening,
            offset = self.evening_offset,
            "evening code derived"
        );
        Ok(self.link_for(&evening))
    }

    /// Replaces the trailing digit with a caller-chosen digit.
    pub fn convert_to_digit(&self, link: &str, digit: u32) -> Result<String, AgentError> {
        if digit > 9 {
            return Err(AgentError::Validation(format!(
                "digit must be between 0 and 9, got {digit}"
            )));
        }
        let code = SessionCode::from_link(link)?;
        Ok(self.link_for(&code.with_trailing_digit(digit as u8)))
    }

    /// Returns up to nine links with distinct trailing digits, none equal to
    /// the original, in random order.
    pub fn convert_multiple<R: Rng + ?Sized>(
        &self,
        link: &str,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<String>, AgentError> {
        let code = SessionCode::from_link(link)?;
        let mut digits = replacement_digits(code.trailing_digit());
        digits.shuffle(rng);
        digits.truncate(count.min(9));

        let links: Vec<String> = digits
            .into_iter()
            .map(|digit| self.link_for(&code.with_trailing_digit(digit)))
            .collect();
        tracing::debug!(count = links.len(), "generated code variations");
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::BTreeSet;

    const PORTAL: &str = "https://students.nsbm.ac.lk/attendence/index.php";

    fn transformer() -> CodeTransformer {
        CodeTransformer::new(PORTAL, 800_504)
    }

    fn link(id: &str) -> String {
        format!("{PORTAL}?id={id}")
    }

    fn code_of(link: &str) -> SessionCode {
        SessionCode::from_link(link).unwrap()
    }

    #[test]
    fn parse_splits_leading_and_suffix() {
        let code = SessionCode::parse("52202002751_84783").unwrap();
        assert_eq!(code.leading(), "52202002751");
        assert_eq!(code.suffix(), "84783");
        assert_eq!(code.trailing_digit(), 1);
        assert_eq!(code.to_string(), "52202002751_84783");
    }

    #[test]
    fn parse_rejects_bad_separators() {
        for token in ["5220200275184783", "522_020_84783", "_", "1__2"] {
            let err = SessionCode::parse(token).unwrap_err();
            assert!(matches!(err, AgentError::Format(_)), "{token}: {err:?}");
        }
    }

    #[test]
    fn parse_rejects_non_numeric_leading() {
        for token in ["52a02_84783", "_84783", "-12_84783", "١٢_84783"] {
            let err = SessionCode::parse(token).unwrap_err();
            assert!(matches!(err, AgentError::Format(_)), "{token}: {err:?}");
        }
    }

    #[test]
    fn missing_id_parameter_is_format_error() {
        let t = transformer();
        let mut rng = StdRng::seed_from_u64(1);
        for bad in [PORTAL.to_string(), format!("{PORTAL}?code=1_2"), "not a url".into()] {
            assert!(matches!(
                t.convert_expired(&bad, &mut rng),
                Err(AgentError::Format(_))
            ));
            assert!(matches!(t.create_evening(&bad), Err(AgentError::Format(_))));
        }
    }

    #[test]
    fn convert_expired_known_code() {
        let t = transformer();
        let mut rng = StdRng::seed_from_u64(7);
        let converted = t.convert_expired(&link("52202002751_84783"), &mut rng).unwrap();
        let code = code_of(&converted);

        assert!(converted.starts_with(PORTAL));
        assert_eq!(code.suffix(), "84783");
        assert_eq!(&code.leading()[..10], "5220200275");
        assert!([0, 2, 3, 4, 5, 6, 7, 8, 9].contains(&code.trailing_digit()));
    }

    #[test]
    fn convert_expired_is_deterministic_for_a_seed() {
        let t = transformer();
        let input = link("52202002751_84783");
        let a = t.convert_expired(&input, &mut StdRng::seed_from_u64(99)).unwrap();
        let b = t.convert_expired(&input, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn convert_expired_reaches_every_other_digit() {
        let t = transformer();
        let input = link("52202002751_84783");
        let mut rng = StdRng::seed_from_u64(3);
        let seen: BTreeSet<u8> = (0..500)
            .map(|_| code_of(&t.convert_expired(&input, &mut rng).unwrap()).trailing_digit())
            .collect();
        assert_eq!(seen, BTreeSet::from([0, 2, 3, 4, 5, 6, 7, 8, 9]));
    }

    #[test]
    fn create_evening_known_code() {
        let evening = transformer()
            .create_evening(&link("52202002751_84783"))
            .unwrap();
        assert_eq!(evening, link("52202803255_84783"));
    }

    #[test]
    fn encoded_suffix_is_carried_verbatim() {
        let t = transformer();
        let mut rng = StdRng::seed_from_u64(2);
        for suffix in ["a+b", "x%26y"] {
            let converted = t
                .convert_expired(&link(&format!("52202002751_{suffix}")), &mut rng)
                .unwrap();
            assert!(converted.ends_with(&format!("_{suffix}")), "{converted}");
            assert_eq!(code_of(&converted).suffix(), suffix);

            let evening = t
                .create_evening(&link(&format!("52202002751_{suffix}")))
                .unwrap();
            assert_eq!(evening, link(&format!("52202803255_{suffix}")));
        }
    }

    #[test]
    fn id_is_found_among_other_parameters() {
        let code = code_of(&format!("{PORTAL}?lang=en&id=52202002751_84783&x=1"));
        assert_eq!(code.to_string(), "52202002751_84783");
    }

    #[test]
    fn create_evening_overflow_is_format_error() {
        let t = CodeTransformer::new(PORTAL, 10);
        let err = t
            .create_evening(&link(&format!("{}_1", u64::MAX)))
            .unwrap_err();
        assert!(matches!(err, AgentError::Format(_)));
    }

    #[test]
    fn create_evening_rejects_leading_too_long_for_u64() {
        let err = transformer()
            .create_evening(&link("123456789012345678901234567890_1"))
            .unwrap_err();
        assert!(matches!(err, AgentError::Format(_)));
    }

    #[test]
    fn convert_to_digit_replaces_last_digit() {
        let converted = transformer()
            .convert_to_digit(&link("52202002751_84783"), 8)
            .unwrap();
        assert_eq!(converted, link("52202002758_84783"));
    }

    #[test]
    fn convert_to_digit_rejects_out_of_range() {
        let err = transformer()
            .convert_to_digit(&link("52202002751_84783"), 10)
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[test]
    fn convert_multiple_nine_covers_all_other_digits() {
        let mut rng = StdRng::seed_from_u64(11);
        let links = transformer()
            .convert_multiple(&link("52202002751_84783"), 9, &mut rng)
            .unwrap();
        assert_eq!(links.len(), 9);
        let digits: BTreeSet<u8> = links.iter().map(|l| code_of(l).trailing_digit()).collect();
        assert_eq!(digits, BTreeSet::from([0, 2, 3, 4, 5, 6, 7, 8, 9]));
    }

    #[test]
    fn convert_multiple_caps_count() {
        let t = transformer();
        let mut rng = StdRng::seed_from_u64(5);
        let input = link("10_x");
        assert_eq!(t.convert_multiple(&input, 50, &mut rng).unwrap().len(), 9);
        assert_eq!(t.convert_multiple(&input, 3, &mut rng).unwrap().len(), 3);
        assert!(t.convert_multiple(&input, 0, &mut rng).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn convert_expired_changes_digit_and_keeps_suffix(
            leading in "[0-9]{1,18}",
            suffix in "[0-9A-Za-z]{0,12}",
            seed in any::<u64>(),
        ) {
            let original = SessionCode::parse(&format!("{leading}_{suffix}")).unwrap();
            let converted = transformer()
                .convert_expired(&link(&original.to_string()), &mut StdRng::seed_from_u64(seed))
                .unwrap();
            let converted = code_of(&converted);

            prop_assert_ne!(converted.trailing_digit(), original.trailing_digit());
            prop_assert_eq!(converted.suffix(), original.suffix());
            prop_assert_eq!(
                &converted.leading()[..leading.len() - 1],
                &leading[..leading.len() - 1]
            );
        }

        #[test]
        fn create_evening_adds_offset(value in 0u64..1_000_000_000_000_000, suffix in "[0-9]{1,8}") {
            let evening = transformer()
                .create_evening(&link(&format!("{value}_{suffix}")))
                .unwrap();
            let evening = code_of(&evening);
            prop_assert_eq!(evening.leading().parse::<u64>().unwrap(), value + 800_504);
            prop_assert_eq!(evening.suffix(), suffix.as_str());
        }
    }
}
