use crate::models::{KpiSettings, StandardizedPeriod};
use crate::period::format_period_date;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use uuid::Uuid;

/// Segment key shared by "no segment" and every unsegmented sentinel.
pub const UNSEGMENTED_PLACEHOLDER: &str = "__all_segments__";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SegmentFilter {
    Unsegmented,
    Segment(String),
}

impl SegmentFilter {
    /// Missing, blank, and sentinel values (trimmed, ASCII case-insensitive)
    /// all mean "no segment filter".
    pub fn resolve(raw: Option<&str>, sentinels: &[String]) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Self::Unsegmented;
        };
        if sentinels
            .iter()
            .any(|sentinel| sentinel.trim().eq_ignore_ascii_case(raw))
        {
            return Self::Unsegmented;
        }
        Self::Segment(raw.to_string())
    }

    /// Canonical segment text. A real segment never yields the unsegmented
    /// placeholder: one spelled like it, or starting with `\`, gains a
    /// leading `\`.
    pub fn key(&self) -> Cow<'_, str> {
        match self {
            Self::Unsegmented => Cow::Borrowed(UNSEGMENTED_PLACEHOLDER),
            Self::Segment(segment)
                if segment == UNSEGMENTED_PLACEHOLDER || segment.starts_with('\\') =>
            {
                Cow::Owned(format!("\\{segment}"))
            }
            Self::Segment(segment) => Cow::Borrowed(segment.as_str()),
        }
    }
}

/// Canonical attributes that name exactly one stored KPI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KpiKey {
    pub kpi_type: String,
    pub name: String,
    pub site_id: String,
    pub period: StandardizedPeriod,
    pub segment: SegmentFilter,
}

impl KpiKey {
    pub fn new(
        kpi_type: &str,
        name: &str,
        site_id: &str,
        period: StandardizedPeriod,
        segment_id: Option<&str>,
        settings: &KpiSettings,
    ) -> Self {
        Self {
            kpi_type: kpi_type.to_string(),
            name: name.to_string(),
            site_id: site_id.to_string(),
            period,
            segment: SegmentFilter::resolve(segment_id, &settings.unsegmented_sentinels),
        }
    }

    pub fn id(&self) -> String {
        identify(
            &self.kpi_type,
            &self.name,
            &self.site_id,
            &format_period_date(self.period.start),
            &format_period_date(self.period.end),
            &self.segment,
        )
    }
}

/// Derive the stable record id for a canonical key.
///
/// The digest is a cache key, not a security boundary: collisions are
/// negligible for this domain but nothing stops a crafted input from aiming
/// for one.
pub fn identify(
    kpi_type: &str,
    name: &str,
    site_id: &str,
    canonical_start: &str,
    canonical_end: &str,
    segment: &SegmentFilter,
) -> String {
    let segment_key = segment.key();
    let canonical = canonical_string(&[
        kpi_type,
        name,
        site_id,
        canonical_start,
        canonical_end,
        segment_key.as_ref(),
    ]);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).hyphenated().to_string()
}

// Components are escaped so a '|' inside one field cannot shift the boundary
// between two others.
fn canonical_string(parts: &[&str]) -> String {
    let mut out = String::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            out.push('|');
        }
        for ch in part.chars() {
            if ch == '|' || ch == '\\' {
                out.push('\\');
            }
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{canonical_string, identify, SegmentFilter, UNSEGMENTED_PLACEHOLDER};
    use proptest::prelude::*;

    fn sentinels() -> Vec<String> {
        vec!["all".to_string()]
    }

    fn id_for(segment: Option<&str>) -> String {
        identify(
            "engagement",
            "Active Users",
            "site-1",
            "2025-03-01",
            "2025-03-31",
            &SegmentFilter::resolve(segment, &sentinels()),
        )
    }

    #[test]
    fn identifier_has_uuid_shape() {
        let id = id_for(None);
        let groups: Vec<usize> = id.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
        assert!(id.chars().all(|ch| ch == '-' || ch.is_ascii_hexdigit()));
        assert_eq!(id, id.to_ascii_lowercase());
    }

    #[test]
    fn identifier_is_the_leading_digest_bytes() {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(
            "engagement|Active Users|site-1|2025-03-01|2025-03-31|__all_segments__".as_bytes(),
        );
        let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        let expected = format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        );
        assert_eq!(id_for(None), expected);
    }

    #[test]
    fn absent_and_all_segments_share_an_id() {
        assert_eq!(id_for(None), id_for(Some("all")));
        assert_eq!(id_for(None), id_for(Some(" ALL ")));
        assert_eq!(id_for(None), id_for(Some("")));
        assert_ne!(id_for(None), id_for(Some("mobile")));
    }

    #[test]
    fn segment_resolution_respects_configured_sentinels() {
        let custom = vec!["*".to_string(), "any".to_string()];
        assert_eq!(SegmentFilter::resolve(Some("*"), &custom), SegmentFilter::Unsegmented);
        assert_eq!(
            SegmentFilter::resolve(Some("all"), &custom),
            SegmentFilter::Segment("all".to_string())
        );
        assert_eq!(SegmentFilter::Unsegmented.key(), UNSEGMENTED_PLACEHOLDER);
    }

    #[test]
    fn segment_spelled_like_the_placeholder_stays_segmented() {
        let lookalike = SegmentFilter::resolve(Some(UNSEGMENTED_PLACEHOLDER), &sentinels());
        assert_eq!(lookalike, SegmentFilter::Segment(UNSEGMENTED_PLACEHOLDER.to_string()));
        assert_ne!(lookalike.key(), UNSEGMENTED_PLACEHOLDER);
        assert_ne!(id_for(Some(UNSEGMENTED_PLACEHOLDER)), id_for(None));

        let escaped = SegmentFilter::Segment(format!("\\{UNSEGMENTED_PLACEHOLDER}"));
        assert_ne!(escaped.key(), lookalike.key());
        assert_eq!(SegmentFilter::Segment("mobile".to_string()).key(), "mobile");
    }

    #[test]
    fn date_formatting_changes_the_id() {
        let a = identify("ltv", "LTV", "s", "2025-03-01", "2025-03-31", &SegmentFilter::Unsegmented);
        let b = identify("ltv", "LTV", "s", "2025-3-01", "2025-03-31", &SegmentFilter::Unsegmented);
        assert_ne!(a, b);
    }

    #[test]
    fn delimiters_inside_fields_do_not_collide() {
        assert_ne!(canonical_string(&["a|b", "c"]), canonical_string(&["a", "b|c"]));
        let left = identify("t", "a|b", "c", "2025-01-01", "2025-01-01", &SegmentFilter::Unsegmented);
        let right = identify("t", "a", "b|c", "2025-01-01", "2025-01-01", &SegmentFilter::Unsegmented);
        assert_ne!(left, right);
    }

    proptest! {
        #[test]
        fn identical_inputs_yield_identical_ids(
            kpi_type in "[a-z]{1,12}",
            name in ".{0,24}",
            site in "[a-z0-9-]{1,16}",
            segment in proptest::option::of("[a-z]{1,8}"),
        ) {
            let filter = SegmentFilter::resolve(segment.as_deref(), &sentinels());
            let first = identify(&kpi_type, &name, &site, "2025-01-01", "2025-01-31", &filter);
            let second = identify(&kpi_type, &name, &site, "2025-01-01", "2025-01-31", &filter.clone());
            prop_assert_eq!(first, second);
        }

        #[test]
        fn distinct_sites_yield_distinct_ids(site in "[a-z0-9]{1,16}", suffix in "[a-z0-9]") {
            let other = format!("{site}{suffix}");
            let a = identify("engagement", "Active Users", &site, "2025-01-01", "2025-01-31", &SegmentFilter::Unsegmented);
            let b = identify("engagement", "Active Users", &other, "2025-01-01", "2025-01-31", &SegmentFilter::Unsegmented);
            prop_assert_ne!(a, b);
        }
    }
}
