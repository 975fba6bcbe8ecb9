//! Geo-aware candidate ordering.
//!
//! Pure functions that turn configured origins and optional request geo tags
//! into the ordered, de-duplicated candidate list for one request.

use crate::origin::{GeoOrigin, Origin, RequestGeoTags};
use std::collections::HashSet;
use tracing::debug;

/// Accumulates origins in order, skipping any whose normalized URL was
/// already pushed.
#[derive(Debug, Default)]
struct CandidateList {
    seen: HashSet<String>,
    origins: Vec<Origin>,
}

impl CandidateList {
    fn push(&mut self, origin: &Origin) {
        if self.seen.insert(origin.normalized_url().to_string()) {
            self.origins.push(origin.clone());
        }
    }

    fn extend<'a>(&mut self, origins: impl IntoIterator<Item = &'a Origin>) {
        for origin in origins {
            self.push(origin);
        }
    }

    fn into_vec(self) -> Vec<Origin> {
        self.origins
    }
}

/// Removes origins whose normalized URL repeats an earlier one.
pub fn dedup_origins(origins: &[Origin]) -> Vec<Origin> {
    let mut list = CandidateList::default();
    list.extend(origins);
    list.into_vec()
}

/// Computes the candidate order for a request.
///
/// With matching tags the order is: matched geo origins, then fallback
/// origins, then every remaining geo origin. Without tags, or when nothing
/// matches, the fallback list is used if non-empty and all geo origins
/// otherwise.
///
/// # Example
///
/// ```
/// use rust_edge_router::geo::select_candidates;
/// use rust_edge_router::origin::{ContinentCode, GeoOrigin, GeoRule, Origin, RequestGeoTags};
///
/// let geo = vec![
///     GeoOrigin::new(Origin::new("http://na.example"), GeoRule::continent([ContinentCode::NA])),
///     GeoOrigin::new(Origin::new("http://eu.example"), GeoRule::continent([ContinentCode::EU])),
/// ];
/// let tags = RequestGeoTags::default().with_continent(ContinentCode::EU);
/// let candidates = select_candidates(&geo, Some(&tags), &[]);
/// assert_eq!(candidates[0].url, "http://eu.example");
/// ```
pub fn select_candidates(
    geo_origins: &[GeoOrigin],
    tags: Option<&RequestGeoTags>,
    fallback: &[Origin],
) -> Vec<Origin> {
    let matched: Vec<&GeoOrigin> = match tags {
        Some(tags) => geo_origins.iter().filter(|g| g.geo.matches(tags)).collect(),
        None => Vec::new(),
    };

    let mut list = CandidateList::default();

    if matched.is_empty() {
        if fallback.is_empty() {
            list.extend(geo_origins.iter().map(|g| &g.origin));
        } else {
            list.extend(fallback);
        }
        debug!(candidates = list.origins.len(), "no geo match, using fallback order");
        return list.into_vec();
    }

    list.extend(matched.iter().map(|g| &g.origin));
    list.extend(fallback);
    list.extend(geo_origins.iter().map(|g| &g.origin));

    debug!(
        matched = matched.len(),
        candidates = list.origins.len(),
        "geo candidates selected"
    );
    list.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::{ContinentCode, GeoRule};

    fn geo(url: &str, continent: ContinentCode) -> GeoOrigin {
        GeoOrigin::new(Origin::new(url), GeoRule::continent([continent]))
    }

    fn urls(origins: &[Origin]) -> Vec<&str> {
        origins.iter().map(|o| o.url.as_str()).collect()
    }

    fn three_continents() -> Vec<GeoOrigin> {
        vec![
            geo("http://a", ContinentCode::NA),
            geo("http://b", ContinentCode::EU),
            geo("http://c", ContinentCode::AS),
        ]
    }

    #[test]
    fn test_matched_origin_first() {
        let tags = RequestGeoTags::default().with_continent(ContinentCode::EU);
        let result = select_candidates(&three_continents(), Some(&tags), &[]);
        assert_eq!(urls(&result), vec!["http://b", "http://a", "http://c"]);
    }

    #[test]
    fn test_no_match_uses_fallback_exactly() {
        let tags = RequestGeoTags::default().with_continent(ContinentCode::AF);
        let fallback = vec![Origin::new("http://d")];
        let result = select_candidates(&three_continents(), Some(&tags), &fallback);
        assert_eq!(urls(&result), vec!["http://d"]);
    }

    #[test]
    fn test_no_tags_without_fallback_returns_all() {
        let result = select_candidates(&three_continents(), None, &[]);
        assert_eq!(urls(&result), vec!["http://a", "http://b", "http://c"]);
    }

    #[test]
    fn test_no_tags_with_fallback() {
        let fallback = vec![Origin::new("http://d"), Origin::new("http://e")];
        let result = select_candidates(&three_continents(), None, &fallback);
        assert_eq!(urls(&result), vec!["http://d", "http://e"]);
    }

    #[test]
    fn test_match_then_fallback_then_rest() {
        let geo_origins = vec![
            geo("http://a", ContinentCode::NA),
            geo("http://b", ContinentCode::EU),
            geo("http://c", ContinentCode::EU),
        ];
        let tags = RequestGeoTags::default().with_continent(ContinentCode::EU);
        let fallback = vec![Origin::new("http://d"), Origin::new("http://b/")];
        let result = select_candidates(&geo_origins, Some(&tags), &fallback);
        assert_eq!(
            urls(&result),
            vec!["http://b", "http://c", "http://d", "http://a"]
        );
    }

    #[test]
    fn test_duplicate_matches_keep_first() {
        let geo_origins = vec![
            GeoOrigin::new(
                Origin::new("http://x/").with_timeout_ms(1000),
                GeoRule::country(["DE"]),
            ),
            GeoOrigin::new(Origin::new("http://x"), GeoRule::country(["DE"])),
        ];
        let tags = RequestGeoTags::default().with_country("DE");
        let result = select_candidates(&geo_origins, Some(&tags), &[]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].timeout_ms, 1000);
    }

    #[test]
    fn test_tags_without_matching_dimension() {
        let tags = RequestGeoTags::default().with_country("DE");
        let result = select_candidates(&three_continents(), Some(&tags), &[]);
        assert_eq!(urls(&result), vec!["http://a", "http://b", "http://c"]);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(select_candidates(&[], None, &[]).is_empty());
        let tags = RequestGeoTags::default().with_continent(ContinentCode::EU);
        assert!(select_candidates(&[], Some(&tags), &[]).is_empty());
    }

    #[test]
    fn test_dedup_origins() {
        let origins = vec![
            Origin::new("http://a/"),
            Origin::new("http://b"),
            Origin::new("http://a"),
        ];
        assert_eq!(urls(&dedup_origins(&origins)), vec!["http://a/", "http://b"]);
    }
}
