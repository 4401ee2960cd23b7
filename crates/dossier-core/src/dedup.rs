//! Source deduplication: URL identity, known-reference overlap, near-duplicate content.
//!
//! Survivors and removal reasons do not depend on input order. Sources are
//! put into a canonical order before any pairwise comparison.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::instrument;
use url::Url;

use crate::config::DedupConfig;
use crate::obs;
use crate::source::{attribution_rank, Source};
use crate::text::shingle_similarity;

const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "ref",
    "fbclid",
    "gclid",
    "msclkid",
    "mc_cid",
    "mc_eid",
    "source",
    "trk",
    "trkInfo",
];

/// Canonical form of a URL used as source identity.
///
/// Forces https, strips `www.`, tracking parameters, the fragment and a
/// trailing slash on non-root paths. Unparseable input is returned verbatim.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.to_string();
    };

    if url.scheme() == "http" {
        // Only fails for non-special schemes, which are left alone.
        let _ = url.set_scheme("https");
    }

    if let Some(host) = url.host_str().and_then(|h| h.strip_prefix("www.")).map(str::to_string) {
        let _ = url.set_host(Some(&host));
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    url.set_fragment(None);

    url.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub input: usize,
    pub url_duplicates: usize,
    pub reference_overlaps: usize,
    pub content_duplicates: usize,
    pub survivors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DedupOutcome {
    pub survivors: Vec<Source>,
    pub removed: Vec<Removal>,
    pub stats: DedupStats,
}

/// Run all three stages over `sources`.
///
/// `references` is known content already in hand (for example the subject's
/// own posts); a source republishing one of them adds nothing.
#[instrument(skip_all, fields(sources = sources.len(), references = references.len()))]
pub fn deduplicate(sources: Vec<Source>, references: &[String], config: &DedupConfig) -> DedupOutcome {
    let mut stats = DedupStats {
        input: sources.len(),
        ..DedupStats::default()
    };
    let mut removed = Vec::new();

    // Stage 1: URL identity. BTreeMap keys give the canonical URL order.
    let mut groups: BTreeMap<String, Vec<Source>> = BTreeMap::new();
    for source in sources {
        groups.entry(normalize_url(&source.url)).or_default().push(source);
    }
    let mut unique: Vec<(String, Source)> = Vec::with_capacity(groups.len());
    for (normalized, mut group) in groups {
        group.sort_by(|a, b| {
            b.content_len()
                .cmp(&a.content_len())
                .then_with(|| attribution_rank(a.attribution).cmp(&attribution_rank(b.attribution)))
                .then_with(|| a.url.cmp(&b.url))
        });
        let mut members = group.into_iter();
        let Some(keeper) = members.next() else {
            continue;
        };
        for dup in members {
            stats.url_duplicates += 1;
            removed.push(Removal {
                url: dup.url,
                reason: format!("URL duplicate of {}", keeper.url),
            });
        }
        unique.push((normalized, keeper));
    }

    // Stage 2: overlap with known reference content.
    let references: Vec<(usize, &String)> = references
        .iter()
        .enumerate()
        .filter(|(_, r)| r.chars().count() >= config.min_reference_chars)
        .collect();
    let mut after_reference = Vec::with_capacity(unique.len());
    'sources: for (normalized, source) in unique {
        let content = source.content.as_deref().unwrap_or("");
        if !references.is_empty() && content.chars().count() >= config.min_reference_source_chars {
            for (idx, reference) in &references {
                let similarity = shingle_similarity(content, reference);
                if similarity >= config.reference_similarity {
                    stats.reference_overlaps += 1;
                    removed.push(Removal {
                        url: source.url,
                        reason: format!(
                            "Content duplicates reference #{} ({:.0}% similar)",
                            idx + 1,
                            similarity * 100.0
                        ),
                    });
                    continue 'sources;
                }
            }
        }
        after_reference.push((normalized, source));
    }

    // Stage 3: pairwise fingerprints, best candidates claim their cluster first.
    let mut ranked = after_reference;
    ranked.sort_by(|(na, a), (nb, b)| preference(a, na, b, nb));
    let mut kept: Vec<(String, Source)> = Vec::with_capacity(ranked.len());
    for (normalized, source) in ranked {
        // Snippets are not fingerprinted; only fetched content is.
        let content = source.content.as_deref().unwrap_or("");
        if content.chars().count() >= config.min_fingerprint_chars {
            let duplicate_of = kept.iter().find(|(_, k)| {
                let other = k.content.as_deref().unwrap_or("");
                other.chars().count() >= config.min_fingerprint_chars
                    && shingle_similarity(content, other) > config.content_similarity
            });
            if let Some((_, keeper)) = duplicate_of {
                stats.content_duplicates += 1;
                removed.push(Removal {
                    url: source.url.clone(),
                    reason: format!(
                        "Content >{:.0}% similar to {}",
                        config.content_similarity * 100.0,
                        keeper.url
                    ),
                });
                continue;
            }
        }
        kept.push((normalized, source));
    }

    kept.sort_by(|(a, _), (b, _)| a.cmp(b));
    let survivors: Vec<Source> = kept.into_iter().map(|(_, s)| s).collect();
    stats.survivors = survivors.len();

    for r in &removed {
        obs::emit_source_dropped("dedup", &r.url, &r.reason);
    }
    obs::emit_stage_completed("dedup", survivors.len(), removed.len());

    DedupOutcome {
        survivors,
        removed,
        stats,
    }
}

/// Better attribution first, then longer text, then smaller normalized URL.
fn preference(a: &Source, na: &str, b: &Source, nb: &str) -> Ordering {
    attribution_rank(a.attribution)
        .cmp(&attribution_rank(b.attribution))
        .then_with(|| b.char_count().cmp(&a.char_count()))
        .then_with(|| na.cmp(nb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Attribution;

    const BODY: &str = "The foundation director announced that the regional literacy program \
        would expand to twelve additional counties next spring after a review of outcomes \
        showed reading scores improving across every participating district and school board \
        members voted unanimously to continue funding the initiative through the decade";

    #[test]
    fn test_normalize_url_strips_tracking_and_www() {
        assert_eq!(
            normalize_url("http://www.example.com/article/?utm_source=x&id=7#top"),
            "https://example.com/article?id=7"
        );
        assert_eq!(normalize_url("https://example.com/"), "https://example.com/");
        assert_eq!(normalize_url("not a url"), "not a url");
    }

    #[test]
    fn test_url_duplicate_keeps_longer_content() {
        let short = Source::new("http://www.example.com/a?utm_source=x", "A", "").with_content("short");
        let long = Source::new("https://example.com/a", "A", "").with_content("much longer content here");
        let out = deduplicate(vec![short, long], &[], &DedupConfig::default());
        assert_eq!(out.survivors.len(), 1);
        assert_eq!(out.survivors[0].url, "https://example.com/a");
        assert_eq!(
            out.removed,
            vec![Removal {
                url: "http://www.example.com/a?utm_source=x".into(),
                reason: "URL duplicate of https://example.com/a".into(),
            }]
        );
        assert_eq!(out.stats.url_duplicates, 1);
    }

    #[test]
    fn test_reference_overlap_drops_republished_post() {
        let republished = Source::new("https://aggregator.net/post", "Post", "").with_content(BODY);
        let other = Source::new("https://news.org/story", "Story", "")
            .with_content("An unrelated interview about hiring philosophy and early career lessons from the founder");
        let out = deduplicate(vec![republished, other], &[BODY.to_string()], &DedupConfig::default());
        assert_eq!(out.survivors.len(), 1);
        assert_eq!(out.survivors[0].url, "https://news.org/story");
        assert!(out.removed[0].reason.starts_with("Content duplicates reference #1"));
    }

    #[test]
    fn test_near_duplicate_content_keeps_better_attribution() {
        let coverage = Source::new("https://a.org/x", "", "")
            .with_content(BODY)
            .with_attribution(Attribution::TargetCoverage);
        let authored = Source::new("https://b.org/y", "", "")
            .with_content(format!("{BODY} today"))
            .with_attribution(Attribution::TargetAuthored);
        let out = deduplicate(vec![coverage, authored], &[], &DedupConfig::default());
        assert_eq!(out.survivors.len(), 1);
        assert_eq!(out.survivors[0].url, "https://b.org/y");
        assert_eq!(out.removed[0].reason, "Content >80% similar to https://b.org/y");
    }

    #[test]
    fn test_result_independent_of_input_order() {
        let sources = vec![
            Source::new("https://a.org/1", "", "").with_content(BODY),
            Source::new("https://b.org/2", "", "").with_content(format!("{BODY} again")),
            Source::new("https://www.a.org/1/", "", "").with_content("tiny"),
            Source::new("https://c.org/3", "", "").with_content("unrelated short text"),
        ];
        let forward = deduplicate(sources.clone(), &[], &DedupConfig::default());
        let mut reversed_input = sources;
        reversed_input.reverse();
        let backward = deduplicate(reversed_input, &[], &DedupConfig::default());

        let urls = |o: &DedupOutcome| o.survivors.iter().map(|s| s.url.clone()).collect::<Vec<_>>();
        assert_eq!(urls(&forward), urls(&backward));
        let mut fr = forward.removed.clone();
        let mut br = backward.removed.clone();
        fr.sort_by(|a, b| a.url.cmp(&b.url));
        br.sort_by(|a, b| a.url.cmp(&b.url));
        assert_eq!(fr, br);
    }

    #[test]
    fn test_short_content_is_never_fingerprinted() {
        let a = Source::new("https://a.org", "", "same short words repeated here ok");
        let b = Source::new("https://b.org", "", "same short words repeated here ok");
        let out = deduplicate(vec![a, b], &[], &DedupConfig::default());
        assert_eq!(out.survivors.len(), 2);
    }

    #[test]
    fn test_long_snippets_without_content_are_not_fingerprinted() {
        let a = Source::new("https://a.org/1", "", BODY);
        let b = Source::new("https://b.org/2", "", BODY);
        let out = deduplicate(vec![a, b], &[], &DedupConfig::default());
        assert_eq!(out.survivors.len(), 2);
        assert_eq!(out.stats.content_duplicates, 0);
    }
}
