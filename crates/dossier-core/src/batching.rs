//! Packing of ranked sources into extraction batches.

use serde::Serialize;
use tracing::info;

use crate::config::BatchConfig;
use crate::dimensions;
use crate::source::Source;

/// A packed group of sources. Built once by [`pack_batches`], consumed once.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub batch_number: usize,
    pub sources: Vec<Source>,
    pub total_chars: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Packing {
    pub batches: Vec<Batch>,
    /// Ranked sources left over once the batch cap was reached.
    pub dropped: Vec<Source>,
}

impl Packing {
    pub fn packed_sources(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }
}

/// Greedy packing in ranked order.
///
/// A source that would push a non-empty batch past the ceiling opens the next
/// batch. A source larger than the ceiling on its own still gets a batch.
pub fn pack_batches(ranked: Vec<Source>, config: &BatchConfig) -> Packing {
    let mut packing = Packing::default();
    if config.max_batches == 0 {
        packing.dropped = ranked;
        return packing;
    }

    let mut current: Vec<Source> = Vec::new();
    let mut current_chars = 0;
    let mut remaining = ranked.into_iter();

    while let Some(source) = remaining.next() {
        let chars = source.char_count();
        if !current.is_empty() && current_chars + chars > config.char_ceiling {
            packing.batches.push(Batch {
                batch_number: packing.batches.len() + 1,
                sources: std::mem::take(&mut current),
                total_chars: current_chars,
            });
            current_chars = 0;
            if packing.batches.len() == config.max_batches {
                packing.dropped.push(source);
                packing.dropped.extend(remaining);
                break;
            }
        }
        current_chars += chars;
        current.push(source);
    }

    if !current.is_empty() {
        packing.batches.push(Batch {
            batch_number: packing.batches.len() + 1,
            sources: current,
            total_chars: current_chars,
        });
    }

    info!(
        event = "batching.packed",
        batches = packing.batches.len(),
        packed = packing.packed_sources(),
        dropped = packing.dropped.len(),
    );
    packing
}

fn predicted_coverage(source: &Source) -> String {
    let scored: Vec<String> = source
        .depth_scores
        .iter()
        .filter(|(_, depth)| **depth > 0)
        .filter_map(|(id, depth)| dimensions::by_id(*id).map(|d| format!("{}({depth})", d.key)))
        .collect();
    if scored.is_empty() {
        "none scored".to_string()
    } else {
        scored.join(", ")
    }
}

/// Source material block handed to an extraction call.
pub fn format_batch_sources(batch: &Batch) -> String {
    let n = batch.sources.len();
    let mut out = format!(
        "PRE-FETCHED SOURCE MATERIAL (Batch {}):\n{} sources, ~{}K chars.\n\n",
        batch.batch_number,
        n,
        (batch.total_chars + 500) / 1000
    );

    for (i, source) in batch.sources.iter().enumerate() {
        out.push_str(&format!("=== SOURCE {} of {} ===\n", i + 1, n));
        out.push_str(&format!("URL: {}\n", source.url));
        out.push_str(&format!("Title: {}\n", source.title));
        out.push_str(&format!(
            "Source Tier: {} ({})\n",
            source.source_tier.get(),
            source.source_tier.label()
        ));
        out.push_str(&format!(
            "Attribution: {}\n",
            source.attribution.map_or("unknown", |a| a.as_str())
        ));
        if let Some(context) = source.institutional_context.as_deref().filter(|c| !c.is_empty()) {
            out.push_str(&format!("Institutional Context: {context}\n"));
        }
        out.push_str(&format!("Dimension Coverage (predicted): {}\n\n", predicted_coverage(source)));
        out.push_str(source.text());
        out.push_str("\n===\n\n");
    }
    out
}
