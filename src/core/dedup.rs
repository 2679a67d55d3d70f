//! Three tiers of triple deduplication, each more tolerant than the last:
//! exact key collapse, model-grouped paraphrases, and predicate similarity
//! within a subject/object pair.

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PostProcessing;
use crate::core::llm_client::{Embedder, TextGenerator};
use crate::core::model::{normalize_predicate, Provenance, Relationship, TripleKey};
use crate::core::prompts::PromptBuilder;
use crate::utils::json::{parse_object_array, string_field};

/// Tier 1. Keeps one triple per key at the position it was first seen; an
/// explicit duplicate replaces an implicit one.
pub fn collapse_exact(relationships: Vec<Relationship>) -> Vec<Relationship> {
    let mut index: HashMap<TripleKey, usize> = HashMap::new();
    let mut out: Vec<Relationship> = Vec::with_capacity(relationships.len());

    for rel in relationships {
        match index.get(&rel.key()) {
            Some(&pos) => {
                if rel.inferred.is_explicit() && !out[pos].inferred.is_explicit() {
                    out[pos] = rel;
                }
            }
            None => {
                index.insert(rel.key(), out.len());
                out.push(rel);
            }
        }
    }
    out
}

/// Groups indices by `(subject, object)` in first-seen order.
fn pair_groups(relationships: &[Relationship]) -> Vec<Vec<usize>> {
    let mut positions: HashMap<(String, String), usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, rel) in relationships.iter().enumerate() {
        let slot = *positions.entry(rel.pair()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(i);
    }
    groups
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Jaccard similarity of character bigrams.
pub fn bigram_similarity(a: &str, b: &str) -> f32 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let bigrams = |s: &str| -> HashSet<(char, char)> { s.chars().zip(s.chars().skip(1)).collect() };
    let bigrams_a = bigrams(a);
    let bigrams_b = bigrams(b);

    if bigrams_a.is_empty() || bigrams_b.is_empty() {
        let chars_a: HashSet<char> = a.chars().collect();
        let chars_b: HashSet<char> = b.chars().collect();
        let union = chars_a.union(&chars_b).count();
        return if union == 0 {
            0.0
        } else {
            chars_a.intersection(&chars_b).count() as f32 / union as f32
        };
    }

    let union = bigrams_a.union(&bigrams_b).count();
    if union == 0 {
        0.0
    } else {
        bigrams_a.intersection(&bigrams_b).count() as f32 / union as f32
    }
}

/// Tier 3 core: first seen is the representative, later triples whose
/// predicate is at least `threshold` similar to an earlier representative of
/// the same pair collapse into it.
pub fn prune_by_similarity<F>(relationships: Vec<Relationship>, threshold: f32, similarity: F) -> Vec<Relationship>
where
    F: Fn(&str, &str) -> f32,
{
    let mut out: Vec<Relationship> = Vec::with_capacity(relationships.len());
    let mut representatives: HashMap<(String, String), Vec<usize>> = HashMap::new();

    for rel in relationships {
        let reps = representatives.entry(rel.pair()).or_default();
        let hit = reps
            .iter()
            .copied()
            .find(|&pos| similarity(&out[pos].predicate, &rel.predicate) >= threshold);

        match hit {
            Some(pos) => {
                debug!(
                    "Collapsing '{}' into '{}' for ({}, {})",
                    rel.predicate, out[pos].predicate, rel.subject, rel.object
                );
                if rel.inferred.is_explicit() {
                    out[pos].inferred = Provenance::Explicit;
                }
            }
            None => {
                reps.push(out.len());
                out.push(rel);
            }
        }
    }
    out
}

pub struct TripleDeduplicator {
    llm: Arc<dyn TextGenerator>,
    embedder: Option<Arc<dyn Embedder>>,
    settings: PostProcessing,
    concurrency: usize,
}

impl TripleDeduplicator {
    pub fn new(
        llm: Arc<dyn TextGenerator>,
        embedder: Option<Arc<dyn Embedder>>,
        settings: PostProcessing,
        concurrency: usize,
    ) -> Self {
        Self {
            llm,
            embedder,
            settings,
            concurrency: concurrency.max(1),
        }
    }

    /// Runs every enabled tier in order.
    pub async fn deduplicate(&self, relationships: Vec<Relationship>) -> Vec<Relationship> {
        let before = relationships.len();
        let mut current = collapse_exact(relationships);

        if self.settings.llm_grouping {
            current = self.group_paraphrases(current).await;
        }
        if self.settings.semantic_dedup {
            current = self.prune_similar(current).await;
        }

        info!("Deduplication: {} -> {} relationships", before, current.len());
        current
    }

    /// Tier 2. Asks the model to merge paraphrased predicates of every pair
    /// with more than one triple, then re-applies tier 1.
    pub async fn group_paraphrases(&self, relationships: Vec<Relationship>) -> Vec<Relationship> {
        let groups: Vec<Vec<Relationship>> = pair_groups(&relationships)
            .into_iter()
            .map(|idx| idx.into_iter().map(|i| relationships[i].clone()).collect())
            .collect();

        let regrouped: Vec<Vec<Relationship>> = stream::iter(groups)
            .map(|group| async move {
                if group.len() < 2 {
                    group
                } else {
                    self.regroup(group).await
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        collapse_exact(regrouped.into_iter().flatten().collect())
    }

    async fn regroup(&self, group: Vec<Relationship>) -> Vec<Relationship> {
        let first = &group[0];
        let (system, user) = PromptBuilder::predicate_grouping(&first.subject, &first.object, &group);

        let response = match self.llm.generate_text(&system, &user).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    "Predicate grouping failed for ({}, {}): {}",
                    first.subject, first.object, e
                );
                return group;
            }
        };

        let cleaned = parse_object_array(&response);
        let mut out = Vec::new();
        for item in &cleaned {
            let Some(predicate) = string_field(item, &["predicate"]).map(|p| normalize_predicate(&p)) else {
                continue;
            };
            let inferred = string_field(item, &["inferred"])
                .and_then(|raw| Provenance::parse(&raw))
                .unwrap_or(Provenance::Explicit);

            // An echoed predicate keeps the member's provenance, explicit first.
            let existing = group
                .iter()
                .filter(|r| r.predicate == predicate)
                .max_by_key(|r| r.inferred.is_explicit());
            match existing {
                Some(existing) => out.push(existing.clone()),
                None => {
                    let mut synthetic = first.clone();
                    synthetic.predicate = predicate;
                    synthetic.inferred = inferred;
                    out.push(synthetic);
                }
            }
        }

        if out.is_empty() {
            debug!(
                "Empty grouping answer for ({}, {}), keeping {} triples",
                first.subject,
                first.object,
                group.len()
            );
            return group;
        }

        info!(
            "Predicate grouping ({} -> {}): {} -> {}",
            first.subject,
            first.object,
            group.len(),
            out.len()
        );
        out
    }

    /// Tier 3. Embedding cosine similarity when an embedder is present,
    /// character-bigram similarity otherwise.
    pub async fn prune_similar(&self, relationships: Vec<Relationship>) -> Vec<Relationship> {
        let threshold = self.settings.similarity_threshold;
        let Some(embedder) = &self.embedder else {
            return prune_by_similarity(relationships, threshold, bigram_similarity);
        };

        let mut predicates: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for group in pair_groups(&relationships).into_iter().filter(|g| g.len() > 1) {
            for i in group {
                let predicate = &relationships[i].predicate;
                if seen.insert(predicate.clone()) {
                    predicates.push(predicate.clone());
                }
            }
        }
        if predicates.is_empty() {
            return relationships;
        }

        let vectors = match embedder.embed_batch(&predicates).await {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!("Embedding predicates failed, skipping similarity pruning: {}", e);
                return relationships;
            }
        };
        let lookup: HashMap<&str, &[f32]> = predicates
            .iter()
            .map(String::as_str)
            .zip(vectors.iter().map(Vec::as_slice))
            .collect();

        prune_by_similarity(relationships, threshold, |a, b| {
            if a == b {
                return 1.0;
            }
            match (lookup.get(a), lookup.get(b)) {
                (Some(va), Some(vb)) => cosine_similarity(va, vb),
                _ => 0.0,
            }
        })
    }
}
