use std::collections::HashMap;
use tracing::{debug, info};

use crate::core::dedup::collapse_exact;
use crate::core::extractor::backfill;
use crate::core::model::{DocumentGraph, Entity};

/// A window of the input; `offset` counts characters from the start of the
/// document.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub offset: usize,
}

/// Character windows of `size` overlapping by `overlap`. Never splits a
/// UTF-8 sequence.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    if size == 0 || chars.len() <= size {
        return vec![Chunk {
            text: text.to_string(),
            offset: 0,
        }];
    }

    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(Chunk {
            text: chars[start..end].iter().collect(),
            offset: start,
        });
        if end == chars.len() {
            break;
        }
        start += step;
    }

    debug!("Split {} characters into {} chunks", chars.len(), chunks.len());
    chunks
}

fn merge_key(entity: &Entity) -> String {
    match entity.wikipedia_url() {
        Some(url) => format!("url:{}", url),
        None => format!("name:{}", entity.name),
    }
}

/// Folds per-chunk graphs into one. Entities collapse on canonical
/// Wikipedia URL or name with the first occurrence kept. A chunk's
/// relationships pointing at one of its collapsed entities are renamed to the
/// survivor before joining the document, then merged by key with explicit
/// precedence.
pub fn merge_chunk_graphs(graphs: Vec<DocumentGraph>) -> DocumentGraph {
    let mut entities: Vec<Entity> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();
    let mut relationships = Vec::new();

    for graph in graphs {
        // Aliases only hold inside the chunk that produced them.
        let mut aliases: HashMap<String, String> = HashMap::new();
        for entity in graph.entities {
            let existing = by_key
                .get(&merge_key(&entity))
                .or_else(|| by_name.get(&entity.name))
                .copied();
            match existing {
                Some(pos) => {
                    let survivor = &entities[pos].name;
                    if survivor != &entity.name {
                        aliases.insert(entity.name.clone(), survivor.clone());
                    }
                }
                None => {
                    by_key.insert(merge_key(&entity), entities.len());
                    by_name.insert(entity.name.clone(), entities.len());
                    entities.push(entity);
                }
            }
        }

        for mut rel in graph.relationships {
            if let Some(name) = aliases.get(&rel.subject) {
                debug!("Renaming subject '{}' to '{}'", rel.subject, name);
                rel.subject = name.clone();
            }
            if let Some(name) = aliases.get(&rel.object) {
                rel.object = name.clone();
            }
            relationships.push(rel);
        }
    }

    let relationships = backfill(collapse_exact(relationships), &entities);
    info!(
        "Merged chunks into {} entities and {} relationships",
        entities.len(),
        relationships.len()
    );

    DocumentGraph {
        entities,
        relationships,
    }
}
