use std::collections::HashSet;
use tracing::{debug, info};

use crate::config::RelationSettings;
use crate::core::extractor::RelationshipExtractor;
use crate::core::model::{Entity, Provenance, Relationship};

/// Bounded multi-round knowledge-graph completion.
pub struct GraphCompletion<'a> {
    extractor: &'a RelationshipExtractor,
    rounds: usize,
    stop_on_empty_round: bool,
}

impl<'a> GraphCompletion<'a> {
    pub fn new(extractor: &'a RelationshipExtractor, settings: &RelationSettings) -> Self {
        Self {
            extractor,
            rounds: settings.kgc_rounds,
            stop_on_empty_round: settings.stop_on_empty_round,
        }
    }

    /// Each round sees everything accumulated so far and may only add
    /// triples with new keys.
    pub async fn run(&self, text: &str, entities: &[Entity], relationships: Vec<Relationship>) -> Vec<Relationship> {
        let mut current = relationships;
        let mut keys: HashSet<_> = current.iter().map(Relationship::key).collect();

        for round in 1..=self.rounds {
            let proposed = self.extractor.complete(text, entities, &current).await;
            let proposed_count = proposed.len();

            let mut added = 0;
            for mut rel in proposed {
                if keys.insert(rel.key()) {
                    rel.inferred = Provenance::Implicit;
                    current.push(rel);
                    added += 1;
                }
            }

            info!(
                "Completion round {}/{}: {} proposed, {} new",
                round, self.rounds, proposed_count, added
            );

            if added == 0 && self.stop_on_empty_round {
                debug!("No new relationships, stopping completion early");
                break;
            }
        }

        current
    }
}
