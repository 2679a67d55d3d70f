use std::collections::HashSet;

use crate::core::model::{ExtractionResult, Provenance};
use crate::error::Result;

/// Shapes an [`ExtractionResult`] can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Full result including id, timestamp and timing.
    #[default]
    Json,
    /// Only `{entities, relationships}`.
    Graph,
    /// One `subject -[predicate]-> object` line per relationship.
    Lines,
}

pub struct ResultSerializer;

impl ResultSerializer {
    pub fn serialize(result: &ExtractionResult, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
            OutputFormat::Graph => Ok(serde_json::to_string_pretty(&result.graph)?),
            OutputFormat::Lines => Ok(Self::serialize_lines(result)),
        }
    }

    fn serialize_lines(result: &ExtractionResult) -> String {
        let mut out = String::new();
        for rel in result.relationships() {
            let marker = match rel.inferred {
                Provenance::Explicit => "",
                Provenance::Implicit => " (implicit)",
            };
            out.push_str(&format!(
                "{} -[{}]-> {}{}\n",
                rel.subject, rel.predicate, rel.object, marker
            ));
        }
        out
    }
}

/// Structural problems in a result. An empty list means the graph is
/// consistent: every relationship endpoint names an entity, no triple
/// repeats, and no name or predicate is blank.
pub fn validate_result(result: &ExtractionResult) -> Vec<String> {
    let mut issues = Vec::new();

    let mut names = HashSet::new();
    for (i, entity) in result.entities().iter().enumerate() {
        if entity.name.trim().is_empty() {
            issues.push(format!("Entity {}: Empty name", i));
        } else if !names.insert(entity.name.as_str()) {
            issues.push(format!("Entity {}: Duplicate name '{}'", i, entity.name));
        }
    }

    let mut seen = HashSet::new();
    for (i, rel) in result.relationships().iter().enumerate() {
        if rel.predicate.trim().is_empty() {
            issues.push(format!("Relationship {}: Empty predicate", i));
        }
        if !names.contains(rel.subject.as_str()) {
            issues.push(format!("Relationship {}: Unknown subject '{}'", i, rel.subject));
        }
        if !names.contains(rel.object.as_str()) {
            issues.push(format!("Relationship {}: Unknown object '{}'", i, rel.object));
        }
        if !seen.insert(rel.key()) {
            issues.push(format!(
                "Relationship {}: Duplicate triple ({}, {}, {})",
                i, rel.subject, rel.predicate, rel.object
            ));
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{DocumentGraph, Entity, Relationship};

    fn sample() -> ExtractionResult {
        ExtractionResult::new(
            DocumentGraph {
                entities: vec![
                    Entity::new("Apple", "Company", Provenance::Explicit),
                    Entity::new("Microsoft", "Company", Provenance::Explicit),
                ],
                relationships: vec![Relationship::new(
                    "Apple",
                    "competes with",
                    "Microsoft",
                    Provenance::Implicit,
                )],
            },
            0.5,
        )
    }

    #[test]
    fn test_validate_consistent_result() {
        assert!(validate_result(&sample()).is_empty());
    }

    #[test]
    fn test_validate_reports_dangling_and_duplicate() {
        let mut result = sample();
        let rel = result.graph.relationships[0].clone();
        result.graph.relationships.push(rel);
        result
            .graph
            .relationships
            .push(Relationship::new("Apple", "acquired", "NeXT", Provenance::Explicit));

        let issues = validate_result(&result);
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("Duplicate triple"));
        assert!(issues[1].contains("Unknown object 'NeXT'"));
    }

    #[test]
    fn test_serialize_graph_omits_metadata() {
        let text = ResultSerializer::serialize(&sample(), OutputFormat::Graph).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["relationships"][0]["inferred"], "implicit");
        assert_eq!(value["entities"][0]["type"], "Company");
    }

    #[test]
    fn test_serialize_json_and_lines() {
        let result = sample();
        let json = ResultSerializer::serialize(&result, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["id"], result.id.as_str());
        assert_eq!(value["entities"].as_array().unwrap().len(), 2);

        let lines = ResultSerializer::serialize(&result, OutputFormat::Lines).unwrap();
        assert_eq!(lines, "Apple -[competes with]-> Microsoft (implicit)\n");
    }
}
