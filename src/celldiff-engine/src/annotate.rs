// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Tags diff operations with the modelling concepts they touch.

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::diff::DiffOp;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Concept {
    ModelName,
    EntityIdentifier,
    VariableDefinition,
    MathematicalModel,
    ComponentDefinition,
    UnitDefinition,
    ModelAnnotation,
    VariableConnections,
    ComponentHierarchy,
    Imports,
    ReactionNetwork,
}

lazy_static! {
    static ref PATTERNS: Vec<(Regex, Concept)> = {
        let table = [
            (r"^/model\[\d+\]/component\[\d+\]/variable\[\d+\]", Concept::VariableDefinition),
            (
                r"^/model\[\d+\]/component\[\d+\]/(reaction\[\d+\]/.*)?math\[\d+\]",
                Concept::MathematicalModel,
            ),
            (r"^/model\[\d+\]/component\[\d+\]$", Concept::ComponentDefinition),
            (r"^/model\[\d+\]/(component\[\d+\]/)?units\[\d+\]", Concept::UnitDefinition),
            (r"/RDF\[\d+\]", Concept::ModelAnnotation),
            (r"^/model\[\d+\]/connection\[\d+\]", Concept::VariableConnections),
            (r"^/model\[\d+\]/group\[\d+\]", Concept::ComponentHierarchy),
            (r"^/model\[\d+\]/import\[\d+\]", Concept::Imports),
            (r"^/model\[\d+\]/component\[\d+\]/reaction\[\d+\]", Concept::ReactionNetwork),
        ];
        table
            .into_iter()
            .map(|(pattern, concept)| (Regex::new(pattern).unwrap(), concept))
            .collect()
    };
    static ref MODEL_ROOT: Regex = Regex::new(r"^/model\[\d+\]$").unwrap();
}

/// Concepts a path falls under.
pub fn classify(path: &str) -> BTreeSet<Concept> {
    PATTERNS
        .iter()
        .filter(|(re, _)| re.is_match(path))
        .map(|(_, concept)| *concept)
        .collect()
}

pub fn annotate(op: &DiffOp) -> BTreeSet<Concept> {
    let mut concepts: BTreeSet<Concept> = op.paths().into_iter().flat_map(classify).collect();

    if let DiffOp::Update {
        old_path,
        attributes,
        ..
    } = op
    {
        if MODEL_ROOT.is_match(old_path) && attributes.iter().any(|attr| attr == "name") {
            concepts.insert(Concept::ModelName);
        }
        if attributes.iter().any(|attr| attr == "id" || attr.ends_with(":id")) {
            concepts.insert(Concept::EntityIdentifier);
        }
    }
    concepts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_paths() {
        let variable = classify("/model[1]/component[2]/variable[3]");
        assert_eq!(BTreeSet::from([Concept::VariableDefinition]), variable);

        assert_eq!(
            BTreeSet::from([Concept::ComponentDefinition]),
            classify("/model[1]/component[2]")
        );
        assert_eq!(
            BTreeSet::from([Concept::MathematicalModel]),
            classify("/model[1]/component[1]/math[1]/apply[1]/ci[2]")
        );
        assert_eq!(
            BTreeSet::from([Concept::MathematicalModel, Concept::ReactionNetwork]),
            classify("/model[1]/component[1]/reaction[1]/variable_ref[1]/role[1]/math[1]")
        );
        assert_eq!(
            BTreeSet::from([Concept::UnitDefinition]),
            classify("/model[1]/units[4]/unit[1]")
        );
        assert_eq!(
            BTreeSet::from([Concept::UnitDefinition]),
            classify("/model[1]/component[1]/units[1]")
        );
        assert_eq!(
            BTreeSet::from([Concept::ModelAnnotation]),
            classify("/model[1]/RDF[1]/Description[2]")
        );
        assert!(classify("/model[1]/something[1]").is_empty());
    }

    #[test]
    fn test_annotate_updates() {
        let op = DiffOp::Update {
            old_path: "/model[1]".to_owned(),
            new_path: "/model[1]".to_owned(),
            attributes: vec!["cmeta:id".to_owned(), "name".to_owned()],
            text: false,
        };
        assert_eq!(
            BTreeSet::from([Concept::ModelName, Concept::EntityIdentifier]),
            annotate(&op)
        );

        let op = DiffOp::Move {
            old_path: "/model[1]/connection[1]".to_owned(),
            new_path: "/model[1]/group[1]".to_owned(),
            permutation: false,
        };
        assert_eq!(
            BTreeSet::from([Concept::VariableConnections, Concept::ComponentHierarchy]),
            annotate(&op)
        );
    }
}
