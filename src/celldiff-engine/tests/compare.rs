// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fs;
use std::path::PathBuf;

use celldiff_engine::{Concept, DiffOp, MatchOptions, Model, annotate, compare};

fn read(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../test/models")
        .join(name);
    fs::read_to_string(path).unwrap()
}

fn load(name: &str) -> Model {
    Model::parse_str(&read(name)).unwrap()
}

#[test]
fn identical_models_have_no_operations() {
    let a = load("compare/stupid.cellml");
    let b = load("compare/stupid.cellml");
    let comparison = compare(&a, &b, &MatchOptions::default());

    assert!(comparison.operations.is_empty(), "{:?}", comparison.operations);
    let doc = a.document();
    assert_eq!(doc.descendants(doc.root()).len(), comparison.connections.len());
    for (x, y) in comparison.connections.iter() {
        assert_eq!(doc.path(x), b.document().path(y));
    }
}

#[test]
fn renamed_component_is_a_single_update() {
    let a = load("compare/stupid.cellml");
    let b = load("compare/nonstupid.cellml");
    let comparison = compare(&a, &b, &MatchOptions::default());

    assert_eq!(
        vec![DiffOp::Update {
            old_path: "/model[1]/component[1]".to_owned(),
            new_path: "/model[1]/component[1]".to_owned(),
            attributes: vec!["name".to_owned()],
            text: false,
        }],
        comparison.operations
    );

    let old = a.component(a.component_named("myStupidComponent").unwrap());
    let new = b.component(b.component_named("myNonStupidComponent").unwrap());
    assert_eq!(Some(new.node), comparison.connections.for_a(old.node));
    for (var, other) in old.variables.iter().zip(new.variables.iter()) {
        assert_eq!(
            Some(b.variable(*other).node),
            comparison.connections.for_a(a.variable(*var).node)
        );
    }

    let concepts = annotate(&comparison.operations[0]);
    assert!(concepts.contains(&Concept::ComponentDefinition));
}

#[test]
fn deleted_reaction_is_a_single_delete() {
    let a = load("compare/reaction.cellml");

    let mut doc = a.document().clone();
    let kinetics = a.component(a.component_named("kinetics").unwrap());
    let reaction = a.reaction(kinetics.reactions[0]).node;
    doc.detach(reaction);
    let b = Model::parse_str(&doc.to_xml().unwrap()).unwrap();

    let comparison = compare(&a, &b, &MatchOptions::default());
    assert_eq!(
        vec![DiffOp::Delete {
            path: "/model[1]/component[1]/reaction[1]".to_owned(),
            tag: "reaction".to_owned(),
        }],
        comparison.operations
    );

    // participants are still matched and untouched
    let other = b.component(b.component_named("kinetics").unwrap());
    for name in ["A", "B"] {
        let x = a.variable(a.variable_named(a.component_named("kinetics").unwrap(), name).unwrap());
        let y = b.variable(b.variable_named(b.component_named("kinetics").unwrap(), name).unwrap());
        assert_eq!(Some(y.node), comparison.connections.for_a(x.node));
    }
    assert!(other.reactions.is_empty());

    let concepts = annotate(&comparison.operations[0]);
    assert!(concepts.contains(&Concept::ReactionNetwork));
}

#[test]
fn changed_role_unpairs_reaction() {
    let a = load("compare/reaction.cellml");
    let changed = read("compare/reaction.cellml").replace(
        r#"<role role="product" stoichiometry="1"/>"#,
        r#"<role role="reactant" stoichiometry="1"/>"#,
    );
    let b = Model::parse_str(&changed).unwrap();
    let kinetics = a.component(a.component_named("kinetics").unwrap());
    let reaction_a = a.reaction(kinetics.reactions[0]).node;

    let comparison = compare(&a, &b, &MatchOptions::default());
    assert_eq!(None, comparison.connections.for_a(reaction_a));
    let ops = &comparison.operations;
    assert!(ops.iter().any(|op| matches!(op, DiffOp::Delete { tag, .. } if tag == "reaction")));
    assert!(ops.iter().any(|op| matches!(op, DiffOp::Insert { tag, .. } if tag == "reaction")));

    let options = MatchOptions {
        validate_topology: false,
        ..Default::default()
    };
    let comparison = compare(&a, &b, &options);
    assert!(comparison.connections.for_a(reaction_a).is_some());
}
