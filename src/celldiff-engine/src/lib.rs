// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

#![forbid(unsafe_code)]

pub mod annotate;
pub mod connection;
pub mod connector;
pub mod diff;
mod flatten;
pub mod hierarchy;
pub mod import;
pub mod matching;
pub mod meta;
pub mod model;
pub mod reaction;
pub mod units;
pub mod variable;
pub mod xml;

pub use self::annotate::{Concept, annotate};
pub use self::connector::{Comparison, MatchOptions, compare, connect_models};
pub use self::diff::{DiffOp, diff};
pub use self::import::{FileResolver, MemoryResolver, Resolver};
pub use self::matching::ConnectionMap;
pub use self::meta::EntityRef;
pub use self::model::{Component, ComponentId, Model, ROOT, SourceId};
pub use self::xml::{Document, NodeId};
