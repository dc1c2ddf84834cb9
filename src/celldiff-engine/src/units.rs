// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::{BTreeMap, HashMap};

use url::Url;

use celldiff_core::common::Result;
use celldiff_core::{consistency_err, parse_err};

use crate::meta::meta_id_attr;
use crate::model::{ComponentId, SourceId};
use crate::xml::{Document, NodeId};

/// Built-in units; they can be referenced everywhere and redefined nowhere.
pub const STANDARD_UNITS: &[&str] = &[
    "ampere",
    "farad",
    "katal",
    "lux",
    "pascal",
    "tesla",
    "becquerel",
    "gram",
    "kelvin",
    "meter",
    "radian",
    "volt",
    "candela",
    "gray",
    "kilogram",
    "metre",
    "second",
    "watt",
    "celsius",
    "henry",
    "liter",
    "mole",
    "siemens",
    "weber",
    "coulomb",
    "hertz",
    "litre",
    "newton",
    "sievert",
    "dimensionless",
    "joule",
    "lumen",
    "ohm",
    "steradian",
];

const PREFIXES: &[(&str, i32)] = &[
    ("yotta", 24),
    ("zetta", 21),
    ("exa", 18),
    ("peta", 15),
    ("tera", 12),
    ("giga", 9),
    ("mega", 6),
    ("kilo", 3),
    ("hecto", 2),
    ("deka", 1),
    ("deci", -1),
    ("centi", -2),
    ("milli", -3),
    ("micro", -6),
    ("nano", -9),
    ("pico", -12),
    ("femto", -15),
    ("atto", -18),
    ("zepto", -21),
    ("yocto", -24),
];

pub fn standard_unit(name: &str) -> Option<&'static str> {
    STANDARD_UNITS.iter().copied().find(|unit| *unit == name)
}

/// Power of ten for a prefix given either as an integer or as an SI name.
pub fn parse_prefix(prefix: &str) -> Option<i32> {
    let prefix = prefix.trim();
    if let Ok(n) = prefix.parse::<i32>() {
        return Some(n);
    }
    PREFIXES
        .iter()
        .find(|(name, _)| *name == prefix)
        .map(|(_, power)| *power)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnitRef {
    Standard(&'static str),
    User(UnitId),
}

/// One `<unit>` term of a user unit definition.
#[derive(Clone, Debug, PartialEq)]
pub struct BaseQuantity {
    pub unit: UnitRef,
    pub node: NodeId,
    pub multiplier: f64,
    pub prefix: i32,
    pub offset: f64,
    pub exponent: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Unit {
    pub name: String,
    /// scope currently holding the unit
    pub source: SourceId,
    /// location of the document that defined it
    pub origin: Url,
    pub node: NodeId,
    /// owning component for component-local units
    pub component: Option<ComponentId>,
    pub base_units: bool,
    pub terms: Vec<BaseQuantity>,
    pub meta_id: Option<String>,
}

impl Unit {
    /// User units referenced by the definition's terms.
    pub fn dependencies(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.terms.iter().filter_map(|term| match term.unit {
            UnitRef::User(id) => Some(id),
            UnitRef::Standard(_) => None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Entry {
    unit: UnitId,
    origin: Url,
}

/// Outcome of a successful [`UnitDictionary::define`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Defined {
    Added,
    /// an import of a unit already defined from the same document
    AlreadyPresent(UnitId),
}

/// Name resolution for the units of one document.
#[derive(Clone, Debug, Default)]
pub struct UnitDictionary {
    global: BTreeMap<String, Entry>,
    local: HashMap<ComponentId, BTreeMap<String, Entry>>,
}

impl UnitDictionary {
    /// Component-local units shadow global ones, which shadow the standard
    /// table.
    pub fn resolve(&self, name: &str, component: Option<ComponentId>) -> Option<UnitRef> {
        if let Some(component) = component {
            if let Some(entry) = self.local.get(&component).and_then(|m| m.get(name)) {
                return Some(UnitRef::User(entry.unit));
            }
        }
        if let Some(entry) = self.global.get(name) {
            return Some(UnitRef::User(entry.unit));
        }
        standard_unit(name).map(UnitRef::Standard)
    }

    pub fn define(
        &mut self,
        component: Option<ComponentId>,
        name: &str,
        unit: UnitId,
        origin: &Url,
        is_import: bool,
    ) -> Result<Defined> {
        if standard_unit(name).is_some() {
            return consistency_err!(
                StandardUnitRedefined,
                format!("'{name}' is a standard unit and cannot be redefined")
            );
        }

        let scope = match component {
            Some(component) => self.local.entry(component).or_default(),
            None => &mut self.global,
        };

        if let Some(existing) = scope.get(name) {
            if is_import && existing.origin == *origin {
                return Ok(Defined::AlreadyPresent(existing.unit));
            }
            return consistency_err!(
                DuplicateUnit,
                format!("unit '{name}' is defined twice ({} and {origin})", existing.origin)
            );
        }

        scope.insert(
            name.to_owned(),
            Entry {
                unit,
                origin: origin.clone(),
            },
        );
        Ok(Defined::Added)
    }

    pub fn global(&self, name: &str) -> Option<UnitId> {
        self.global.get(name).map(|entry| entry.unit)
    }

    /// The global unit named `name` together with the document it came from.
    pub fn global_with_origin(&self, name: &str) -> Option<(UnitId, &Url)> {
        self.global
            .get(name)
            .map(|entry| (entry.unit, &entry.origin))
    }

    pub fn global_units(&self) -> impl Iterator<Item = (&str, UnitId)> {
        self.global
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.unit))
    }

    pub fn local_units(&self, component: ComponentId) -> Vec<(&str, UnitId)> {
        match self.local.get(&component) {
            Some(units) => units
                .iter()
                .map(|(name, entry)| (name.as_str(), entry.unit))
                .collect(),
            None => vec![],
        }
    }

    /// Moves the local units of `component` over from another dictionary.
    pub(crate) fn adopt_local(&mut self, other: &mut UnitDictionary, component: ComponentId) {
        if let Some(units) = other.local.remove(&component) {
            self.local.insert(component, units);
        }
    }

    /// Registers a global unit under a name already checked to be free.
    pub(crate) fn insert_global(&mut self, name: &str, unit: UnitId, origin: &Url) {
        self.global.insert(
            name.to_owned(),
            Entry {
                unit,
                origin: origin.clone(),
            },
        );
    }

    pub(crate) fn remove_global(&mut self, name: &str) {
        self.global.remove(name);
    }
}

/// Reads a `<units>` element.  Terms referencing units that are not (yet)
/// in `dict` fail with `UnitNotFound` so the caller can retry them in a
/// later round.
pub(crate) fn read_unit(
    doc: &Document,
    node: NodeId,
    dict: &UnitDictionary,
    component: Option<ComponentId>,
    source: SourceId,
    origin: &Url,
) -> Result<Unit> {
    let name = doc.required_attr(node, "name")?.to_owned();
    let base_units = doc.attr(node, "base_units") == Some("yes");

    let mut terms = vec![];
    if !base_units {
        for term in doc.children_named(node, "unit") {
            let reference = doc.required_attr(term, "units")?;
            let unit = match dict.resolve(reference, component) {
                Some(unit) => unit,
                None => {
                    return consistency_err!(
                        UnitNotFound,
                        format!("unit '{reference}' used by '{name}' is not defined")
                    );
                }
            };
            let prefix = match doc.attr(term, "prefix") {
                None => 0,
                Some(prefix) => match parse_prefix(prefix) {
                    Some(power) => power,
                    None => {
                        return parse_err!(
                            UnknownPrefix,
                            format!("{}: unknown prefix '{}'", doc.path(term), prefix)
                        );
                    }
                },
            };
            terms.push(BaseQuantity {
                unit,
                node: term,
                multiplier: doc.number_attr(term, "multiplier")?.unwrap_or(1.0),
                prefix,
                offset: doc.number_attr(term, "offset")?.unwrap_or(0.0),
                exponent: doc.number_attr(term, "exponent")?.unwrap_or(1.0),
            });
        }
    }

    Ok(Unit {
        name,
        source,
        origin: origin.clone(),
        node,
        component,
        base_units,
        terms,
        meta_id: meta_id_attr(doc, node).map(str::to_owned),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use celldiff_core::ErrorCode;

    fn loc(name: &str) -> Url {
        Url::parse(&format!("file:///models/{name}")).unwrap()
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(Some(-3), parse_prefix("milli"));
        assert_eq!(Some(24), parse_prefix("yotta"));
        assert_eq!(Some(-7), parse_prefix("-7"));
        assert_eq!(None, parse_prefix("kibi"));
    }

    #[test]
    fn test_resolution_order() {
        let mut dict = UnitDictionary::default();
        let origin = loc("a.cellml");
        let comp = ComponentId(0);
        dict.define(None, "mV", UnitId(0), &origin, false).unwrap();
        dict.define(Some(comp), "mV", UnitId(1), &origin, false).unwrap();

        assert_eq!(Some(UnitRef::User(UnitId(1))), dict.resolve("mV", Some(comp)));
        assert_eq!(Some(UnitRef::User(UnitId(0))), dict.resolve("mV", None));
        assert_eq!(
            Some(UnitRef::User(UnitId(0))),
            dict.resolve("mV", Some(ComponentId(7)))
        );
        assert_eq!(Some(UnitRef::Standard("second")), dict.resolve("second", None));
        assert_eq!(None, dict.resolve("furlong", None));
    }

    #[test]
    fn test_standard_units_are_reserved() {
        let mut dict = UnitDictionary::default();
        let err = dict
            .define(None, "volt", UnitId(0), &loc("a.cellml"), false)
            .unwrap_err();
        assert_eq!(ErrorCode::StandardUnitRedefined, err.code);
    }

    #[test]
    fn test_conflicts() {
        let mut dict = UnitDictionary::default();
        let a = loc("a.cellml");
        let b = loc("b.cellml");
        dict.define(None, "mM", UnitId(0), &a, true).unwrap();

        // importing the same unit from the same document again is fine
        assert_eq!(
            Defined::AlreadyPresent(UnitId(0)),
            dict.define(None, "mM", UnitId(3), &a, true).unwrap()
        );
        // but not from somewhere else
        let err = dict.define(None, "mM", UnitId(4), &b, true).unwrap_err();
        assert_eq!(ErrorCode::DuplicateUnit, err.code);
        // and native definitions never collide silently
        assert!(dict.define(None, "mM", UnitId(5), &a, false).is_err());
    }

    #[test]
    fn test_read_unit() {
        let doc = Document::parse(
            r#"<units name="per_mV_ms">
                 <unit units="volt" prefix="milli" exponent="-1"/>
                 <unit units="second" prefix="-3" exponent="-1" multiplier="2.5"/>
               </units>"#,
        )
        .unwrap();
        let dict = UnitDictionary::default();
        let unit = read_unit(&doc, doc.root(), &dict, None, SourceId(0), &loc("a")).unwrap();
        assert_eq!("per_mV_ms", unit.name);
        assert_eq!(2, unit.terms.len());
        assert_eq!(UnitRef::Standard("volt"), unit.terms[0].unit);
        assert_eq!(-3, unit.terms[0].prefix);
        assert_eq!(-1.0, unit.terms[0].exponent);
        assert_eq!(2.5, unit.terms[1].multiplier);
        assert_eq!(0.0, unit.terms[1].offset);
    }

    #[test]
    fn test_read_unit_errors() {
        let dict = UnitDictionary::default();
        let missing = Document::parse(r#"<units name="u"><unit units="mV"/></units>"#).unwrap();
        let err =
            read_unit(&missing, missing.root(), &dict, None, SourceId(0), &loc("a")).unwrap_err();
        assert_eq!(ErrorCode::UnitNotFound, err.code);

        let prefix =
            Document::parse(r#"<units name="u"><unit units="volt" prefix="kibi"/></units>"#)
                .unwrap();
        let err =
            read_unit(&prefix, prefix.root(), &dict, None, SourceId(0), &loc("a")).unwrap_err();
        assert_eq!(ErrorCode::UnknownPrefix, err.code);

        let base = Document::parse(r#"<units name="u" base_units="yes"/>"#).unwrap();
        let unit = read_unit(&base, base.root(), &dict, None, SourceId(0), &loc("a")).unwrap();
        assert!(unit.base_units);
        assert!(unit.terms.is_empty());
    }
}
