// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! First-free-name search used whenever merging documents forces a
//! rename: units, components and meta identifiers all go through
//! [`disambiguate`] so the suffix scheme is identical everywhere.

use crate::common::Result;
use crate::consistency_err;

pub const IMPORT_SUFFIX: &str = "_imported";

const ALPHABET: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// What the caller's collision predicate knows about a candidate name.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    /// nothing uses the name
    Free,
    /// the name is used by something equivalent to what is being placed
    Reusable,
    /// the name is used by something else
    Taken,
}

/// Candidate names in the order they are tried: `name_imported`, then
/// `name_imported_A` through `name_imported_Z`, then two-letter suffixes.
pub fn candidates(name: &str) -> impl Iterator<Item = String> + '_ {
    let base = format!("{name}{IMPORT_SUFFIX}");
    let single = ALPHABET.iter().map(|c| vec![*c]);
    let double = ALPHABET
        .iter()
        .flat_map(|a| ALPHABET.iter().map(move |b| vec![*a, *b]));
    std::iter::once(String::new())
        .chain(single.chain(double).map(|suffix| {
            // ALPHABET is ASCII
            format!("_{}", String::from_utf8_lossy(&suffix))
        }))
        .map(move |suffix| format!("{base}{suffix}"))
}

/// Returns the first candidate for `name` that `slot_of` reports as not
/// [`Slot::Taken`], together with what `slot_of` said about it.
pub fn disambiguate<F>(name: &str, mut slot_of: F) -> Result<(String, Slot)>
where
    F: FnMut(&str) -> Slot,
{
    for candidate in candidates(name) {
        match slot_of(&candidate) {
            Slot::Taken => continue,
            slot => return Ok((candidate, slot)),
        }
    }

    consistency_err!(
        NamesExhausted,
        format!("no free name left for '{name}'")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorCode;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_first_candidate() {
        let (name, slot) = disambiguate("U", |_| Slot::Free).unwrap();
        assert_eq!("U_imported", name);
        assert_eq!(Slot::Free, slot);
    }

    #[test]
    fn test_skips_taken() {
        let taken: HashSet<&str> = ["U_imported", "U_imported_A"].into_iter().collect();
        let (name, _) = disambiguate("U", |n| {
            if taken.contains(n) {
                Slot::Taken
            } else {
                Slot::Free
            }
        })
        .unwrap();
        assert_eq!("U_imported_B", name);
    }

    #[test]
    fn test_reusable_stops_search() {
        let (name, slot) = disambiguate("mV", |n| {
            if n == "mV_imported" {
                Slot::Reusable
            } else {
                Slot::Free
            }
        })
        .unwrap();
        assert_eq!("mV_imported", name);
        assert_eq!(Slot::Reusable, slot);
    }

    #[test]
    fn test_two_letter_suffix() {
        let all: Vec<String> = candidates("c").collect();
        assert_eq!(1 + 26 + 26 * 26, all.len());
        assert_eq!("c_imported_Z", all[26]);
        assert_eq!("c_imported_AA", all[27]);
        assert_eq!("c_imported_ZZ", all[all.len() - 1]);
    }

    #[test]
    fn test_exhaustion_is_fatal() {
        let err = disambiguate("x", |_| Slot::Taken).unwrap_err();
        assert_eq!(ErrorCode::NamesExhausted, err.code);
    }

    proptest! {
        #[test]
        fn prop_result_is_never_taken(name in "[a-z]{1,8}", taken in 0usize..40) {
            let blocked: HashSet<String> = candidates(&name).take(taken).collect();
            let (chosen, _) = disambiguate(&name, |n| {
                if blocked.contains(n) { Slot::Taken } else { Slot::Free }
            }).unwrap();
            prop_assert!(!blocked.contains(&chosen));
            prop_assert!(chosen.starts_with(&name));
            prop_assert_eq!(candidates(&name).nth(taken).unwrap(), chosen);
        }

        #[test]
        fn prop_candidates_are_distinct(name in "[a-zA-Z_]{1,6}") {
            let all: Vec<String> = candidates(&name).collect();
            let unique: HashSet<&String> = all.iter().collect();
            prop_assert_eq!(all.len(), unique.len());
        }
    }
}
