// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;
use std::{error, result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError, // will never be produced
    XmlDeserialization,
    XmlSerialization,
    MissingAttribute,
    MissingChild,
    ExpectedNumber,
    UnknownPrefix,
    UnknownInterface,
    UnknownRole,
    UnknownDirection,
    NotAModel,
    EmptyGroup,
    DuplicateUnit,
    DuplicateComponent,
    DuplicateVariable,
    DuplicateMetaId,
    StandardUnitRedefined,
    UnitNotFound,
    UnresolvedUnits,
    VariableNotFound,
    ComponentNotFound,
    BaseUnitImport,
    DoubleImport,
    NamesExhausted,
    DualInInterface,
    InitialValueOnInput,
    SecondParent,
    CyclicHierarchy,
    NamedEncapsulation,
    SecondConnection,
    CyclicConnection,
    IncompatibleInterfaces,
    HiddenComponents,
    SelfConnection,
    DirectImportCollision,
    ImportFailed,
    CyclicImport,
    BadHref,
    FetchFailed,
    Generic,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ErrorCode::*;
        let name = match self {
            NoError => "no_error",
            XmlDeserialization => "xml_deserialization",
            XmlSerialization => "xml_serialization",
            MissingAttribute => "missing_attribute",
            MissingChild => "missing_child",
            ExpectedNumber => "expected_number",
            UnknownPrefix => "unknown_prefix",
            UnknownInterface => "unknown_interface",
            UnknownRole => "unknown_role",
            UnknownDirection => "unknown_direction",
            NotAModel => "not_a_model",
            EmptyGroup => "empty_group",
            DuplicateUnit => "duplicate_unit",
            DuplicateComponent => "duplicate_component",
            DuplicateVariable => "duplicate_variable",
            DuplicateMetaId => "duplicate_meta_id",
            StandardUnitRedefined => "standard_unit_redefined",
            UnitNotFound => "unit_not_found",
            UnresolvedUnits => "unresolved_units",
            VariableNotFound => "variable_not_found",
            ComponentNotFound => "component_not_found",
            BaseUnitImport => "base_unit_import",
            DoubleImport => "double_import",
            NamesExhausted => "names_exhausted",
            DualInInterface => "dual_in_interface",
            InitialValueOnInput => "initial_value_on_input",
            SecondParent => "second_parent",
            CyclicHierarchy => "cyclic_hierarchy",
            NamedEncapsulation => "named_encapsulation",
            SecondConnection => "second_connection",
            CyclicConnection => "cyclic_connection",
            IncompatibleInterfaces => "incompatible_interfaces",
            HiddenComponents => "hidden_components",
            SelfConnection => "self_connection",
            DirectImportCollision => "direct_import_collision",
            ImportFailed => "import_failed",
            CyclicImport => "cyclic_import",
            BadHref => "bad_href",
            FetchFailed => "fetch_failed",
            Generic => "generic",
        };

        write!(f, "{name}")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// a required attribute or child is missing, or a literal is malformed
    Parse,
    /// duplicate names or identifiers, references to missing entities
    Consistency,
    /// violations of the interface and hierarchy invariants
    Logical,
    /// wraps whatever went wrong while processing one import statement
    Import,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub details: Option<String>,
    pub cause: Option<Box<Error>>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: ErrorCode, details: Option<String>) -> Self {
        Error {
            kind,
            code,
            details,
            cause: None,
        }
    }

    /// Wraps `cause` with the href of the import statement that triggered it.
    pub fn import(href: &str, cause: Error) -> Self {
        Error {
            kind: ErrorKind::Import,
            code: ErrorCode::ImportFailed,
            details: Some(href.to_owned()),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn get_details(&self) -> Option<String> {
        self.details.clone()
    }

    /// The innermost error of an import chain, or `self`.
    pub fn root_cause(&self) -> &Error {
        let mut err = self;
        while let Some(ref cause) = err.cause {
            err = cause;
        }
        err
    }

    /// The hrefs of every import statement on the way to the root cause,
    /// outermost first.
    pub fn import_chain(&self) -> Vec<&str> {
        let mut chain = vec![];
        let mut err = Some(self);
        while let Some(e) = err {
            if e.kind == ErrorKind::Import && e.code == ErrorCode::ImportFailed {
                if let Some(ref href) = e.details {
                    chain.push(href.as_str());
                }
            }
            err = e.cause.as_deref();
        }
        chain
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Parse => "ParseError",
            ErrorKind::Consistency => "ConsistencyError",
            ErrorKind::Logical => "LogicalError",
            ErrorKind::Import => "ImportError",
        };
        match self.details {
            Some(ref details) => write!(f, "{}{{{}: {}}}", kind, self.code, details),
            None => write!(f, "{}{{{}}}", kind, self.code),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn error::Error + 'static))
    }
}

pub type Result<T> = result::Result<T, Error>;

#[macro_export]
macro_rules! parse_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Parse, ErrorCode::$code, Some($str)))
    }}
);

#[macro_export]
macro_rules! consistency_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Consistency, ErrorCode::$code, Some($str)))
    }}
);

#[macro_export]
macro_rules! logical_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Logical, ErrorCode::$code, Some($str)))
    }}
);

#[macro_export]
macro_rules! import_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Import, ErrorCode::$code, Some($str)))
    }}
);

#[test]
fn test_error_display() {
    let err = Error::new(
        ErrorKind::Consistency,
        ErrorCode::UnitNotFound,
        Some("millivolt".to_owned()),
    );
    assert_eq!("ConsistencyError{unit_not_found: millivolt}", err.to_string());

    let bare = Error::new(ErrorKind::Logical, ErrorCode::SecondParent, None);
    assert_eq!("LogicalError{second_parent}", bare.to_string());
}

#[test]
fn test_import_chain() {
    use std::error::Error as _;

    let inner = Error::new(
        ErrorKind::Consistency,
        ErrorCode::ComponentNotFound,
        Some("membrane".to_owned()),
    );
    let err = Error::import("outer.cellml", Error::import("inner.cellml", inner.clone()));

    assert_eq!(ErrorKind::Import, err.kind);
    assert_eq!(vec!["outer.cellml", "inner.cellml"], err.import_chain());
    assert_eq!(&inner, err.root_cause());
    assert!(err.source().is_some());
    assert!(inner.source().is_none());
}

#[test]
fn test_macros() {
    fn fails() -> Result<()> {
        logical_err!(DualInInterface, "v".to_owned())
    }
    let err = fails().unwrap_err();
    assert_eq!(ErrorKind::Logical, err.kind);
    assert_eq!(ErrorCode::DualInInterface, err.code);
}
