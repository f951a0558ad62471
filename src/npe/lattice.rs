use serde::{Deserialize, Serialize};

use crate::ir::Location;

/// Abstract nullness of one frame slot.
///
/// The `checked` flags record that a value was previously compared against
/// null on the current path; the kaboom witness records the program point
/// where dereferencing the value would already have crashed had it been
/// null. Both only affect finding priority, never soundness.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub(crate) struct IsNullValue {
    kind: Kind,
    on_exception_path: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
enum Kind {
    /// Definitely null on every path reaching this point.
    Null { checked: bool },
    /// Definitely not null.
    NonNull { checked: bool },
    /// Not null because a dereference at the recorded location would have
    /// thrown already.
    NoKaboomNonNull { deref_location: Location },
    /// Assumed not null; never report even if later shown null.
    NonReportingNonNull,
    /// Null on at least one path into this point.
    NullOnSomePath {
        checked: bool,
        kaboom: Option<Location>,
    },
    /// A method parameter declared as possibly null.
    ParameterNullable { param: u16 },
    /// Null only on a complex path (post-control-split or recoverable
    /// exception handler); tracked but not reported.
    NullOnComplexPath,
}

impl IsNullValue {
    pub(crate) fn null() -> Self {
        Kind::Null { checked: false }.into()
    }

    /// Definitely-null value produced by a path-sensitive branch refinement.
    pub(crate) fn checked_null() -> Self {
        Kind::Null { checked: true }.into()
    }

    pub(crate) fn non_null() -> Self {
        Kind::NonNull { checked: false }.into()
    }

    /// Definitely-not-null value produced by a path-sensitive branch
    /// refinement.
    pub(crate) fn checked_non_null() -> Self {
        Kind::NonNull { checked: true }.into()
    }

    pub(crate) fn no_kaboom_non_null(deref_location: Location) -> Self {
        Kind::NoKaboomNonNull { deref_location }.into()
    }

    pub(crate) fn non_reporting_non_null() -> Self {
        Kind::NonReportingNonNull.into()
    }

    pub(crate) fn null_on_some_path() -> Self {
        Kind::NullOnSomePath {
            checked: false,
            kaboom: None,
        }
        .into()
    }

    pub(crate) fn null_on_complex_path() -> Self {
        Kind::NullOnComplexPath.into()
    }

    pub(crate) fn parameter_marked_nullable(param: u16) -> Self {
        Kind::ParameterNullable { param }.into()
    }

    pub(crate) fn is_definitely_null(&self) -> bool {
        matches!(self.kind, Kind::Null { .. })
    }

    pub(crate) fn is_definitely_not_null(&self) -> bool {
        matches!(
            self.kind,
            Kind::NonNull { .. } | Kind::NoKaboomNonNull { .. } | Kind::NonReportingNonNull
        )
    }

    pub(crate) fn is_null_on_some_path(&self) -> bool {
        matches!(
            self.kind,
            Kind::NullOnSomePath { .. } | Kind::ParameterNullable { .. }
        )
    }

    pub(crate) fn might_be_null(&self) -> bool {
        self.is_definitely_null() || self.is_null_on_some_path()
    }

    pub(crate) fn is_checked(&self) -> bool {
        matches!(
            self.kind,
            Kind::Null { checked: true }
                | Kind::NonNull { checked: true }
                | Kind::NullOnSomePath { checked: true, .. }
        )
    }

    /// Location where a dereference would already have crashed, if known.
    pub(crate) fn kaboom_location(&self) -> Option<Location> {
        match self.kind {
            Kind::NoKaboomNonNull { deref_location } => Some(deref_location),
            Kind::NullOnSomePath {
                kaboom: Some(location),
                ..
            } => Some(location),
            _ => None,
        }
    }

    /// Values that must never produce findings on their own.
    pub(crate) fn is_non_reporting(&self) -> bool {
        matches!(self.kind, Kind::NonReportingNonNull)
    }

    pub(crate) fn nullable_parameter(&self) -> Option<u16> {
        match self.kind {
            Kind::ParameterNullable { param } => Some(param),
            _ => None,
        }
    }

    pub(crate) fn is_exception(&self) -> bool {
        self.on_exception_path
    }

    /// Same value, tagged as having arisen on an exception path.
    pub(crate) fn to_exception_path(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            on_exception_path: true,
        }
    }

    /// Strips path-specific refinements that must not survive an
    /// uncontrolled control split.
    pub(crate) fn downgrade_on_control_split(&self) -> Self {
        match self.kind {
            Kind::NullOnSomePath { checked, kaboom } if checked || kaboom.is_some() => Self {
                kind: Kind::NullOnSomePath {
                    checked: false,
                    kaboom: None,
                },
                on_exception_path: self.on_exception_path,
            },
            _ => self.clone(),
        }
    }

    /// Sound join of two values. Never claims non-null unless both inputs
    /// are non-null; a value reachable by both a normal and an exceptional
    /// path counts as normal.
    pub(crate) fn merge(a: &IsNullValue, b: &IsNullValue) -> IsNullValue {
        IsNullValue {
            kind: Kind::merge(&a.kind, &b.kind),
            on_exception_path: a.on_exception_path && b.on_exception_path,
        }
    }
}

impl From<Kind> for IsNullValue {
    fn from(kind: Kind) -> Self {
        Self {
            kind,
            on_exception_path: false,
        }
    }
}

/// Coarse merge category. `MaybeSimple` absorbs the definite categories and
/// `MaybeComplex` absorbs everything, which keeps the join associative.
enum Category {
    DefinitelyNull,
    DefinitelyNotNull,
    MaybeSimple,
    MaybeComplex,
}

impl Kind {
    fn category(&self) -> Category {
        match self {
            Kind::Null { .. } => Category::DefinitelyNull,
            Kind::NonNull { .. } | Kind::NoKaboomNonNull { .. } | Kind::NonReportingNonNull => {
                Category::DefinitelyNotNull
            }
            Kind::NullOnSomePath { .. } | Kind::ParameterNullable { .. } => Category::MaybeSimple,
            Kind::NullOnComplexPath => Category::MaybeComplex,
        }
    }

    fn checked(&self) -> bool {
        matches!(
            self,
            Kind::Null { checked: true }
                | Kind::NonNull { checked: true }
                | Kind::NullOnSomePath { checked: true, .. }
        )
    }

    fn kaboom(&self) -> Option<Location> {
        match self {
            Kind::NoKaboomNonNull { deref_location } => Some(*deref_location),
            Kind::NullOnSomePath {
                kaboom: Some(location),
                ..
            } => Some(*location),
            _ => None,
        }
    }

    fn merge(a: &Kind, b: &Kind) -> Kind {
        if a == b {
            return a.clone();
        }
        use Category::*;
        match (a.category(), b.category()) {
            // Complex-path absorbs every other classification.
            (MaybeComplex, _) | (_, MaybeComplex) => Kind::NullOnComplexPath,
            // Any contribution of "maybe null" keeps the value maybe-null.
            // The priority flags hold for the merged value only when every
            // contributing path carries them.
            (MaybeSimple, _) | (_, MaybeSimple) | (DefinitelyNull, DefinitelyNotNull)
            | (DefinitelyNotNull, DefinitelyNull) => Kind::NullOnSomePath {
                checked: a.checked() && b.checked(),
                kaboom: Kind::merged_kaboom(a, b),
            },
            (DefinitelyNull, DefinitelyNull) => Kind::Null {
                checked: a.checked() && b.checked(),
            },
            (DefinitelyNotNull, DefinitelyNotNull) => {
                // Mixed not-null kinds: a non-reporting side keeps the merge
                // non-reporting, otherwise fall back to a plain not-null.
                if matches!(a, Kind::NonReportingNonNull) || matches!(b, Kind::NonReportingNonNull)
                {
                    Kind::NonReportingNonNull
                } else {
                    Kind::NonNull {
                        checked: a.checked() && b.checked(),
                    }
                }
            }
        }
    }

    /// Crash witness of the merged value. A definitely-null operand has no
    /// non-null path of its own and defers to the other side; otherwise the
    /// witness survives only when both sides carry the same one, so the
    /// result never depends on operand order.
    fn merged_kaboom(a: &Kind, b: &Kind) -> Option<Location> {
        if matches!(a.category(), Category::DefinitelyNull) {
            return b.kaboom();
        }
        if matches!(b.category(), Category::DefinitelyNull) {
            return a.kaboom();
        }
        match (a.kaboom(), b.kaboom()) {
            (Some(first), Some(second)) if first == second => Some(first),
            _ => None,
        }
    }
}
