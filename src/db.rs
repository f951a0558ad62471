use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ir::{MethodId, MethodNullness, Nullness};

/// Declared nullness of callee return values and parameters, keyed by
/// resolved method identity. Populated by the front end from annotations.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct NullnessDatabase {
    #[serde(default)]
    pub(crate) methods: BTreeMap<MethodId, MethodNullness>,
}

impl NullnessDatabase {
    pub(crate) fn return_nullness(&self, id: &MethodId) -> Nullness {
        self.methods
            .get(id)
            .map(|nullness| nullness.return_nullness)
            .unwrap_or(Nullness::Unknown)
    }

    pub(crate) fn parameter_nullness(&self, id: &MethodId, index: usize) -> Nullness {
        self.methods
            .get(id)
            .and_then(|nullness| nullness.parameter_nullness.get(index))
            .copied()
            .unwrap_or(Nullness::Unknown)
    }
}

/// Parameter bit set, indexed by declared parameter position (0-based).
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
pub(crate) struct ParamBits(pub(crate) u32);

impl ParamBits {
    pub(crate) const MAX_PARAMS: usize = 32;

    pub(crate) fn set(&mut self, index: usize) {
        if index < Self::MAX_PARAMS {
            self.0 |= 1 << index;
        }
    }

    pub(crate) fn get(self, index: usize) -> bool {
        index < Self::MAX_PARAMS && self.0 & (1 << index) != 0
    }

    pub(crate) fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Positions set in both bit sets.
    pub(crate) fn intersect(self, other: ParamBits) -> ParamBits {
        ParamBits(self.0 & other.0)
    }

    pub(crate) fn iter(self) -> impl Iterator<Item = usize> {
        (0..Self::MAX_PARAMS).filter(move |index| self.get(*index))
    }
}

/// Method contracts consumed by the secondary call-site and return checks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct ContractDatabase {
    /// Parameters the keyed method dereferences unconditionally.
    #[serde(default)]
    pub(crate) unconditional_deref: BTreeMap<MethodId, ParamBits>,
    /// Parameters the keyed method declares `@NonNull`.
    #[serde(default)]
    pub(crate) non_null_params: BTreeMap<MethodId, ParamBits>,
    /// Methods declared (directly or by an overridden declaration) to never
    /// return null. The front end resolves the class hierarchy.
    #[serde(default)]
    pub(crate) non_null_return: BTreeSet<MethodId>,
}

impl ContractDatabase {
    pub(crate) fn unconditionally_dereferenced(&self, id: &MethodId) -> Option<ParamBits> {
        self.unconditional_deref.get(id).copied()
    }

    pub(crate) fn non_null_params(&self, id: &MethodId) -> Option<ParamBits> {
        self.non_null_params.get(id).copied()
    }

    pub(crate) fn declares_non_null_return(&self, id: &MethodId) -> bool {
        self.non_null_return.contains(id)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.unconditional_deref.is_empty()
            && self.non_null_params.is_empty()
            && self.non_null_return.is_empty()
    }
}
