//! Multi-dimensional resource quantities.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Well-known dimension: device memory in bytes.
pub const MEMORY: &str = "memory";
/// Well-known dimension: concurrent compute slots.
pub const COMPUTE_SLOTS: &str = "compute-slots";

/// Mapping from resource-dimension name to quantity.
///
/// Missing dimensions read as zero, so `Resources::zero()` is the empty map.
/// Quantities are integral units (bytes, slots) to keep ledger arithmetic exact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resources {
    dims: BTreeMap<String, u64>,
}

impl Resources {
    /// The zero value.
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Builder-style setter for one dimension.
    #[must_use]
    pub fn with(mut self, dim: impl Into<String>, quantity: u64) -> Self {
        self.set(dim, quantity);
        self
    }

    /// Set a dimension; zero removes it.
    pub fn set(&mut self, dim: impl Into<String>, quantity: u64) {
        let dim = dim.into();
        if quantity == 0 {
            self.dims.remove(&dim);
        } else {
            self.dims.insert(dim, quantity);
        }
    }

    /// Quantity of a dimension (zero if absent).
    #[must_use]
    pub fn get(&self, dim: &str) -> u64 {
        self.dims.get(dim).copied().unwrap_or(0)
    }

    /// True when every dimension is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.dims.is_empty()
    }

    /// Iterate over non-zero dimensions.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.dims.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// True when every dimension of `self` is `<=` the same dimension of `available`.
    #[must_use]
    pub fn fits_within(&self, available: &Self) -> bool {
        self.iter().all(|(dim, qty)| qty <= available.get(dim))
    }

    /// First dimension of `self` that exceeds `available`, if any.
    #[must_use]
    pub fn first_excess<'a>(&'a self, available: &Self) -> Option<&'a str> {
        self.iter()
            .find(|(dim, qty)| *qty > available.get(dim))
            .map(|(dim, _)| dim)
    }

    /// Add `other` into `self`, saturating on overflow.
    pub fn add_assign_saturating(&mut self, other: &Self) {
        for (dim, qty) in other.iter() {
            let total = self.get(dim).saturating_add(qty);
            self.set(dim, total);
        }
    }

    /// Subtract `other` from `self`, clamping each dimension at zero.
    ///
    /// Returns `false` if any dimension would have gone negative.
    pub fn sub_assign_saturating(&mut self, other: &Self) -> bool {
        let mut exact = true;
        for (dim, qty) in other.iter() {
            let current = self.get(dim);
            if qty > current {
                exact = false;
            }
            self.set(dim, current.saturating_sub(qty));
        }
        exact
    }

    /// `self - other` clamped at zero.
    #[must_use]
    pub fn saturating_sub(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.sub_assign_saturating(other);
        out
    }

    /// Sum of each dimension's share of `totals`. Dimensions absent from
    /// `totals` are ignored.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn normalized_share(&self, totals: &Self) -> f64 {
        self.iter()
            .filter_map(|(dim, qty)| {
                let total = totals.get(dim);
                (total > 0).then(|| qty as f64 / total as f64)
            })
            .sum()
    }
}

impl Add for Resources {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self.add_assign_saturating(&rhs);
        self
    }
}

impl AddAssign<&Self> for Resources {
    fn add_assign(&mut self, rhs: &Self) {
        self.add_assign_saturating(rhs);
    }
}

impl<K: Into<String>> FromIterator<(K, u64)> for Resources {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        let mut out = Self::zero();
        for (dim, qty) in iter {
            out.set(dim, qty);
        }
        out
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (dim, qty)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}: {qty}")?;
        }
        f.write_str("}")
    }
}
