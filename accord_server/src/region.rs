//! DDM region storage and intersection queries.

use std::collections::BTreeSet;

use accord_core::{ConnectHandle, DimensionHandle, RegionHandle, RtiError};
use accord_model::RangeBounds;

/// One region, owned by the connect that inserted it. Bounds are committed
/// separately from creation and may be committed again to move the region.
#[derive(Debug, Clone)]
pub struct Region {
    pub handle: RegionHandle,
    pub owner: ConnectHandle,
    pub dimensions: BTreeSet<DimensionHandle>,
    bounds: Vec<RangeBounds>,
}

impl Region {
    pub fn new(
        handle: RegionHandle,
        owner: ConnectHandle,
        dimensions: BTreeSet<DimensionHandle>,
    ) -> Self {
        Self {
            handle,
            owner,
            dimensions,
            bounds: Vec::new(),
        }
    }

    /// Replace the committed range bounds. Every bound must name one of the
    /// region's dimensions and span a non-empty range.
    pub fn commit(&mut self, bounds: Vec<RangeBounds>) -> Result<(), RtiError> {
        for bound in &bounds {
            if !self.dimensions.contains(&bound.dimension) || bound.lower >= bound.upper {
                return Err(RtiError::InvalidRegion);
            }
        }
        self.bounds = bounds;
        Ok(())
    }

    pub fn bounds(&self) -> &[RangeBounds] {
        &self.bounds
    }

    fn bound(&self, dimension: DimensionHandle) -> Option<&RangeBounds> {
        self.bounds.iter().find(|bound| bound.dimension == dimension)
    }

    /// Two regions intersect when their ranges overlap in every dimension
    /// both constrain. A dimension only one side constrains does not
    /// separate them.
    pub fn intersects(&self, other: &Region) -> bool {
        for bound in &self.bounds {
            let Some(other_bound) = other.bound(bound.dimension) else {
                continue;
            };
            if bound.upper <= other_bound.lower || other_bound.upper <= bound.lower {
                return false;
            }
        }
        true
    }
}
