//! Spatial index over element positions for viewport candidate lookup.

use rstar::{RTree, RTreeObject, AABB};
use std::sync::Arc;
use tracing::debug;

use crate::models::{Element, MapPoint, MapRect};

/// Element wrapper stored in the R-tree at its projected position
#[derive(Clone)]
pub struct IndexedElement {
    pub element: Arc<Element>,
    point: [f64; 2],
}

impl RTreeObject for IndexedElement {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl IndexedElement {
    /// Elements without a coordinate cannot be indexed
    pub fn new(element: Arc<Element>) -> Option<Self> {
        let coordinate = element.require_coordinate().ok()?;
        let projected = MapPoint::project(coordinate);
        Some(Self {
            element,
            point: [projected.x, projected.y],
        })
    }
}

/// Immutable R-tree over one store generation
#[derive(Default)]
pub struct SpatialIndex {
    tree: RTree<IndexedElement>,
    unplaced: usize,
}

impl SpatialIndex {
    pub fn build<'a>(elements: impl IntoIterator<Item = &'a Arc<Element>>) -> Self {
        let mut unplaced = 0usize;
        let indexed: Vec<IndexedElement> = elements
            .into_iter()
            .filter_map(|element| {
                let entry = IndexedElement::new(Arc::clone(element));
                if entry.is_none() {
                    unplaced += 1;
                }
                entry
            })
            .collect();

        let tree = RTree::bulk_load(indexed);
        debug!(
            "Spatial index built with {} entries ({} without coordinate)",
            tree.size(),
            unplaced
        );

        Self { tree, unplaced }
    }

    /// Elements whose projected position lies inside `rect`
    pub fn query<'a>(&'a self, rect: &MapRect) -> impl Iterator<Item = &'a Arc<Element>> + 'a {
        let envelope = AABB::from_corners([rect.min.x, rect.min.y], [rect.max.x, rect.max.y]);
        self.tree
            .locate_in_envelope(&envelope)
            .map(|entry| &entry.element)
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Number of elements left out for lack of a coordinate
    pub fn unplaced(&self) -> usize {
        self.unplaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::element::tests::element;
    use crate::models::Viewport;

    #[test]
    fn test_query_skips_unplaced_and_outside() {
        let mut no_coord = element("node:3", 0.0, 0.0, "2024-01-01T00:00:00Z");
        no_coord.coordinate = None;

        let elements = vec![
            Arc::new(element("node:1", 10.0, 10.0, "2024-01-01T00:00:00Z")),
            Arc::new(element("node:2", 40.0, 40.0, "2024-01-01T00:00:00Z")),
            Arc::new(no_coord),
        ];
        let index = SpatialIndex::build(&elements);
        assert_eq!(index.len(), 2);
        assert_eq!(index.unplaced(), 1);

        let viewport = Viewport::from_bbox(9.0, 9.0, 11.0, 11.0);
        let found: Vec<&str> = index
            .query(viewport.rect())
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(found, vec!["node:1"]);
    }
}
