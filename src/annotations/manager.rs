//! Visible-set computation and add/remove diffing against the rendered map.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use geo::{Distance, Haversine, Point};
use rayon::prelude::*;
use tracing::debug;

use super::resolve_symbol;
use crate::models::{Coordinate, Element, PaymentMethods, Viewport};
use crate::store::SpatialIndex;

pub const DEFAULT_CUTOFF_MILES: f64 = 25.0;
const METERS_PER_MILE: f64 = 1_609.344;

/// Cluster group for elements carrying an active boost
pub const CLUSTER_BOOSTED: &str = "boosted";
/// Cluster group for every other element
pub const CLUSTER_DEFAULT: &str = "element";

/// Render-facing projection of exactly one element
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationToken {
    pub id: String,
    pub coordinate: Coordinate,
    pub title: String,
    pub symbol: &'static str,
    /// Group key handed to the map's clustering
    pub cluster_key: &'static str,
    pub payment: PaymentMethods,
}

impl AnnotationToken {
    /// `None` for elements that cannot be drawn (no coordinate or no title)
    pub fn for_element(element: &Element) -> Option<Self> {
        let coordinate = element.require_coordinate().ok()?;
        let title = element.display_name()?.to_string();
        let cluster_key = if element.tag("boost:expires").is_some() {
            CLUSTER_BOOSTED
        } else {
            CLUSTER_DEFAULT
        };

        Some(Self {
            id: element.id.clone(),
            coordinate,
            title,
            symbol: resolve_symbol(&element.tags),
            cluster_key,
            payment: element.payment_methods(),
        })
    }
}

/// Changes needed to turn the rendered set into the target set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub additions: Vec<AnnotationToken>,
    pub removals: Vec<AnnotationToken>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

/// Tokens currently on the map, by element id
pub type RenderedSet = HashMap<String, AnnotationToken>;

/// Visibility predicate: placed, inside the viewport, within the cutoff of its
/// center, not soft-deleted, and titled by a name or operator tag.
pub fn is_visible(element: &Element, viewport: &Viewport, center: Point<f64>, cutoff_m: f64) -> bool {
    let Ok(coordinate) = element.require_coordinate() else {
        return false;
    };

    viewport.contains(coordinate)
        && Haversine.distance(center, coordinate.to_point()) <= cutoff_m
        && !element.is_deleted()
        && element.display_name().is_some()
}

/// Compute the delta between `rendered` and what `viewport` should show.
///
/// Ids present in both sets produce no event so their tokens keep any UI
/// state. Output is sorted by id.
pub fn recompute(
    index: &SpatialIndex,
    viewport: &Viewport,
    rendered: &RenderedSet,
    cutoff_m: f64,
) -> Delta {
    let center = viewport.center().to_point();
    let candidates: Vec<&Arc<Element>> = index.query(viewport.rect()).collect();

    let target: Vec<&Arc<Element>> = candidates
        .par_iter()
        .copied()
        .filter(|element| is_visible(element, viewport, center, cutoff_m))
        .collect();
    let target_ids: HashSet<&str> = target.iter().map(|e| e.id.as_str()).collect();

    let mut additions: Vec<AnnotationToken> = target
        .iter()
        .filter(|element| !rendered.contains_key(element.id.as_str()))
        .filter_map(|element| AnnotationToken::for_element(element))
        .collect();
    additions.sort_by(|a, b| a.id.cmp(&b.id));

    let mut removals: Vec<AnnotationToken> = rendered
        .values()
        .filter(|token| !target_ids.contains(token.id.as_str()))
        .cloned()
        .collect();
    removals.sort_by(|a, b| a.id.cmp(&b.id));

    debug!(
        "Viewport recompute: {} candidates, {} visible, +{} -{}",
        candidates.len(),
        target.len(),
        additions.len(),
        removals.len()
    );

    Delta { additions, removals }
}

/// Owns the rendered token set and keeps it in step with the viewport
pub struct ViewportAnnotationManager {
    rendered: RenderedSet,
    cutoff_m: f64,
}

impl ViewportAnnotationManager {
    pub fn new(cutoff_miles: f64) -> Self {
        Self {
            rendered: RenderedSet::new(),
            cutoff_m: cutoff_miles * METERS_PER_MILE,
        }
    }

    /// Delta for `viewport` against the current rendered set, without applying it
    pub fn recompute(&self, index: &SpatialIndex, viewport: &Viewport) -> Delta {
        recompute(index, viewport, &self.rendered, self.cutoff_m)
    }

    pub fn apply(&mut self, delta: &Delta) {
        for token in &delta.removals {
            self.rendered.remove(&token.id);
        }
        for token in &delta.additions {
            self.rendered.insert(token.id.clone(), token.clone());
        }
    }

    /// Recompute and apply in one step
    pub fn update(&mut self, index: &SpatialIndex, viewport: &Viewport) -> Delta {
        let delta = self.recompute(index, viewport);
        self.apply(&delta);
        delta
    }

    /// Remove everything from the map
    pub fn clear(&mut self) -> Delta {
        let mut removals: Vec<AnnotationToken> = self.rendered.drain().map(|(_, t)| t).collect();
        removals.sort_by(|a, b| a.id.cmp(&b.id));
        Delta {
            additions: Vec::new(),
            removals,
        }
    }

    pub fn rendered(&self) -> &RenderedSet {
        &self.rendered
    }

    pub fn token(&self, id: &str) -> Option<&AnnotationToken> {
        self.rendered.get(id)
    }
}

impl Default for ViewportAnnotationManager {
    fn default() -> Self {
        Self::new(DEFAULT_CUTOFF_MILES)
    }
}
