//! Field geometry: polygons, bounding boxes and field boundaries.
//!
//! Coordinates are planar `(x, y)` pairs in the raster CRS. No reprojection
//! happens anywhere in agrs.

use super::AgrsError;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box `(min_x, min_y, max_x, max_y)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    #[must_use]
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Smallest box covering both boxes.
    #[must_use]
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Closed-interval overlap test.
    #[must_use]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Box as `[min_x, min_y, max_x, max_y]`.
    #[must_use]
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

/// Simple polygon described by its exterior ring.
///
/// Deserialization goes through [`Polygon::new`], so a decoded polygon holds
/// the same invariants as a constructed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PolygonRepr")]
pub struct Polygon {
    exterior: Vec<(f64, f64)>,
}

#[derive(Deserialize)]
struct PolygonRepr {
    exterior: Vec<(f64, f64)>,
}

impl TryFrom<PolygonRepr> for Polygon {
    type Error = AgrsError;

    fn try_from(repr: PolygonRepr) -> Result<Self, Self::Error> {
        Polygon::new(repr.exterior)
    }
}

impl Polygon {
    /// Build a polygon from its exterior ring. A closing vertex equal to the
    /// first one is accepted and dropped.
    pub fn new(mut exterior: Vec<(f64, f64)>) -> Result<Self, AgrsError> {
        if exterior.len() > 1 && exterior.first() == exterior.last() {
            exterior.pop();
        }
        if exterior.len() < 3 {
            return Err(AgrsError::InvalidConfiguration(format!(
                "Polygon needs at least 3 distinct vertices, got {}",
                exterior.len()
            )));
        }
        if exterior.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(AgrsError::InvalidConfiguration(
                "Polygon vertices must be finite".to_string(),
            ));
        }
        Ok(Self { exterior })
    }

    /// Axis-aligned rectangle, convenient for tests and grid fixtures.
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self, AgrsError> {
        Self::new(vec![
            (min_x, min_y),
            (max_x, min_y),
            (max_x, max_y),
            (min_x, max_y),
        ])
    }

    #[must_use]
    pub fn exterior(&self) -> &[(f64, f64)] {
        &self.exterior
    }

    #[must_use]
    pub fn bbox(&self) -> BoundingBox {
        let mut bbox = BoundingBox::new(
            f64::INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
        );
        for &(x, y) in &self.exterior {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        bbox
    }

    /// Even-odd ray casting point-in-polygon test.
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let ring = &self.exterior;
        let mut inside = false;
        let mut j = ring.len() - 1;
        for i in 0..ring.len() {
            let (xi, yi) = ring[i];
            let (xj, yj) = ring[j];
            if (yi > y) != (yj > y) {
                let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
                if x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

/// One field: identifier plus boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldBoundary {
    pub id: String,
    pub polygon: Polygon,
}

impl FieldBoundary {
    #[must_use]
    pub fn new(id: impl Into<String>, polygon: Polygon) -> Self {
        Self {
            id: id.into(),
            polygon,
        }
    }

    /// Union bounding box of all fields, `None` for an empty slice.
    #[must_use]
    pub fn union_bbox(fields: &[FieldBoundary]) -> Option<BoundingBox> {
        fields
            .iter()
            .map(|field| field.polygon.bbox())
            .reduce(|acc, bbox| acc.union(&bbox))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_vertex_is_dropped() {
        let poly = Polygon::new(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)])
            .expect("triangle");
        assert_eq!(poly.exterior().len(), 3);
    }

    #[test]
    fn degenerate_polygon_rejected() {
        assert!(Polygon::new(vec![(0.0, 0.0), (1.0, 1.0)]).is_err());
        assert!(Polygon::new(vec![(0.0, 0.0), (1.0, f64::NAN), (1.0, 1.0)]).is_err());
    }

    #[test]
    fn deserialize_validates_ring() {
        let ok: Polygon =
            serde_json::from_str(r#"{"exterior": [[0, 0], [1, 0], [1, 1], [0, 0]]}"#)
                .expect("valid ring");
        assert_eq!(ok.exterior().len(), 3);

        assert!(serde_json::from_str::<Polygon>(r#"{"exterior": []}"#).is_err());
        assert!(serde_json::from_str::<Polygon>(r#"{"exterior": [[0, 0], [1, 1]]}"#).is_err());
    }

    #[test]
    fn point_in_triangle() {
        let tri = Polygon::new(vec![(0.0, 0.0), (4.0, 0.0), (0.0, 4.0)]).expect("triangle");
        assert!(tri.contains(1.0, 1.0));
        assert!(!tri.contains(3.0, 3.0));
        assert!(!tri.contains(-1.0, 1.0));
    }

    #[test]
    fn union_bbox_covers_all_fields() {
        let fields = vec![
            FieldBoundary::new("a", Polygon::rectangle(0.0, 0.0, 1.0, 1.0).expect("rect")),
            FieldBoundary::new("b", Polygon::rectangle(5.0, -2.0, 6.0, 0.5).expect("rect")),
        ];
        let bbox = FieldBoundary::union_bbox(&fields).expect("bbox");
        assert_eq!(bbox.to_array(), [0.0, -2.0, 6.0, 1.0]);
        assert!(FieldBoundary::union_bbox(&[]).is_none());
    }

    #[test]
    fn bbox_intersection() {
        let a = BoundingBox::new(0.0, 0.0, 2.0, 2.0);
        assert!(a.intersects(&BoundingBox::new(1.0, 1.0, 3.0, 3.0)));
        assert!(a.intersects(&BoundingBox::new(2.0, 2.0, 3.0, 3.0)));
        assert!(!a.intersects(&BoundingBox::new(2.5, 0.0, 3.0, 1.0)));
    }
}
