use nalgebra::Vector2;

use crate::datatypes::Vertex;

/// A vector valued body force acting on the domain
pub trait RightHandSide {
    fn vector_value(&self, point: &Vertex) -> Vector2<f64>;
}

impl<F> RightHandSide for F
where
    F: Fn(&Vertex) -> Vector2<f64>,
{
    fn vector_value(&self, point: &Vertex) -> Vector2<f64> {
        self(point)
    }
}

/// Unit loads on three small discs: along x around `(±0.5, 0)` and along y
/// around the origin.
#[derive(Debug, Clone)]
pub struct TwoCircleForcing {
    x_centers: [Vertex; 2],
    y_center: Vertex,
    radius: f64,
}

impl Default for TwoCircleForcing {
    fn default() -> Self {
        TwoCircleForcing {
            x_centers: [Vertex::new(0.5, 0.0), Vertex::new(-0.5, 0.0)],
            y_center: Vertex::new(0.0, 0.0),
            radius: 0.2,
        }
    }
}

impl RightHandSide for TwoCircleForcing {
    fn vector_value(&self, point: &Vertex) -> Vector2<f64> {
        let r2 = self.radius * self.radius;

        let fx = if self
            .x_centers
            .iter()
            .any(|c| point.distance_squared(c) < r2)
        {
            1.0
        } else {
            0.0
        };
        let fy = if point.distance_squared(&self.y_center) < r2 {
            1.0
        } else {
            0.0
        };

        Vector2::new(fx, fy)
    }
}
