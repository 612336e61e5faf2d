//! Geometry primitives shared by every stage of the map builder.
//!
//! Local maps carry a rigid-body [`Pose3D`] (translation + unit quaternion)
//! and a point cloud expressed in the map's own frame.  Clustering and
//! linking work on the planar projection of those poses, so the module also
//! provides [`Point2`] and the axis-aligned [`Bounds2D`] used by the
//! quadtree.
//!
//! # Example
//!
//! ```rust
//! use mapbuilder_types::geometry::{Pose3D, Quaternion, Vec3};
//!
//! // Map frame 1 m forward of the world origin, rotated 90° about z.
//! let half = std::f32::consts::FRAC_PI_4;
//! let pose = Pose3D::new(
//!     Vec3::new(1.0, 0.0, 0.0),
//!     Quaternion::new(half.cos(), 0.0, 0.0, half.sin()),
//! );
//!
//! let p = pose.transform_point(Vec3::new(1.0, 0.0, 0.0));
//! assert!((p.x - 1.0).abs() < 1e-5);
//! assert!((p.y - 1.0).abs() < 1e-5);
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector: a translation or a point of a cloud.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    /// Create a new vector.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    /// True when every component is finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Drop the z component.
    pub fn planar(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1); see [`Pose3D::is_valid`].
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `yaw` radians about the z axis.
    pub fn from_yaw(yaw: f32) -> Self {
        let half = yaw * 0.5;
        Self::new(half.cos(), 0.0, 0.0, half.sin())
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn norm(&self) -> f32 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pose3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body pose: the transform from a map's local frame into the world
/// frame.  To express a local point in the world, rotate it by `rotation`
/// then add `translation`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Pose3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Pose3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity pose.
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// A pose at `(x, y, 0)` with no rotation.
    pub fn from_xy(x: f32, y: f32) -> Self {
        Self::new(Vec3::new(x, y, 0.0), Quaternion::identity())
    }

    /// Map a point from this pose's local frame into the parent frame.
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.translation.add(self.rotation.rotate(p))
    }

    /// A pose is usable when all components are finite and the rotation is
    /// not the zero quaternion.
    pub fn is_valid(&self) -> bool {
        let r = &self.rotation;
        self.translation.is_finite()
            && r.w.is_finite()
            && r.x.is_finite()
            && r.y.is_finite()
            && r.z.is_finite()
            && r.norm() > f32::EPSILON
    }

    /// Planar projection of the translation.
    pub fn planar(&self) -> Point2 {
        self.translation.planar()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Planar types
// ────────────────────────────────────────────────────────────────────────────

/// A point in the ground plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_squared(&self, other: &Point2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// An axis-aligned planar box, defined by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Bounds2D {
    pub min: Point2,
    pub max: Point2,
}

impl Bounds2D {
    /// Create a box from two opposite corners.
    ///
    /// The constructor normalises the corners so that `min ≤ max` per axis.
    pub fn new(a: Point2, b: Point2) -> Self {
        Self {
            min: Point2::new(a.x.min(b.x), a.y.min(b.y)),
            max: Point2::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// A degenerate box around a single point.
    pub fn from_point(p: Point2) -> Self {
        Self { min: p, max: p }
    }

    /// Grow the box so that it also covers `p`.
    pub fn include(&mut self, p: Point2) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    /// Return a copy enlarged by `margin` on every side.
    pub fn expanded(&self, margin: f32) -> Self {
        Self {
            min: Point2::new(self.min.x - margin, self.min.y - margin),
            max: Point2::new(self.max.x + margin, self.max.y + margin),
        }
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Return the centre point of the box.
    pub fn centre(&self) -> Point2 {
        Point2::new(
            (self.min.x + self.max.x) * 0.5,
            (self.min.y + self.max.y) * 0.5,
        )
    }

    /// True when the point lies inside or on the boundary of the box.
    pub fn contains_point(&self, p: Point2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// True when `other` lies entirely inside this box, allowing `tolerance`
    /// slack on each side.
    pub fn contains_bounds(&self, other: &Bounds2D, tolerance: f32) -> bool {
        other.min.x >= self.min.x - tolerance
            && other.min.y >= self.min.y - tolerance
            && other.max.x <= self.max.x + tolerance
            && other.max.y <= self.max.y + tolerance
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    const EPS: f32 = 1e-5;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < EPS
    }

    // ── Quaternion ──────────────────────────────────────────────────────────

    #[test]
    fn identity_rotation_leaves_vector_unchanged() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(Quaternion::identity().rotate(v), v);
    }

    #[test]
    fn yaw_rotation_turns_x_into_y() {
        let q = Quaternion::from_yaw(FRAC_PI_2);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(approx(r.x, 0.0));
        assert!(approx(r.y, 1.0));
    }

    // ── Pose3D ──────────────────────────────────────────────────────────────

    #[test]
    fn transform_point_applies_rotation_then_translation() {
        let pose = Pose3D::new(Vec3::new(2.0, 0.0, 0.0), Quaternion::from_yaw(FRAC_PI_2));
        let p = pose.transform_point(Vec3::new(1.0, 0.0, 0.5));
        assert!(approx(p.x, 2.0));
        assert!(approx(p.y, 1.0));
        assert!(approx(p.z, 0.5));
    }

    #[test]
    fn nan_pose_is_invalid() {
        let pose = Pose3D::from_xy(f32::NAN, 0.0);
        assert!(!pose.is_valid());
    }

    #[test]
    fn zero_quaternion_is_invalid() {
        let pose = Pose3D::new(Vec3::zero(), Quaternion::new(0.0, 0.0, 0.0, 0.0));
        assert!(!pose.is_valid());
        assert!(Pose3D::identity().is_valid());
    }

    // ── Bounds2D ────────────────────────────────────────────────────────────

    #[test]
    fn bounds_normalises_min_max() {
        let b = Bounds2D::new(Point2::new(2.0, 2.0), Point2::new(0.0, 0.0));
        assert_eq!(b.min, Point2::new(0.0, 0.0));
        assert_eq!(b.max, Point2::new(2.0, 2.0));
    }

    #[test]
    fn include_and_expand() {
        let mut b = Bounds2D::from_point(Point2::new(0.0, 0.0));
        b.include(Point2::new(3.0, -1.0));
        let e = b.expanded(1.0);
        assert_eq!(e.min, Point2::new(-1.0, -2.0));
        assert_eq!(e.max, Point2::new(4.0, 1.0));
        assert!(approx(e.area(), 15.0));
    }

    #[test]
    fn contains_boundary_point() {
        let b = Bounds2D::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0));
        assert!(b.contains_point(Point2::new(0.0, 1.0)));
        assert!(!b.contains_point(Point2::new(1.5, 0.5)));
    }

    #[test]
    fn squared_distance_is_planar() {
        let a = Point2::new(0.0, 0.0);
        assert!(approx(a.distance_squared(&Point2::new(3.0, 4.0)), 25.0));
    }
}
