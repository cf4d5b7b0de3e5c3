//! Transform algebra - rigid transforms between node coordinate frames
//!
//! A [`NodeTransform`] maps points from one frame into another by applying
//! scale, then rotation, then translation. Names follow the `a_from_b`
//! convention: `a_from_b.transform_point(p_b)` yields the point in frame `a`.

use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Default tolerance for approximate comparisons
pub const TRANSFORM_EPSILON: f64 = 1e-9;

/// 3D vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    pub const ONE: Vector3 = Vector3 {
        x: 1.0,
        y: 1.0,
        z: 1.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::ZERO
    }

    pub fn one() -> Self {
        Self::ONE
    }

    pub fn splat(v: f64) -> Self {
        Self { x: v, y: v, z: v }
    }

    pub fn dot(&self, other: &Vector3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Vector3) -> Vector3 {
        Vector3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    /// Component-wise product
    pub fn mul_components(&self, other: &Vector3) -> Vector3 {
        Vector3 {
            x: self.x * other.x,
            y: self.y * other.y,
            z: self.z * other.z,
        }
    }

    /// Component-wise reciprocal; zero components stay zero
    pub fn recip(&self) -> Vector3 {
        let r = |v: f64| if v == 0.0 { 0.0 } else { 1.0 / v };
        Vector3 {
            x: r(self.x),
            y: r(self.y),
            z: r(self.z),
        }
    }

    pub fn length(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Distance to another position
    pub fn distance(&self, other: &Vector3) -> f64 {
        (*self - *other).length()
    }

    /// Linear interpolation
    pub fn lerp(&self, other: &Vector3, t: f64) -> Vector3 {
        Vector3 {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }

    pub fn approx_eq(&self, other: &Vector3, epsilon: f64) -> bool {
        (self.x - other.x).abs() <= epsilon
            && (self.y - other.y).abs() <= epsilon
            && (self.z - other.z).abs() <= epsilon
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Vector3 {
    type Output = Vector3;

    fn neg(self) -> Vector3 {
        Vector3::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Vector3;

    fn mul(self, rhs: f64) -> Vector3 {
        Vector3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Rotation as a unit quaternion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    pub fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// Rotation of `angle` radians about `axis` (need not be normalized)
    pub fn from_axis_angle(axis: Vector3, angle: f64) -> Self {
        let len = axis.length();
        if len < 1e-12 {
            return Self::identity();
        }
        let half = angle * 0.5;
        let s = half.sin() / len;
        Self {
            w: half.cos(),
            x: axis.x * s,
            y: axis.y * s,
            z: axis.z * s,
        }
    }

    pub fn from_euler(yaw: f64, pitch: f64, roll: f64) -> Self {
        let cy = (yaw * 0.5).cos();
        let sy = (yaw * 0.5).sin();
        let cp = (pitch * 0.5).cos();
        let sp = (pitch * 0.5).sin();
        let cr = (roll * 0.5).cos();
        let sr = (roll * 0.5).sin();

        Self {
            w: cr * cp * cy + sr * sp * sy,
            x: sr * cp * cy - cr * sp * sy,
            y: cr * sp * cy + sr * cp * sy,
            z: cr * cp * sy - sr * sp * cy,
        }
    }

    pub fn dot(&self, other: &Quaternion) -> f64 {
        self.w * other.w + self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn conjugate(&self) -> Quaternion {
        Quaternion {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    /// Multiplicative inverse; degenerate quaternions invert to identity
    pub fn inverse(&self) -> Quaternion {
        let norm_sq = self.dot(self);
        if norm_sq < 1e-12 {
            return Quaternion::identity();
        }
        let c = self.conjugate();
        Quaternion {
            w: c.w / norm_sq,
            x: c.x / norm_sq,
            y: c.y / norm_sq,
            z: c.z / norm_sq,
        }
    }

    pub fn normalize(&self) -> Quaternion {
        let len = self.dot(self).sqrt();
        if len < 1e-12 {
            return Quaternion::identity();
        }
        Quaternion {
            w: self.w / len,
            x: self.x / len,
            y: self.y / len,
            z: self.z / len,
        }
    }

    /// Rotate a vector. Assumes a unit quaternion.
    pub fn rotate(&self, v: Vector3) -> Vector3 {
        let u = Vector3::new(self.x, self.y, self.z);
        let t = u.cross(&v) * 2.0;
        v + t * self.w + u.cross(&t)
    }

    /// Spherical linear interpolation
    pub fn slerp(&self, other: &Quaternion, t: f64) -> Quaternion {
        let mut dot = self.dot(other);

        let other = if dot < 0.0 {
            dot = -dot;
            Quaternion {
                w: -other.w,
                x: -other.x,
                y: -other.y,
                z: -other.z,
            }
        } else {
            *other
        };

        if dot > 0.9995 {
            let result = Quaternion {
                w: self.w + (other.w - self.w) * t,
                x: self.x + (other.x - self.x) * t,
                y: self.y + (other.y - self.y) * t,
                z: self.z + (other.z - self.z) * t,
            };
            return result.normalize();
        }

        let theta_0 = dot.acos();
        let theta = theta_0 * t;
        let sin_theta = theta.sin();
        let sin_theta_0 = theta_0.sin();

        let s0 = theta.cos() - dot * sin_theta / sin_theta_0;
        let s1 = sin_theta / sin_theta_0;

        Quaternion {
            w: self.w * s0 + other.w * s1,
            x: self.x * s0 + other.x * s1,
            y: self.y * s0 + other.y * s1,
            z: self.z * s0 + other.z * s1,
        }
    }

    /// `q` and `-q` describe the same rotation and compare equal here
    pub fn approx_eq(&self, other: &Quaternion, epsilon: f64) -> bool {
        let same = (self.w - other.w).abs() <= epsilon
            && (self.x - other.x).abs() <= epsilon
            && (self.y - other.y).abs() <= epsilon
            && (self.z - other.z).abs() <= epsilon;
        let flipped = (self.w + other.w).abs() <= epsilon
            && (self.x + other.x).abs() <= epsilon
            && (self.y + other.y).abs() <= epsilon
            && (self.z + other.z).abs() <= epsilon;
        same || flipped
    }
}

impl Mul for Quaternion {
    type Output = Quaternion;

    /// Hamilton product: `(a * b).rotate(v) == a.rotate(b.rotate(v))`
    fn mul(self, rhs: Quaternion) -> Quaternion {
        Quaternion {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }
}

/// Rigid transform (plus optional scale) between two node frames
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeTransform {
    #[serde(default)]
    pub position: Vector3,
    #[serde(default)]
    pub rotation: Quaternion,
    #[serde(default = "Vector3::one")]
    pub scale: Vector3,
}

impl Default for NodeTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl NodeTransform {
    pub fn identity() -> Self {
        NodeTransform {
            position: Vector3::ZERO,
            rotation: Quaternion::identity(),
            scale: Vector3::ONE,
        }
    }

    pub fn new(position: Vector3, rotation: Quaternion) -> Self {
        NodeTransform {
            position,
            rotation,
            scale: Vector3::ONE,
        }
    }

    pub fn from_position(position: Vector3) -> Self {
        Self::new(position, Quaternion::identity())
    }

    pub fn from_rotation(rotation: Quaternion) -> Self {
        Self::new(Vector3::ZERO, rotation)
    }

    pub fn with_scale(mut self, scale: Vector3) -> Self {
        self.scale = scale;
        self
    }

    /// Map a point from the source frame into the destination frame
    pub fn transform_point(&self, point: Vector3) -> Vector3 {
        self.rotation.rotate(point.mul_components(&self.scale)) + self.position
    }

    /// Map a direction; translation does not apply
    pub fn transform_vector(&self, vector: Vector3) -> Vector3 {
        self.rotation.rotate(vector.mul_components(&self.scale))
    }

    /// `a_from_b.compose(&b_from_c)` yields `a_from_c`
    pub fn compose(&self, inner: &NodeTransform) -> NodeTransform {
        NodeTransform {
            position: self.transform_point(inner.position),
            rotation: (self.rotation * inner.rotation).normalize(),
            scale: self.scale.mul_components(&inner.scale),
        }
    }

    /// `a_from_b.inverse()` yields `b_from_a`.
    ///
    /// Exact for uniform scale. Non-uniform scale combined with rotation has
    /// no exact scale/rotate/translate inverse; the reciprocal scale is used.
    pub fn inverse(&self) -> NodeTransform {
        let rotation = self.rotation.inverse().normalize();
        let scale = self.scale.recip();
        let position = -rotation.rotate(self.position).mul_components(&scale);
        NodeTransform {
            position,
            rotation,
            scale,
        }
    }

    /// Column-major 4x4 matrix, `m[column][row]`
    pub fn to_matrix(&self) -> [[f64; 4]; 4] {
        let q = self.rotation.normalize();
        let (x, y, z, w) = (q.x, q.y, q.z, q.w);
        let r = [
            [
                1.0 - 2.0 * (y * y + z * z),
                2.0 * (x * y + z * w),
                2.0 * (x * z - y * w),
            ],
            [
                2.0 * (x * y - z * w),
                1.0 - 2.0 * (x * x + z * z),
                2.0 * (y * z + x * w),
            ],
            [
                2.0 * (x * z + y * w),
                2.0 * (y * z - x * w),
                1.0 - 2.0 * (x * x + y * y),
            ],
        ];
        let s = [self.scale.x, self.scale.y, self.scale.z];
        let mut m = [[0.0; 4]; 4];
        for col in 0..3 {
            for row in 0..3 {
                m[col][row] = r[col][row] * s[col];
            }
        }
        m[3] = [self.position.x, self.position.y, self.position.z, 1.0];
        m
    }

    pub fn approx_eq(&self, other: &NodeTransform, epsilon: f64) -> bool {
        self.position.approx_eq(&other.position, epsilon)
            && self.rotation.approx_eq(&other.rotation, epsilon)
            && self.scale.approx_eq(&other.scale, epsilon)
    }
}

impl Mul for NodeTransform {
    type Output = NodeTransform;

    fn mul(self, rhs: NodeTransform) -> NodeTransform {
        self.compose(&rhs)
    }
}

/// Invert a transform, turning `a_from_b` into `b_from_a`
pub fn invert_node_transform(transform: &NodeTransform) -> NodeTransform {
    transform.inverse()
}
