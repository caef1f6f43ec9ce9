use glam::{Mat4, Vec3, Vec4};

/// A ray in world space. `direction` does not need to be normalized, but hit
/// distances are expressed in multiples of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    pub fn at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = Vec3>,
    {
        let mut aabb = Aabb::EMPTY;
        for point in points {
            if !point.is_finite() {
                return Aabb::new(Vec3::NAN, Vec3::NAN);
            }
            aabb.min = aabb.min.min(point);
            aabb.max = aabb.max.max(point);
        }
        aabb
    }

    /// Finite and non-inverted. Empty boxes are not valid.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min.cmple(self.max).all()
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn translated(&self, offset: Vec3) -> Aabb {
        Aabb {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }
}

/// Ray-AABB intersection using the slab method.
/// Returns the entry distance along the ray (0 when the origin is inside), or
/// None.
pub fn ray_aabb(ray: &Ray, aabb: &Aabb) -> Option<f32> {
    let mut t_min = f32::NEG_INFINITY;
    let mut t_max = f32::INFINITY;

    for axis in 0..3 {
        let origin = ray.origin[axis];
        let direction = ray.direction[axis];
        let (lo, hi) = (aabb.min[axis], aabb.max[axis]);
        if direction.abs() < f32::EPSILON {
            // Parallel to this slab: either always inside or never.
            if origin < lo || origin > hi {
                return None;
            }
            continue;
        }
        let inv = 1.0 / direction;
        let (t1, t2) = ((lo - origin) * inv, (hi - origin) * inv);
        t_min = t_min.max(t1.min(t2));
        t_max = t_max.min(t1.max(t2));
    }

    if t_max < 0.0 || t_min > t_max {
        return None;
    }
    Some(t_min.max(0.0))
}

/// Möller-Trumbore ray-triangle intersection algorithm.
/// Returns the distance along the ray if hit, or None if no intersection.
pub fn ray_triangle(ray: &Ray, v0: Vec3, v1: Vec3, v2: Vec3) -> Option<f32> {
    const EPSILON: f32 = 1e-7;

    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let h = ray.direction.cross(edge2);
    let a = edge1.dot(h);

    // Ray is parallel to triangle
    if a.abs() < EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = ray.origin - v0;
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = f * ray.direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);
    (t > EPSILON).then_some(t)
}

/// Plane in the form `normal · p + d >= 0` for points on the inner side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    fn from_row(row: Vec4) -> Self {
        let normal = row.truncate();
        let length = normal.length();
        if length > f32::EPSILON {
            Plane {
                normal: normal / length,
                d: row.w / length,
            }
        } else {
            // Degenerate rows accept everything.
            Plane {
                normal: Vec3::ZERO,
                d: 1.0,
            }
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }
}

/// View frustum extracted from a view-projection matrix with a 0..1 depth
/// range (the wgpu convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    pub fn from_matrix(matrix: Mat4) -> Self {
        let r0 = matrix.row(0);
        let r1 = matrix.row(1);
        let r2 = matrix.row(2);
        let r3 = matrix.row(3);
        Frustum {
            planes: [
                Plane::from_row(r3 + r0),
                Plane::from_row(r3 - r0),
                Plane::from_row(r3 + r1),
                Plane::from_row(r3 - r1),
                Plane::from_row(r2),
                Plane::from_row(r3 - r2),
            ],
        }
    }

    /// Conservative: may report boxes that are just outside a corner, never
    /// rejects a box that touches the volume.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let positive = Vec3::new(
                if plane.normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if plane.normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if plane.normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );
            plane.signed_distance(positive) >= -1e-4
        })
    }
}
