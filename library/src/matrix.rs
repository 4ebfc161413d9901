use core::ops::Sub;

#[allow(unused_imports)]
use micromath::F32Ext;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Sub for Vector3 {
    type Output = Vector3;
    fn sub(self, rhs: Self) -> Self::Output {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn cross(a: Vector3, b: Vector3) -> Vector3 {
        Vector3::new(
            a.y * b.z - a.z * b.y,
            a.z * b.x - a.x * b.z,
            a.x * b.y - a.y * b.x,
        )
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn normalized(&self) -> Vector3 {
        let length = self.length();
        Vector3::new(self.x / length, self.y / length, self.z / length)
    }

    /// Row vector times matrix.
    pub fn apply_rotation(&self, matrix: &Matrix3x3) -> Vector3 {
        let m = &matrix.m;
        Vector3::new(
            self.x * m[0][0] + self.y * m[1][0] + self.z * m[2][0],
            self.x * m[0][1] + self.y * m[1][1] + self.z * m[2][1],
            self.x * m[0][2] + self.y * m[1][2] + self.z * m[2][2],
        )
    }
}

/// Bed tilt correction applied to every planned move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matrix3x3 {
    pub m: [[f32; 3]; 3],
}

impl Default for Matrix3x3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix3x3 {
    pub const fn identity() -> Self {
        Self { m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]] }
    }

    pub fn set_to_identity(&mut self) {
        *self = Self::identity();
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Rotation that maps +Z onto `target`, the bed normal.
    pub fn create_look_at(target: Vector3) -> Self {
        let z_row = target.normalized();
        let x_row = Vector3::new(1.0, 0.0, -target.x / target.z).normalized();
        let y_row = Vector3::new(0.0, 1.0, -target.y / target.z).normalized();
        Self {
            m: [
                [x_row.x, x_row.y, x_row.z],
                [y_row.x, y_row.y, y_row.z],
                [z_row.x, z_row.y, z_row.z],
            ],
        }
    }

    pub fn transpose(&self) -> Self {
        let m = &self.m;
        Self {
            m: [
                [m[0][0], m[1][0], m[2][0]],
                [m[0][1], m[1][1], m[2][1]],
                [m[0][2], m[1][2], m[2][2]],
            ],
        }
    }
}

fn abs64(v: f64) -> f64 {
    if v < 0.0 { -v } else { v }
}

/// Normal equations for `z = a·x + b·y + d`, accumulated one sample at a time.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlaneFit {
    ata: [[f64; 3]; 3],
    atb: [f64; 3],
    count: usize,
}

impl PlaneFit {
    pub fn add(&mut self, x: f32, y: f32, z: f32) {
        let row = [x as f64, y as f64, 1.0];
        for i in 0..3 {
            for j in 0..3 {
                self.ata[i][j] += row[i] * row[j];
            }
            self.atb[i] += row[i] * z as f64;
        }
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// `[a, b, d]`, or `None` when the samples don't span a plane.
    pub fn solve(&self) -> Option<[f32; 3]> {
        let mut a = self.ata;
        let mut b = self.atb;
        for col in 0..3 {
            let pivot = (col..3).max_by(|&i, &j| abs64(a[i][col]).total_cmp(&abs64(a[j][col])))?;
            if abs64(a[pivot][col]) < 1e-12 {
                return None;
            }
            a.swap(col, pivot);
            b.swap(col, pivot);
            for row in col + 1..3 {
                let factor = a[row][col] / a[col][col];
                for k in col..3 {
                    a[row][k] -= factor * a[col][k];
                }
                b[row] -= factor * b[col];
            }
        }
        let mut solution = [0f64; 3];
        for row in (0..3).rev() {
            let tail: f64 = (row + 1..3).map(|k| a[row][k] * solution[k]).sum();
            solution[row] = (b[row] - tail) / a[row][row];
        }
        Some(solution.map(|v| v as f32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_leaves_vectors() {
        let v = Vector3::new(1.0, 2.0, 3.0).apply_rotation(&Matrix3x3::identity());
        assert_eq!(v, Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn look_at_flat_normal_is_identity() {
        let m = Matrix3x3::create_look_at(Vector3::new(0.0, 0.0, 1.0));
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(m.m[i][j], Matrix3x3::identity().m[i][j]);
            }
        }
    }

    #[test]
    fn look_at_maps_up_to_normal() {
        let normal = Vector3::new(-0.1, 0.05, 1.0);
        let m = Matrix3x3::create_look_at(normal);
        let up = Vector3::new(0.0, 0.0, 1.0).apply_rotation(&m);
        let n = normal.normalized();
        assert_relative_eq!(up.x, n.x, epsilon = 1e-6);
        assert_relative_eq!(up.y, n.y, epsilon = 1e-6);
        assert_relative_eq!(up.z, n.z, epsilon = 1e-6);
    }

    #[test]
    fn transpose_twice() {
        let m = Matrix3x3::create_look_at(Vector3::new(0.2, -0.1, 1.0));
        assert_eq!(m.transpose().transpose(), m);
    }

    #[test]
    fn cross_product() {
        let c = Vector3::cross(Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(c, Vector3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn plane_fit_recovers_tilt() {
        let mut fit = PlaneFit::default();
        for (x, y) in [(0.0, 0.0), (100.0, 0.0), (0.0, 100.0), (100.0, 100.0), (50.0, 50.0)] {
            fit.add(x, y, 0.01 * x - 0.02 * y + 0.5);
        }
        let [a, b, d] = fit.solve().unwrap();
        assert_relative_eq!(a, 0.01, epsilon = 1e-5);
        assert_relative_eq!(b, -0.02, epsilon = 1e-5);
        assert_relative_eq!(d, 0.5, epsilon = 1e-4);
        assert_eq!(fit.count(), 5);
    }

    #[test]
    fn plane_fit_needs_spread() {
        let mut fit = PlaneFit::default();
        fit.add(10.0, 10.0, 1.0);
        fit.add(10.0, 10.0, 1.0);
        assert_eq!(fit.solve(), None);
    }
}
