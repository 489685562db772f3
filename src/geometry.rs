//! Cartesian frames built from UR tool poses
//!
//! UR reports the TCP pose as `[x, y, z, rx, ry, rz]` where the last three
//! components are a rotation vector (axis scaled by angle).

use serde::{Deserialize, Serialize};

/// Position plus orthonormal x/y axes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub point: [f64; 3],
    pub xaxis: [f64; 3],
    pub yaxis: [f64; 3],
}

impl Frame {
    /// Build a frame from a rotation vector and origin
    pub fn from_axis_angle_vector(axis_angle: [f64; 3], point: [f64; 3]) -> Self {
        Self {
            point,
            xaxis: rotate_by_rotvec(axis_angle, [1.0, 0.0, 0.0]),
            yaxis: rotate_by_rotvec(axis_angle, [0.0, 1.0, 0.0]),
        }
    }

    /// Build a frame from a UR pose `[x, y, z, rx, ry, rz]`
    pub fn from_pose(pose: [f64; 6]) -> Self {
        Self::from_axis_angle_vector([pose[3], pose[4], pose[5]], [pose[0], pose[1], pose[2]])
    }

    pub fn zaxis(&self) -> [f64; 3] {
        cross(self.xaxis, self.yaxis)
    }

    /// Rotation vector of this frame's orientation
    pub fn axis_angle_vector(&self) -> [f64; 3] {
        let x = self.xaxis;
        let y = self.yaxis;
        let z = self.zaxis();
        // Columns of the rotation matrix are the frame axes
        let r = [[x[0], y[0], z[0]], [x[1], y[1], z[1]], [x[2], y[2], z[2]]];

        let cos_angle = ((r[0][0] + r[1][1] + r[2][2] - 1.0) / 2.0).clamp(-1.0, 1.0);
        let angle = cos_angle.acos();

        if angle < 1e-8 {
            return [0.0, 0.0, 0.0];
        }

        if (std::f64::consts::PI - angle) < 1e-6 {
            // Near pi the antisymmetric part vanishes; recover the axis from the diagonal
            let xx = ((r[0][0] + 1.0) / 2.0).max(0.0);
            let yy = ((r[1][1] + 1.0) / 2.0).max(0.0);
            let zz = ((r[2][2] + 1.0) / 2.0).max(0.0);
            let xy = (r[0][1] + r[1][0]) / 4.0;
            let xz = (r[0][2] + r[2][0]) / 4.0;
            let yz = (r[1][2] + r[2][1]) / 4.0;
            let k = if xx >= yy && xx >= zz {
                let kx = xx.sqrt();
                [kx, xy / kx, xz / kx]
            } else if yy >= zz {
                let ky = yy.sqrt();
                [xy / ky, ky, yz / ky]
            } else {
                let kz = zz.sqrt();
                [xz / kz, yz / kz, kz]
            };
            return [k[0] * angle, k[1] * angle, k[2] * angle];
        }

        let scale = angle / (2.0 * angle.sin());
        [
            (r[2][1] - r[1][2]) * scale,
            (r[0][2] - r[2][0]) * scale,
            (r[1][0] - r[0][1]) * scale,
        ]
    }

    /// UR pose `[x, y, z, rx, ry, rz]` of this frame
    pub fn to_pose(&self) -> [f64; 6] {
        let [rx, ry, rz] = self.axis_angle_vector();
        [self.point[0], self.point[1], self.point[2], rx, ry, rz]
    }
}

/// Rotate `v` by a rotation vector using Rodrigues' formula
pub fn rotate_by_rotvec(rotvec: [f64; 3], v: [f64; 3]) -> [f64; 3] {
    let [rx, ry, rz] = rotvec;
    let angle = (rx * rx + ry * ry + rz * rz).sqrt();

    if angle < 1e-8 {
        return v;
    }

    let k = [rx / angle, ry / angle, rz / angle];
    let cos_angle = angle.cos();
    let sin_angle = angle.sin();
    let one_minus_cos = 1.0 - cos_angle;

    let k_dot_v = dot(k, v);
    let k_cross_v = cross(k, v);

    [
        v[0] * cos_angle + k_cross_v[0] * sin_angle + k[0] * k_dot_v * one_minus_cos,
        v[1] * cos_angle + k_cross_v[1] * sin_angle + k[1] * k_dot_v * one_minus_cos,
        v[2] * cos_angle + k_cross_v[2] * sin_angle + k[2] * k_dot_v * one_minus_cos,
    ]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}
