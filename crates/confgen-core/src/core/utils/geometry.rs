use nalgebra::{Matrix3, Point3, Rotation3, Unit, Vector3};

pub fn rotation_to_align(from: &Vector3<f64>, to: &Vector3<f64>) -> Option<Rotation3<f64>> {
    Rotation3::rotation_between(from, to)
}

pub fn rotation_from_axis_angle(axis: &Vector3<f64>, angle_degrees: f64) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Unit::new_normalize(*axis), angle_degrees.to_radians())
}

/// Rotation taking `from` onto `to`, including the antiparallel case that
/// [`Rotation3::rotation_between`] leaves undefined.
pub fn robust_rotation_to_align(from: &Vector3<f64>, to: &Vector3<f64>) -> Rotation3<f64> {
    if let Some(rotation) = rotation_to_align(from, to) {
        return rotation;
    }
    if from.dot(to) > 0.0 {
        return Rotation3::identity();
    }
    let helper = if from.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let axis = from.cross(&helper);
    Rotation3::from_axis_angle(&Unit::new_normalize(axis), std::f64::consts::PI)
}

/// Rotates the selected points about the axis through `origin` along `axis`.
pub fn rotate_about_axis(
    points: &mut [Point3<f64>],
    indices: &[usize],
    origin: &Point3<f64>,
    axis: &Vector3<f64>,
    angle_degrees: f64,
) {
    if axis.norm_squared() < 1e-12 || angle_degrees == 0.0 {
        return;
    }
    let rotation = rotation_from_axis_angle(axis, angle_degrees);
    for &i in indices {
        points[i] = origin + rotation * (points[i] - origin);
    }
}

/// Dihedral angle `a-b-c-d` in degrees, in `(-180, 180]`, following the IUPAC sign
/// convention (clockwise rotation of the front bond seen along `b -> c` is positive).
pub fn dihedral_degrees(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    d: &Point3<f64>,
) -> f64 {
    let b1 = b - a;
    let b2 = c - b;
    let b3 = d - c;
    let n1 = b1.cross(&b2);
    let n2 = b2.cross(&b3);
    let y = b2.norm() * b1.dot(&n2);
    let x = n1.dot(&n2);
    y.atan2(x).to_degrees()
}

/// Smallest absolute difference between two angles in degrees.
pub fn angle_difference_degrees(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    diff.min(360.0 - diff)
}

pub fn centroid(points: &[Point3<f64>]) -> Point3<f64> {
    if points.is_empty() {
        return Point3::origin();
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Point3::from(sum / points.len() as f64)
}

pub fn calculate_rmsd(coords1: &[Point3<f64>], coords2: &[Point3<f64>]) -> Option<f64> {
    if coords1.len() != coords2.len() || coords1.is_empty() {
        return None;
    }
    let n = coords1.len() as f64;
    let squared_dist_sum: f64 = coords1
        .iter()
        .zip(coords2.iter())
        .map(|(p1, p2)| (p1 - p2).norm_squared())
        .sum();
    Some((squared_dist_sum / n).sqrt())
}

/// A rigid transform produced by Kabsch superposition.
#[derive(Debug, Clone, Copy)]
pub struct Superposition {
    pub rotation: Rotation3<f64>,
    pub mobile_centroid: Point3<f64>,
    pub target_centroid: Point3<f64>,
}

impl Superposition {
    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        self.target_centroid + self.rotation * (p - self.mobile_centroid)
    }
}

/// Optimal proper rotation superposing `mobile` onto `target` (Kabsch algorithm).
pub fn kabsch(mobile: &[Point3<f64>], target: &[Point3<f64>]) -> Option<Superposition> {
    if mobile.len() != target.len() || mobile.is_empty() {
        return None;
    }
    let cm = centroid(mobile);
    let ct = centroid(target);
    let mut h = Matrix3::zeros();
    for (p, q) in mobile.iter().zip(target) {
        h += (p - cm) * (q - ct).transpose();
    }
    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let v = v_t.transpose();
    let d = (v * u.transpose()).determinant().signum();
    let correction = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d));
    let rotation = Rotation3::from_matrix_unchecked(v * correction * u.transpose());
    Some(Superposition {
        rotation,
        mobile_centroid: cm,
        target_centroid: ct,
    })
}

/// RMSD after optimal superposition of `mobile` onto `target`.
pub fn kabsch_rmsd(mobile: &[Point3<f64>], target: &[Point3<f64>]) -> Option<f64> {
    let fit = kabsch(mobile, target)?;
    let n = mobile.len() as f64;
    let sum: f64 = mobile
        .iter()
        .zip(target)
        .map(|(p, q)| (fit.apply(p) - q).norm_squared())
        .sum();
    Some((sum / n).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn dihedral_follows_iupac_sign() {
        let a = Point3::new(1.0, 0.0, 0.0);
        let b = Point3::new(0.0, 0.0, 0.0);
        let c = Point3::new(0.0, 0.0, 1.0);
        let d_pos = Point3::new(0.0, 1.0, 1.0);
        let d_neg = Point3::new(0.0, -1.0, 1.0);
        assert!(close(dihedral_degrees(&a, &b, &c, &d_pos), 90.0));
        assert!(close(dihedral_degrees(&a, &b, &c, &d_neg), -90.0));
        let d_trans = Point3::new(-1.0, 0.0, 1.0);
        assert!(close(dihedral_degrees(&a, &b, &c, &d_trans).abs(), 180.0));
    }

    #[test]
    fn rotate_about_axis_changes_dihedral_by_angle() {
        let mut pts = vec![
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, 1.0),
        ];
        let before = dihedral_degrees(&pts[0], &pts[1], &pts[2], &pts[3]);
        let origin = pts[2];
        let axis = pts[2] - pts[1];
        rotate_about_axis(&mut pts, &[3], &origin, &axis, 40.0);
        let after = dihedral_degrees(&pts[0], &pts[1], &pts[2], &pts[3]);
        assert!(close(angle_difference_degrees(after - before, 40.0), 0.0));
    }

    #[test]
    fn angle_difference_wraps_around() {
        assert!(close(angle_difference_degrees(350.0, 10.0), 20.0));
        assert!(close(angle_difference_degrees(-170.0, 170.0), 20.0));
        assert!(close(angle_difference_degrees(90.0, 90.0), 0.0));
    }

    #[test]
    fn kabsch_rmsd_is_zero_for_rigidly_moved_copy() {
        let target = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.5, 0.0, 0.0),
            Point3::new(1.5, 1.2, 0.3),
            Point3::new(-0.4, 0.8, 1.1),
        ];
        let rotation = rotation_from_axis_angle(&Vector3::new(0.3, 1.0, -0.2), 73.0);
        let mobile: Vec<_> = target
            .iter()
            .map(|p| rotation * p + Vector3::new(4.0, -2.0, 1.0))
            .collect();
        let rmsd = kabsch_rmsd(&mobile, &target).unwrap();
        assert!(rmsd < 1e-6, "rmsd was {rmsd}");
        assert!(calculate_rmsd(&mobile, &target).unwrap() > 1.0);
    }

    #[test]
    fn kabsch_does_not_reflect_mirror_images() {
        let target = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let mirror: Vec<_> = target.iter().map(|p| Point3::new(-p.x, p.y, p.z)).collect();
        assert!(kabsch_rmsd(&mirror, &target).unwrap() > 0.1);
    }

    #[test]
    fn robust_alignment_handles_antiparallel_vectors() {
        let from = Vector3::new(1.0, 0.0, 0.0);
        let to = Vector3::new(-2.0, 0.0, 0.0);
        let rotation = robust_rotation_to_align(&from, &to);
        let rotated = rotation * from;
        assert!((rotated - Vector3::new(-1.0, 0.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn rmsd_rejects_mismatched_lengths() {
        assert!(calculate_rmsd(&[Point3::origin()], &[]).is_none());
        assert!(kabsch_rmsd(&[], &[]).is_none());
    }
}
