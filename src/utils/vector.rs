//! Small 3-vector helpers on `[f64; 3]`

/// Point or direction in physical space (mm)
pub type Point3 = [f64; 3];

#[inline]
pub fn add(a: Point3, b: Point3) -> Point3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn sub(a: Point3, b: Point3) -> Point3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn scale(a: Point3, s: f64) -> Point3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

/// Componentwise product
#[inline]
pub fn mul(a: Point3, b: Point3) -> Point3 {
    [a[0] * b[0], a[1] * b[1], a[2] * b[2]]
}

#[inline]
pub fn norm(a: Point3) -> f64 {
    (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt()
}

#[inline]
pub fn distance(a: Point3, b: Point3) -> f64 {
    norm(sub(a, b))
}

/// Point on the line through `from` and `towards`, measured from `from`
///
/// Returns `from + (towards - from) * (‖reference - from‖ + dist) / ‖towards - from‖`,
/// i.e. the point `dist` past the projection of `reference` along the
/// direction `from → towards`. `None` when `from` and `towards` coincide.
pub fn next_point(reference: Point3, from: Point3, towards: Point3, dist: f64) -> Option<Point3> {
    let direction = sub(towards, from);
    let length = norm(direction);
    if length == 0.0 || !length.is_finite() {
        return None;
    }
    let along = distance(reference, from) + dist;
    Some(add(from, scale(direction, along / length)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_and_distance() {
        assert_eq!(norm([3.0, 4.0, 0.0]), 5.0);
        assert_eq!(distance([1.0, 1.0, 1.0], [1.0, 1.0, 3.0]), 2.0);
    }

    #[test]
    fn test_next_point_from_origin_of_line() {
        // reference == from: just `dist` along the direction
        let p = next_point([0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [10.0, 0.0, 0.0], 7.0).unwrap();
        assert_eq!(p, [7.0, 0.0, 0.0]);
    }

    #[test]
    fn test_next_point_steps_past_reference() {
        let from = [1.0, 2.0, 0.0];
        let towards = [1.0, 4.0, 0.0];
        let p = next_point(towards, from, towards, 3.5).unwrap();
        assert_eq!(p, [1.0, 7.5, 0.0]);
    }

    #[test]
    fn test_next_point_degenerate_direction() {
        assert!(next_point([1.0, 0.0, 0.0], [2.0, 2.0, 2.0], [2.0, 2.0, 2.0], 1.0).is_none());
    }

    #[test]
    fn test_mul_flips_components() {
        assert_eq!(mul([1.0, -2.0, 3.0], [-1.0, -1.0, 1.0]), [-1.0, 2.0, 3.0]);
    }
}
