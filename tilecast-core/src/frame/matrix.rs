//! 3x3 affine transforms for texture coordinates.
//!
//! Builders pre-multiply: `m.pre_scale(..)` yields `m * S`, so the scale is
//! applied to a point before `m`. This is the order in which transforms
//! are written when composing a draw matrix:
//!
//! ```text
//!   render = T(.5,.5) * R(rotation) * T(-.5,-.5) * layout
//!   point' = render * point
//! ```

/// Row-major 3x3 matrix acting on column vectors `(x, y, 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix3 {
    m: [[f32; 3]; 3],
}

impl Default for Matrix3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix3 {
    pub const IDENTITY: Matrix3 = Matrix3 {
        m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    };

    pub fn from_rows(m: [[f32; 3]; 3]) -> Self {
        Self { m }
    }

    pub fn rows(&self) -> [[f32; 3]; 3] {
        self.m
    }

    pub fn translation(tx: f32, ty: f32) -> Self {
        Self::from_rows([[1.0, 0.0, tx], [0.0, 1.0, ty], [0.0, 0.0, 1.0]])
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self::from_rows([[sx, 0.0, 0.0], [0.0, sy, 0.0], [0.0, 0.0, 1.0]])
    }

    /// Rotation by `degrees`, exact at multiples of 90.
    pub fn rotation(degrees: f32) -> Self {
        let (sin, cos) = match degrees.rem_euclid(360.0) {
            d if d == 0.0 => (0.0, 1.0),
            d if d == 90.0 => (1.0, 0.0),
            d if d == 180.0 => (0.0, -1.0),
            d if d == 270.0 => (-1.0, 0.0),
            d => d.to_radians().sin_cos(),
        };
        Self::from_rows([[cos, -sin, 0.0], [sin, cos, 0.0], [0.0, 0.0, 1.0]])
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    // ── Composition ──────────────────────────────────────────────

    /// `self * other`
    pub fn multiply(&self, other: &Matrix3) -> Matrix3 {
        let mut out = [[0.0f32; 3]; 3];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.m[r][k] * other.m[k][c]).sum();
            }
        }
        Matrix3 { m: out }
    }

    pub fn pre_concat(&mut self, other: &Matrix3) -> &mut Self {
        *self = self.multiply(other);
        self
    }

    pub fn pre_translate(&mut self, tx: f32, ty: f32) -> &mut Self {
        self.pre_concat(&Self::translation(tx, ty))
    }

    pub fn pre_scale(&mut self, sx: f32, sy: f32) -> &mut Self {
        self.pre_concat(&Self::scale(sx, sy))
    }

    pub fn pre_rotate(&mut self, degrees: f32) -> &mut Self {
        self.pre_concat(&Self::rotation(degrees))
    }

    /// Rotate around `(px, py)` instead of the origin.
    pub fn pre_rotate_about(&mut self, degrees: f32, px: f32, py: f32) -> &mut Self {
        self.pre_translate(px, py)
            .pre_rotate(degrees)
            .pre_translate(-px, -py)
    }

    pub fn map_point(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.m;
        let w = m[2][0] * x + m[2][1] * y + m[2][2];
        let px = m[0][0] * x + m[0][1] * y + m[0][2];
        let py = m[1][0] * x + m[1][1] * y + m[1][2];
        if w == 0.0 || w == 1.0 {
            (px, py)
        } else {
            (px / w, py / w)
        }
    }

    // ── GL interop ───────────────────────────────────────────────

    /// Column-major 4x4 texture matrix with z passed through.
    pub fn to_gl(&self) -> [f32; 16] {
        let m = &self.m;
        [
            m[0][0], m[1][0], 0.0, m[2][0], //
            m[0][1], m[1][1], 0.0, m[2][1], //
            0.0, 0.0, 1.0, 0.0, //
            m[0][2], m[1][2], 0.0, m[2][2],
        ]
    }

    /// Inverse of [`to_gl`](Self::to_gl); the z row and column are dropped.
    pub fn from_gl(gl: &[f32; 16]) -> Self {
        Self::from_rows([
            [gl[0], gl[4], gl[12]],
            [gl[1], gl[5], gl[13]],
            [gl[3], gl[7], gl[15]],
        ])
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-5 && (a.1 - b.1).abs() < 1e-5
    }

    #[test]
    fn pre_multiplied_ops_apply_last_first() {
        let mut m = Matrix3::IDENTITY;
        m.pre_translate(1.0, 0.0).pre_scale(2.0, 2.0);
        // Scale first, then translate.
        assert!(close(m.map_point(1.0, 1.0), (3.0, 2.0)));
    }

    #[test]
    fn quarter_turn_is_exact() {
        let m = Matrix3::rotation(90.0);
        assert_eq!(m.map_point(1.0, 0.0), (0.0, 1.0));
        let m = Matrix3::rotation(-90.0);
        assert_eq!(m.map_point(1.0, 0.0), (0.0, -1.0));
    }

    #[test]
    fn mirror_about_center_swaps_edges() {
        let mut m = Matrix3::IDENTITY;
        m.pre_translate(0.5, 0.5)
            .pre_scale(-1.0, 1.0)
            .pre_translate(-0.5, -0.5);
        assert!(close(m.map_point(0.0, 0.25), (1.0, 0.25)));
        assert!(close(m.map_point(1.0, 0.75), (0.0, 0.75)));
    }

    #[test]
    fn rotate_about_center_keeps_center_fixed() {
        let mut m = Matrix3::IDENTITY;
        m.pre_rotate_about(270.0, 0.5, 0.5);
        assert!(close(m.map_point(0.5, 0.5), (0.5, 0.5)));
        assert!(close(m.map_point(0.0, 0.0), (0.0, 1.0)));
    }

    #[test]
    fn gl_layout_places_translation_in_last_column() {
        let gl = Matrix3::translation(0.25, 0.75).to_gl();
        assert_eq!(gl[12], 0.25);
        assert_eq!(gl[13], 0.75);
        assert_eq!(gl[15], 1.0);
        assert_eq!(Matrix3::from_gl(&gl), Matrix3::translation(0.25, 0.75));
    }
}
