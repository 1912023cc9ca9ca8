//! Landmark alignment for the embedder.
//!
//! Maps the five detector landmarks onto the canonical ArcFace positions in
//! a 112x112 crop with a least-squares similarity transform (uniform scale,
//! rotation and translation), so a tilted head yields the same crop as an
//! upright one.

use image::{GrayImage, Luma};

pub const ALIGNED_SIZE: u32 = 112;

/// Canonical landmark positions for a 112x112 ArcFace input.
pub const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth corner
    (70.7299, 92.2041), // right mouth corner
];

/// `x' = a*x - b*y + tx`, `y' = b*x + a*y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares fit taking `src` onto `dst`.
    ///
    /// `None` when the source points coincide or the fit collapses to a
    /// zero scale.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (smx, smy) = mean(src);
        let (dmx, dmy) = mean(dst);

        let mut denom = 0.0f32;
        let mut num_a = 0.0f32;
        let mut num_b = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - smx, sy - smy);
            let (dx, dy) = (dx - dmx, dy - dmy);
            denom += sx * sx + sy * sy;
            num_a += sx * dx + sy * dy;
            num_b += sx * dy - sy * dx;
        }
        if denom < 1e-6 {
            return None;
        }

        let a = num_a / denom;
        let b = num_b / denom;
        if a * a + b * b < 1e-12 {
            return None;
        }
        Some(Self {
            a,
            b,
            tx: dmx - (a * smx - b * smy),
            ty: dmy - (b * smx + a * smy),
        })
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    pub fn inverse(&self) -> Self {
        let det = self.a * self.a + self.b * self.b;
        let a = self.a / det;
        let b = -self.b / det;
        Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        }
    }
}

/// Warp `image` so `landmarks` land on [`REFERENCE_LANDMARKS`].
///
/// Pixels that map outside the frame are black. `None` if the landmarks are
/// degenerate or none of them fall inside the frame.
pub fn align_face(image: &GrayImage, landmarks: &[(f32, f32); 5]) -> Option<GrayImage> {
    let (width, height) = image.dimensions();
    let inside =
        |&(x, y): &(f32, f32)| x >= 0.0 && y >= 0.0 && x < width as f32 && y < height as f32;
    if !landmarks.iter().any(inside) {
        return None;
    }

    let to_frame = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS)?.inverse();
    Some(GrayImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |x, y| {
        let (sx, sy) = to_frame.apply((x as f32, y as f32));
        Luma([bilinear(image, sx, sy)])
    }))
}

fn bilinear(image: &GrayImage, x: f32, y: f32) -> u8 {
    let (width, height) = image.dimensions();
    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return 0;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |x, y| image.get_pixel(x, y).0[0] as f32;
    let top = px(x0, y0) * (1.0 - fx) + px(x1, y0) * fx;
    let bottom = px(x0, y1) * (1.0 - fx) + px(x1, y1) * fx;
    (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
}
