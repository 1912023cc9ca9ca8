//! Captured frames and pixel conversion.

use image::GrayImage;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub captured_at: std::time::Instant,
    pub is_dark: bool,
}

impl Frame {
    /// Convert into an `image` buffer for extraction and storage.
    pub fn into_image(self) -> Result<GrayImage, FrameError> {
        let expected = (self.width * self.height) as usize;
        let actual = self.data.len();
        GrayImage::from_raw(self.width, self.height, self.data)
            .ok_or(FrameError::InvalidLength { expected, actual })
    }
}

/// Extract the Y channel from packed YUYV 4:2:2 (`[Y0, U, Y1, V]`).
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: yuyv.len() });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Downscale 16-bit little-endian grayscale to 8 bits.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: y16.len() });
    }
    // High byte of each little-endian pair.
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// True if more than `threshold_pct` of pixels are below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < 32).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        let yuyv: Vec<u8> = (0..16).collect();
        assert_eq!(yuyv_to_grayscale(&yuyv, 4, 2).unwrap(), vec![0, 2, 4, 6, 8, 10, 12, 14]);
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let y16 = [0x34, 0x12, 0xff, 0x80];
        assert_eq!(y16_to_grayscale(&y16, 2, 1).unwrap(), vec![0x12, 0x80]);
    }

    #[test]
    fn test_dark_frame() {
        assert!(is_dark_frame(&[], 0.95));
        assert!(is_dark_frame(&[0u8; 100], 0.95));
        assert!(!is_dark_frame(&[128u8; 100], 0.95));

        let mut mostly_dark = vec![10u8; 94];
        mostly_dark.extend([200u8; 6]);
        assert!(!is_dark_frame(&mostly_dark, 0.95));
    }

    #[test]
    fn test_into_image_checks_length() {
        let frame = Frame {
            data: vec![7; 12],
            width: 4,
            height: 3,
            sequence: 0,
            captured_at: std::time::Instant::now(),
            is_dark: false,
        };
        let image = frame.clone().into_image().unwrap();
        assert_eq!(image.dimensions(), (4, 3));

        let short = Frame { data: vec![7; 5], ..frame };
        assert!(matches!(
            short.into_image(),
            Err(FrameError::InvalidLength { expected: 12, actual: 5 })
        ));
    }
}
