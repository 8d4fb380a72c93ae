//! Decoded picture representation
//!
//! A [`YuvImage`] is what the decoder pushes into a producer surface: three
//! 4:2:0 planes with their strides, plus the coded and visible sizes.

/// One plane of a planar image
#[derive(Debug, Clone)]
pub struct Plane {
    /// Raw bytes, `stride * height` long
    pub data: Vec<u8>,
    /// Bytes per row (may exceed `width`)
    pub stride: usize,
    /// Plane width in samples
    pub width: u32,
    /// Plane height in rows
    pub height: u32,
}

impl Plane {
    /// Copy a plane out of a strided buffer
    pub fn from_strided(data: &[u8], stride: usize, width: u32, height: u32) -> Self {
        let len = stride * height as usize;
        Self {
            data: data[..len.min(data.len())].to_vec(),
            stride,
            width,
            height,
        }
    }

    /// A tightly packed plane filled with one value
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            data: vec![value; (width as usize) * (height as usize)],
            stride: width as usize,
            width,
            height,
        }
    }

    /// Whether the buffer holds every row the stride promises
    pub fn is_complete(&self) -> bool {
        self.stride >= self.width as usize && self.data.len() >= self.stride * self.height as usize
    }
}

/// A decoded 4:2:0 picture
#[derive(Debug, Clone)]
pub struct YuvImage {
    /// Luma plane
    pub y: Plane,
    /// Blue-difference chroma plane
    pub u: Plane,
    /// Red-difference chroma plane
    pub v: Plane,
    /// Width of the displayed region
    pub visible_width: u32,
    /// Height of the displayed region
    pub visible_height: u32,
    /// Presentation time in microseconds
    pub pts_us: i64,
    /// Whether samples use the full 0-255 range (JPEG) rather than 16-235
    pub full_range: bool,
}

impl YuvImage {
    /// Build an image from its planes; the visible size defaults to the luma size
    pub fn new(y: Plane, u: Plane, v: Plane, pts_us: i64, full_range: bool) -> Self {
        Self {
            visible_width: y.width,
            visible_height: y.height,
            y,
            u,
            v,
            pts_us,
            full_range,
        }
    }

    /// A flat-colour image, used by tests and diagnostics
    pub fn solid(width: u32, height: u32, luma: u8, pts_us: i64) -> Self {
        let chroma_width = width.div_ceil(2);
        let chroma_height = height.div_ceil(2);
        Self::new(
            Plane::filled(width, height, luma),
            Plane::filled(chroma_width, chroma_height, 128),
            Plane::filled(chroma_width, chroma_height, 128),
            pts_us,
            true,
        )
    }

    /// Restrict the displayed region, e.g. 1920x1080 inside a 1920x1088 coded picture
    pub fn with_visible_size(mut self, width: u32, height: u32) -> Self {
        self.visible_width = width.min(self.y.width);
        self.visible_height = height.min(self.y.height);
        self
    }

    /// Coded (allocated) width
    pub fn coded_width(&self) -> u32 {
        self.y.width
    }

    /// Coded (allocated) height
    pub fn coded_height(&self) -> u32 {
        self.y.height
    }

    /// Total payload size in bytes, reported as the output buffer size
    pub fn byte_len(&self) -> usize {
        self.y.data.len() + self.u.data.len() + self.v.data.len()
    }

    /// Whether every plane is complete and the chroma planes match 4:2:0
    pub fn is_valid(&self) -> bool {
        self.y.is_complete()
            && self.u.is_complete()
            && self.v.is_complete()
            && self.u.width == self.y.width.div_ceil(2)
            && self.u.height == self.y.height.div_ceil(2)
            && self.v.width == self.u.width
            && self.v.height == self.u.height
    }

    /// Column-major texture transform for this picture
    ///
    /// Expressed with a bottom-left texture origin: the visible region sits at
    /// the top rows of the coded picture, which is `[1 - sy, 1]` in that space.
    pub fn transform_matrix(&self) -> [f32; 16] {
        let sx = self.visible_width as f32 / self.coded_width().max(1) as f32;
        let sy = self.visible_height as f32 / self.coded_height().max(1) as f32;
        glam::Mat4::from_cols_array(&[
            sx, 0.0, 0.0, 0.0, //
            0.0, sy, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 1.0 - sy, 0.0, 1.0,
        ])
        .to_cols_array()
    }
}

/// Expected RGBA buffer size for the given dimensions (width * height * 4)
pub fn rgba_size(width: u32, height: u32) -> usize {
    (width as usize) * (height as usize) * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_image_is_valid() {
        let image = YuvImage::solid(320, 240, 16, 0);
        assert!(image.is_valid());
        assert_eq!(image.u.width, 160);
        assert_eq!(image.byte_len(), 320 * 240 + 2 * 160 * 120);
    }

    #[test]
    fn test_odd_dimensions_round_chroma_up() {
        let image = YuvImage::solid(33, 17, 16, 0);
        assert_eq!(image.u.width, 17);
        assert_eq!(image.u.height, 9);
        assert!(image.is_valid());
    }

    #[test]
    fn test_full_picture_transform_is_identity() {
        let image = YuvImage::solid(64, 64, 0, 0);
        assert_eq!(image.transform_matrix(), glam::Mat4::IDENTITY.to_cols_array());
    }

    #[test]
    fn test_cropped_transform() {
        let image = YuvImage::solid(1920, 1088, 0, 0).with_visible_size(1920, 1080);
        let st = image.transform_matrix();
        let sy = 1080.0 / 1088.0;
        assert_eq!(st[0], 1.0);
        assert!((st[5] - sy).abs() < 1e-6);
        assert!((st[13] - (1.0 - sy)).abs() < 1e-6);
    }

    #[test]
    fn test_rgba_size() {
        assert_eq!(rgba_size(320, 240), 307_200);
        assert_eq!(rgba_size(1920, 1080), 1920 * 1080 * 4);
    }
}
