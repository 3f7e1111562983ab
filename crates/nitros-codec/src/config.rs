/// Default JPEG quality for `Image` payloads.
pub const DEFAULT_IMAGE_QUALITY: u8 = 80;

/// Default point cloud quantization: 1000 steps per unit (1 mm for metres).
pub const DEFAULT_POINTCLOUD_SCALE: f64 = 1000.0;

/// Default zstd level for point clouds and alpha planes.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Encoder tuning. Decoders read everything they need from the payload.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// JPEG quality, 1-100.
    pub image_quality: u8,
    /// Quantization steps per unit for point clouds.
    pub pointcloud_scale: f64,
    /// zstd compression level.
    pub zstd_level: i32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            image_quality: DEFAULT_IMAGE_QUALITY,
            pointcloud_scale: DEFAULT_POINTCLOUD_SCALE,
            zstd_level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

impl CodecConfig {
    /// Override JPEG quality (clamped to 1-100).
    pub fn with_image_quality(mut self, quality: u8) -> Self {
        self.image_quality = quality.clamp(1, 100);
        self
    }

    /// Override point cloud quantization scale.
    pub fn with_pointcloud_scale(mut self, scale: f64) -> Self {
        self.pointcloud_scale = scale;
        self
    }
}
