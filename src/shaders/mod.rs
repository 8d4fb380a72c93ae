//! Embedded WGSL sources for the YUV conversion pipeline
//!
//! Every pipeline is built from the shared textured-quad prelude (uniforms,
//! bindings, `vs_main` and the `sample_external` helper) followed by one
//! fragment stage that defines `fs_main`.

/// Shared vertex stage, bindings and YUV sampling helper
pub const TEXTURE_QUAD_SHADER: &str = include_str!("texture_quad.wgsl");

/// Default fragment stage: converted colour as RGBA
pub const YUV_TO_RGBA_SHADER: &str = include_str!("yuv_to_rgba.wgsl");

/// Fragment stage with red and blue swapped
pub const YUV_TO_BGRA_SHADER: &str = include_str!("yuv_to_bgra.wgsl");

/// Fragment stage used by the texture renderer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FragmentShader {
    /// Converted RGBA, bytes read back in R, G, B, A order
    #[default]
    YuvToRgba,
    /// Converted colour with red and blue swapped
    YuvToBgra,
    /// Caller-supplied WGSL defining `fs_main(in: VertexOutput) -> @location(0) vec4<f32>`
    Custom(String),
}

impl FragmentShader {
    /// Parse a settings name (`rgba` or `bgra`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "rgba" => Some(FragmentShader::YuvToRgba),
            "bgra" => Some(FragmentShader::YuvToBgra),
            _ => None,
        }
    }

    /// Settings name; custom shaders have none
    pub fn name(&self) -> Option<&'static str> {
        match self {
            FragmentShader::YuvToRgba => Some("rgba"),
            FragmentShader::YuvToBgra => Some("bgra"),
            FragmentShader::Custom(_) => None,
        }
    }

    fn fragment_source(&self) -> &str {
        match self {
            FragmentShader::YuvToRgba => YUV_TO_RGBA_SHADER,
            FragmentShader::YuvToBgra => YUV_TO_BGRA_SHADER,
            FragmentShader::Custom(source) => source,
        }
    }

    /// Full WGSL module source: prelude followed by the fragment stage
    pub fn compose(&self) -> String {
        let fragment = self.fragment_source();
        let mut source = String::with_capacity(TEXTURE_QUAD_SHADER.len() + fragment.len() + 1);
        source.push_str(TEXTURE_QUAD_SHADER);
        source.push('\n');
        source.push_str(fragment);
        source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_contains_both_stages() {
        let source = FragmentShader::default().compose();
        assert!(source.contains("fn vs_main"));
        assert!(source.contains("fn sample_external"));
        assert!(source.contains("fn fs_main"));
        assert!(source.find("fn vs_main") < source.find("fn fs_main"));
    }

    #[test]
    fn test_bgra_swaps_channels() {
        assert!(FragmentShader::YuvToBgra.compose().contains(".bgra"));
        assert!(!FragmentShader::YuvToRgba.compose().contains(".bgra"));
    }

    #[test]
    fn test_custom_source_is_appended() {
        let custom = "@fragment\nfn fs_main(in: VertexOutput) -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";
        let source = FragmentShader::Custom(custom.to_string()).compose();
        assert!(source.ends_with(custom));
    }

    #[test]
    fn test_names() {
        assert_eq!(FragmentShader::from_name("RGBA"), Some(FragmentShader::YuvToRgba));
        assert_eq!(FragmentShader::from_name(" bgra "), Some(FragmentShader::YuvToBgra));
        assert_eq!(FragmentShader::from_name("sepia"), None);
        assert_eq!(FragmentShader::YuvToBgra.name(), Some("bgra"));
        assert_eq!(FragmentShader::Custom(String::new()).name(), None);
    }
}
