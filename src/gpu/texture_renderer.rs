//! Textured quad renderer for surface textures
//!
//! Draws the latched YUV image of a [`SurfaceTexture`] onto a full-screen
//! quad, converting to RGBA in the fragment stage.

use wgpu::util::DeviceExt;

use super::{GpuContext, SurfaceTexture};
use crate::error::{ExtractError, Result};
use crate::shaders::FragmentShader;

/// Size of one vertex: position (x, y, z) followed by texture coordinates (u, v)
const VERTEX_STRIDE: wgpu::BufferAddress = (5 * std::mem::size_of::<f32>()) as wgpu::BufferAddress;

/// Full-screen quad as a triangle strip
#[rustfmt::skip]
const QUAD_VERTICES: [f32; 20] = [
    // X, Y, Z, U, V
    -1.0, -1.0, 0.0, 0.0, 0.0,
     1.0, -1.0, 0.0, 1.0, 0.0,
    -1.0,  1.0, 0.0, 0.0, 1.0,
     1.0,  1.0, 0.0, 1.0, 1.0,
];

/// Opaque green, so untouched pixels are easy to spot in dumps
const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.0,
    g: 1.0,
    b: 0.0,
    a: 1.0,
};

/// Uniforms shared by the vertex and fragment stages, matching `Matrices` in the shader
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadUniforms {
    /// Model-view-projection matrix
    pub mvp: [[f32; 4]; 4],
    /// Texture transform
    pub st: [[f32; 4]; 4],
    /// x: 1.0 for full-range samples; yzw unused
    pub params: [f32; 4],
}

impl QuadUniforms {
    /// Uniforms for one draw, flipping the texture transform vertically when asked
    pub fn new(st_matrix: [f32; 16], flip_y: bool, full_range: bool) -> Self {
        let st = if flip_y { flip_st(st_matrix) } else { st_matrix };
        Self {
            mvp: glam::Mat4::IDENTITY.to_cols_array_2d(),
            st: glam::Mat4::from_cols_array(&st).to_cols_array_2d(),
            params: [if full_range { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0],
        }
    }
}

/// Invert the vertical texture axis of a column-major transform
pub fn flip_st(mut st: [f32; 16]) -> [f32; 16] {
    st[5] = -st[5];
    st[13] = 1.0 - st[13];
    st
}

/// Render pipeline drawing a surface texture onto a quad
pub struct TextureRenderer {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    vertex_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    texture_id: u32,
}

impl TextureRenderer {
    /// Build the pipeline for `target_format`
    ///
    /// Validation errors raised while building are [`ExtractError::GpuInit`].
    pub fn new(
        context: &GpuContext,
        target_format: wgpu::TextureFormat,
        fragment_shader: &FragmentShader,
    ) -> Result<Self> {
        let device = &context.device;
        context.push_error_scope();

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Texture Quad Shader"),
            source: wgpu::ShaderSource::Wgsl(fragment_shader.compose().into()),
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Surface Texture Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let plane_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Texture Quad Bind Group Layout"),
            entries: &[
                // Matrices
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                plane_entry(2),
                plane_entry(3),
                plane_entry(4),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Texture Quad Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Texture Quad Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: VERTEX_STRIDE,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Texture Quad Vertices"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Texture Quad Uniforms"),
            contents: bytemuck::bytes_of(&QuadUniforms::new(
                glam::Mat4::IDENTITY.to_cols_array(),
                false,
                true,
            )),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        context.check_gpu_error("create texture renderer").map_err(|e| match e {
            ExtractError::Gpu { op, message } => ExtractError::GpuInit(format!("{}: {}", op, message)),
            other => other,
        })?;

        let texture_id = super::surface_texture::allocate_texture_id();
        tracing::debug!("Texture renderer ready (texture id {}, target {:?})", texture_id, target_format);

        Ok(Self {
            pipeline,
            bind_group_layout,
            sampler,
            vertex_buffer,
            uniform_buffer,
            texture_id,
        })
    }

    /// Texture id allocated for the surface texture this renderer samples
    pub fn texture_id(&self) -> u32 {
        self.texture_id
    }

    /// Clear `target` and draw `surface_texture` over it
    pub fn draw(
        &self,
        context: &GpuContext,
        target: &wgpu::TextureView,
        surface_texture: &SurfaceTexture,
        st_matrix: [f32; 16],
        flip_y: bool,
    ) -> Result<()> {
        context.push_error_scope();

        let uniforms = QuadUniforms::new(st_matrix, flip_y, surface_texture.full_range());
        context
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let [y_view, u_view, v_view] = surface_texture.plane_views();
        let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Texture Quad Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(y_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(u_view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(v_view),
                },
            ],
        });

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Texture Quad Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Texture Quad Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            pass.draw(0..4, 0..1);
        }
        context.queue.submit(Some(encoder.finish()));

        // Unbind
        drop(bind_group);

        context.check_gpu_error("draw")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_layout_matches_shader() {
        // Two mat4x4<f32> plus one vec4<f32>
        assert_eq!(std::mem::size_of::<QuadUniforms>(), 144);
        assert_eq!(VERTEX_STRIDE, 20);
        assert_eq!(QUAD_VERTICES.len() * 4, 4 * VERTEX_STRIDE as usize);
    }

    #[test]
    fn test_flip_st() {
        let identity = glam::Mat4::IDENTITY.to_cols_array();
        let flipped = flip_st(identity);
        assert_eq!(flipped[5], -1.0);
        assert_eq!(flipped[13], 1.0);
        // Flipping twice restores the transform
        assert_eq!(flip_st(flipped), identity);
    }

    #[test]
    fn test_flipped_transform_reads_top_row_first() {
        // Visible 1080 rows of a 1088-row picture
        let sy = 1080.0 / 1088.0;
        let st = flip_st(
            crate::video::YuvImage::solid(16, 1088, 0, 0)
                .with_visible_size(16, 1080)
                .transform_matrix(),
        );
        let m = glam::Mat4::from_cols_array(&st);
        let top = m * glam::Vec4::new(0.0, 1.0, 0.0, 1.0);
        let bottom = m * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(top.y.abs() < 1e-6);
        assert!((bottom.y - sy).abs() < 1e-6);
    }

    #[test]
    fn test_uniform_params() {
        let limited = QuadUniforms::new(glam::Mat4::IDENTITY.to_cols_array(), true, false);
        assert_eq!(limited.params[0], 0.0);
        assert_eq!(limited.mvp, glam::Mat4::IDENTITY.to_cols_array_2d());
        assert_eq!(limited.st[1][1], -1.0);
        assert_eq!(limited.st[3][1], 1.0);
    }
}
