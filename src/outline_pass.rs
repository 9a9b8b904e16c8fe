//! Full-screen composite of the offscreen targets onto the swapchain.
//!
//! The vertex stage generates two triangles from `vertex_index`, so the pass
//! binds no vertex buffers. The fragment stage samples the color and depth
//! targets through one nearest-filter sampler and darkens texels where the
//! linearised depth jumps. Output is premultiplied and blended "over" a
//! cleared background.

use std::num::NonZeroU64;

use crate::error::StartupError;
use crate::resource::{GpuResource, ResourceError};
use crate::shader::{ENTRY_POINT, ShaderBindings, ShaderLibrary, ShaderRequest, group_layouts};

/// Background the composite is blended over.
pub const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.2,
    g: 0.5,
    b: 0.4,
    a: 1.0,
};

/// Premultiplied alpha "over" for both color and alpha.
pub const PREMULTIPLIED_OVER: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
};

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OutlineUniforms {
    pub near_far: [f32; 2],
    /// One texel in UV units, for neighbour lookups.
    pub texel_size: [f32; 2],
}

fn fragment_bindings() -> ShaderBindings {
    ShaderBindings::new()
        .texture(wgpu::TextureSampleType::Float { filterable: false })
        .texture(wgpu::TextureSampleType::Depth)
        .samplers(1)
        .uniform_buffers(1)
}

pub struct OutlinePass {
    pipeline: GpuResource<wgpu::RenderPipeline>,
    sampler: GpuResource<wgpu::Sampler>,
    uniforms: GpuResource<wgpu::Buffer>,
    fragment_layout: wgpu::BindGroupLayout,
    /// The fullscreen vertex stage declares no resources, but its group
    /// still has to be bound.
    vertex_bind_group: wgpu::BindGroup,
}

impl OutlinePass {
    /// Compile the outline shaders and build the pipeline for a swapchain
    /// of `surface_format`.
    pub fn new(
        device: &wgpu::Device,
        shaders: &ShaderLibrary,
        surface_format: wgpu::TextureFormat,
    ) -> Result<Self, StartupError> {
        let vertex = shaders.load(
            device,
            &ShaderRequest::new("fullscreen.vert", ShaderBindings::new()),
        )?;
        let fragment = shaders.load(
            device,
            &ShaderRequest::new("depth_outline.frag", fragment_bindings()),
        )?;
        let (Some(vs), Some(fs)) = (vertex.module.get(), fragment.module.get()) else {
            return Err(StartupError::resource("outline shaders")(ResourceError::NotCreated {
                kind: "Shader",
            }));
        };

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Outline Pipeline Layout"),
            bind_group_layouts: &group_layouts(&[&vertex, &fragment]),
            push_constant_ranges: &[],
        });

        let mut pipeline = GpuResource::<wgpu::RenderPipeline>::new();
        pipeline
            .create(
                device,
                wgpu::RenderPipelineDescriptor {
                    label: Some("Outline Pipeline"),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: vs,
                        entry_point: Some(ENTRY_POINT),
                        buffers: &[],
                        compilation_options: Default::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: fs,
                        entry_point: Some(ENTRY_POINT),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: surface_format,
                            blend: Some(PREMULTIPLIED_OVER),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                },
            )
            .map_err(StartupError::resource("outline pipeline"))?;

        let mut sampler = GpuResource::<wgpu::Sampler>::new();
        sampler
            .create(
                device,
                wgpu::SamplerDescriptor {
                    label: Some("Outline Sampler"),
                    address_mode_u: wgpu::AddressMode::Repeat,
                    address_mode_v: wgpu::AddressMode::Repeat,
                    address_mode_w: wgpu::AddressMode::Repeat,
                    mag_filter: wgpu::FilterMode::Nearest,
                    min_filter: wgpu::FilterMode::Nearest,
                    mipmap_filter: wgpu::FilterMode::Nearest,
                    ..Default::default()
                },
            )
            .map_err(StartupError::resource("outline sampler"))?;

        let mut uniforms = GpuResource::<wgpu::Buffer>::new();
        uniforms
            .create(
                device,
                wgpu::BufferDescriptor {
                    label: Some("Outline Uniforms"),
                    size: std::mem::size_of::<OutlineUniforms>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                },
            )
            .map_err(StartupError::resource("outline uniforms"))?;

        let vertex_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Outline Vertex Bind Group"),
            layout: &vertex.layout,
            entries: &[],
        });
        let fragment_layout = fragment.layout.clone();

        vertex
            .release()
            .and_then(|_| fragment.release())
            .map_err(StartupError::resource("outline shaders"))?;
        log::debug!("Outline pass ready for {surface_format:?}");

        Ok(Self {
            pipeline,
            sampler,
            uniforms,
            fragment_layout,
            vertex_bind_group,
        })
    }

    /// Record the composite into `target`.
    ///
    /// `views` are the offscreen color and depth views the geometry pass
    /// rendered this frame.
    pub fn record(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        views: (&wgpu::TextureView, &wgpu::TextureView),
        uniforms: OutlineUniforms,
    ) -> Result<(), ResourceError> {
        let (Some(pipeline), Some(sampler), Some(buffer)) =
            (self.pipeline.get(), self.sampler.get(), self.uniforms.get())
        else {
            return Err(ResourceError::NotCreated {
                kind: "Graphics Pipeline",
            });
        };
        queue.write_buffer(buffer, 0, bytemuck::bytes_of(&uniforms));

        let (color_view, depth_view) = views;
        let fragment_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Outline Fragment Bind Group"),
            layout: &self.fragment_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(color_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(depth_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer,
                        offset: 0,
                        size: NonZeroU64::new(std::mem::size_of::<OutlineUniforms>() as u64),
                    }),
                },
            ],
        });

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Outline Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, &self.vertex_bind_group, &[]);
        render_pass.set_bind_group(1, &fragment_bind_group, &[0]);
        render_pass.draw(0..6, 0..1);
        Ok(())
    }

    pub fn release(&mut self) -> Result<(), ResourceError> {
        self.uniforms.release()?;
        self.sampler.release()?;
        self.pipeline.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_target::RenderTargets;
    use crate::test_support;

    #[test]
    fn uniforms_are_two_vec2() {
        assert_eq!(std::mem::size_of::<OutlineUniforms>(), 16);
    }

    #[test]
    fn blend_is_premultiplied_over() {
        assert_eq!(PREMULTIPLIED_OVER, wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING);
    }

    #[test]
    fn fragment_bindings_match_shader_slots() {
        let entries = fragment_bindings().layout_entries(crate::shader::ShaderStage::Fragment);
        assert_eq!(entries.len(), 4);
        assert!(matches!(
            entries[0].ty,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                ..
            }
        ));
        assert!(matches!(
            entries[1].ty,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Depth,
                ..
            }
        ));
        assert!(matches!(entries[2].ty, wgpu::BindingType::Sampler(_)));
        assert!(matches!(entries[3].ty, wgpu::BindingType::Buffer { .. }));
    }

    fn clear_targets(encoder: &mut wgpu::CommandEncoder, targets: &RenderTargets) {
        let (color, depth) = targets.views().unwrap();
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Test Clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }

    #[test]
    fn composites_offscreen_targets() {
        let Some((device, queue)) = test_support::device() else {
            return;
        };
        let library = test_support::shader_library();
        let mut pass = OutlinePass::new(&device, &library, wgpu::TextureFormat::Rgba8Unorm).unwrap();

        let mut targets = RenderTargets::new();
        targets.resize(&device, 16, 16).unwrap();
        let mut texture = GpuResource::<wgpu::Texture>::new();
        let output = texture
            .create(
                &device,
                wgpu::TextureDescriptor {
                    label: Some("Test Output"),
                    size: wgpu::Extent3d {
                        width: 16,
                        height: 16,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                },
            )
            .unwrap()
            .create_view(&Default::default());

        let mut encoder = device.create_command_encoder(&Default::default());
        clear_targets(&mut encoder, &targets);
        let uniforms = OutlineUniforms {
            near_far: [0.1, 1000.0],
            texel_size: targets.texel_size(),
        };
        pass.record(&device, &queue, &mut encoder, &output, targets.views().unwrap(), uniforms)
            .unwrap();
        queue.submit(Some(encoder.finish()));

        // Transparent color over flat depth: no edges, only the background.
        let pixels = test_support::read_rgba8(&device, &queue, texture.get().unwrap());
        let expected = [51u8, 128, 102, 255];
        for pixel in pixels.chunks(4) {
            for (got, want) in pixel.iter().zip(expected) {
                assert!(got.abs_diff(want) <= 1, "pixel {pixel:?}, expected {expected:?}");
            }
        }

        pass.release().unwrap();
        targets.release().unwrap();
        texture.release().unwrap();
    }
}
