//! Opaque scene rendering into the offscreen color and depth targets.
//!
//! The pass reads two vertex streams (positions in slot 0, normals in slot 1)
//! and a shared 16-bit index buffer. It uses two bind groups, one per shader
//! stage:
//!
//! - **Group 0**: [`VertexUniforms`], one slot per draw, selected with a
//!   dynamic offset
//! - **Group 1**: [`FragmentUniforms`], written once per frame
//!
//! Every instance's uniforms are written into their own slot before the pass
//! is recorded, then each draw binds its slot immediately before issuing its
//! indexed draw. This keeps per-draw data correct even though all writes land
//! before the single submission.

use std::num::NonZeroU64;

use glam::Mat4;

use crate::camera::Camera;
use crate::error::StartupError;
use crate::render_target::{COLOR_FORMAT, DEPTH_FORMAT};
use crate::resource::{GpuResource, ResourceError};
use crate::scene::Scene;
use crate::shader::{ENTRY_POINT, ShaderBindings, ShaderLibrary, ShaderRequest, group_layouts};

/// Per-draw vertex stage uniforms.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexUniforms {
    /// Projection times view.
    pub proj_view: [[f32; 4]; 4],
    /// Model matrix of the instance being drawn.
    pub model: [[f32; 4]; 4],
}

/// Per-frame fragment stage uniforms.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FragmentUniforms {
    pub near_far: [f32; 2],
    pub _pad0: [f32; 2],
    /// Camera position in world space.
    pub view_pos: [f32; 3],
    pub _pad1: f32,
}

/// Slot 0: positions.
pub const POSITION_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: std::mem::size_of::<[f32; 3]>() as u64,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &[wgpu::VertexAttribute {
        offset: 0,
        shader_location: 0,
        format: wgpu::VertexFormat::Float32x3,
    }],
};

/// Slot 1: normals.
pub const NORMAL_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: std::mem::size_of::<[f32; 3]>() as u64,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &[wgpu::VertexAttribute {
        offset: 0,
        shader_location: 1,
        format: wgpu::VertexFormat::Float32x3,
    }],
};

const INITIAL_SLOTS: usize = 64;

/// Distance between dynamic uniform slots for a given device alignment.
pub fn slot_stride(alignment: u32) -> u64 {
    (std::mem::size_of::<VertexUniforms>() as u64).next_multiple_of(u64::from(alignment.max(1)))
}

fn uniform_buffer(
    device: &wgpu::Device,
    label: &'static str,
    size: u64,
) -> Result<GpuResource<wgpu::Buffer>, ResourceError> {
    let mut buffer = GpuResource::<wgpu::Buffer>::new();
    buffer.create(
        device,
        wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        },
    )?;
    Ok(buffer)
}

fn uniform_bind_group(
    device: &wgpu::Device,
    label: &'static str,
    layout: &wgpu::BindGroupLayout,
    buffer: &wgpu::Buffer,
    binding_size: u64,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer,
                offset: 0,
                size: NonZeroU64::new(binding_size),
            }),
        }],
    })
}

/// Indexed mesh rendering with depth test and write.
pub struct GeometryPass {
    pipeline: GpuResource<wgpu::RenderPipeline>,
    vertex_layout: wgpu::BindGroupLayout,
    vertex_uniforms: GpuResource<wgpu::Buffer>,
    vertex_bind_group: Option<wgpu::BindGroup>,
    fragment_uniforms: GpuResource<wgpu::Buffer>,
    fragment_bind_group: Option<wgpu::BindGroup>,
    stride: u64,
    slots: usize,
}

impl GeometryPass {
    /// Compile the geometry shaders and build the pipeline.
    ///
    /// The shader modules are released once the pipeline exists.
    pub fn new(device: &wgpu::Device, shaders: &ShaderLibrary) -> Result<Self, StartupError> {
        let vertex = shaders.load(
            device,
            &ShaderRequest::new(
                "position_transform.vert",
                ShaderBindings::new().uniform_buffers(1),
            ),
        )?;
        let fragment = shaders.load(
            device,
            &ShaderRequest::new(
                "solid_color_depth.frag",
                ShaderBindings::new().uniform_buffers(1),
            ),
        )?;
        let (Some(vs), Some(fs)) = (vertex.module.get(), fragment.module.get()) else {
            return Err(StartupError::resource("geometry shaders")(
                ResourceError::NotCreated { kind: "Shader" },
            ));
        };

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Geometry Pipeline Layout"),
            bind_group_layouts: &group_layouts(&[&vertex, &fragment]),
            push_constant_ranges: &[],
        });

        let mut pipeline = GpuResource::<wgpu::RenderPipeline>::new();
        pipeline
            .create(
                device,
                wgpu::RenderPipelineDescriptor {
                    label: Some("Geometry Pipeline"),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: vs,
                        entry_point: Some(ENTRY_POINT),
                        buffers: &[POSITION_LAYOUT, NORMAL_LAYOUT],
                        compilation_options: Default::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: fs,
                        entry_point: Some(ENTRY_POINT),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: COLOR_FORMAT,
                            blend: Some(wgpu::BlendState::REPLACE),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        cull_mode: Some(wgpu::Face::Front),
                        front_face: wgpu::FrontFace::Cw,
                        ..Default::default()
                    },
                    depth_stencil: Some(wgpu::DepthStencilState {
                        format: DEPTH_FORMAT,
                        depth_write_enabled: true,
                        depth_compare: wgpu::CompareFunction::Less,
                        stencil: wgpu::StencilState::default(),
                        bias: wgpu::DepthBiasState::default(),
                    }),
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                },
            )
            .map_err(StartupError::resource("geometry pipeline"))?;

        let fragment_size = std::mem::size_of::<FragmentUniforms>() as u64;
        let fragment_uniforms = uniform_buffer(device, "Geometry Fragment Uniforms", fragment_size)
            .map_err(StartupError::resource("geometry fragment uniforms"))?;
        let fragment_bind_group = fragment_uniforms.get().map(|buffer| {
            uniform_bind_group(
                device,
                "Geometry Fragment Bind Group",
                &fragment.layout,
                buffer,
                fragment_size,
            )
        });

        let mut pass = Self {
            pipeline,
            vertex_layout: vertex.layout.clone(),
            vertex_uniforms: GpuResource::new(),
            vertex_bind_group: None,
            fragment_uniforms,
            fragment_bind_group,
            stride: slot_stride(device.limits().min_uniform_buffer_offset_alignment),
            slots: 0,
        };
        pass.ensure_slots(device, INITIAL_SLOTS)
            .map_err(StartupError::resource("geometry vertex uniforms"))?;

        vertex
            .release()
            .and_then(|_| fragment.release())
            .map_err(StartupError::resource("geometry shaders"))?;
        log::debug!("Geometry pass ready");
        Ok(pass)
    }

    /// Make room for at least `count` per-draw uniform slots.
    fn ensure_slots(&mut self, device: &wgpu::Device, count: usize) -> Result<(), ResourceError> {
        if count <= self.slots && self.vertex_bind_group.is_some() {
            return Ok(());
        }
        let slots = count.max(INITIAL_SLOTS).next_power_of_two();
        let buffer = uniform_buffer(device, "Geometry Vertex Uniforms", slots as u64 * self.stride)?;
        let Some(raw) = buffer.get() else {
            return Err(ResourceError::NotCreated { kind: "Buffer" });
        };
        let bind_group = uniform_bind_group(
            device,
            "Geometry Vertex Bind Group",
            &self.vertex_layout,
            raw,
            std::mem::size_of::<VertexUniforms>() as u64,
        );

        if self.vertex_uniforms.is_created() {
            self.vertex_uniforms.release()?;
        }
        self.vertex_uniforms = buffer;
        self.vertex_bind_group = Some(bind_group);
        self.slots = slots;
        log::debug!("Geometry pass grew to {slots} uniform slots");
        Ok(())
    }

    /// Record the pass into `encoder`, drawing `order` (indices into the
    /// scene's instances) in the given sequence, which [`draw_order`] sorts
    /// farthest first.
    ///
    /// [`draw_order`]: crate::scene::draw_order
    ///
    /// Always clears both targets, so an empty scene still yields a valid
    /// frame.
    pub fn record(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        targets: (&wgpu::TextureView, &wgpu::TextureView),
        camera: &Camera,
        scene: &Scene,
        order: &[usize],
    ) -> Result<(), ResourceError> {
        self.ensure_slots(device, order.len())?;

        let proj_view = (camera.proj() * camera.view()).to_cols_array_2d();
        let mut slots = vec![0u8; order.len() * self.stride as usize];
        for (slot, &index) in order.iter().enumerate() {
            let model = scene
                .instances
                .get(index)
                .map_or(Mat4::IDENTITY, |instance| instance.model_matrix());
            let uniforms = VertexUniforms {
                proj_view,
                model: model.to_cols_array_2d(),
            };
            let start = slot * self.stride as usize;
            slots[start..start + std::mem::size_of::<VertexUniforms>()]
                .copy_from_slice(bytemuck::bytes_of(&uniforms));
        }

        let fragment = FragmentUniforms {
            near_far: camera.near_far(),
            view_pos: camera.position.to_array(),
            ..Default::default()
        };

        let (
            Some(pipeline),
            Some(vertex_buffer),
            Some(vertex_group),
            Some(fragment_buffer),
            Some(fragment_group),
        ) = (
            self.pipeline.get(),
            self.vertex_uniforms.get(),
            self.vertex_bind_group.as_ref(),
            self.fragment_uniforms.get(),
            self.fragment_bind_group.as_ref(),
        )
        else {
            return Err(ResourceError::NotCreated {
                kind: "Graphics Pipeline",
            });
        };

        if !slots.is_empty() {
            queue.write_buffer(vertex_buffer, 0, &slots);
        }
        queue.write_buffer(fragment_buffer, 0, bytemuck::bytes_of(&fragment));

        let (color_view, depth_view) = targets;
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Geometry Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        let Some((indices, positions, normals)) =
            scene.geometry.as_ref().and_then(|geometry| geometry.buffers())
        else {
            return Ok(());
        };

        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(1, fragment_group, &[0]);
        render_pass.set_vertex_buffer(0, positions.slice(..));
        render_pass.set_vertex_buffer(1, normals.slice(..));
        render_pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint16);

        for (slot, &index) in order.iter().enumerate() {
            let Some(instance) = scene.instances.get(index) else {
                continue;
            };
            if instance.num_indices == 0 {
                continue;
            }
            let offset = (slot as u64 * self.stride) as u32;
            render_pass.set_bind_group(0, vertex_group, &[offset]);
            render_pass.draw_indexed(instance.index_range(), instance.base_vertex, 0..1);
        }
        Ok(())
    }

    /// Release the pipeline and uniform buffers.
    pub fn release(&mut self) -> Result<(), ResourceError> {
        self.vertex_bind_group = None;
        self.fragment_bind_group = None;
        for buffer in [&mut self.vertex_uniforms, &mut self.fragment_uniforms] {
            if buffer.is_created() {
                buffer.release()?;
            }
        }
        self.pipeline.release()
    }
}
