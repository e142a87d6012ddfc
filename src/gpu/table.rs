//! Handle table resolving plan ids to wgpu objects

use crate::gpu::plan::{BindingId, KernelId, ResourceId};

struct TableResource {
    label: String,
    /// `None` for textures, which plans track but never copy or clear
    buffer: Option<wgpu::Buffer>,
}

/// Pipelines, bind groups and resources referenced by frame plans
///
/// Stages register what they create at setup time and keep the returned ids.
/// The table holds cloned handles; the allocating stage stays the owner.
#[derive(Default)]
pub struct GpuTable {
    kernels: Vec<(String, wgpu::ComputePipeline)>,
    bindings: Vec<wgpu::BindGroup>,
    resources: Vec<TableResource>,
}

impl GpuTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_kernel(&mut self, label: &str, pipeline: wgpu::ComputePipeline) -> KernelId {
        self.kernels.push((label.to_string(), pipeline));
        KernelId(self.kernels.len() as u32 - 1)
    }

    pub fn add_binding(&mut self, bind_group: wgpu::BindGroup) -> BindingId {
        self.bindings.push(bind_group);
        BindingId(self.bindings.len() as u32 - 1)
    }

    /// Swap in a rebuilt bind group between frames
    pub fn replace_binding(&mut self, id: BindingId, bind_group: wgpu::BindGroup) {
        if let Some(slot) = self.bindings.get_mut(id.0 as usize) {
            *slot = bind_group;
        } else {
            log::warn!("replace_binding: unknown binding {:?}", id);
        }
    }

    pub fn add_buffer(&mut self, label: &str, buffer: &wgpu::Buffer) -> ResourceId {
        self.resources.push(TableResource {
            label: label.to_string(),
            buffer: Some(buffer.clone()),
        });
        ResourceId(self.resources.len() as u32 - 1)
    }

    pub fn add_texture(&mut self, label: &str) -> ResourceId {
        self.resources.push(TableResource { label: label.to_string(), buffer: None });
        ResourceId(self.resources.len() as u32 - 1)
    }

    pub fn kernel(&self, id: KernelId) -> Option<&wgpu::ComputePipeline> {
        self.kernels.get(id.0 as usize).map(|(_, p)| p)
    }

    pub fn kernel_label(&self, id: KernelId) -> &str {
        self.kernels.get(id.0 as usize).map_or("<unknown>", |(l, _)| l.as_str())
    }

    pub fn binding(&self, id: BindingId) -> Option<&wgpu::BindGroup> {
        self.bindings.get(id.0 as usize)
    }

    pub fn buffer(&self, id: ResourceId) -> Option<&wgpu::Buffer> {
        self.resources.get(id.0 as usize).and_then(|r| r.buffer.as_ref())
    }

    pub fn label(&self, id: ResourceId) -> &str {
        self.resources.get(id.0 as usize).map_or("<unknown>", |r| r.label.as_str())
    }

    pub fn kernel_count(&self) -> usize {
        self.kernels.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}
