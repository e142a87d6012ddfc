//! Bind group layout and pipeline helpers shared by the compute stages

use bytemuck::Pod;

/// Read-only or read-write storage buffer entry
pub fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Uniform buffer entry, optionally with a dynamic offset
pub fn uniform_entry(binding: u32, dynamic: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Sampled 3D float texture read with `textureLoad`
pub fn texture_3d_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D3,
            multisampled: false,
        },
        count: None,
    }
}

/// Write-only 3D storage texture
pub fn storage_texture_3d_entry(binding: u32, format: wgpu::TextureFormat) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format,
            view_dimension: wgpu::TextureViewDimension::D3,
        },
        count: None,
    }
}

/// Build a compute pipeline from WGSL fragments concatenated in order
pub fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    sources: &[&str],
    entry_point: &str,
    layout: &wgpu::BindGroupLayout,
) -> wgpu::ComputePipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(sources.concat().into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        immediate_size: 0,
    });

    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

/// Uniform buffer initialised with `value`
pub fn uniform_buffer<T: Pod>(device: &wgpu::Device, queue: &wgpu::Queue, label: &str, value: &T) -> wgpu::Buffer {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: std::mem::size_of::<T>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    queue.write_buffer(&buffer, 0, bytemuck::bytes_of(value));
    buffer
}

/// Uniform buffer holding `entries` at [`DYNAMIC_STRIDE`] intervals, bound
/// with a dynamic offset
pub fn dynamic_uniform_buffer<T: Pod>(device: &wgpu::Device, queue: &wgpu::Queue, label: &str, entries: &[T]) -> wgpu::Buffer {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: entries.len().max(1) as u64 * DYNAMIC_STRIDE as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    for (i, entry) in entries.iter().enumerate() {
        queue.write_buffer(&buffer, i as u64 * DYNAMIC_STRIDE as u64, bytemuck::bytes_of(entry));
    }
    buffer
}

/// Binding of one `T`-sized window of a dynamic uniform buffer
pub fn dynamic_binding<T: Pod>(buffer: &wgpu::Buffer) -> wgpu::BindingResource<'_> {
    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
        buffer,
        offset: 0,
        size: std::num::NonZeroU64::new(std::mem::size_of::<T>() as u64),
    })
}

/// Storage buffer of `size` bytes with extra usages
pub fn storage_buffer(device: &wgpu::Device, label: &str, size: u64, extra: wgpu::BufferUsages) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(256),
        usage: wgpu::BufferUsages::STORAGE | extra,
        mapped_at_creation: false,
    })
}

/// Workgroup count covering `n` invocations
#[inline]
pub fn groups(n: u32, size: u32) -> u32 {
    n.div_ceil(size).max(1)
}

/// Stride between dynamic-offset uniform entries
pub const DYNAMIC_STRIDE: u32 = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_rounds_up() {
        assert_eq!(groups(0, 64), 1);
        assert_eq!(groups(64, 64), 1);
        assert_eq!(groups(65, 64), 2);
        assert_eq!(groups(1_048_576, 256), 4096);
    }

    #[test]
    fn test_dynamic_stride_meets_uniform_alignment() {
        assert_eq!(DYNAMIC_STRIDE % wgpu::Limits::default().min_uniform_buffer_offset_alignment, 0);
    }
}
