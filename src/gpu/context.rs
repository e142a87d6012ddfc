//! GPU context management using wgpu
//!
//! The pipeline never creates a window or surface. Hosts either hand over the
//! device they already render with, or ask for a headless one.

use crate::core::error::Error;

/// Storage buffers bound by the widest compute kernel
const REQUIRED_STORAGE_BUFFERS: u32 = 8;

/// Device handles shared by every stage
///
/// Passed by reference into each stage entry point in place of a global
/// application instance.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// Limits the device was created with
    pub limits: wgpu::Limits,
}

impl GpuContext {
    /// Wrap a device owned by the host renderer
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let limits = device.limits();
        Self { device, queue, limits }
    }

    /// Create a headless compute context
    pub async fn new_headless() -> Result<Self, Error> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::Gpu(format!("No suitable adapter found: {:?}", e)))?;

        let adapter_limits = adapter.limits();
        if adapter_limits.max_storage_buffers_per_shader_stage < REQUIRED_STORAGE_BUFFERS {
            return Err(Error::Gpu(format!(
                "adapter supports {} storage buffers per stage, {} required",
                adapter_limits.max_storage_buffers_per_shader_stage, REQUIRED_STORAGE_BUFFERS
            )));
        }

        let device_desc = wgpu::DeviceDescriptor {
            label: Some("claybrush_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits {
                max_storage_buffers_per_shader_stage: REQUIRED_STORAGE_BUFFERS,
                max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
                max_buffer_size: adapter_limits.max_buffer_size,
                ..Default::default()
            },
            memory_hints: wgpu::MemoryHints::Performance,
            experimental_features: Default::default(),
            trace: Default::default(),
        };

        let (device, queue) = adapter
            .request_device(&device_desc)
            .await
            .map_err(|e| Error::Gpu(e.to_string()))?;

        log::info!("GPU adapter: {}", adapter.get_info().name);
        log::info!("GPU buffer limits: max_buffer_size={}MB, max_storage_binding={}MB",
            adapter_limits.max_buffer_size / 1024 / 1024,
            adapter_limits.max_storage_buffer_binding_size / 1024 / 1024);

        Ok(Self::from_device(device, queue))
    }

    /// Blocking variant of [`GpuContext::new_headless`]
    pub fn new_headless_blocking() -> Result<Self, Error> {
        pollster::block_on(Self::new_headless())
    }

    /// Largest single buffer a stage may allocate and bind as storage
    pub fn max_storage_allocation(&self) -> u64 {
        self.limits
            .max_buffer_size
            .min(self.limits.max_storage_buffer_binding_size as u64)
    }

    /// Record, submit and wait for a small setup batch
    ///
    /// The only place besides readback where the CPU blocks on the GPU.
    pub fn submit_and_wait<F>(&self, label: &str, record: F) -> Result<(), Error>
    where
        F: FnOnce(&mut wgpu::CommandEncoder),
    {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });
        record(&mut encoder);
        let index = self.queue.submit(Some(encoder.finish()));
        self.device
            .poll(wgpu::PollType::Wait { submission_index: Some(index), timeout: None })
            .map_err(|e| Error::Gpu(format!("{}: {}", label, e)))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::GpuContext;

    /// Headless context, or `None` on machines without an adapter
    pub fn context() -> Option<GpuContext> {
        crate::core::logging::init_for_tests();
        match GpuContext::new_headless_blocking() {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                log::warn!("skipping GPU test: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_and_wait_clears_buffer() {
        let Some(ctx) = test_support::context() else { return };

        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("test_clear"),
            size: 256,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        ctx.submit_and_wait("test_clear", |encoder| {
            encoder.clear_buffer(&buffer, 0, None);
        })
        .unwrap();

        assert!(ctx.max_storage_allocation() > 0);
    }
}
