//! GPU to CPU readback.
//!
//! Blocking readback waits on the calling thread. Asynchronous readback
//! submits the copy, then waits for the map on one detached thread and hands
//! the data to a callback. A [`ReadbackGuard`] admits at most one
//! asynchronous request at a time; overlapping requests are rejected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytemuck::Pod;

use crate::core::error::Error;
use crate::gpu::context::GpuContext;

/// Outcome of an asynchronous readback request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadbackStatus {
    /// Copy submitted; the callback fires exactly once
    Started,
    /// Another readback is still in flight; nothing was done
    Rejected,
}

/// In-progress flag shared by a readback source and its tickets
#[derive(Clone, Debug, Default)]
pub struct ReadbackGuard {
    busy: Arc<AtomicBool>,
}

impl ReadbackGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag, or `None` if a readback is in flight
    pub fn try_acquire(&self) -> Option<ReadbackTicket> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ReadbackTicket { busy: self.busy.clone() })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held for the lifetime of one readback; releases the guard on drop
#[derive(Debug)]
pub struct ReadbackTicket {
    busy: Arc<AtomicBool>,
}

impl Drop for ReadbackTicket {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

fn staging_for(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("claybrush_readback_staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn submit_copy(ctx: &GpuContext, src: &wgpu::Buffer, staging: &wgpu::Buffer, size: u64) -> wgpu::SubmissionIndex {
    let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("claybrush_readback"),
    });
    encoder.copy_buffer_to_buffer(src, 0, staging, 0, size);
    ctx.queue.submit(Some(encoder.finish()))
}

/// Wait for `staging` to map and copy its contents out
fn wait_and_collect<T: Pod>(
    device: &wgpu::Device,
    staging: &wgpu::Buffer,
    index: wgpu::SubmissionIndex,
) -> Result<Vec<T>, Error> {
    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::Wait { submission_index: Some(index), timeout: None })
        .map_err(|e| Error::Gpu(format!("readback poll failed: {}", e)))?;

    rx.recv()
        .map_err(|e| Error::Gpu(format!("readback channel closed: {}", e)))?
        .map_err(|e| Error::Gpu(format!("readback map failed: {}", e)))?;

    let data = slice.get_mapped_range();
    let values: Vec<T> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();
    Ok(values)
}

/// Copy the first `count` elements of `src` to the CPU, blocking until done
pub fn read_pod_blocking<T: Pod>(ctx: &GpuContext, src: &wgpu::Buffer, count: usize) -> Result<Vec<T>, Error> {
    let size = (count * std::mem::size_of::<T>()) as u64;
    if size > src.size() {
        return Err(Error::Gpu(format!("readback of {} bytes from a {} byte buffer", size, src.size())));
    }
    let staging = staging_for(&ctx.device, size);
    let index = submit_copy(ctx, src, &staging, size);
    wait_and_collect(&ctx.device, &staging, index)
}

/// Copy the first `count` elements of `src` to the CPU without blocking
///
/// The copy is submitted immediately. One detached thread waits for it and
/// invokes `callback`; the ticket is released only after the callback ran.
pub fn read_pod_async<T, F>(
    ctx: &GpuContext,
    src: &wgpu::Buffer,
    count: usize,
    ticket: ReadbackTicket,
    callback: F,
) -> Result<(), Error>
where
    T: Pod + Send,
    F: FnOnce(Result<Vec<T>, Error>) + Send + 'static,
{
    let size = (count * std::mem::size_of::<T>()) as u64;
    if size > src.size() {
        return Err(Error::Gpu(format!("readback of {} bytes from a {} byte buffer", size, src.size())));
    }
    let staging = staging_for(&ctx.device, size);
    let index = submit_copy(ctx, src, &staging, size);
    let device = ctx.device.clone();

    std::thread::Builder::new()
        .name("claybrush-readback".into())
        .spawn(move || {
            let _ticket = ticket;
            let result = wait_and_collect::<T>(&device, &staging, index);
            callback(result);
        })?;
    Ok(())
}
