//! `wgpu`-backed frame arrays: one 2D array texture per slot, a chunk's frames as its
//! layers. Fences ride the queue's submitted-work-done callback.
//!
//! The embedder supplies the device and queue (and with them the surface, shaders and
//! samplers); this type only owns the two slot textures and the upload/fence/present
//! plumbing the streaming core needs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::foundation::error::{StreamError, StreamResult};
use crate::foundation::timing::{Deadline, POLL_PERIOD};
use crate::gpu::FrameArrays;
use crate::store::{CHUNK_FRAME_COUNT, Geometry, PIXEL_SIZE};
use crate::stream::double_buffer::SLOT_COUNT;

/// Called with `(slot, frame_within_chunk)` each time a frame should reach the screen;
/// the embedder binds the slot's texture view and draws.
pub type PresentFn = Box<dyn FnMut(usize, u32) -> StreamResult<()>>;

pub struct WgpuFrames {
    device: wgpu::Device,
    queue: wgpu::Queue,
    geom: Geometry,
    slots: [wgpu::Texture; SLOT_COUNT],
    present: Option<PresentFn>,
}

/// Signals once all queue work submitted before its insertion has finished.
pub struct WgpuFence {
    done: Arc<AtomicBool>,
}

impl WgpuFrames {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, geom: Geometry) -> Self {
        let slots = [
            create_slot_texture(&device, &geom, "volstream_slot_0"),
            create_slot_texture(&device, &geom, "volstream_slot_1"),
        ];
        WgpuFrames {
            device,
            queue,
            geom,
            slots,
            present: None,
        }
    }

    /// Request an adapter and device with no surface, for benchmarks and soak runs
    /// where the frames never reach a screen.
    pub fn headless(geom: Geometry) -> StreamResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                StreamError::gpu("no gpu adapter available")
            }
            other => StreamError::gpu(format!("wgpu request_adapter failed: {other:?}")),
        })?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| StreamError::gpu(format!("wgpu request_device failed: {e:?}")))?;
        Ok(Self::new(device, queue, geom))
    }

    /// Install the embedder's draw callback. Without one, `present` is a no-op (useful
    /// for warming the stream before a window exists).
    pub fn with_present(mut self, present: PresentFn) -> Self {
        self.present = Some(present);
        self
    }

    /// Texture backing `slot`, for view creation and bind groups.
    pub fn slot_texture(&self, slot: usize) -> &wgpu::Texture {
        &self.slots[slot]
    }
}

fn create_slot_texture(device: &wgpu::Device, geom: &Geometry, label: &str) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: geom.width,
            height: geom.height,
            depth_or_array_layers: CHUNK_FRAME_COUNT,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

impl FrameArrays for WgpuFrames {
    type Fence = WgpuFence;

    fn upload(&mut self, slot: usize, frames: &[u8]) -> StreamResult<()> {
        if slot >= SLOT_COUNT {
            return Err(StreamError::gpu(format!("slot {slot} out of range")));
        }
        if frames.len() != self.geom.chunk_size() {
            return Err(StreamError::gpu(format!(
                "upload of {} bytes into a {}-byte slot",
                frames.len(),
                self.geom.chunk_size()
            )));
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.slots[slot],
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            frames,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.geom.width * PIXEL_SIZE),
                rows_per_image: Some(self.geom.height),
            },
            wgpu::Extent3d {
                width: self.geom.width,
                height: self.geom.height,
                depth_or_array_layers: CHUNK_FRAME_COUNT,
            },
        );
        Ok(())
    }

    fn fence_insert(&mut self) -> WgpuFence {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        self.queue
            .on_submitted_work_done(move || flag.store(true, Ordering::Release));
        // write_texture work is only scheduled; an empty submit flushes it so the
        // callback covers the upload.
        self.queue.submit(std::iter::empty());
        WgpuFence { done }
    }

    fn fence_try_wait(&mut self, fence: &WgpuFence, deadline: Deadline) -> bool {
        loop {
            if fence.done.load(Ordering::Acquire) {
                return true;
            }
            if deadline.expired() {
                return false;
            }
            let _ = self.device.poll(wgpu::PollType::Poll);
            if fence.done.load(Ordering::Acquire) {
                return true;
            }
            std::thread::sleep(POLL_PERIOD);
        }
    }

    fn fence_block(&mut self, fence: &WgpuFence) {
        while !fence.done.load(Ordering::Acquire) {
            if self.device.poll(wgpu::PollType::wait_indefinitely()).is_err() {
                // Lost device; the flag can never flip. Next upload surfaces the error.
                return;
            }
        }
    }

    fn present(&mut self, slot: usize, frame_within_chunk: u32) -> StreamResult<()> {
        if slot >= SLOT_COUNT || frame_within_chunk >= CHUNK_FRAME_COUNT {
            return Err(StreamError::gpu(format!(
                "present of slot {slot} frame {frame_within_chunk} out of range"
            )));
        }
        match self.present.as_mut() {
            Some(draw) => draw(slot, frame_within_chunk),
            None => Ok(()),
        }
    }
}
