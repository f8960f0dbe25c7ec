//! Asynchronous frame readback over a two-slot staging ring.
//!
//! A copy is encoded into an idle slot while the frame is built and mapped
//! once the frame is submitted. Completed maps are collected at the next
//! capture, so exposure always reacts to the frame before the current one.
//! When both slots are still in flight the capture is skipped.

use crossbeam_channel::{Receiver, Sender};

use crate::error::{RenderError, RenderResult};
use crate::sampler::{LuminanceSample, Readback};
use crate::types::{SurfaceSize, Viewport};

const SLOT_COUNT: usize = 2;
const BYTES_PER_PIXEL: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureKind {
    /// A `grid` x `grid` texture produced by the downsample pass.
    Sample { grid: u32 },
    Pixels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    Encoded,
    Mapping,
}

struct Slot {
    buffer: Option<wgpu::Buffer>,
    capacity: u64,
    state: SlotState,
    kind: CaptureKind,
    size: SurfaceSize,
    padded_bytes_per_row: u32,
    sequence: u64,
}

impl Slot {
    fn new() -> Self {
        Self {
            buffer: None,
            capacity: 0,
            state: SlotState::Idle,
            kind: CaptureKind::Pixels,
            size: SurfaceSize::default(),
            padded_bytes_per_row: 0,
            sequence: 0,
        }
    }

    fn used_bytes(&self) -> u64 {
        u64::from(self.padded_bytes_per_row) * u64::from(self.size.height)
    }

    fn read(&self) -> RenderResult<Readback> {
        let buffer = self.buffer.as_ref().ok_or_else(|| {
            RenderError::SampleReadbackFailure("readback slot has no staging buffer".into())
        })?;
        let rgba = {
            let data = buffer.slice(..self.used_bytes()).get_mapped_range();
            depad(&data, self.size, self.padded_bytes_per_row)
        };
        buffer.unmap();

        match self.kind {
            CaptureKind::Sample { grid } => Ok(Readback::Sample(LuminanceSample::from_rgba(grid, &rgba)?)),
            CaptureKind::Pixels => Ok(Readback::Pixels {
                width: self.size.width,
                height: self.size.height,
                rgba,
            }),
        }
    }
}

type MapResult = (usize, Result<(), wgpu::BufferAsyncError>);

pub(crate) struct ReadbackRing {
    slots: Vec<Slot>,
    sequence: u64,
    sender: Sender<MapResult>,
    receiver: Receiver<MapResult>,
}

impl ReadbackRing {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            slots: (0..SLOT_COUNT).map(|_| Slot::new()).collect(),
            sequence: 0,
            sender,
            receiver,
        }
    }

    pub fn has_idle_slot(&self) -> bool {
        self.slots.iter().any(|slot| slot.state == SlotState::Idle)
    }

    /// Returns the newest capture whose map completed since the last call.
    pub fn collect(&mut self, device: &wgpu::Device) -> RenderResult<Option<Readback>> {
        if let Err(err) = device.poll(wgpu::PollType::Poll) {
            tracing::warn!(error = %err, "device poll failed during readback");
        }

        let mut newest: Option<(u64, Readback)> = None;
        let mut failure = None;
        while let Ok((index, result)) = self.receiver.try_recv() {
            let Some(slot) = self.slots.get_mut(index) else {
                continue;
            };
            if slot.state != SlotState::Mapping {
                continue;
            }
            let readback = result
                .map_err(|err| RenderError::SampleReadbackFailure(format!("buffer map failed: {err}")))
                .and_then(|()| slot.read());
            slot.state = SlotState::Idle;
            match readback {
                Ok(readback) => {
                    let is_newer = match &newest {
                        Some((sequence, _)) => slot.sequence > *sequence,
                        None => true,
                    };
                    if is_newer {
                        newest = Some((slot.sequence, readback));
                    }
                }
                Err(err) => failure = Some(err),
            }
        }

        match (newest, failure) {
            (Some((_, readback)), _) => Ok(Some(readback)),
            (None, Some(err)) => Err(err),
            (None, None) => Ok(None),
        }
    }

    /// Encodes a copy of `region` of `source` into an idle slot. Returns
    /// false when every slot is still in flight.
    pub fn encode_copy(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::Texture,
        region: Viewport,
        kind: CaptureKind,
    ) -> bool {
        if region.is_empty() {
            return false;
        }
        let Some(index) = self.slots.iter().position(|slot| slot.state == SlotState::Idle) else {
            tracing::trace!("readback slots busy; skipping capture");
            return false;
        };
        self.sequence += 1;
        let sequence = self.sequence;
        let slot = &mut self.slots[index];
        let size = region.size();

        let padded_bytes_per_row = padded_bytes_per_row(size.width);
        let required = u64::from(padded_bytes_per_row) * u64::from(size.height);
        if slot.buffer.is_none() || slot.capacity < required {
            slot.buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("readback staging"),
                size: required,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            }));
            slot.capacity = required;
        }
        let Some(buffer) = slot.buffer.as_ref() else {
            return false;
        };

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: source,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(size.height),
                },
            },
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );

        slot.state = SlotState::Encoded;
        slot.kind = kind;
        slot.size = size;
        slot.padded_bytes_per_row = padded_bytes_per_row;
        slot.sequence = sequence;
        true
    }

    /// Starts mapping every slot whose copy was just submitted.
    pub fn submitted(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.state != SlotState::Encoded {
                continue;
            }
            let Some(buffer) = slot.buffer.as_ref() else {
                slot.state = SlotState::Idle;
                continue;
            };
            let sender = self.sender.clone();
            buffer
                .slice(..slot.used_bytes())
                .map_async(wgpu::MapMode::Read, move |result| {
                    let _ = sender.send((index, result));
                });
            slot.state = SlotState::Mapping;
        }
    }

    /// Releases slots whose copy was encoded into a dropped frame.
    pub fn abandon(&mut self) {
        for slot in &mut self.slots {
            if slot.state == SlotState::Encoded {
                slot.state = SlotState::Idle;
            }
        }
    }
}

/// Row pitch rounded up to the copy alignment.
pub(crate) fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Strips row padding, yielding tightly packed RGBA8.
pub(crate) fn depad(data: &[u8], size: SurfaceSize, padded_bytes_per_row: u32) -> Vec<u8> {
    let tight = (size.width * BYTES_PER_PIXEL) as usize;
    let padded = padded_bytes_per_row as usize;
    let mut out = Vec::with_capacity(tight * size.height as usize);
    for row in 0..size.height as usize {
        let start = row * padded;
        match data.get(start..start + tight) {
            Some(bytes) => out.extend_from_slice(bytes),
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(10), 256);
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
    }

    #[test]
    fn depad_drops_row_padding() {
        let size = SurfaceSize::new(2, 2);
        let mut data = vec![0u8; 512];
        data[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[256..264].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);
        let tight = depad(&data, size, 256);
        assert_eq!(tight, (1..=16).collect::<Vec<u8>>());
    }

    #[test]
    fn depad_stops_at_truncated_data() {
        let tight = depad(&[0u8; 260], SurfaceSize::new(2, 2), 256);
        assert_eq!(tight.len(), 8);
    }
}
