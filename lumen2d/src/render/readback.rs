//! Asynchronous GPU-to-host pixel transfer.
//!
//! A readback copies a region of a render target into a staging buffer,
//! arms the buffer's map callback, and returns immediately. The map
//! callback signals a channel; the render thread drains that channel once
//! per frame and finishes the transfers whose copies completed, so the
//! render loop never blocks on one. With `async_readback` disabled the
//! same machinery runs to completion inline, stalling the frame.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, Sender};
use image::RgbaImage;
use wgpu::{CommandEncoderDescriptor, TextureFormat};

use crate::math::PixelRegion;

/// Receives the captured region once the transfer completes, possibly
/// several frames after the request.
pub type ScreenshotCallback = Box<dyn FnOnce(RgbaImage) + 'static>;

pub(crate) enum TransferKind {
    Screenshot(ScreenshotCallback),
    /// Mean relative luminance of the region, stored as f32 bits.
    Brightness(Arc<AtomicU32>),
}

struct PendingTransfer {
    id: u64,
    buffer: wgpu::Buffer,
    region: PixelRegion,
    format: TextureFormat,
    padded_bytes_per_row: u32,
    kind: TransferKind,
}

/// All in-flight transfers plus the completion channel their map callbacks
/// signal.
pub(crate) struct ReadbackQueue {
    pending: Vec<PendingTransfer>,
    next_id: u64,
    mapped_tx: Sender<(u64, bool)>,
    mapped_rx: Receiver<(u64, bool)>,
}

impl ReadbackQueue {
    pub fn new() -> Self {
        let (mapped_tx, mapped_rx) = crossbeam_channel::unbounded();
        Self {
            pending: Vec::new(),
            next_id: 0,
            mapped_tx,
            mapped_rx,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Copies `region` of `texture` into a fresh staging buffer and arms
    /// its completion. With `async_mode` the transfer is left pending;
    /// otherwise it is driven to completion before returning.
    #[allow(clippy::too_many_arguments)]
    pub fn request(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &wgpu::Texture,
        texture_size: (u32, u32),
        format: TextureFormat,
        region: Option<PixelRegion>,
        kind: TransferKind,
        async_mode: bool,
    ) -> Result<()> {
        let full = PixelRegion::new(0, 0, texture_size.0, texture_size.1);
        let region = region.unwrap_or(full).clamped_to(texture_size);
        if region.width == 0 || region.height == 0 {
            return Err(anyhow!("readback region is empty"));
        }

        let texel_bytes = texel_size(format)?;
        let unpadded = region.width * texel_bytes;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded.div_ceil(align) * align;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback-staging-buffer"),
            size: u64::from(padded_bytes_per_row) * u64::from(region.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("readback-encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(region.height),
                },
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(Some(encoder.finish()));

        let id = self.next_id;
        self.next_id += 1;

        let tx = self.mapped_tx.clone();
        buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send((id, result.is_ok()));
        });

        self.pending.push(PendingTransfer {
            id,
            buffer,
            region,
            format,
            padded_bytes_per_row,
            kind,
        });

        if !async_mode {
            // Synchronous fallback: block until the copy lands, then
            // deliver within this frame.
            let _ = device.poll(wgpu::PollType::wait_indefinitely());
            self.drain_completed();
        }

        Ok(())
    }

    /// Non-blocking per-frame poll. Finishes every transfer whose map
    /// callback has fired since the last call.
    pub fn poll(&mut self, device: &wgpu::Device) {
        if self.pending.is_empty() {
            return;
        }
        let _ = device.poll(wgpu::PollType::Poll);
        self.drain_completed();
    }

    fn drain_completed(&mut self) {
        while let Ok((id, ok)) = self.mapped_rx.try_recv() {
            let Some(index) = self.pending.iter().position(|t| t.id == id) else {
                continue;
            };
            let transfer = self.pending.remove(index);
            if ok {
                complete_transfer(transfer);
            } else {
                log::warn!("readback buffer mapping failed; dropping transfer {id}");
            }
        }
    }
}

fn complete_transfer(transfer: PendingTransfer) {
    let PendingTransfer {
        buffer,
        region,
        format,
        padded_bytes_per_row,
        kind,
        ..
    } = transfer;

    let pixels = {
        let mapped = buffer.slice(..).get_mapped_range();
        convert_to_rgba_f32(
            format,
            region.width,
            region.height,
            padded_bytes_per_row,
            &mapped,
        )
    };
    buffer.unmap();
    // Buffer and its implicit fence are released here.
    drop(buffer);

    match kind {
        TransferKind::Screenshot(callback) => {
            let bytes: Vec<u8> = pixels
                .iter()
                .flat_map(|px| px.map(|c| (c.clamp(0.0, 1.0) * 255.0 + 0.5) as u8))
                .collect();
            match RgbaImage::from_raw(region.width, region.height, bytes) {
                Some(image) => callback(image),
                None => log::warn!("screenshot conversion produced a mis-sized image"),
            }
        }
        TransferKind::Brightness(sink) => {
            let value = mean_luminance(&pixels);
            sink.store(value.to_bits(), Ordering::Relaxed);
        }
    }
}

fn texel_size(format: TextureFormat) -> Result<u32> {
    match format {
        TextureFormat::Rgba8Unorm
        | TextureFormat::Rgba8UnormSrgb
        | TextureFormat::Bgra8Unorm
        | TextureFormat::Bgra8UnormSrgb
        | TextureFormat::Rg11b10Ufloat => Ok(4),
        TextureFormat::Rgba16Float => Ok(8),
        other => Err(anyhow!("unsupported readback format {other:?}")),
    }
}

/// Converts mapped staging rows to RGBA f32 pixels, stripping the row
/// padding and flipping row order: the source render targets are
/// bottom-up, delivered images are top-down.
pub(crate) fn convert_to_rgba_f32(
    format: TextureFormat,
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
    data: &[u8],
) -> Vec<[f32; 4]> {
    let mut pixels = Vec::with_capacity(width as usize * height as usize);

    for row in (0..height).rev() {
        let start = row as usize * padded_bytes_per_row as usize;
        let row_data = &data[start..];

        for col in 0..width as usize {
            let px = match format {
                TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => {
                    let b = &row_data[col * 4..col * 4 + 4];
                    [
                        b[0] as f32 / 255.0,
                        b[1] as f32 / 255.0,
                        b[2] as f32 / 255.0,
                        b[3] as f32 / 255.0,
                    ]
                }
                TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => {
                    let b = &row_data[col * 4..col * 4 + 4];
                    [
                        b[2] as f32 / 255.0,
                        b[1] as f32 / 255.0,
                        b[0] as f32 / 255.0,
                        b[3] as f32 / 255.0,
                    ]
                }
                TextureFormat::Rgba16Float => {
                    let b = &row_data[col * 8..col * 8 + 8];
                    [
                        half_to_f32(u16::from_le_bytes([b[0], b[1]])),
                        half_to_f32(u16::from_le_bytes([b[2], b[3]])),
                        half_to_f32(u16::from_le_bytes([b[4], b[5]])),
                        half_to_f32(u16::from_le_bytes([b[6], b[7]])),
                    ]
                }
                TextureFormat::Rg11b10Ufloat => {
                    let b = &row_data[col * 4..col * 4 + 4];
                    let word = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                    let [r, g, bl] = unpack_rg11b10(word);
                    [r, g, bl, 1.0]
                }
                _ => [0.0; 4],
            };
            pixels.push(px);
        }
    }

    pixels
}

/// Mean relative luminance of a pixel block.
pub(crate) fn mean_luminance(pixels: &[[f32; 4]]) -> f32 {
    if pixels.is_empty() {
        return 0.0;
    }
    let sum: f32 = pixels
        .iter()
        .map(|px| 0.2126 * px[0] + 0.7152 * px[1] + 0.0722 * px[2])
        .sum();
    sum / pixels.len() as f32
}

/// IEEE half-float to f32.
pub(crate) fn half_to_f32(h: u16) -> f32 {
    let sign = u32::from(h >> 15) << 31;
    let exp = u32::from((h >> 10) & 0x1F);
    let mant = u32::from(h & 0x3FF);

    let bits = if exp == 0 {
        if mant == 0 {
            sign
        } else {
            // Subnormal: renormalize.
            let mut exp = 127 - 15 + 1;
            let mut mant = mant;
            while mant & 0x400 == 0 {
                mant <<= 1;
                exp -= 1;
            }
            sign | ((exp as u32) << 23) | ((mant & 0x3FF) << 13)
        }
    } else if exp == 0x1F {
        sign | 0x7F80_0000 | (mant << 13)
    } else {
        sign | ((exp + 127 - 15) << 23) | (mant << 13)
    };

    f32::from_bits(bits)
}

/// Unpacks a packed R11G11B10 unsigned-float texel.
pub(crate) fn unpack_rg11b10(word: u32) -> [f32; 3] {
    [
        small_float_to_f32((word & 0x7FF) as u16, 6),
        small_float_to_f32(((word >> 11) & 0x7FF) as u16, 6),
        small_float_to_f32(((word >> 22) & 0x3FF) as u16, 5),
    ]
}

/// Unsigned small float with a 5-bit exponent and `mant_bits` mantissa.
fn small_float_to_f32(bits: u16, mant_bits: u32) -> f32 {
    let exp = u32::from(bits) >> mant_bits;
    let mant = u32::from(bits) & ((1 << mant_bits) - 1);
    let scale = (1 << mant_bits) as f32;

    if exp == 0 {
        // Subnormal.
        (mant as f32 / scale) * 2.0f32.powi(-14)
    } else if exp == 0x1F {
        if mant == 0 {
            f32::INFINITY
        } else {
            f32::NAN
        }
    } else {
        (1.0 + mant as f32 / scale) * 2.0f32.powi(exp as i32 - 15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_decodes_common_values() {
        assert_eq!(half_to_f32(0x3C00), 1.0);
        assert_eq!(half_to_f32(0x4000), 2.0);
        assert_eq!(half_to_f32(0x3800), 0.5);
        assert_eq!(half_to_f32(0xBC00), -1.0);
        assert_eq!(half_to_f32(0x0000), 0.0);
    }

    #[test]
    fn rg11b10_decodes_ones() {
        // Exponent 15, zero mantissa in every channel encodes 1.0.
        let word = (0b01111 << 6) | ((0b01111 << 6) << 11) | ((0b01111u32 << 5) << 22);
        let [r, g, b] = unpack_rg11b10(word);
        assert_eq!([r, g, b], [1.0, 1.0, 1.0]);
    }

    #[test]
    fn conversion_flips_rows_and_strips_padding() {
        // 2x2 RGBA8 image with 256-byte padded rows. Bottom row holds the
        // red pixels, so after the flip row 0 of the output is red.
        let padded = 256usize;
        let mut data = vec![0u8; padded * 2];
        // Top row of the source (bottom of the delivered image): green.
        data[0..4].copy_from_slice(&[0, 255, 0, 255]);
        data[4..8].copy_from_slice(&[0, 255, 0, 255]);
        // Bottom row of the source: red.
        data[padded..padded + 4].copy_from_slice(&[255, 0, 0, 255]);
        data[padded + 4..padded + 8].copy_from_slice(&[255, 0, 0, 255]);

        let pixels = convert_to_rgba_f32(TextureFormat::Rgba8Unorm, 2, 2, padded as u32, &data);
        assert_eq!(pixels.len(), 4);
        assert_eq!(pixels[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(pixels[3], [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn bgra_swizzles_channels() {
        let mut data = vec![0u8; 256];
        data[0..4].copy_from_slice(&[255, 128, 0, 255]);
        let pixels = convert_to_rgba_f32(TextureFormat::Bgra8Unorm, 1, 1, 256, &data);
        assert_eq!(pixels[0][0], 0.0);
        assert_eq!(pixels[0][2], 1.0);
    }

    #[test]
    fn luminance_weights_sum_to_one() {
        let white = [[1.0, 1.0, 1.0, 1.0]];
        assert!((mean_luminance(&white) - 1.0).abs() < 1e-4);
        assert_eq!(mean_luminance(&[]), 0.0);
    }
}
