use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::backend::{
    CompositingType, DrawParams, FrameTimings, PresentFeedback, RenderBackend, StreamingBuffer,
    TextureRef,
};
use crate::buffer::ClientBuffer;
use crate::core::{OutputId, Rgba8Premul};
use crate::error::{LucentError, LucentResult};
use crate::output::Output;
use crate::quad::WindowQuadList;
use crate::region::{PixelRect, Region};
use crate::shader::{ShaderId, ShaderSource, ShaderTraits};
use crate::target::{RenderTargetId, RenderTargetInfo, TargetFormat};
use crate::texture::{ShmTextureProvider, SurfaceTextureProvider};

/// Premultiplied RGBA8 pixel store, top-down rows.
#[derive(Clone, Debug)]
struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Framebuffer {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width as usize) * (height as usize) * 4],
        }
    }

    fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ]
    }

    fn blend(&mut self, x: u32, y: u32, src: [u8; 4], opacity: f32) {
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let dst = [
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ];
        let out = over(dst, src, opacity);
        self.pixels[idx..idx + 4].copy_from_slice(&out);
    }
}

/// Premultiplied source-over with an extra opacity factor.
fn over(dst: [u8; 4], src: [u8; 4], opacity: f32) -> [u8; 4] {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }
    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }
    let inv = 255u16 - u16::from(sa);
    let mut out = [0u8; 4];
    out[3] = mul_div255(u16::from(src[3]), op).saturating_add(mul_div255(u16::from(dst[3]), inv));
    for i in 0..3 {
        let sc = mul_div255(u16::from(src[i]), op);
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = sc.saturating_add(dc);
    }
    out
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

/// Fixed-point (Q16) normalized gaussian weights for a 1-D kernel.
fn gaussian_kernel_q16(radius: u32, sigma: f64) -> Vec<u32> {
    if radius == 0 || !sigma.is_finite() || sigma <= 0.0 {
        return vec![1 << 16];
    }
    let r = radius as i32;
    let denom = 2.0 * sigma * sigma;
    let mut weights_f = Vec::with_capacity((2 * r + 1) as usize);
    let mut sum = 0.0f64;
    for i in -r..=r {
        let x = f64::from(i);
        let w = (-x * x / denom).exp();
        weights_f.push(w);
        sum += w;
    }
    let mut weights = Vec::with_capacity(weights_f.len());
    let mut acc: i64 = 0;
    for wf in &weights_f {
        let q = ((wf / sum) * 65536.0).round() as i64;
        let q = q.clamp(0, 65536);
        weights.push(q as u32);
        acc += q;
    }
    // Force the kernel to sum to exactly 1.0 in Q16.
    let delta = 65536 - acc;
    if delta != 0 {
        let mid = weights.len() / 2;
        let adjusted = (i64::from(weights[mid]) + delta).clamp(0, 65536);
        weights[mid] = adjusted as u32;
    }
    weights
}

/// Sampling source resolved before rasterization, so a target can be both
/// read and written in one pass without aliasing.
enum Sampler {
    Pixels { width: u32, height: u32, data: Vec<u8> },
    Solid([u8; 4]),
}

impl Sampler {
    fn sample(&self, u: f64, v: f64) -> [u8; 4] {
        match self {
            Self::Solid(c) => *c,
            Self::Pixels { width, height, data } => {
                if *width == 0 || *height == 0 {
                    return [0, 0, 0, 0];
                }
                let x = ((u * f64::from(*width)) as i64).clamp(0, i64::from(*width) - 1) as usize;
                let y = ((v * f64::from(*height)) as i64).clamp(0, i64::from(*height) - 1) as usize;
                let idx = (y * *width as usize + x) * 4;
                [data[idx], data[idx + 1], data[idx + 2], data[idx + 3]]
            }
        }
    }

    /// 1-D gaussian sample along `dir` (texture space units).
    fn sample_blurred(&self, u: f64, v: f64, kernel: &[u32], dir: (f64, f64)) -> [u8; 4] {
        let radius = (kernel.len() / 2) as i32;
        let (step_u, step_v) = match self {
            Self::Pixels { width, height, .. } => (
                dir.0 / f64::from((*width).max(1)),
                dir.1 / f64::from((*height).max(1)),
            ),
            Self::Solid(_) => return self.sample(u, v),
        };
        let mut acc = [0u64; 4];
        for (ki, &kw) in kernel.iter().enumerate() {
            let offset = f64::from(ki as i32 - radius);
            let px = self.sample(u + offset * step_u, v + offset * step_v);
            for c in 0..4 {
                acc[c] += u64::from(kw) * u64::from(px[c]);
            }
        }
        let mut out = [0u8; 4];
        for c in 0..4 {
            out[c] = (((acc[c] + 32768) >> 16).min(255)) as u8;
        }
        out
    }
}

/// The CPU painter backend. Always available; shading is limited to the
/// built-in trait pipeline, and custom shader sources are rejected.
pub struct SoftwareBackend {
    screens: BTreeMap<OutputId, Framebuffer>,
    bound_screen: Option<OutputId>,
    targets: BTreeMap<RenderTargetId, Framebuffer>,
    bound_target: Option<RenderTargetId>,
    shaders: BTreeMap<ShaderId, ShaderTraits>,
    stream: StreamingBuffer,
    next_shader: u64,
    next_texture: u64,
    next_target: u64,
    frame_started: Option<Instant>,
    last_timings: FrameTimings,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            screens: BTreeMap::new(),
            bound_screen: None,
            targets: BTreeMap::new(),
            bound_target: None,
            shaders: BTreeMap::new(),
            stream: StreamingBuffer::default(),
            next_shader: 0,
            next_texture: 0,
            next_target: 0,
            frame_started: None,
            last_timings: FrameTimings::default(),
        }
    }

    pub fn streaming_buffer(&mut self) -> &mut StreamingBuffer {
        &mut self.stream
    }

    fn dest_key(&self) -> LucentResult<(Option<RenderTargetId>, OutputId)> {
        let screen = self
            .bound_screen
            .ok_or_else(|| LucentError::validation("no screen bound"))?;
        Ok((self.bound_target, screen))
    }

    fn dest_mut(&mut self) -> LucentResult<&mut Framebuffer> {
        let (target, screen) = self.dest_key()?;
        match target {
            Some(id) => self
                .targets
                .get_mut(&id)
                .ok_or_else(|| LucentError::render_target("bound target was destroyed")),
            None => self
                .screens
                .get_mut(&screen)
                .ok_or_else(|| LucentError::validation("bound screen has no framebuffer")),
        }
    }

    fn dest_ref(&self) -> LucentResult<&Framebuffer> {
        let (target, screen) = self.dest_key()?;
        match target {
            Some(id) => self
                .targets
                .get(&id)
                .ok_or_else(|| LucentError::render_target("bound target was destroyed")),
            None => self
                .screens
                .get(&screen)
                .ok_or_else(|| LucentError::validation("bound screen has no framebuffer")),
        }
    }

    fn resolve_sampler(&self, texture: &TextureRef<'_>) -> LucentResult<Sampler> {
        Ok(match texture {
            TextureRef::Solid(c) => Sampler::Solid(c.to_array()),
            TextureRef::Handle(handle) => Sampler::Pixels {
                width: handle.width,
                height: handle.height,
                data: handle.pixels.borrow().clone(),
            },
            TextureRef::Target(id) => {
                let fb = self
                    .targets
                    .get(id)
                    .ok_or_else(|| LucentError::render_target("sampled target does not exist"))?;
                Sampler::Pixels {
                    width: fb.width,
                    height: fb.height,
                    data: fb.pixels.clone(),
                }
            }
        })
    }

    fn shader_traits(&self, params: &DrawParams) -> ShaderTraits {
        params
            .shader
            .and_then(|id| self.shaders.get(&id).copied())
            .unwrap_or(ShaderTraits::MAP_TEXTURE | ShaderTraits::MODULATE)
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for SoftwareBackend {
    fn compositing_type(&self) -> CompositingType {
        CompositingType::Software
    }

    fn bind_screen(&mut self, output: &Output) -> LucentResult<()> {
        if !output.enabled {
            return Err(LucentError::output_removed(output.name.clone()));
        }
        let (w, h) = (output.device_width(), output.device_height());
        let fb = self
            .screens
            .entry(output.id)
            .or_insert_with(|| Framebuffer::new(w, h));
        if fb.width != w || fb.height != h {
            *fb = Framebuffer::new(w, h);
        }
        self.bound_screen = Some(output.id);
        self.bound_target = None;
        self.frame_started = Some(Instant::now());
        Ok(())
    }

    fn present(
        &mut self,
        output: &Output,
        _damage: &Region,
        now: Duration,
    ) -> LucentResult<PresentFeedback> {
        if !output.enabled {
            return Err(LucentError::output_removed(output.name.clone()));
        }
        if self.bound_screen != Some(output.id) {
            return Err(LucentError::validation("present without a bound screen"));
        }
        let cpu = self
            .frame_started
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        self.last_timings = FrameTimings { cpu, gpu: None };
        Ok(PresentFeedback { timestamp: now })
    }

    fn make_texture(
        &mut self,
        _buffer: &ClientBuffer,
    ) -> LucentResult<Box<dyn SurfaceTextureProvider>> {
        self.next_texture += 1;
        Ok(Box::new(ShmTextureProvider::new(self.next_texture)))
    }

    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        format: TargetFormat,
    ) -> LucentResult<RenderTargetInfo> {
        if width == 0 || height == 0 {
            return Err(LucentError::render_target("zero-sized render target"));
        }
        self.next_target += 1;
        let id = RenderTargetId(self.next_target);
        self.targets.insert(id, Framebuffer::new(width, height));
        Ok(RenderTargetInfo { id, width, height, format })
    }

    fn destroy_render_target(&mut self, id: RenderTargetId) {
        self.targets.remove(&id);
        if self.bound_target == Some(id) {
            self.bound_target = None;
        }
    }

    fn bind_render_target(&mut self, target: Option<RenderTargetId>) -> LucentResult<()> {
        if let Some(id) = target {
            if !self.targets.contains_key(&id) {
                return Err(LucentError::render_target("binding unknown target"));
            }
        }
        self.bound_target = target;
        Ok(())
    }

    fn blit(&mut self, source: RenderTargetId, dest: PixelRect) -> LucentResult<()> {
        let src = self
            .targets
            .get(&source)
            .ok_or_else(|| LucentError::render_target("blit source does not exist"))?
            .clone();
        if dest.is_empty() || src.width == 0 || src.height == 0 {
            return Ok(());
        }
        let fb = self.dest_mut()?;
        for dy in 0..dest.height {
            let y = dest.y + dy;
            if y < 0 || y >= fb.height as i32 {
                continue;
            }
            let sy = (dy as u32 * src.height) / dest.height as u32;
            for dx in 0..dest.width {
                let x = dest.x + dx;
                if x < 0 || x >= fb.width as i32 {
                    continue;
                }
                let sx = (dx as u32 * src.width) / dest.width as u32;
                let px = src.pixel(sx.min(src.width - 1), sy.min(src.height - 1));
                fb.blend(x as u32, y as u32, px, 1.0);
            }
        }
        Ok(())
    }

    fn blit_from_screen(&mut self, target: RenderTargetId, src: PixelRect) -> LucentResult<()> {
        let screen_id = self
            .bound_screen
            .ok_or_else(|| LucentError::validation("no screen bound"))?;
        let screen = self
            .screens
            .get(&screen_id)
            .ok_or_else(|| LucentError::validation("bound screen has no framebuffer"))?
            .clone();
        let dst = self
            .targets
            .get_mut(&target)
            .ok_or_else(|| LucentError::render_target("blit destination does not exist"))?;
        // 1:1 copy into the target's top-left corner, clipped on both ends.
        let rows = src.height.min(dst.height as i32);
        let cols = src.width.min(dst.width as i32);
        for dy in 0..rows {
            let sy = src.y + dy;
            if sy < 0 || sy >= screen.height as i32 {
                continue;
            }
            for dx in 0..cols {
                let sx = src.x + dx;
                if sx < 0 || sx >= screen.width as i32 {
                    continue;
                }
                let px = screen.pixel(sx as u32, sy as u32);
                let idx = (dy as usize * dst.width as usize + dx as usize) * 4;
                dst.pixels[idx..idx + 4].copy_from_slice(&px);
            }
        }
        Ok(())
    }

    fn shader_from_source(&mut self, source: &ShaderSource) -> LucentResult<ShaderId> {
        match source {
            ShaderSource::Builtin(traits) => {
                self.next_shader += 1;
                let id = ShaderId(self.next_shader);
                self.shaders.insert(id, *traits);
                Ok(id)
            }
            ShaderSource::Custom { .. } => Err(LucentError::shader_compile(
                "software backend supports built-in shaders only",
            )),
        }
    }

    fn draw_quads(
        &mut self,
        quads: &WindowQuadList,
        texture: TextureRef<'_>,
        params: &DrawParams,
    ) -> LucentResult<()> {
        let sampler = self.resolve_sampler(&texture)?;
        let traits = self.shader_traits(params);
        let kernel = if traits.contains(ShaderTraits::BLUR_1D) {
            Some(gaussian_kernel_q16(params.blur_radius, params.blur_sigma))
        } else {
            None
        };

        // Stage vertices through the streaming buffer, then rasterize.
        self.stream.clear();
        for q in quads.iter() {
            for v in &q.verts {
                let p = params.mvp.map_point(v.position);
                self.stream.push_vertex(p.x as f32, p.y as f32, v.u as f32, v.v as f32);
            }
        }
        let verts: Vec<[f64; 4]> = self
            .stream
            .data
            .chunks_exact(4)
            .map(|c| [f64::from(c[0]), f64::from(c[1]), f64::from(c[2]), f64::from(c[3])])
            .collect();

        let opacity = params.opacity.clamp(0.0, 1.0) as f32;
        let brightness = params.brightness.clamp(0.0, 1.0);
        let saturation = params.saturation.clamp(0.0, 2.0);
        let fb = self.dest_mut()?;

        for quad in verts.chunks_exact(4) {
            let tris = [[quad[0], quad[1], quad[2]], [quad[0], quad[2], quad[3]]];
            for t in tris {
                raster_triangle(
                    fb,
                    params.clip.as_ref(),
                    &t,
                    &sampler,
                    kernel.as_deref(),
                    params.blur_direction,
                    opacity,
                    brightness,
                    saturation,
                );
            }
        }
        Ok(())
    }

    fn clear(&mut self, region: &Region, color: Rgba8Premul) -> LucentResult<()> {
        let fb = self.dest_mut()?;
        let px = color.to_array();
        for rect in region.rects() {
            let x0 = rect.x.clamp(0, fb.width as i32);
            let x1 = rect.right().clamp(0, fb.width as i32);
            let y0 = rect.y.clamp(0, fb.height as i32);
            let y1 = rect.bottom().clamp(0, fb.height as i32);
            for y in y0..y1 {
                for x in x0..x1 {
                    let idx = (y as usize * fb.width as usize + x as usize) * 4;
                    fb.pixels[idx..idx + 4].copy_from_slice(&px);
                }
            }
        }
        Ok(())
    }

    fn read_pixel(&mut self, x: u32, y: u32) -> LucentResult<Rgba8Premul> {
        let fb = self.dest_ref()?;
        if x >= fb.width || y >= fb.height {
            return Err(LucentError::validation("read_pixel out of bounds"));
        }
        // Bottom-up coordinates, framebuffer rows are top-down.
        let row = fb.height - 1 - y;
        Ok(Rgba8Premul::from_array(fb.pixel(x, row)))
    }

    fn last_frame_timings(&self) -> FrameTimings {
        self.last_timings
    }
}

#[allow(clippy::too_many_arguments)]
fn raster_triangle(
    fb: &mut Framebuffer,
    clip: Option<&Region>,
    t: &[[f64; 4]; 3],
    sampler: &Sampler,
    kernel: Option<&[u32]>,
    blur_dir: (f64, f64),
    opacity: f32,
    brightness: f64,
    saturation: f64,
) {
    let area = edge(&t[0], &t[1], &t[2]);
    if area.abs() < 1e-9 {
        return;
    }
    let min_x = t.iter().map(|v| v[0]).fold(f64::INFINITY, f64::min).floor().max(0.0) as i64;
    let max_x = t
        .iter()
        .map(|v| v[0])
        .fold(f64::NEG_INFINITY, f64::max)
        .ceil()
        .min(f64::from(fb.width)) as i64;
    let min_y = t.iter().map(|v| v[1]).fold(f64::INFINITY, f64::min).floor().max(0.0) as i64;
    let max_y = t
        .iter()
        .map(|v| v[1])
        .fold(f64::NEG_INFINITY, f64::max)
        .ceil()
        .min(f64::from(fb.height)) as i64;

    for y in min_y..max_y {
        for x in min_x..max_x {
            if let Some(clip) = clip {
                if !clip.contains_point(x as i32, y as i32) {
                    continue;
                }
            }
            let p = [x as f64 + 0.5, y as f64 + 0.5, 0.0, 0.0];
            let b0 = edge(&t[1], &t[2], &p) / area;
            let b1 = edge(&t[2], &t[0], &p) / area;
            let b2 = edge(&t[0], &t[1], &p) / area;
            if b0 < 0.0 || b1 < 0.0 || b2 < 0.0 {
                continue;
            }
            let u = b0 * t[0][2] + b1 * t[1][2] + b2 * t[2][2];
            let v = b0 * t[0][3] + b1 * t[1][3] + b2 * t[2][3];
            let mut px = match kernel {
                Some(k) => sampler.sample_blurred(u, v, k, blur_dir),
                None => sampler.sample(u, v),
            };
            px = shade(px, brightness, saturation);
            fb.blend(x as u32, y as u32, px, opacity);
        }
    }
}

fn edge(a: &[f64; 4], b: &[f64; 4], p: &[f64; 4]) -> f64 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

fn shade(px: [u8; 4], brightness: f64, saturation: f64) -> [u8; 4] {
    if brightness >= 1.0 && (saturation - 1.0).abs() < 1e-9 {
        return px;
    }
    let mut rgb = [f64::from(px[0]), f64::from(px[1]), f64::from(px[2])];
    if (saturation - 1.0).abs() >= 1e-9 {
        let luma = 0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2];
        for c in &mut rgb {
            *c = luma + (*c - luma) * saturation;
        }
    }
    if brightness < 1.0 {
        for c in &mut rgb {
            *c *= brightness;
        }
    }
    let a = f64::from(px[3]);
    [
        rgb[0].clamp(0.0, a) as u8,
        rgb[1].clamp(0.0, a) as u8,
        rgb[2].clamp(0.0, a) as u8,
        px[3],
    ]
}
