// bytemuck's derives expand `unsafe impl` blocks, so the gpu feature relaxes
// the lint from forbid to deny-by-default.
#![cfg_attr(not(feature = "gpu"), forbid(unsafe_code))]
#![cfg_attr(feature = "gpu", deny(unsafe_code))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Compositor effect pipeline: the per-frame scene graph that composes
//! window contents into the final screen image while driving a chain of
//! pluggable visual effects in lockstep with the output's refresh clock.
//!
//! The building blocks, bottom-up:
//!
//! - [`ItemTree`]: scene nodes (windows, surfaces, decorations, cursor)
//!   with geometry, damage and quad caches.
//! - [`SurfacePixmap`] and [`SurfaceTextureProvider`]: committed client
//!   buffers uploaded as sampleable textures.
//! - [`EffectChain`] and [`Effect`]: the ordered hooks bracketing every
//!   paint, with pre-paint → paint → post-paint phases at screen and
//!   window granularity.
//! - [`RenderBackend`]: the GPU/CPU abstraction ([`SoftwareBackend`]
//!   always available, a wgpu backend behind the `gpu` feature).
//! - [`FrameScheduler`]: one frame per output refresh, idle skipping, and
//!   the frame-callback promise.
//! - [`Compositor`]: the event-shaped facade the window manager drives.

pub mod backend;
#[cfg(feature = "gpu")]
#[cfg_attr(docsrs, doc(cfg(feature = "gpu")))]
pub mod backend_gpu;
pub mod backend_sw;
pub mod buffer;
pub mod chain;
pub mod compositor;
pub mod core;
pub mod damage;
pub mod effect;
pub mod effects;
pub mod error;
pub mod host;
pub mod item;
pub mod options;
pub mod output;
pub mod paint;
pub mod quad;
pub mod region;
pub mod scene;
pub mod scheduler;
pub mod shader;
pub mod surface;
pub mod target;
pub mod texture;
pub mod timeline;
pub mod window;

pub use backend::{
    BackendKind, CompositingType, DrawParams, FrameTimings, PresentFeedback, RenderBackend,
    StreamingBuffer, TextureRef, create_backend,
};
#[cfg(feature = "gpu")]
pub use backend_gpu::GpuBackend;
pub use backend_sw::SoftwareBackend;
pub use buffer::{ClientBuffer, DmabufBuffer, DmabufPlane, EglStreamBuffer, PixelFormat, ShmBuffer};
pub use chain::{
    DrawWindowCursor, EffectChain, FrameState, FrameWindow, PaintScreenCursor, PaintWindowCursor,
    ScreenPrePaintCursor, WindowPrePaintCursor,
};
pub use compositor::Compositor;
pub use core::{Atom, DelegateId, ItemId, Matrix4, OutputId, Rgba8Premul, SurfaceId, WindowId};
pub use damage::{collect_damage, reset_damage};
pub use effect::{Effect, Feature};
pub use error::{LucentError, LucentResult};
pub use host::{EffectFrame, EffectHost, FrameStyle, HostHandle, OnScreenMessage};
pub use item::{Item, ItemKind, ItemTree};
pub use options::Options;
pub use output::Output;
pub use paint::{
    DisableReasons, PaintMask, ScreenPaintData, ScreenPrePaintData, WindowPaintData,
    WindowPrePaintData,
};
pub use quad::{QuadKind, QuadVertex, WindowQuad, WindowQuadList};
pub use region::{PixelRect, Region};
pub use scene::Scene;
pub use scheduler::{FrameFeedback, FrameResult, FrameScheduler};
pub use shader::{ShaderBinder, ShaderId, ShaderManager, ShaderSource, ShaderTraits};
pub use surface::{ContentType, PixmapState, SurfacePixmap, SurfaceState};
pub use target::{RenderTargetId, RenderTargetInfo, TargetFormat, TargetStack};
pub use texture::{ShmTextureProvider, SurfaceTextureProvider, Texture, TextureHandle};
pub use timeline::{Ease, TimeLine};
pub use window::{EffectWindow, Window, WindowDesc, WindowKind};
