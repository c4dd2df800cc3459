use std::collections::BTreeMap;

use crate::backend::RenderBackend;
use crate::error::LucentResult;

bitflags::bitflags! {
    /// Capabilities baked into the built-in shader programs. A concrete
    /// program is the combination of the requested traits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ShaderTraits: u32 {
        /// Samples a bound texture.
        const MAP_TEXTURE       = 1 << 0;
        /// Fills with a uniform colour instead of sampling.
        const UNIFORM_COLOR     = 1 << 1;
        /// Modulates the sampled colour by opacity/brightness.
        const MODULATE          = 1 << 2;
        /// Applies a saturation adjustment.
        const ADJUST_SATURATION = 1 << 3;
        /// One-dimensional gaussian pass; direction and kernel come from the
        /// draw parameters.
        const BLUR_1D           = 1 << 4;
    }
}

/// Backend-assigned shader program identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShaderId(pub u64);

/// What to compile. Built-in sources are generated by the backend for a
/// trait combination; custom sources come from effects and are only
/// supported by shader-capable backends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShaderSource {
    Builtin(ShaderTraits),
    Custom { vertex: String, fragment: String },
}

impl ShaderSource {
    pub fn custom(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::Custom {
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }
}

/// Compiled-program cache plus the scoped binding stack.
///
/// Binding is a stack, not a slot: acquiring a shader for scoped use pushes
/// it, and releasing restores whatever was bound before. Draw calls read the
/// top of the stack.
#[derive(Default)]
pub struct ShaderManager {
    builtin: BTreeMap<u32, ShaderId>,
    stack: Vec<ShaderId>,
}

impl ShaderManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in program for a trait combination, compiling on first use.
    pub fn shader(
        &mut self,
        traits: ShaderTraits,
        backend: &mut dyn RenderBackend,
    ) -> LucentResult<ShaderId> {
        if let Some(&id) = self.builtin.get(&traits.bits()) {
            return Ok(id);
        }
        let id = backend.shader_from_source(&ShaderSource::Builtin(traits))?;
        self.builtin.insert(traits.bits(), id);
        Ok(id)
    }

    pub fn push(&mut self, shader: ShaderId) {
        self.stack.push(shader);
    }

    pub fn pop(&mut self) -> Option<ShaderId> {
        self.stack.pop()
    }

    pub fn current(&self) -> Option<ShaderId> {
        self.stack.last().copied()
    }

    pub fn binding_depth(&self) -> usize {
        self.stack.len()
    }

    /// Binds `shader` for the duration of the returned guard.
    pub fn bind(&mut self, shader: ShaderId) -> ShaderBinder<'_> {
        self.push(shader);
        ShaderBinder { manager: self }
    }
}

/// Scoped shader binding; dropping restores the previous binding.
pub struct ShaderBinder<'a> {
    manager: &'a mut ShaderManager,
}

impl ShaderBinder<'_> {
    pub fn shader(&self) -> Option<ShaderId> {
        self.manager.current()
    }
}

impl Drop for ShaderBinder<'_> {
    fn drop(&mut self) {
        self.manager.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binder_restores_previous_binding() {
        let mut mgr = ShaderManager::new();
        mgr.push(ShaderId(1));
        {
            let binder = mgr.bind(ShaderId(2));
            assert_eq!(binder.shader(), Some(ShaderId(2)));
        }
        assert_eq!(mgr.current(), Some(ShaderId(1)));
    }

    #[test]
    fn nested_binds_unwind_in_order() {
        let mut mgr = ShaderManager::new();
        {
            let _a = mgr.bind(ShaderId(1));
        }
        assert_eq!(mgr.current(), None);
        mgr.push(ShaderId(7));
        {
            let _b = mgr.bind(ShaderId(8));
            // Still nested.
        }
        assert_eq!(mgr.current(), Some(ShaderId(7)));
        assert_eq!(mgr.binding_depth(), 1);
    }

    #[test]
    fn traits_combine_into_distinct_keys() {
        let a = ShaderTraits::MAP_TEXTURE;
        let b = ShaderTraits::MAP_TEXTURE | ShaderTraits::ADJUST_SATURATION;
        assert_ne!(a.bits(), b.bits());
    }
}
