pub type LucentResult<T> = Result<T, LucentError>;

#[derive(thiserror::Error, Debug)]
pub enum LucentError {
    #[error("buffer import error: {0}")]
    BufferImport(String),

    #[error("shader compile error: {0}")]
    ShaderCompile(String),

    #[error("render target error: {0}")]
    RenderTarget(String),

    #[error("present timeout: {0}")]
    PresentTimeout(String),

    #[error("effect chain recursion depth exceeded: {0}")]
    ChainRecursion(String),

    #[error("output removed: {0}")]
    OutputRemoved(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LucentError {
    pub fn buffer_import(msg: impl Into<String>) -> Self {
        Self::BufferImport(msg.into())
    }

    pub fn shader_compile(msg: impl Into<String>) -> Self {
        Self::ShaderCompile(msg.into())
    }

    pub fn render_target(msg: impl Into<String>) -> Self {
        Self::RenderTarget(msg.into())
    }

    pub fn present_timeout(msg: impl Into<String>) -> Self {
        Self::PresentTimeout(msg.into())
    }

    pub fn chain_recursion(msg: impl Into<String>) -> Self {
        Self::ChainRecursion(msg.into())
    }

    pub fn output_removed(msg: impl Into<String>) -> Self {
        Self::OutputRemoved(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// True for the faults the frame scheduler treats as frame-fatal;
    /// everything else is recovered locally by whoever hit it.
    pub fn aborts_frame(&self) -> bool {
        matches!(
            self,
            Self::ChainRecursion(_) | Self::OutputRemoved(_) | Self::PresentTimeout(_)
        )
    }
}
