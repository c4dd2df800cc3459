use crate::core::Rgba8Premul;

/// Compositor-wide options, deserializable from the embedder's config.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Options {
    /// Colour painted where no window covers the output.
    pub background: Rgba8Premul,
    /// Paint unimportable surfaces magenta instead of transparent.
    pub debug_fallback: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            background: Rgba8Premul::BLACK,
            debug_fallback: cfg!(debug_assertions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: Options = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.background, Rgba8Premul::BLACK);

        let opts: Options =
            serde_json::from_str(r#"{"background":{"r":10,"g":20,"b":30,"a":255}}"#).unwrap();
        assert_eq!(opts.background, Rgba8Premul { r: 10, g: 20, b: 30, a: 255 });
    }
}
