//! Render path selection.

use std::fmt;

/// Which path populates the shared color target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderPath {
    #[default]
    Rasterize,
    Raytrace,
}

impl RenderPath {
    /// The other path.
    pub fn toggled(self) -> Self {
        match self {
            Self::Rasterize => Self::Raytrace,
            Self::Raytrace => Self::Rasterize,
        }
    }
}

impl fmt::Display for RenderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rasterize => write!(f, "rasterize"),
            Self::Raytrace => write!(f, "raytrace"),
        }
    }
}

/// Externally toggled path choice, latched once per frame.
///
/// Changes made while a frame is being recorded only take effect at the next
/// [`latch`](Self::latch). Without ray tracing support the selector stays on
/// [`RenderPath::Rasterize`].
#[derive(Debug, Clone)]
pub struct PathSelector {
    requested: RenderPath,
    latched: Option<RenderPath>,
    ray_tracing_supported: bool,
}

impl PathSelector {
    pub fn new(initial: RenderPath, ray_tracing_supported: bool) -> Self {
        let mut selector = Self {
            requested: RenderPath::Rasterize,
            latched: None,
            ray_tracing_supported,
        };
        selector.set(initial);
        selector
    }

    /// Request `path` for subsequent frames. Returns the path actually
    /// requested, which is rasterize when ray tracing is unsupported.
    pub fn set(&mut self, path: RenderPath) -> RenderPath {
        let path = if path == RenderPath::Raytrace && !self.ray_tracing_supported {
            tracing::warn!("Ray tracing unsupported, staying on rasterize path");
            RenderPath::Rasterize
        } else {
            path
        };
        if path != self.requested {
            tracing::info!(%path, "Render path switched");
        }
        self.requested = path;
        path
    }

    /// Flip between the two paths.
    pub fn toggle(&mut self) -> RenderPath {
        self.set(self.requested.toggled())
    }

    /// The currently requested path.
    pub fn requested(&self) -> RenderPath {
        self.requested
    }

    /// Fix the path for the frame about to be recorded.
    pub fn latch(&mut self) -> RenderPath {
        self.latched = Some(self.requested);
        self.requested
    }

    /// The path latched by the most recent frame, if any.
    pub fn latched(&self) -> Option<RenderPath> {
        self.latched
    }

    pub fn ray_tracing_supported(&self) -> bool {
        self.ray_tracing_supported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_flips_between_paths() {
        let mut selector = PathSelector::new(RenderPath::Rasterize, true);
        assert_eq!(selector.toggle(), RenderPath::Raytrace);
        assert_eq!(selector.toggle(), RenderPath::Rasterize);
    }

    #[test]
    fn latched_value_survives_later_requests() {
        let mut selector = PathSelector::new(RenderPath::Raytrace, true);
        let frame = selector.latch();
        selector.set(RenderPath::Rasterize);

        assert_eq!(frame, RenderPath::Raytrace);
        assert_eq!(selector.latched(), Some(RenderPath::Raytrace));
        assert_eq!(selector.latch(), RenderPath::Rasterize);
    }

    #[test]
    fn pinned_to_raster_without_ray_tracing() {
        let mut selector = PathSelector::new(RenderPath::Raytrace, false);
        assert_eq!(selector.requested(), RenderPath::Rasterize);
        assert_eq!(selector.toggle(), RenderPath::Rasterize);
        assert_eq!(selector.latch(), RenderPath::Rasterize);
    }

    #[test]
    fn display_names() {
        assert_eq!(RenderPath::Raytrace.to_string(), "raytrace");
        assert_eq!(RenderPath::Rasterize.to_string(), "rasterize");
    }
}
