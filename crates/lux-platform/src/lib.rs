// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use lux_render::RenderSize;
use winit::dpi::PhysicalSize;

/// Window inner size in physical pixels, as the renderer wants it.
pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_size_maps_verbatim() {
        assert_eq!(render_size(PhysicalSize::new(1280, 720)), RenderSize::new(1280, 720));
        assert!(render_size(PhysicalSize::new(0, 0)).is_empty());
    }
}
