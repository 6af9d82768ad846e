//! Page geometry: fit an image into a fixed canvas and center it.
//!
//! All lengths here are millimetres with the origin at the top-left corner of
//! the page, y growing downwards. [`crate::pipeline::assemble`] converts to
//! PDF points and flips the y axis when it writes the content stream.

/// PDF points per millimetre.
pub const MM_TO_PT: f64 = 72.0 / 25.4;

/// A fixed output canvas with a uniform margin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width: f64,
    pub height: f64,
    pub margin: f64,
}

/// Where an image lands on the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PageGeometry {
    /// A4 portrait, 5 mm margin.
    pub const A4_PORTRAIT: PageGeometry = PageGeometry {
        width: 210.0,
        height: 297.0,
        margin: 5.0,
    };

    pub fn available_width(&self) -> f64 {
        self.width - 2.0 * self.margin
    }

    pub fn available_height(&self) -> f64 {
        self.height - 2.0 * self.margin
    }

    /// Scale an image uniformly so it fits the drawing area, then center it.
    ///
    /// The whole image stays visible and at least one axis touches the
    /// margin. Returns `None` for images with a zero dimension.
    pub fn fit(&self, width_px: u32, height_px: u32) -> Option<Placement> {
        if width_px == 0 || height_px == 0 {
            return None;
        }

        let avail_w = self.available_width();
        let avail_h = self.available_height();
        let ratio = f64::from(width_px) / f64::from(height_px);

        let (width, height) = if avail_w / avail_h > ratio {
            // Relatively taller than the box: height-constrained.
            (avail_h * ratio, avail_h)
        } else {
            (avail_w, avail_w / ratio)
        };

        Some(Placement {
            x: self.margin + (avail_w - width) / 2.0,
            y: self.margin + (avail_h - height) / 2.0,
            width,
            height,
        })
    }

    /// Canvas size in PDF points.
    pub fn size_pt(&self) -> (f64, f64) {
        (self.width * MM_TO_PT, self.height * MM_TO_PT)
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self::A4_PORTRAIT
    }
}

impl Placement {
    /// The placement in PDF user space (points, origin bottom-left).
    ///
    /// Returns `(x, y, width, height)` where `(x, y)` is the lower-left corner.
    pub fn to_pdf_space(&self, page: &PageGeometry) -> (f64, f64, f64, f64) {
        let bottom = page.height - (self.y + self.height);
        (
            self.x * MM_TO_PT,
            bottom * MM_TO_PT,
            self.width * MM_TO_PT,
            self.height * MM_TO_PT,
        )
    }
}
