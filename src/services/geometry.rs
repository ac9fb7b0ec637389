//! Signature placement arithmetic.
//!
//! The rectangle is anchored to the top-right corner of the page. The
//! offsets enter the formula twice (once for the anchor, once for the
//! extent), which makes the box wider and taller than `width`/`height`
//! alone. Callers rely on these exact coordinates, so the formula is
//! kept as-is and no bounds checking is performed.

/// A page boundary, as read from the PDF MediaBox.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageRect {
    pub llx: f32,
    pub lly: f32,
    pub urx: f32,
    pub ury: f32,
}

/// Where the visible signature widget goes, in page coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SignatureRect {
    pub llx: f32,
    pub lly: f32,
    pub urx: f32,
    pub ury: f32,
}

impl SignatureRect {
    pub fn width(&self) -> f32 {
        self.urx - self.llx
    }

    pub fn height(&self) -> f32 {
        self.ury - self.lly
    }
}

pub fn signature_rect(
    page: PageRect,
    right_offset: f32,
    top_offset: f32,
    width: f32,
    height: f32,
) -> SignatureRect {
    let urx = page.urx - right_offset;
    let ury = page.ury - top_offset;
    let llx = urx - (width + right_offset);
    let lly = ury - (height + top_offset);
    SignatureRect { llx, lly, urx, ury }
}
