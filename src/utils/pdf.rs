use crate::error::{OptionsError, Result};
use printpdf::image_crate::codecs::png::PngDecoder;
use printpdf::{
    BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference,
};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

/// A4 portrait
const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 15.0;

const TITLE_SIZE: f32 = 18.0;
const HEADING_SIZE: f32 = 14.0;
const TEXT_SIZE: f32 = 9.0;
const LINE_HEIGHT: f32 = 4.5;

/// 1200px wide charts come out 180mm wide
const CHART_DPI: f32 = 1200.0 / ((PAGE_WIDTH - 2.0 * MARGIN) / 25.4);

fn pdf_err(e: impl std::fmt::Display) -> OptionsError {
    OptionsError::ReportError(e.to_string())
}

/// The builtin fonts only cover WinAnsi
fn ascii(text: &str) -> String {
    text.chars().map(|c| if c.is_ascii() { c } else { '?' }).collect()
}

/// Top-down page writer over a printpdf document
pub struct PdfReport {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    /// Distance of the next baseline from the bottom edge, in mm
    cursor: f32,
    pages: usize,
}

impl PdfReport {
    pub fn new(title: &str) -> Result<Self> {
        let (doc, page, layer) =
            PdfDocument::new(ascii(title), Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_err)?;
        let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_err)?;
        let layer = doc.get_page(page).get_layer(layer);

        let mut report = Self {
            doc,
            layer,
            regular,
            bold,
            cursor: PAGE_HEIGHT - MARGIN,
            pages: 1,
        };
        report.write(title, TITLE_SIZE, true);
        report.cursor -= LINE_HEIGHT;
        Ok(report)
    }

    pub fn page_count(&self) -> usize {
        self.pages
    }

    pub fn new_page(&mut self) {
        let (page, layer) = self.doc.add_page(
            Mm(PAGE_WIDTH),
            Mm(PAGE_HEIGHT),
            format!("Layer {}", self.pages + 1),
        );
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.cursor = PAGE_HEIGHT - MARGIN;
        self.pages += 1;
    }

    fn ensure_space(&mut self, height: f32) {
        if self.cursor - height < MARGIN {
            self.new_page();
        }
    }

    fn write(&mut self, text: &str, size: f32, bold: bool) {
        let height = size * 0.3528 + 1.5;
        self.ensure_space(height);
        self.cursor -= height;
        let font = if bold { &self.bold } else { &self.regular };
        self.layer
            .use_text(ascii(text), size, Mm(MARGIN), Mm(self.cursor), font);
    }

    pub fn heading(&mut self, text: &str) {
        self.cursor -= LINE_HEIGHT;
        self.write(text, HEADING_SIZE, true);
    }

    pub fn line(&mut self, text: &str) {
        self.write(text, TEXT_SIZE, false);
    }

    /// Embed a PNG at full text width, starting a new page when it doesn't fit
    pub fn png(&mut self, path: &Path) -> Result<()> {
        let file = BufReader::new(File::open(path)?);
        let decoder = PngDecoder::new(file).map_err(pdf_err)?;
        let image = Image::try_from(decoder).map_err(pdf_err)?;

        let width = image.image.width.0 as f32 / CHART_DPI * 25.4;
        let height = image.image.height.0 as f32 / CHART_DPI * 25.4;
        self.ensure_space(height + LINE_HEIGHT);
        self.cursor -= height + LINE_HEIGHT;

        image.add_to_layer(
            self.layer.clone(),
            ImageTransform {
                translate_x: Some(Mm(MARGIN + ((PAGE_WIDTH - 2.0 * MARGIN) - width).max(0.0) / 2.0)),
                translate_y: Some(Mm(self.cursor)),
                dpi: Some(CHART_DPI),
                ..Default::default()
            },
        );
        Ok(())
    }

    pub fn save(self, path: &Path) -> Result<()> {
        let bytes = self.doc.save_to_bytes().map_err(pdf_err)?;
        fs::write(path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_text_flows_onto_new_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.pdf");

        let mut pdf = PdfReport::new("Flow").unwrap();
        for i in 0..200 {
            pdf.line(&format!("line {}", i));
        }
        assert!(pdf.page_count() > 1);
        pdf.save(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn non_ascii_is_replaced() {
        assert_eq!(ascii("P(S_T < S_0) ≈ 0.5"), "P(S_T < S_0) ? 0.5");
    }

    #[test]
    fn missing_chart_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut pdf = PdfReport::new("Charts").unwrap();
        assert!(matches!(
            pdf.png(&dir.path().join("missing.png")),
            Err(OptionsError::IoError(_))
        ));
    }
}
