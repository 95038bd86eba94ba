use crate::{FlattenedPage, PdfEngineError, PdfWriter, RgbaImage};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

/// Writes each flattened bitmap as one full-page image.
///
/// Alpha is composited over white because the output carries no soft masks.
#[derive(Debug, Clone, Default)]
pub struct ImagePdfWriter {
    _private: (),
}

impl ImagePdfWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_page(doc: &mut Document, pages_id: ObjectId, page: &FlattenedPage) -> ObjectId {
        let (width_px, height_px) = page.image.dimensions();
        let width_pt = page.size.width_pt;
        let height_pt = page.size.height_pt;

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(width_px),
                "Height" => i64::from(height_px),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8_i64,
            },
            rgb_over_white(&page.image),
        ));

        let content = format!("q\n{width_pt} 0 0 {height_pt} 0 0 cm\n/Im0 Do\nQ\n");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(width_pt),
                Object::Real(height_pt),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        })
    }
}

impl PdfWriter for ImagePdfWriter {
    fn write_document(&self, pages: &[FlattenedPage]) -> Result<Vec<u8>, PdfEngineError> {
        if pages.is_empty() {
            return Err(PdfEngineError::NoPages);
        }

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let kids: Vec<Object> =
            pages.iter().map(|page| Self::add_page(&mut doc, pages_id, page).into()).collect();
        let count = kids.len() as i64;

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        // FlateDecode every stream; raw page bitmaps run to megabytes each.
        doc.compress();

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).map_err(|err| PdfEngineError::Backend(err.to_string()))?;

        tracing::debug!(pages = pages.len(), bytes = bytes.len(), "wrote flattened pdf");
        Ok(bytes)
    }
}

fn rgb_over_white(image: &RgbaImage) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(image.as_raw().len() / 4 * 3);

    for pixel in image.pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = u16::from(a);
        for channel in [r, g, b] {
            let blended = (u16::from(channel) * alpha + 255 * (255 - alpha) + 127) / 255;
            rgb.push(blended as u8);
        }
    }

    rgb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LoadedPdf, PageSize, PdfRasterizer};
    use image::Rgba;

    #[test]
    fn empty_page_list_is_rejected() {
        let err = ImagePdfWriter::new().write_document(&[]).expect_err("no pages");
        assert!(matches!(err, PdfEngineError::NoPages));
    }

    #[test]
    fn written_document_reopens_with_same_geometry() {
        let pages = vec![
            FlattenedPage {
                image: RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255])),
                size: PageSize::new(200.0, 100.0),
            },
            FlattenedPage {
                image: RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0])),
                size: PageSize::LETTER,
            },
        ];

        let bytes = ImagePdfWriter::new().write_document(&pages).expect("write");
        let reopened = LoadedPdf::open(bytes).expect("reopen");

        assert_eq!(reopened.page_count(), 2);
        assert_eq!(reopened.page_size(0).expect("size"), PageSize::new(200.0, 100.0));
        assert_eq!(reopened.page_size(1).expect("size"), PageSize::LETTER);
    }

    #[test]
    fn output_is_deterministic() {
        let pages = vec![FlattenedPage {
            image: RgbaImage::from_pixel(3, 3, Rgba([200, 0, 0, 255])),
            size: PageSize::new(30.0, 30.0),
        }];

        let writer = ImagePdfWriter::new();
        assert_eq!(
            writer.write_document(&pages).expect("first"),
            writer.write_document(&pages).expect("second")
        );
    }

    #[test]
    fn page_images_are_compressed() {
        let pages = vec![FlattenedPage {
            image: RgbaImage::from_pixel(600, 400, Rgba([255, 255, 255, 255])),
            size: PageSize::new(300.0, 200.0),
        }];

        let bytes = ImagePdfWriter::new().write_document(&pages).expect("write");

        assert!(bytes.len() < 600 * 400 * 3 / 10, "{} bytes", bytes.len());
        let reopened = LoadedPdf::open(bytes).expect("reopen");
        assert_eq!(reopened.page_size(0).expect("size"), PageSize::new(300.0, 200.0));
    }

    #[test]
    fn transparent_pixels_become_white() {
        let image = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0]));
        assert_eq!(rgb_over_white(&image), vec![255, 255, 255]);

        let image = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        assert_eq!(rgb_over_white(&image), vec![0, 0, 0]);
    }
}
