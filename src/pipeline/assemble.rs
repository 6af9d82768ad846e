//! PDF assembly: one downloaded image per output page.
//!
//! Each page is an A4 canvas holding a single image XObject, scaled and
//! centered by [`crate::pipeline::layout`]. JPEG payloads go into the PDF
//! byte-for-byte under `/DCTDecode`; only their headers are parsed, for the
//! dimensions and colour space. The colour space follows the component count
//! of the frame header, so CMYK scans are labelled `/DeviceCMYK` (with an
//! inverting `/Decode` for Adobe-written files). Anything else the `image` crate can read
//! (a viewer occasionally answers with PNG) is transcoded to JPEG first.
//!
//! A file that cannot be read is skipped and reported; it never aborts the
//! document. The output is written to a temp file next to the destination
//! and renamed into place, so the destination either holds a complete PDF
//! or is untouched.

use crate::error::AssemblyError;
use crate::output::{AssemblyReport, SkippedImage};
use crate::pipeline::layout::PageGeometry;
use crate::progress::ProgressCallback;
use image::codecs::jpeg::{JpegDecoder, JpegEncoder};
use image::{ColorType, ImageDecoder, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Quality used when transcoding non-JPEG pages.
const TRANSCODE_QUALITY: u8 = 90;

/// Resource name of the single image on every page.
const IMAGE_RESOURCE: &[u8] = b"Im1";

/// A page image ready to embed.
#[derive(Debug)]
pub struct PageImage {
    pub width_px: u32,
    pub height_px: u32,
    color_space: &'static str,
    /// Adobe CMYK: samples are stored inverted.
    inverted: bool,
    jpeg: Vec<u8>,
}

impl PageImage {
    /// Read a page file and prepare it for embedding.
    pub fn load(path: &Path) -> Result<Self, String> {
        let bytes = std::fs::read(path).map_err(|e| format!("cannot read: {e}"))?;
        let format = image::guess_format(&bytes).map_err(|e| format!("unknown format: {e}"))?;

        if format == ImageFormat::Jpeg {
            let decoder =
                JpegDecoder::new(Cursor::new(&bytes[..])).map_err(|e| format!("bad JPEG: {e}"))?;
            let (width_px, height_px) = decoder.dimensions();
            let (color_space, inverted) =
                jpeg_color_space(read_jpeg_header(&bytes), decoder.color_type());
            return Ok(Self {
                width_px,
                height_px,
                color_space,
                inverted,
                jpeg: bytes,
            });
        }

        debug!("{}: {:?} payload, transcoding to JPEG", path.display(), format);
        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| format!("cannot decode {format:?}: {e}"))?;
        let rgb = decoded.to_rgb8();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, TRANSCODE_QUALITY)
            .encode_image(&rgb)
            .map_err(|e| format!("JPEG transcode failed: {e}"))?;

        Ok(Self {
            width_px: rgb.width(),
            height_px: rgb.height(),
            color_space: "DeviceRGB",
            inverted: false,
            jpeg,
        })
    }

    /// The image XObject, with the JPEG bytes as its `/DCTDecode` stream.
    fn into_xobject(self) -> Stream {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(self.width_px),
            "Height" => i64::from(self.height_px),
            "ColorSpace" => self.color_space,
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        };
        if self.inverted {
            let decode: Vec<Object> = [1, 0, 1, 0, 1, 0, 1, 0]
                .into_iter()
                .map(Object::Integer)
                .collect();
            dict.set("Decode", decode);
        }
        Stream::new(dict, self.jpeg).with_compression(false)
    }
}

/// What the JPEG markers say about the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JpegHeader {
    /// Component count from the SOF segment.
    components: u8,
    /// An Adobe APP14 segment precedes the frame.
    adobe: bool,
}

/// Walk the marker segments from SOI up to the first frame header.
///
/// `None` for anything that is not a well-formed JPEG prefix.
fn read_jpeg_header(bytes: &[u8]) -> Option<JpegHeader> {
    if bytes.get(..2)? != [0xFF, 0xD8] {
        return None;
    }
    let mut adobe = false;
    let mut i = 2;
    loop {
        if *bytes.get(i)? != 0xFF {
            return None;
        }
        while *bytes.get(i)? == 0xFF {
            i += 1;
        }
        let marker = *bytes.get(i)?;
        i += 1;
        match marker {
            // Standalone markers carry no length.
            0x01 | 0xD0..=0xD8 => continue,
            0xD9 | 0xDA => return None,
            _ => {}
        }

        let len = usize::from(u16::from_be_bytes([*bytes.get(i)?, *bytes.get(i + 1)?]));
        if len < 2 {
            return None;
        }
        let body = bytes.get(i + 2..i + len)?;
        match marker {
            0xEE if body.starts_with(b"Adobe") => adobe = true,
            // SOF0..SOF15 minus DHT, JPG and DAC.
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                return Some(JpegHeader {
                    components: *body.get(5)?,
                    adobe,
                });
            }
            _ => {}
        }
        i += len;
    }
}

/// PDF colour space for a JPEG, and whether its samples need inverting.
fn jpeg_color_space(header: Option<JpegHeader>, decoded: ColorType) -> (&'static str, bool) {
    match header {
        Some(JpegHeader { components: 1, .. }) => ("DeviceGray", false),
        Some(JpegHeader {
            components: 4,
            adobe,
        }) => ("DeviceCMYK", adobe),
        Some(_) => ("DeviceRGB", false),
        None => match decoded {
            ColorType::L8 | ColorType::L16 => ("DeviceGray", false),
            _ => ("DeviceRGB", false),
        },
    }
}

/// Builds the output PDF from an ordered list of page files.
pub struct PdfAssembler {
    geometry: PageGeometry,
    title: Option<String>,
    progress: Option<ProgressCallback>,
}

impl Default for PdfAssembler {
    fn default() -> Self {
        Self::new(PageGeometry::A4_PORTRAIT)
    }
}

impl PdfAssembler {
    pub fn new(geometry: PageGeometry) -> Self {
        Self {
            geometry,
            title: None,
            progress: None,
        }
    }

    /// Set the document `/Title`.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Place every readable file on its own page and write the PDF to `output`.
    ///
    /// Blocking; call from `spawn_blocking` inside async code.
    pub fn assemble(&self, files: &[PathBuf], output: &Path) -> Result<AssemblyReport, AssemblyError> {
        let total = files.len();
        if let Some(cb) = &self.progress {
            cb.on_assembly_start(total);
        }

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut page_ids: Vec<ObjectId> = Vec::with_capacity(total);
        let mut skipped = Vec::new();

        for (i, path) in files.iter().enumerate() {
            match self.add_page(&mut doc, pages_id, path) {
                Ok(page_id) => page_ids.push(page_id),
                Err(PageFailure::Skip(reason)) => {
                    warn!("  Skip {}: {}", path.display(), reason);
                    if let Some(cb) = &self.progress {
                        cb.on_image_skipped(path, &reason);
                    }
                    skipped.push(SkippedImage {
                        path: path.clone(),
                        reason,
                    });
                }
                Err(PageFailure::Fatal(e)) => return Err(e),
            }

            if let Some(cb) = &self.progress {
                cb.on_assembly_page(i + 1, total);
            }
            if (i + 1) % 10 == 0 {
                info!("  Progress: {}/{} pages", i + 1, total);
            }
        }

        if page_ids.is_empty() {
            return Err(AssemblyError::NoDecodablePages { attempted: total });
        }

        let kids: Vec<Object> = page_ids.iter().map(|id| Object::Reference(*id)).collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_ids.len() as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut info_dict = dictionary! {
            "Producer" => Object::string_literal("viewer2pdf"),
        };
        if let Some(title) = &self.title {
            info_dict.set("Title", Object::string_literal(title.as_str()));
        }
        let info_id = doc.add_object(info_dict);
        doc.trailer.set("Info", info_id);

        info!("  Saving PDF…");
        write_atomically(&mut doc, output)?;

        let pages_written = page_ids.len();
        if let Some(cb) = &self.progress {
            cb.on_assembly_complete(pages_written, output);
        }
        Ok(AssemblyReport {
            output_path: output.to_path_buf(),
            pages_written,
            skipped,
        })
    }

    fn add_page(&self, doc: &mut Document, pages_id: ObjectId, path: &Path) -> Result<ObjectId, PageFailure> {
        let image = PageImage::load(path).map_err(PageFailure::Skip)?;
        let placement = self
            .geometry
            .fit(image.width_px, image.height_px)
            .ok_or_else(|| PageFailure::Skip("image has a zero dimension".into()))?;

        let (width_px, height_px) = (image.width_px, image.height_px);
        let image_id = doc.add_object(image.into_xobject());

        let (x, y, w, h) = placement.to_pdf_space(&self.geometry);
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        (w as f32).into(),
                        0.into(),
                        0.into(),
                        (h as f32).into(),
                        (x as f32).into(),
                        (y as f32).into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(IMAGE_RESOURCE.to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content.encode().map_err(|e| {
            PageFailure::Fatal(AssemblyError::Pdf {
                detail: e.to_string(),
            })
        })?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let (page_w, page_h) = self.geometry.size_pt();
        let mut xobjects = lopdf::Dictionary::new();
        xobjects.set(IMAGE_RESOURCE, image_id);
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), (page_w as f32).into(), (page_h as f32).into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "XObject" => xobjects },
        });

        debug!(
            "{} → {}x{} px at ({:.1}, {:.1}) mm, {:.1}x{:.1} mm",
            path.display(),
            width_px,
            height_px,
            placement.x,
            placement.y,
            placement.width,
            placement.height
        );
        Ok(page_id)
    }
}

enum PageFailure {
    Skip(String),
    Fatal(AssemblyError),
}

/// Save into a temp file beside `output`, then rename it into place.
fn write_atomically(doc: &mut Document, output: &Path) -> Result<(), AssemblyError> {
    let write_err = |source: std::io::Error| AssemblyError::OutputWrite {
        path: output.to_path_buf(),
        source,
    };

    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let tmp = tempfile::Builder::new()
        .prefix(".viewer2pdf-")
        .suffix(".pdf.tmp")
        .tempfile_in(dir)
        .map_err(write_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        doc.save_to(&mut writer).map_err(|e| AssemblyError::Pdf {
            detail: e.to_string(),
        })?;
        writer.flush().map_err(write_err)?;
    }
    tmp.persist(output).map_err(|e| write_err(e.error))?;
    Ok(())
}
