use chrono::{DateTime, Utc};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;

use crate::error::SigningError;
use crate::models::sign::SignOptions;
use crate::services::geometry::{self, PageRect};
use crate::services::keystore::KeyMaterial;

/// Reserved space for the DER signature, in bytes. Serialized as a hex
/// string of twice this many characters.
const CONTENTS_CAPACITY: usize = 8192;

/// ByteRange stabilization rounds. Offsets shift when integer widths
/// change between saves; two rounds are enough in practice.
const MAX_BYTE_RANGE_PASSES: usize = 5;

#[derive(Debug)]
pub struct SignedPdf {
    pub bytes: Vec<u8>,
    pub page: u32,
}

/// Apply a visible detached CMS signature to a PDF.
pub fn sign_pdf(
    pdf_bytes: &[u8],
    image_bytes: &[u8],
    options: &SignOptions,
    key: &KeyMaterial,
) -> Result<SignedPdf, SigningError> {
    sign_pdf_at(pdf_bytes, image_bytes, options, key, Utc::now())
}

/// Same as [`sign_pdf`] with an explicit signing time, so the produced
/// metadata is reproducible.
pub fn sign_pdf_at(
    pdf_bytes: &[u8],
    image_bytes: &[u8],
    options: &SignOptions,
    key: &KeyMaterial,
    signed_at: DateTime<Utc>,
) -> Result<SignedPdf, SigningError> {
    let mut doc = Document::load_mem(pdf_bytes).map_err(SigningError::InvalidPdf)?;

    let pages = doc.get_pages();
    let total = pages.len() as u32;
    // The last page is the default target. An explicit page is taken
    // verbatim; nothing is clamped into range.
    let page_number = options.page.unwrap_or(total);
    let page_id = *pages
        .get(&page_number)
        .ok_or(SigningError::PageOutOfRange {
            requested: page_number,
            total,
        })?;

    let page_rect = page_media_box(&doc, page_id)?;
    let rect = geometry::signature_rect(
        page_rect,
        options.right_offset,
        options.top_offset,
        options.width,
        options.height,
    );

    let image = image::load_from_memory(image_bytes).map_err(SigningError::Image)?;
    let rgb = image.to_rgb8();
    let (img_w, img_h) = rgb.dimensions();
    // Re-encoded as baseline JPEG so the XObject carries DCT data, not
    // raw RGB samples.
    let mut jpeg = Vec::new();
    rgb.write_to(
        &mut std::io::Cursor::new(&mut jpeg),
        image::ImageOutputFormat::Jpeg(85),
    )
    .map_err(SigningError::Image)?;

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => img_w as i64,
            "Height" => img_h as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg,
    ));

    // Graphic-only appearance: the image fills the widget box, no text.
    let appearance_ops = format!("q {} 0 0 {} 0 0 cm /Img0 Do Q", rect.width(), rect.height());
    let appearance_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), rect.width().into(), rect.height().into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Img0" => Object::Reference(image_id) },
            },
        },
        appearance_ops.into_bytes(),
    ));

    let mut sig_dict = dictionary! {
        "Type" => "Sig",
        "Filter" => "Adobe.PPKLite",
        "SubFilter" => "adbe.pkcs7.detached",
        "ByteRange" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(0),
        ],
        "Contents" => Object::String(vec![0u8; CONTENTS_CAPACITY], StringFormat::Hexadecimal),
    };
    let date_str = format!("D:{}", signed_at.format("%Y%m%d%H%M%S+00'00'"));
    sig_dict.set("M", Object::String(date_str.into_bytes(), StringFormat::Literal));
    if let Some(reason) = &options.reason {
        sig_dict.set(
            "Reason",
            Object::String(reason.as_bytes().to_vec(), StringFormat::Literal),
        );
    }
    if let Some(location) = &options.location {
        sig_dict.set(
            "Location",
            Object::String(location.as_bytes().to_vec(), StringFormat::Literal),
        );
    }
    // No /Reference with a DocMDP transform and no catalog /Perms
    // entry: the signature never certifies the document.
    let sig_id = doc.add_object(sig_dict);

    let field_id = doc.add_object(dictionary! {
        "Type" => "Annot",
        "Subtype" => "Widget",
        "FT" => "Sig",
        "T" => Object::String(b"Signature1".to_vec(), StringFormat::Literal),
        "F" => 4,
        "Rect" => vec![
            rect.llx.into(),
            rect.lly.into(),
            rect.urx.into(),
            rect.ury.into(),
        ],
        "V" => Object::Reference(sig_id),
        "P" => Object::Reference(page_id),
        "AP" => dictionary! { "N" => Object::Reference(appearance_id) },
    });

    attach_annotation(&mut doc, page_id, field_id)?;
    wire_acroform(&mut doc, field_id)?;

    let (mut serialized, contents_start, contents_end) = fix_byte_range(&mut doc, sig_id)?;

    let to_sign = [
        &serialized[..contents_start],
        &serialized[contents_end..],
    ]
    .concat();

    let mut chain = Stack::new().map_err(SigningError::Cms)?;
    for ca in &key.chain {
        chain.push(ca.clone()).map_err(SigningError::Cms)?;
    }
    let pkcs7 = Pkcs7::sign(
        &key.certificate,
        &key.private_key,
        &chain,
        &to_sign,
        Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY,
    )
    .map_err(SigningError::Cms)?;
    let der = pkcs7.to_der().map_err(SigningError::Cms)?;

    let sig_hex = hex::encode(&der);
    if sig_hex.len() > CONTENTS_CAPACITY * 2 {
        return Err(SigningError::SignatureTooLarge {
            actual: der.len(),
            capacity: CONTENTS_CAPACITY,
        });
    }
    let hex_start = contents_start + 1;
    serialized[hex_start..hex_start + sig_hex.len()].copy_from_slice(sig_hex.as_bytes());

    Ok(SignedPdf {
        bytes: serialized,
        page: page_number,
    })
}

/// Walk up from the page to find the effective MediaBox. Pages without
/// one anywhere in the tree fall back to US Letter.
fn page_media_box(doc: &Document, page_id: ObjectId) -> Result<PageRect, SigningError> {
    let mut node = page_id;
    loop {
        let dict = doc
            .get_object(node)
            .and_then(|o| o.as_dict())
            .map_err(SigningError::Assembly)?;
        if let Ok(mb) = dict.get(b"MediaBox") {
            let values = mb.as_array().map_err(SigningError::Assembly)?;
            if values.len() == 4 {
                return Ok(PageRect {
                    llx: object_as_f32(&values[0]),
                    lly: object_as_f32(&values[1]),
                    urx: object_as_f32(&values[2]),
                    ury: object_as_f32(&values[3]),
                });
            }
        }
        match dict.get(b"Parent").and_then(|o| o.as_reference()) {
            Ok(parent) => node = parent,
            Err(_) => {
                return Ok(PageRect {
                    llx: 0.0,
                    lly: 0.0,
                    urx: 612.0,
                    ury: 792.0,
                })
            }
        }
    }
}

fn object_as_f32(obj: &Object) -> f32 {
    match obj {
        Object::Integer(i) => *i as f32,
        Object::Real(r) => *r,
        _ => 0.0,
    }
}

fn attach_annotation(
    doc: &mut Document,
    page_id: ObjectId,
    field_id: ObjectId,
) -> Result<(), SigningError> {
    let annots_ref = doc
        .get_object(page_id)
        .and_then(|o| o.as_dict())
        .ok()
        .and_then(|d| d.get(b"Annots").ok())
        .and_then(|o| o.as_reference().ok());

    if let Some(arr_id) = annots_ref {
        let arr = doc
            .get_object_mut(arr_id)
            .and_then(|o| o.as_array_mut())
            .map_err(SigningError::Assembly)?;
        arr.push(Object::Reference(field_id));
        return Ok(());
    }

    let page_dict = doc
        .get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(SigningError::Assembly)?;
    match page_dict.get_mut(b"Annots") {
        Ok(Object::Array(arr)) => arr.push(Object::Reference(field_id)),
        _ => page_dict.set("Annots", vec![Object::Reference(field_id)]),
    }
    Ok(())
}

fn wire_acroform(doc: &mut Document, field_id: ObjectId) -> Result<(), SigningError> {
    let existing = doc
        .catalog()
        .ok()
        .and_then(|c| c.get(b"AcroForm").ok())
        .cloned();

    match existing {
        Some(Object::Reference(form_id)) => {
            let form = doc
                .get_object_mut(form_id)
                .and_then(|o| o.as_dict_mut())
                .map_err(SigningError::Assembly)?;
            append_signature_field(form, field_id);
        }
        Some(Object::Dictionary(_)) => {
            let catalog = doc.catalog_mut().map_err(SigningError::Assembly)?;
            if let Ok(Object::Dictionary(form)) = catalog.get_mut(b"AcroForm") {
                append_signature_field(form, field_id);
            }
        }
        _ => {
            let catalog = doc.catalog_mut().map_err(SigningError::Assembly)?;
            catalog.set(
                "AcroForm",
                dictionary! {
                    "Fields" => vec![Object::Reference(field_id)],
                    "SigFlags" => 3,
                },
            );
        }
    }
    Ok(())
}

fn append_signature_field(form: &mut Dictionary, field_id: ObjectId) {
    match form.get_mut(b"Fields") {
        Ok(Object::Array(fields)) => fields.push(Object::Reference(field_id)),
        _ => form.set("Fields", vec![Object::Reference(field_id)]),
    }
    form.set("SigFlags", 3);
}

/// Serialize the document until the ByteRange offsets agree with the
/// serialized placeholder position, then return the bytes together
/// with the span of the /Contents string (brackets included). Offsets
/// that keep oscillating are an error; a stale ByteRange would disagree
/// with the span the signature covers.
fn fix_byte_range(
    doc: &mut Document,
    sig_id: ObjectId,
) -> Result<(Vec<u8>, usize, usize), SigningError> {
    let needle: Vec<u8> = {
        let mut n = Vec::with_capacity(CONTENTS_CAPACITY * 2 + 2);
        n.push(b'<');
        n.resize(CONTENTS_CAPACITY * 2 + 1, b'0');
        n.push(b'>');
        n
    };

    let mut byte_range = [0i64; 4];
    let mut serialized = Vec::new();

    for _ in 0..MAX_BYTE_RANGE_PASSES {
        let sig = doc
            .get_object_mut(sig_id)
            .and_then(|o| o.as_dict_mut())
            .map_err(SigningError::Assembly)?;
        sig.set(
            "ByteRange",
            Object::Array(byte_range.iter().map(|v| Object::Integer(*v)).collect()),
        );

        serialized.clear();
        doc.save_to(&mut serialized)
            .map_err(|e| SigningError::Serialize(e.to_string()))?;

        let start = serialized
            .windows(needle.len())
            .position(|w| w == needle.as_slice())
            .ok_or(SigningError::PlaceholderMissing)?;
        let end = start + needle.len();

        let next = [
            0,
            start as i64,
            end as i64,
            (serialized.len() - end) as i64,
        ];
        if next == byte_range {
            return Ok((serialized, start, end));
        }
        byte_range = next;
    }

    Err(SigningError::ByteRangeUnstable {
        passes: MAX_BYTE_RANGE_PASSES,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::keystore::test_support;
    use std::io::Cursor;

    fn blank_pdf(page_count: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for _ in 0..page_count {
            let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "Contents" => Object::Reference(content_id),
            });
            kids.push(Object::Reference(page_id));
        }
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 10, 10]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    fn find_sig_dict(doc: &Document) -> &Dictionary {
        doc.objects
            .values()
            .filter_map(|o| o.as_dict().ok())
            .find(|d| {
                d.get(b"Type")
                    .and_then(|t| t.as_name())
                    .map(|n| n == b"Sig")
                    .unwrap_or(false)
            })
            .expect("no signature dictionary in output")
    }

    #[test]
    fn default_target_is_the_last_page() {
        let pdf = blank_pdf(3);
        let key = test_support::key_material();
        let signed = sign_pdf(&pdf, &png_bytes(), &SignOptions::default(), &key).unwrap();
        assert_eq!(signed.page, 3);

        let doc = Document::load_mem(&signed.bytes).unwrap();
        let pages = doc.get_pages();
        let third = doc.get_object(pages[&3]).unwrap().as_dict().unwrap();
        assert!(third.get(b"Annots").is_ok());
        let first = doc.get_object(pages[&1]).unwrap().as_dict().unwrap();
        assert!(first.get(b"Annots").is_err());
    }

    #[test]
    fn explicit_page_is_honored() {
        let pdf = blank_pdf(3);
        let key = test_support::key_material();
        let options = SignOptions {
            page: Some(2),
            ..SignOptions::default()
        };
        let signed = sign_pdf(&pdf, &png_bytes(), &options, &key).unwrap();
        assert_eq!(signed.page, 2);
    }

    #[test]
    fn out_of_range_page_is_never_clamped() {
        let pdf = blank_pdf(3);
        let key = test_support::key_material();
        let options = SignOptions {
            page: Some(9),
            ..SignOptions::default()
        };
        let err = sign_pdf(&pdf, &png_bytes(), &options, &key).unwrap_err();
        assert!(matches!(
            err,
            SigningError::PageOutOfRange {
                requested: 9,
                total: 3
            }
        ));
    }

    #[test]
    fn undecodable_image_fails_the_signing_call() {
        let pdf = blank_pdf(1);
        let key = test_support::key_material();
        let err = sign_pdf(&pdf, b"not an image", &SignOptions::default(), &key).unwrap_err();
        assert!(matches!(err, SigningError::Image(_)));
    }

    #[test]
    fn widget_rect_matches_the_placement_formula() {
        let pdf = blank_pdf(1);
        let key = test_support::key_material();
        let signed = sign_pdf(&pdf, &png_bytes(), &SignOptions::default(), &key).unwrap();

        let doc = Document::load_mem(&signed.bytes).unwrap();
        let widget = doc
            .objects
            .values()
            .filter_map(|o| o.as_dict().ok())
            .find(|d| {
                d.get(b"Subtype")
                    .and_then(|t| t.as_name())
                    .map(|n| n == b"Widget")
                    .unwrap_or(false)
            })
            .unwrap();
        let rect: Vec<f32> = widget
            .get(b"Rect")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(object_as_f32)
            .collect();
        assert_eq!(rect, vec![245.0, 712.0, 445.0, 792.0]);
    }

    #[test]
    fn signature_is_never_certifying() {
        let pdf = blank_pdf(1);
        let key = test_support::key_material();
        let signed = sign_pdf(&pdf, &png_bytes(), &SignOptions::default(), &key).unwrap();

        let doc = Document::load_mem(&signed.bytes).unwrap();
        let sig = find_sig_dict(&doc);
        assert!(sig.get(b"Reference").is_err());
        assert_eq!(
            sig.get(b"SubFilter").unwrap().as_name().unwrap(),
            b"adbe.pkcs7.detached"
        );
        let catalog = doc.catalog().unwrap();
        assert!(catalog.get(b"Perms").is_err());
    }

    #[test]
    fn byte_range_brackets_the_contents_string() {
        let pdf = blank_pdf(2);
        let key = test_support::key_material();
        let signed = sign_pdf(&pdf, &png_bytes(), &SignOptions::default(), &key).unwrap();

        let doc = Document::load_mem(&signed.bytes).unwrap();
        let sig = find_sig_dict(&doc);
        let range: Vec<i64> = sig
            .get(b"ByteRange")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o.as_i64().unwrap())
            .collect();
        assert_eq!(range[0], 0);
        assert_eq!(signed.bytes[range[1] as usize], b'<');
        assert_eq!(signed.bytes[(range[2] - 1) as usize], b'>');
        assert_eq!(range[2] + range[3], signed.bytes.len() as i64);

        // The patched placeholder holds a DER SEQUENCE.
        let contents = sig.get(b"Contents").unwrap().as_str().unwrap();
        assert_eq!(contents[0], 0x30);
    }

    #[test]
    fn metadata_is_reproducible_for_a_fixed_clock() {
        let pdf = blank_pdf(1);
        let key = test_support::key_material();
        let options = SignOptions {
            reason: Some("Approval".to_string()),
            location: Some("Hanoi".to_string()),
            ..SignOptions::default()
        };
        let when = chrono::DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);

        let a = sign_pdf_at(&pdf, &png_bytes(), &options, &key, when).unwrap();
        let b = sign_pdf_at(&pdf, &png_bytes(), &options, &key, when).unwrap();

        let doc_a = Document::load_mem(&a.bytes).unwrap();
        let doc_b = Document::load_mem(&b.bytes).unwrap();
        for key_name in [b"M".as_slice(), b"Reason".as_slice(), b"Location".as_slice()] {
            let va = find_sig_dict(&doc_a).get(key_name).unwrap().as_str().unwrap();
            let vb = find_sig_dict(&doc_b).get(key_name).unwrap().as_str().unwrap();
            assert_eq!(va, vb);
        }
        let m = find_sig_dict(&doc_a).get(b"M").unwrap().as_str().unwrap();
        assert_eq!(m, b"D:20260102030405+00'00'".as_slice());
    }

    #[test]
    fn appearance_draws_only_the_image() {
        let pdf = blank_pdf(1);
        let key = test_support::key_material();
        let signed = sign_pdf(&pdf, &png_bytes(), &SignOptions::default(), &key).unwrap();

        let doc = Document::load_mem(&signed.bytes).unwrap();
        let form = doc
            .objects
            .values()
            .filter_map(|o| {
                if let Object::Stream(s) = o {
                    Some(s)
                } else {
                    None
                }
            })
            .find(|s| {
                s.dict
                    .get(b"Subtype")
                    .and_then(|t| t.as_name())
                    .map(|n| n == b"Form")
                    .unwrap_or(false)
            })
            .unwrap();
        let ops = String::from_utf8(form.content.clone()).unwrap();
        assert!(ops.contains("/Img0 Do"));
        assert!(!ops.contains("Tj"), "appearance must not draw text");
    }

    #[test]
    fn signature_image_is_embedded_as_jpeg() {
        let pdf = blank_pdf(1);
        let key = test_support::key_material();
        let signed = sign_pdf(&pdf, &png_bytes(), &SignOptions::default(), &key).unwrap();

        let doc = Document::load_mem(&signed.bytes).unwrap();
        let img = doc
            .objects
            .values()
            .filter_map(|o| {
                if let Object::Stream(s) = o {
                    Some(s)
                } else {
                    None
                }
            })
            .find(|s| {
                s.dict
                    .get(b"Subtype")
                    .and_then(|t| t.as_name())
                    .map(|n| n == b"Image")
                    .unwrap_or(false)
            })
            .unwrap();
        assert_eq!(
            img.dict.get(b"Filter").unwrap().as_name().unwrap(),
            b"DCTDecode"
        );
        // JPEG SOI marker, not raw RGB samples.
        assert_eq!(&img.content[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn fixed_byte_range_agrees_with_the_returned_bytes() {
        let mut doc = Document::load_mem(&blank_pdf(1)).unwrap();
        let sig_id = doc.add_object(dictionary! {
            "Type" => "Sig",
            "ByteRange" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(0),
            ],
            "Contents" => Object::String(vec![0u8; CONTENTS_CAPACITY], StringFormat::Hexadecimal),
        });

        let (bytes, start, end) = fix_byte_range(&mut doc, sig_id).unwrap();
        assert_eq!(bytes[start], b'<');
        assert_eq!(bytes[end - 1], b'>');

        // The embedded ByteRange integers must match the located span,
        // never a value from an earlier serialization pass.
        let reloaded = Document::load_mem(&bytes).unwrap();
        let range: Vec<i64> = reloaded
            .get_object(sig_id)
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"ByteRange")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o.as_i64().unwrap())
            .collect();
        assert_eq!(
            range,
            vec![0, start as i64, end as i64, (bytes.len() - end) as i64]
        );
    }

    #[tokio::test]
    async fn signing_completes_on_the_blocking_pool() {
        let pdf = blank_pdf(1);
        let key = test_support::key_material();
        let signed = tokio::task::spawn_blocking(move || {
            sign_pdf(&pdf, &png_bytes(), &SignOptions::default(), &key)
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(signed.page, 1);
    }
}
