// コンテンツストリーム解析と再直列化のテスト

use lopdf::{Dictionary, Document, Object, Stream, dictionary};

use pdf_redaction::pdf::generator::{generate_content, write_page_content};
use pdf_redaction::pdf::object::{FillColor, FillType};
use pdf_redaction::pdf::page::Page;

/// ドキュメントにコンテンツとリソースを持つページを1枚追加する
fn add_page(doc: &mut Document, content: &[u8], resources: Dictionary) {
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Object::Stream(Stream::new(dictionary! {}, content.to_vec())));
    let resources_id = doc.add_object(Object::Dictionary(resources));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(612),
            Object::Integer(792),
        ],
        "Resources" => resources_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
}

fn doc_with_page(content: &[u8], resources: Dictionary) -> Document {
    let mut doc = Document::with_version("1.7");
    add_page(&mut doc, content, resources);
    doc
}

/// Flate圧縮RGB画像をdocに追加し、XObjectリソース辞書を返す
fn image_resources(doc: &mut Document) -> Dictionary {
    let raw = vec![128u8; 2 * 2 * 3];
    let compressed = {
        use flate2::Compression;
        use flate2::write::ZlibEncoder;
        use std::io::Write;
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&raw).expect("compress");
        enc.finish().expect("finish")
    };
    let image_id = doc.add_object(Object::Stream(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 2_i64,
            "Height" => 2_i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        compressed,
    )));
    let mut xobjects = Dictionary::new();
    xobjects.set("Im1", Object::Reference(image_id));
    dictionary! { "XObject" => Object::Dictionary(xobjects) }
}

// ============================================================
// 1. テキストの解析
// ============================================================

#[test]
fn test_parse_simple_tj() {
    let doc = doc_with_page(b"BT /F1 12 Tf 100 200 Td (AB) Tj ET", dictionary! {});
    let page = Page::load(&doc, 1).expect("load page");

    assert_eq!(page.holder.len(), 1);
    let to = page.holder.get(0).unwrap().as_text().expect("text object");
    assert_eq!(to.font_name(), "F1");
    assert!((to.font_size() - 12.0).abs() < 1e-6);
    assert_eq!(to.strings(), &[b"AB".to_vec()]);
    let tm = to.text_matrix();
    assert!((tm.e - 100.0).abs() < 1e-6);
    assert!((tm.f - 200.0).abs() < 1e-6);
    // フォントリソースが無いのでフォントは未解決
    assert!(to.font().is_none());
}

#[test]
fn test_parse_tj_array_keeps_adjustments() {
    let doc = doc_with_page(b"BT /F1 10 Tf [(A) -120 (B)] TJ ET", dictionary! {});
    let page = Page::load(&doc, 1).expect("load page");

    let to = page.holder.get(0).unwrap().as_text().expect("text object");
    assert_eq!(to.strings(), &[b"A".to_vec(), b"B".to_vec()]);
    assert_eq!(to.kernings(), &[-120.0]);
}

#[test]
fn test_parse_ctm_composes_into_text_matrix() {
    // cmを先に適用: Tm(10,20) → CTM(scale 2) → ページ(20,40)
    let doc = doc_with_page(
        b"q 2 0 0 2 0 0 cm BT /F1 10 Tf 10 20 Td (A) Tj ET Q",
        dictionary! {},
    );
    let page = Page::load(&doc, 1).expect("load page");

    let to = page.holder.get(0).unwrap().as_text().expect("text object");
    let tm = to.text_matrix();
    assert!((tm.a - 2.0).abs() < 1e-6);
    assert!((tm.e - 20.0).abs() < 1e-6);
    assert!((tm.f - 40.0).abs() < 1e-6);
}

#[test]
fn test_parse_fill_color_tracked() {
    let doc = doc_with_page(b"BT /F1 10 Tf 1 0 0 rg (A) Tj ET", dictionary! {});
    let page = Page::load(&doc, 1).expect("load page");
    let to = page.holder.get(0).unwrap().as_text().expect("text object");
    match to.fill_color() {
        FillColor::Rgb(r, g, b) => {
            assert!((r - 1.0).abs() < 1e-6);
            assert!(g.abs() < 1e-6);
            assert!(b.abs() < 1e-6);
        }
        other => panic!("expected RGB fill color, got {:?}", other),
    }
}

// ============================================================
// 2. パスの解析
// ============================================================

#[test]
fn test_parse_rect_path() {
    let doc = doc_with_page(b"10 20 30 40 re f", dictionary! {});
    let page = Page::load(&doc, 1).expect("load page");

    assert_eq!(page.holder.len(), 1);
    let path = page.holder.get(0).unwrap().as_path().expect("path object");
    assert_eq!(path.fill_type(), FillType::Winding);
    assert!(!path.stroke());
    let bbox = path.bbox();
    assert!((bbox.left - 10.0).abs() < 1e-6);
    assert!((bbox.bottom - 20.0).abs() < 1e-6);
    assert!((bbox.right - 40.0).abs() < 1e-6);
    assert!((bbox.top - 60.0).abs() < 1e-6);
}

#[test]
fn test_parse_clip_only_path_produces_no_object() {
    let doc = doc_with_page(b"0 0 100 100 re W n", dictionary! {});
    let page = Page::load(&doc, 1).expect("load page");
    assert_eq!(page.holder.len(), 0);
}

#[test]
fn test_parse_q_restores_ctm() {
    let doc = doc_with_page(
        b"q 2 0 0 2 0 0 cm 10 10 20 20 re f Q 5 5 15 15 re S",
        dictionary! {},
    );
    let page = Page::load(&doc, 1).expect("load page");

    assert_eq!(page.holder.len(), 2);
    let first = page.holder.get(0).unwrap().as_path().expect("path");
    assert!((first.matrix().a - 2.0).abs() < 1e-6);
    let second = page.holder.get(1).unwrap().as_path().expect("path");
    assert!(second.matrix().is_identity());
    assert!(second.stroke());
    assert_eq!(second.fill_type(), FillType::None);
}

// ============================================================
// 3. XObjectの解析
// ============================================================

#[test]
fn test_parse_image_do() {
    let mut doc = Document::with_version("1.7");
    let resources = image_resources(&mut doc);
    add_page(&mut doc, b"q 100 0 0 100 20 30 cm /Im1 Do Q", resources);
    let page = Page::load(&doc, 1).expect("load page");

    assert_eq!(page.holder.len(), 1);
    let io = page.holder.get(0).unwrap().as_image().expect("image object");
    assert_eq!(io.name(), "Im1");
    let m = io.matrix();
    assert!((m.a - 100.0).abs() < 1e-6);
    assert!((m.e - 20.0).abs() < 1e-6);
    assert!((m.f - 30.0).abs() < 1e-6);
    assert_eq!(io.image().width(), 2);
}

#[test]
fn test_parse_form_do_recurses() {
    let mut doc = Document::with_version("1.7");
    let form_id = doc.add_object(Object::Stream(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "Matrix" => vec![
                Object::Integer(1),
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(1),
                Object::Integer(5),
                Object::Integer(7),
            ],
        },
        b"BT /F1 10 Tf (in form) Tj ET".to_vec(),
    )));
    let mut xobjects = Dictionary::new();
    xobjects.set("Fm1", Object::Reference(form_id));
    let resources = dictionary! { "XObject" => Object::Dictionary(xobjects) };
    add_page(&mut doc, b"q 1 0 0 1 50 60 cm /Fm1 Do Q", resources);
    let page = Page::load(&doc, 1).expect("load page");

    assert_eq!(page.holder.len(), 1);
    let fo = page.holder.get(0).unwrap().as_form().expect("form object");
    assert_eq!(fo.name(), "Fm1");
    // 配置CTMとフォーム/Matrixは別々に保持される
    assert!((fo.matrix().e - 50.0).abs() < 1e-6);
    assert!((fo.form.matrix().e - 5.0).abs() < 1e-6);
    // 合成: フォームローカル(0,0) → (5,7) → (55,67)
    let placement = fo.placement_matrix();
    let (x, y) = placement.transform_point(0.0, 0.0);
    assert!((x - 55.0).abs() < 1e-6);
    assert!((y - 67.0).abs() < 1e-6);
    // フォーム内のテキストが解析されている
    assert_eq!(fo.form.holder.len(), 1);
    let inner = fo.form.holder.get(0).unwrap().as_text().expect("inner text");
    assert_eq!(inner.strings(), &[b"in form".to_vec()]);
}

// ============================================================
// 4. 再直列化ラウンドトリップ
// ============================================================

#[test]
fn test_generate_then_reparse_text() {
    let doc = doc_with_page(
        b"BT /F1 12 Tf 0.5 g 100 200 Td [(He) -1500 ( World)] TJ ET",
        dictionary! {},
    );
    let page = Page::load(&doc, 1).expect("load page");
    let bytes = generate_content(&page.holder).expect("generate");

    // 再解析して同じ構造が得られる
    let doc2 = doc_with_page(&bytes, dictionary! {});
    let page2 = Page::load(&doc2, 1).expect("reload");
    assert_eq!(page2.holder.len(), 1);
    let to = page2.holder.get(0).unwrap().as_text().expect("text");
    assert_eq!(to.strings(), &[b"He".to_vec(), b" World".to_vec()]);
    assert_eq!(to.kernings(), &[-1500.0]);
    let tm = to.text_matrix();
    assert!((tm.e - 100.0).abs() < 1e-3);
    assert!((tm.f - 200.0).abs() < 1e-3);
    match to.fill_color() {
        FillColor::Gray(g) => assert!((g - 0.5).abs() < 1e-3),
        other => panic!("expected gray fill, got {:?}", other),
    }
}

#[test]
fn test_generate_then_reparse_path() {
    let doc = doc_with_page(
        b"q 2 0 0 2 0 0 cm 1 0 0 rg 10 20 30 40 re f Q",
        dictionary! {},
    );
    let page = Page::load(&doc, 1).expect("load page");
    let bytes = generate_content(&page.holder).expect("generate");

    let doc2 = doc_with_page(&bytes, dictionary! {});
    let page2 = Page::load(&doc2, 1).expect("reload");
    let path = page2.holder.get(0).unwrap().as_path().expect("path");
    assert!((path.matrix().a - 2.0).abs() < 1e-3);
    assert_eq!(path.fill_type(), FillType::Winding);
    let bbox = path.bbox();
    assert!((bbox.left - 10.0).abs() < 1e-3);
    assert!((bbox.top - 60.0).abs() < 1e-3);
}

#[test]
fn test_write_page_content_roundtrip() {
    let mut doc = doc_with_page(b"BT /F1 12 Tf 100 200 Td (AB) Tj ET", dictionary! {});
    let page = Page::load(&doc, 1).expect("load page");

    write_page_content(&mut doc, &page).expect("write back");

    let page2 = Page::load(&doc, 1).expect("reload");
    assert_eq!(page2.holder.len(), 1);
    let to = page2.holder.get(0).unwrap().as_text().expect("text");
    assert_eq!(to.strings(), &[b"AB".to_vec()]);
}

#[test]
fn test_empty_content_parses_to_empty_holder() {
    let doc = doc_with_page(b"", dictionary! {});
    let page = Page::load(&doc, 1).expect("load page");
    assert_eq!(page.holder.len(), 0);
}

#[test]
fn test_consecutive_shows_advance_text_matrix() {
    // 連続するTjは前のshowの送り分だけ進んだ位置から始まる。
    // 送り量の計算にはフォント幅が必要なので、Widths付きフォントを使う
    let mut doc = Document::with_version("1.7");
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "TrueType",
        "BaseFont" => "Helvetica",
        "FirstChar" => 65_i64,
        "Widths" => vec![Object::Integer(500), Object::Integer(500)],
    });
    let mut fonts = Dictionary::new();
    fonts.set("F1", Object::Reference(font_id));
    let resources = dictionary! { "Font" => Object::Dictionary(fonts) };
    add_page(&mut doc, b"BT /F1 10 Tf 100 200 Td (A) Tj (B) Tj ET", resources);
    let page = Page::load(&doc, 1).expect("load page");

    assert_eq!(page.holder.len(), 2);
    let first = page.holder.get(0).unwrap().as_text().expect("text");
    let second = page.holder.get(1).unwrap().as_text().expect("text");
    assert!((first.text_matrix().e - 100.0).abs() < 1e-6);
    // Aの送り 500 * 10 / 1000 = 5.0
    assert!((second.text_matrix().e - 105.0).abs() < 1e-6);
}
