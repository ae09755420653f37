// 画像オブジェクト書き換えのテスト

use lopdf::{Document, Object, Stream, dictionary};

use pdf_redaction::geometry::{Matrix, Rect};
use pdf_redaction::pdf::image::{Dib, DibFormat, Image};
use pdf_redaction::pdf::object::ImageObject;
use pdf_redaction::redact::image::redact_image_object;

/// テスト用: Flate圧縮されたRaw RGB画像をドキュメントに追加してImageObjectを作る
fn make_rgb_image_object(
    doc: &mut Document,
    width: u32,
    height: u32,
    color: [u8; 3],
    matrix: Matrix,
) -> (lopdf::ObjectId, ImageObject) {
    let pixel_count = (width as usize) * (height as usize);
    let mut raw = Vec::with_capacity(pixel_count * 3);
    for _ in 0..pixel_count {
        raw.extend_from_slice(&color);
    }

    let compressed = {
        use flate2::Compression;
        use flate2::write::ZlibEncoder;
        use std::io::Write;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).expect("compress test data");
        encoder.finish().expect("finish compression")
    };

    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };
    let id = doc.add_object(Object::Stream(Stream::new(dict, compressed)));
    let image = Image::load(doc, id).expect("load image");
    (id, ImageObject::new(image, matrix, "Im1"))
}

/// 単位正方形を (0,0)-(w,h) に配置する行列
fn placement(w: f64, h: f64) -> Matrix {
    Matrix {
        a: w,
        b: 0.0,
        c: 0.0,
        d: h,
        e: 0.0,
        f: 0.0,
    }
}

/// 書き戻されたRGBストリームをデコードして返す
fn decoded_rgb(doc: &Document, id: lopdf::ObjectId) -> Vec<u8> {
    let stream = doc
        .get_object(id)
        .expect("object")
        .as_stream()
        .expect("stream");
    assert_eq!(
        stream.dict.get(b"ColorSpace").unwrap().as_name().unwrap(),
        b"DeviceRGB"
    );
    stream.decompressed_content().expect("decompress")
}

// ============================================================
// 1. 基本的なピクセル塗りつぶし
// ============================================================

#[test]
fn test_redact_center_pixels_white() {
    let mut doc = Document::with_version("1.7");
    let (id, mut iobj) = make_rgb_image_object(&mut doc, 4, 4, [10, 20, 30], placement(100.0, 100.0));
    let identity = Matrix::identity();

    // ページ(25,25)-(75,75) = ピクセル(1,1)-(3,3) (下上がり)
    let rects = [Rect::new(25.0, 25.0, 75.0, 75.0)];
    let changed = redact_image_object(&mut doc, &mut iobj, &rects, &identity, false);
    assert!(changed);
    assert!(iobj.dirty());

    let rgb = decoded_rgb(&doc, id);
    assert_eq!(rgb.len(), 4 * 4 * 3);

    for row_top in 0..4u32 {
        let y_img = 3 - row_top;
        for x in 0..4u32 {
            let o = ((row_top * 4 + x) * 3) as usize;
            let expect_red = (1..3).contains(&x) && (1..3).contains(&y_img);
            if expect_red {
                assert_eq!(&rgb[o..o + 3], &[0xFF, 0xFF, 0xFF], "px ({x},{y_img})");
            } else {
                assert_eq!(&rgb[o..o + 3], &[10, 20, 30], "px ({x},{y_img})");
            }
        }
    }

    // アルファ要素が無いのでSMaskは付かない
    let stream = doc.get_object(id).unwrap().as_stream().unwrap();
    assert!(stream.dict.get(b"SMask").is_err());
}

#[test]
fn test_redact_fill_black() {
    let mut doc = Document::with_version("1.7");
    let (id, mut iobj) = make_rgb_image_object(&mut doc, 2, 2, [200, 200, 200], placement(10.0, 10.0));
    let identity = Matrix::identity();

    let rects = [Rect::new(0.0, 0.0, 10.0, 10.0)];
    assert!(redact_image_object(&mut doc, &mut iobj, &rects, &identity, true));

    let rgb = decoded_rgb(&doc, id);
    assert!(rgb.iter().all(|&b| b == 0x00), "all pixels black");
}

// ============================================================
// 2. 早期リジェクト
// ============================================================

#[test]
fn test_no_overlap_returns_false() {
    let mut doc = Document::with_version("1.7");
    let (id, mut iobj) = make_rgb_image_object(&mut doc, 4, 4, [10, 20, 30], placement(100.0, 100.0));
    let identity = Matrix::identity();
    let original = doc
        .get_object(id)
        .unwrap()
        .as_stream()
        .unwrap()
        .content
        .clone();

    let rects = [Rect::new(200.0, 200.0, 300.0, 300.0)];
    let changed = redact_image_object(&mut doc, &mut iobj, &rects, &identity, false);
    assert!(!changed);
    assert!(!iobj.dirty());

    // ストリームは一切変更されない
    let after = doc
        .get_object(id)
        .unwrap()
        .as_stream()
        .unwrap()
        .content
        .clone();
    assert_eq!(original, after);
}

#[test]
fn test_empty_rects_returns_false() {
    let mut doc = Document::with_version("1.7");
    let (_, mut iobj) = make_rgb_image_object(&mut doc, 4, 4, [10, 20, 30], placement(100.0, 100.0));
    let identity = Matrix::identity();

    let changed = redact_image_object(&mut doc, &mut iobj, &[], &identity, false);
    assert!(!changed);
}

// ============================================================
// 3. アルファ付きパレット (Indexed-8)
// ============================================================

#[test]
fn test_indexed_palette_with_alpha_attaches_smask() {
    // 4x4、パレット: index0 = 不透明白, index1 = 完全透明黒
    // 左半分がindex0、右半分がindex1
    let mut data = Vec::with_capacity(16);
    for _row in 0..4 {
        data.extend_from_slice(&[0, 0, 1, 1]);
    }
    let dib = Dib::new(
        4,
        4,
        DibFormat::Indexed8,
        vec![0xFFFF_FFFF, 0x0000_0000],
        data,
    );
    let mut iobj = ImageObject::new(Image::from_dib(dib), placement(4.0, 4.0), "Im1");
    let mut doc = Document::with_version("1.7");
    let identity = Matrix::identity();

    // ピクセル (1..3, 1..3) を黒塗り
    let rects = [Rect::new(1.0, 1.0, 3.0, 3.0)];
    let changed = redact_image_object(&mut doc, &mut iobj, &rects, &identity, true);
    assert!(changed);

    // 新ストリームはDeviceRGB 8bpc
    let dict = iobj.image().dict();
    assert_eq!(dict.get(b"ColorSpace").unwrap().as_name().unwrap(), b"DeviceRGB");

    // SMaskがドキュメントに追加され、参照されている
    let smask_id = dict
        .get(b"SMask")
        .expect("SMask entry")
        .as_reference()
        .expect("reference");
    let smask = doc
        .get_object(smask_id)
        .expect("smask object")
        .as_stream()
        .expect("smask stream");
    assert_eq!(smask.dict.get(b"ColorSpace").unwrap().as_name().unwrap(), b"DeviceGray");
    let alpha = smask.content.clone();
    assert_eq!(alpha.len(), 16);

    let rgb = iobj.image().stream().decompressed_content().expect("rgb");

    for row_top in 0..4u32 {
        let y_img = 3 - row_top;
        for x in 0..4u32 {
            let i = (row_top * 4 + x) as usize;
            let o = i * 3;
            let redacted = (1..3).contains(&x) && (1..3).contains(&y_img);
            if redacted {
                // 塗りは黒、アルファは強制的に不透明
                assert_eq!(&rgb[o..o + 3], &[0, 0, 0], "px ({x},{y_img})");
                assert_eq!(alpha[i], 0xFF, "alpha ({x},{y_img})");
            } else if x < 2 {
                // index0: 不透明白
                assert_eq!(&rgb[o..o + 3], &[255, 255, 255]);
                assert_eq!(alpha[i], 0xFF);
            } else {
                // index1: 透明黒（パレットのアルファを引き継ぐ）
                assert_eq!(&rgb[o..o + 3], &[0, 0, 0]);
                assert_eq!(alpha[i], 0x00);
            }
        }
    }
}

#[test]
fn test_opaque_palette_attaches_no_smask() {
    let mut data = Vec::with_capacity(4);
    data.extend_from_slice(&[0, 1, 1, 0]);
    let dib = Dib::new(2, 2, DibFormat::Indexed8, vec![0xFFFF_0000, 0xFF00_00FF], data);
    let mut iobj = ImageObject::new(Image::from_dib(dib), placement(2.0, 2.0), "Im1");
    let mut doc = Document::with_version("1.7");
    let identity = Matrix::identity();

    let rects = [Rect::new(0.0, 0.0, 1.0, 1.0)];
    assert!(redact_image_object(&mut doc, &mut iobj, &rects, &identity, false));
    assert!(iobj.image().dict().get(b"SMask").is_err());
}

// ============================================================
// 4. 外部デコーダ由来の32-bit形式
// ============================================================

#[test]
fn test_rgbx32_filler_byte_dropped() {
    // RGB+詰め物の4バイト形式: 詰め物は捨てられ、アルファ面は作られない
    let mut data = Vec::with_capacity(2 * 2 * 4);
    for _ in 0..4 {
        data.extend_from_slice(&[10, 20, 30, 0x7F]);
    }
    let dib = Dib::new(2, 2, DibFormat::Rgbx32, Vec::new(), data);
    let mut iobj = ImageObject::new(Image::from_dib(dib), placement(2.0, 2.0), "Im1");
    let mut doc = Document::with_version("1.7");
    let identity = Matrix::identity();

    // 左下ピクセル (row_top=1, x=0) のみ塗る
    let rects = [Rect::new(0.0, 0.0, 1.0, 1.0)];
    assert!(redact_image_object(&mut doc, &mut iobj, &rects, &identity, false));

    let rgb = iobj.image().stream().decompressed_content().expect("rgb");
    assert_eq!(rgb.len(), 2 * 2 * 3);
    assert_eq!(&rgb[0..3], &[10, 20, 30]);
    assert_eq!(&rgb[3..6], &[10, 20, 30]);
    assert_eq!(&rgb[6..9], &[0xFF, 0xFF, 0xFF]);
    assert_eq!(&rgb[9..12], &[10, 20, 30]);
    assert!(iobj.image().dict().get(b"SMask").is_err());
}

#[test]
fn test_rgba32_source_alpha_carried_to_smask() {
    // 半透明RGBA: 元のアルファはソフトマスクへ、塗りピクセルは強制不透明
    let mut data = Vec::with_capacity(2 * 2 * 4);
    for _ in 0..4 {
        data.extend_from_slice(&[200, 100, 50, 0x40]);
    }
    let dib = Dib::new(2, 2, DibFormat::Rgba32, Vec::new(), data);
    let mut iobj = ImageObject::new(Image::from_dib(dib), placement(2.0, 2.0), "Im1");
    let mut doc = Document::with_version("1.7");
    let identity = Matrix::identity();

    let rects = [Rect::new(0.0, 0.0, 1.0, 1.0)];
    assert!(redact_image_object(&mut doc, &mut iobj, &rects, &identity, false));

    let smask_id = iobj
        .image()
        .dict()
        .get(b"SMask")
        .expect("SMask entry")
        .as_reference()
        .expect("reference");
    let alpha = doc
        .get_object(smask_id)
        .expect("smask object")
        .as_stream()
        .expect("smask stream")
        .content
        .clone();
    assert_eq!(alpha, vec![0x40, 0x40, 0xFF, 0x40]);

    let rgb = iobj.image().stream().decompressed_content().expect("rgb");
    assert_eq!(&rgb[0..3], &[200, 100, 50]);
    assert_eq!(&rgb[6..9], &[0xFF, 0xFF, 0xFF]);
    assert_eq!(&rgb[9..12], &[200, 100, 50]);
}

// ============================================================
// 5. 既存ソフトマスクの引き継ぎ
// ============================================================

#[test]
fn test_existing_smask_is_preserved_and_forced_opaque_in_boxes() {
    let mut doc = Document::with_version("1.7");

    // 2x2グレースケール画像、全ピクセル透明のソフトマスク付き
    let smask_dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => 2_i64,
        "Height" => 2_i64,
        "ColorSpace" => "DeviceGray",
        "BitsPerComponent" => 8,
    };
    let smask_id = doc.add_object(Object::Stream(Stream::new(smask_dict, vec![0x00; 4])));

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => 2_i64,
        "Height" => 2_i64,
        "ColorSpace" => "DeviceGray",
        "BitsPerComponent" => 8,
    };
    dict.set("SMask", Object::Reference(smask_id));
    let id = doc.add_object(Object::Stream(Stream::new(dict, vec![100, 110, 120, 130])));

    let image = Image::load(&doc, id).expect("load");
    let mut iobj = ImageObject::new(image, placement(2.0, 2.0), "Im1");
    let identity = Matrix::identity();

    // 左下ピクセル (0,0) = 上段から見ると row_top=1, x=0 のみ塗る
    let rects = [Rect::new(0.0, 0.0, 1.0, 1.0)];
    assert!(redact_image_object(&mut doc, &mut iobj, &rects, &identity, false));

    let new_smask_id = iobj
        .image()
        .dict()
        .get(b"SMask")
        .expect("SMask")
        .as_reference()
        .expect("reference");
    let alpha = doc
        .get_object(new_smask_id)
        .expect("smask")
        .as_stream()
        .expect("stream")
        .content
        .clone();

    // row_top=1, x=0 が塗られたピクセル: アルファは強制不透明。
    // それ以外は元のソフトマスク（透明）を引き継ぐ
    assert_eq!(alpha, vec![0x00, 0x00, 0xFF, 0x00]);

    // グレー値はRGBに展開され、塗りピクセルは白
    let rgb = iobj.image().stream().decompressed_content().expect("rgb");
    assert_eq!(&rgb[0..3], &[100, 100, 100]);
    assert_eq!(&rgb[3..6], &[110, 110, 110]);
    assert_eq!(&rgb[6..9], &[0xFF, 0xFF, 0xFF]);
    assert_eq!(&rgb[9..12], &[130, 130, 130]);
}

// ============================================================
// 6. 行列を通した座標変換
// ============================================================

#[test]
fn test_offset_placement_maps_rects_correctly() {
    let mut doc = Document::with_version("1.7");
    // 画像をページ(50,50)-(150,150)に配置
    let matrix = Matrix {
        a: 100.0,
        b: 0.0,
        c: 0.0,
        d: 100.0,
        e: 50.0,
        f: 50.0,
    };
    let (id, mut iobj) = make_rgb_image_object(&mut doc, 4, 4, [10, 20, 30], matrix);
    let identity = Matrix::identity();

    // ページ(50,50)-(100,100) = 画像の左下1/4 = ピクセル(0..2, 0..2) (下上がり)
    let rects = [Rect::new(50.0, 50.0, 100.0, 100.0)];
    assert!(redact_image_object(&mut doc, &mut iobj, &rects, &identity, false));

    let rgb = decoded_rgb(&doc, id);
    for row_top in 0..4u32 {
        let y_img = 3 - row_top;
        for x in 0..4u32 {
            let o = ((row_top * 4 + x) * 3) as usize;
            let expect_red = x < 2 && y_img < 2;
            if expect_red {
                assert_eq!(&rgb[o..o + 3], &[0xFF, 0xFF, 0xFF], "px ({x},{y_img})");
            } else {
                assert_eq!(&rgb[o..o + 3], &[10, 20, 30], "px ({x},{y_img})");
            }
        }
    }
}

#[test]
fn test_parent_to_page_composition() {
    let mut doc = Document::with_version("1.7");
    // フォーム内で単位正方形配置、親変換で(0,0)-(100,100)へ拡大
    let (id, mut iobj) = make_rgb_image_object(&mut doc, 2, 2, [10, 20, 30], placement(1.0, 1.0));
    let parent = placement(100.0, 100.0);

    // ページ左半分 → ピクセル列0のみ
    let rects = [Rect::new(0.0, 0.0, 50.0, 100.0)];
    assert!(redact_image_object(&mut doc, &mut iobj, &rects, &parent, false));

    let rgb = decoded_rgb(&doc, id);
    for row_top in 0..2u32 {
        let o0 = ((row_top * 2) * 3) as usize;
        let o1 = ((row_top * 2 + 1) * 3) as usize;
        assert_eq!(&rgb[o0..o0 + 3], &[0xFF, 0xFF, 0xFF], "col 0 redacted");
        assert_eq!(&rgb[o1..o1 + 3], &[10, 20, 30], "col 1 untouched");
    }
}
