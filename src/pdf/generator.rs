use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, StringFormat};

use crate::error::PdfRedactError;
use crate::geometry::Matrix;
use crate::pdf::image::flate_encode;
use crate::pdf::object::{
    FillColor, FillType, FormXObject, ObjectHolder, PageObject, PathObject, PathOp, TextObject,
};
use crate::pdf::page::Page;

fn real(v: f64) -> Object {
    Object::Real(v as f32)
}

fn name(n: &str) -> Object {
    Object::Name(n.as_bytes().to_vec())
}

/// ホルダの全オブジェクトをコンテンツストリームに直列化する。
///
/// テキストはBT...ET、パス・XObjectはq...Qで囲んで出力する。
/// 各オブジェクトの行列は解析時にCTMを合成済みなので、
/// テキストはTm、それ以外はcmとしてそのまま書き出せる。
pub fn generate_content(holder: &ObjectHolder) -> crate::error::Result<Vec<u8>> {
    let mut operations: Vec<Operation> = Vec::new();

    for obj in holder.iter() {
        match obj {
            PageObject::Text(text) => write_text(&mut operations, text),
            PageObject::Path(path) => write_path(&mut operations, path),
            PageObject::Image(image) => {
                write_xobject(&mut operations, &image.matrix(), image.name());
            }
            PageObject::Form(form) => {
                // フォーム自身の/Matrixは消費側が適用するため、cmにはCTMのみ書く
                write_xobject(&mut operations, &form.matrix(), form.name());
            }
        }
    }

    Content { operations }
        .encode()
        .map_err(|e| PdfRedactError::content_stream(e.to_string()))
}

fn write_fill_color(operations: &mut Vec<Operation>, color: &FillColor) {
    match color {
        FillColor::Gray(g) => {
            operations.push(Operation::new("g", vec![real(*g)]));
        }
        FillColor::Rgb(r, g, b) => {
            operations.push(Operation::new("rg", vec![real(*r), real(*g), real(*b)]));
        }
        FillColor::Cmyk(c, m, y, k) => {
            operations.push(Operation::new(
                "k",
                vec![real(*c), real(*m), real(*y), real(*k)],
            ));
        }
    }
}

fn matrix_operands(m: &Matrix) -> Vec<Object> {
    vec![
        real(m.a),
        real(m.b),
        real(m.c),
        real(m.d),
        real(m.e),
        real(m.f),
    ]
}

fn write_text(operations: &mut Vec<Operation>, text: &TextObject) {
    let strings = text.strings();
    if strings.is_empty() {
        return;
    }

    operations.push(Operation::new("BT", vec![]));
    write_fill_color(operations, text.fill_color());
    // スペーシングはストリーム内で引き継がれるため、毎回明示的に書く
    operations.push(Operation::new("Tc", vec![real(text.char_space())]));
    operations.push(Operation::new("Tw", vec![real(text.word_space())]));
    if !text.font_name().is_empty() {
        operations.push(Operation::new(
            "Tf",
            vec![name(text.font_name()), real(text.font_size())],
        ));
    }
    operations.push(Operation::new("Tm", matrix_operands(&text.text_matrix())));

    let kernings = text.kernings();
    if kernings.is_empty() {
        operations.push(Operation::new(
            "Tj",
            vec![Object::String(strings[0].clone(), StringFormat::Hexadecimal)],
        ));
    } else {
        // [ <hex> n <hex> ... ] TJ。調整値は符号そのまま書き出す
        let mut array: Vec<Object> = Vec::with_capacity(strings.len() + kernings.len());
        for (i, seg) in strings.iter().enumerate() {
            array.push(Object::String(seg.clone(), StringFormat::Hexadecimal));
            if i < kernings.len() {
                array.push(real(kernings[i]));
            }
        }
        operations.push(Operation::new("TJ", vec![Object::Array(array)]));
    }

    operations.push(Operation::new("ET", vec![]));
}

fn write_path(operations: &mut Vec<Operation>, path: &PathObject) {
    let paint = match (path.fill_type(), path.stroke()) {
        (FillType::Winding, false) => "f",
        (FillType::EvenOdd, false) => "f*",
        (FillType::Winding, true) => "B",
        (FillType::EvenOdd, true) => "B*",
        (FillType::None, true) => "S",
        (FillType::None, false) => "n",
    };

    operations.push(Operation::new("q", vec![]));
    let matrix = path.matrix();
    if !matrix.is_identity() {
        operations.push(Operation::new("cm", matrix_operands(&matrix)));
    }
    if path.fill_type() != FillType::None {
        write_fill_color(operations, path.fill_color());
    }

    for op in path.ops() {
        match op {
            PathOp::MoveTo(x, y) => {
                operations.push(Operation::new("m", vec![real(*x), real(*y)]));
            }
            PathOp::LineTo(x, y) => {
                operations.push(Operation::new("l", vec![real(*x), real(*y)]));
            }
            PathOp::CurveTo(x1, y1, x2, y2, x3, y3) => {
                operations.push(Operation::new(
                    "c",
                    vec![
                        real(*x1),
                        real(*y1),
                        real(*x2),
                        real(*y2),
                        real(*x3),
                        real(*y3),
                    ],
                ));
            }
            PathOp::Rect(r) => {
                operations.push(Operation::new(
                    "re",
                    vec![real(r.left), real(r.bottom), real(r.width()), real(r.height())],
                ));
            }
            PathOp::Close => {
                operations.push(Operation::new("h", vec![]));
            }
        }
    }

    operations.push(Operation::new(paint, vec![]));
    operations.push(Operation::new("Q", vec![]));
}

fn write_xobject(operations: &mut Vec<Operation>, matrix: &Matrix, xobject_name: &str) {
    operations.push(Operation::new("q", vec![]));
    if !matrix.is_identity() {
        operations.push(Operation::new("cm", matrix_operands(matrix)));
    }
    operations.push(Operation::new("Do", vec![name(xobject_name)]));
    operations.push(Operation::new("Q", vec![]));
}

/// フォームのホルダを直列化し、ドキュメント内のストリームへ書き戻す。
///
/// 既存のストリーム辞書（BBox/Resources/Matrix等）は保持し、
/// 内容だけをFlate圧縮で置き換える。書き戻し先IDが無いフォームは何もしない。
pub fn regenerate_form_content(doc: &mut Document, form: &FormXObject) -> crate::error::Result<()> {
    let Some(id) = form.stream_id() else {
        return Ok(());
    };

    let bytes = generate_content(&form.holder)?;

    let mut dict = doc
        .get_object(id)
        .and_then(|obj| obj.as_stream())
        .map_err(|e| PdfRedactError::pdf_write(e.to_string()))?
        .dict
        .clone();
    dict.remove(b"Filter");
    dict.remove(b"DecodeParms");

    let compressed = flate_encode(&bytes)
        .map_err(|e| PdfRedactError::pdf_write(e.to_string()))?;
    dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));

    doc.objects
        .insert(id, Object::Stream(Stream::new(dict, compressed)));
    Ok(())
}

/// ページのホルダを直列化し、ページのContentsへ書き戻す。
///
/// リダクションのエントリポイントはこれを呼ばない。ページをいつ
/// 直列化するかは呼び出し側の責任になる。
pub fn write_page_content(doc: &mut Document, page: &Page) -> crate::error::Result<()> {
    let Some(page_id) = page.id() else {
        return Err(PdfRedactError::pdf_write(
            "page is not backed by a document",
        ));
    };

    let bytes = generate_content(&page.holder)?;
    doc.change_page_content(page_id, bytes)
        .map_err(|e| PdfRedactError::pdf_write(e.to_string()))
}
