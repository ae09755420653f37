use std::collections::HashMap;
use std::rc::Rc;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::PdfRedactError;
use crate::geometry::Matrix;
use crate::pdf::font::{self, ParsedFont};
use crate::pdf::image::{Image, stream_filtered_bytes};
use crate::pdf::object::{
    FillColor, FillType, FormObject, FormXObject, ImageObject, ObjectHolder, PageObject, PathObject,
    PathOp, TextObject,
};

/// フォームXObjectの再帰展開の深さ上限（自己参照ループ対策）
const MAX_FORM_DEPTH: usize = 16;

/// BT...ET内のテキスト状態
struct TextState {
    font_name: String,
    font_size: f64,
    char_spacing: f64,
    word_spacing: f64,
    text_leading: f64,
    text_matrix: Matrix,
    text_line_matrix: Matrix,
}

impl TextState {
    fn new() -> Self {
        TextState {
            font_name: String::new(),
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            text_leading: 0.0,
            text_matrix: Matrix::identity(),
            text_line_matrix: Matrix::identity(),
        }
    }

    /// BTオペレータ: Tm・Tlmを単位行列に初期化する。
    /// フォントやスペーシングはグラフィックス状態なので保持する。
    fn begin_text(&mut self) {
        self.text_matrix = Matrix::identity();
        self.text_line_matrix = Matrix::identity();
    }

    /// T* オペレータ: 0 -TL Td と等価
    fn apply_t_star(&mut self) {
        let translate = Matrix::translation(0.0, -self.text_leading);
        self.text_line_matrix = translate.multiply(&self.text_line_matrix);
        self.text_matrix = self.text_line_matrix.clone();
    }
}

/// コンテンツストリームを解析し、ページオブジェクトのホルダを構築する。
///
/// CTMスタック(q/Q/cm)を追跡し、各オブジェクトの行列には描画時点の
/// CTMを合成する。テキストはTj/TJ/'/"の1回の描画につき1オブジェクト、
/// パスはpaintオペレータごとに1オブジェクトになる。DoオペレータはImage
/// XObjectとForm XObjectを解決し、フォームは再帰的に展開する。
pub fn parse_holder(
    doc: &Document,
    content_bytes: &[u8],
    resources: Option<&Dictionary>,
    fonts: &HashMap<String, Rc<ParsedFont>>,
) -> crate::error::Result<ObjectHolder> {
    parse_holder_depth(doc, content_bytes, resources, fonts, 0)
}

fn parse_holder_depth(
    doc: &Document,
    content_bytes: &[u8],
    resources: Option<&Dictionary>,
    fonts: &HashMap<String, Rc<ParsedFont>>,
    depth: usize,
) -> crate::error::Result<ObjectHolder> {
    // 空バイト列の場合、lopdfのパーサがエラーを返す可能性があるため特別扱い
    if content_bytes.is_empty() {
        return Ok(ObjectHolder::new());
    }

    let content = Content::decode(content_bytes)
        .map_err(|e| PdfRedactError::content_stream(e.to_string()))?;

    let mut holder = ObjectHolder::new();
    let mut ctm_stack: Vec<Matrix> = vec![Matrix::identity()];
    let mut fill_color_stack: Vec<FillColor> = vec![FillColor::default_black()];
    let mut in_text = false;
    let mut ts = TextState::new();
    let mut path_ops: Vec<PathOp> = Vec::new();
    let mut last_point = (0.0_f64, 0.0_f64);

    for op in &content.operations {
        match op.operator.as_str() {
            // --- グラフィックス状態 ---
            "q" => {
                let current_ctm = ctm_stack.last().cloned().unwrap_or_else(Matrix::identity);
                ctm_stack.push(current_ctm);
                let current_fc = fill_color_stack
                    .last()
                    .cloned()
                    .unwrap_or_else(FillColor::default_black);
                fill_color_stack.push(current_fc);
            }
            "Q" => {
                if ctm_stack.len() > 1 {
                    ctm_stack.pop();
                }
                if fill_color_stack.len() > 1 {
                    fill_color_stack.pop();
                }
            }
            "cm" => {
                if op.operands.len() == 6 {
                    let cm = matrix_from_operands(&op.operands)?;
                    if let Some(current) = ctm_stack.last_mut() {
                        // cmを先に適用: CTM' = cm × CTM
                        *current = cm.multiply(current);
                    }
                }
            }

            // --- Fill color ---
            "rg" | "g" | "k" | "sc" | "scn" => {
                apply_color_op(op, &mut fill_color_stack);
            }

            // --- テキストブロック ---
            "BT" => {
                in_text = true;
                ts.begin_text();
            }
            "ET" => {
                in_text = false;
            }

            // --- テキスト配置オペレータ（BT内のみ有効） ---
            "Td" | "TD" | "Tm" | "T*" | "TL" if in_text => {
                apply_text_positioning_op(op, &mut ts)?;
            }

            // --- テキスト状態オペレータ（BT内のみ有効） ---
            "Tf" | "Tc" | "Tw" | "Tz" | "Ts" | "Tr" if in_text => {
                apply_text_state_op(op, &mut ts)?;
            }

            // --- テキスト描画オペレータ ---
            "Tj" | "TJ" | "'" | "\"" if in_text => {
                apply_text_show_op(op, &mut ts, fonts, &ctm_stack, &fill_color_stack, &mut holder);
            }

            // --- パス構築 ---
            "m" if op.operands.len() == 2 => {
                let x = operand_to_f64(&op.operands[0])?;
                let y = operand_to_f64(&op.operands[1])?;
                path_ops.push(PathOp::MoveTo(x, y));
                last_point = (x, y);
            }
            "l" if op.operands.len() == 2 => {
                let x = operand_to_f64(&op.operands[0])?;
                let y = operand_to_f64(&op.operands[1])?;
                path_ops.push(PathOp::LineTo(x, y));
                last_point = (x, y);
            }
            "c" if op.operands.len() == 6 => {
                let v: Vec<f64> = numeric_operands(&op.operands)?;
                path_ops.push(PathOp::CurveTo(v[0], v[1], v[2], v[3], v[4], v[5]));
                last_point = (v[4], v[5]);
            }
            "v" if op.operands.len() == 4 => {
                // 第1制御点は現在点
                let v: Vec<f64> = numeric_operands(&op.operands)?;
                path_ops.push(PathOp::CurveTo(
                    last_point.0,
                    last_point.1,
                    v[0],
                    v[1],
                    v[2],
                    v[3],
                ));
                last_point = (v[2], v[3]);
            }
            "y" if op.operands.len() == 4 => {
                // 第2制御点は終点
                let v: Vec<f64> = numeric_operands(&op.operands)?;
                path_ops.push(PathOp::CurveTo(v[0], v[1], v[2], v[3], v[2], v[3]));
                last_point = (v[2], v[3]);
            }
            "h" => {
                path_ops.push(PathOp::Close);
            }
            "re" if op.operands.len() == 4 => {
                let v: Vec<f64> = numeric_operands(&op.operands)?;
                let mut r = crate::geometry::Rect::new(v[0], v[1], v[0] + v[2], v[1] + v[3]);
                r.normalize();
                path_ops.push(PathOp::Rect(r));
                last_point = (v[0], v[1]);
            }

            // --- パス描画 ---
            "f" | "F" => finish_path(
                &mut holder,
                &mut path_ops,
                &ctm_stack,
                &fill_color_stack,
                FillType::Winding,
                false,
            ),
            "f*" => finish_path(
                &mut holder,
                &mut path_ops,
                &ctm_stack,
                &fill_color_stack,
                FillType::EvenOdd,
                false,
            ),
            "B" => finish_path(
                &mut holder,
                &mut path_ops,
                &ctm_stack,
                &fill_color_stack,
                FillType::Winding,
                true,
            ),
            "B*" => finish_path(
                &mut holder,
                &mut path_ops,
                &ctm_stack,
                &fill_color_stack,
                FillType::EvenOdd,
                true,
            ),
            "b" | "b*" => {
                path_ops.push(PathOp::Close);
                let fill_type = if op.operator == "b" {
                    FillType::Winding
                } else {
                    FillType::EvenOdd
                };
                finish_path(
                    &mut holder,
                    &mut path_ops,
                    &ctm_stack,
                    &fill_color_stack,
                    fill_type,
                    true,
                );
            }
            "S" => finish_path(
                &mut holder,
                &mut path_ops,
                &ctm_stack,
                &fill_color_stack,
                FillType::None,
                true,
            ),
            "s" => {
                path_ops.push(PathOp::Close);
                finish_path(
                    &mut holder,
                    &mut path_ops,
                    &ctm_stack,
                    &fill_color_stack,
                    FillType::None,
                    true,
                );
            }
            "n" => {
                // クリップ確定のみ。オブジェクトは生成しない
                path_ops.clear();
            }
            "W" | "W*" => {
                // クリップ指定は追跡しない（直後のpaintで消費される）
            }

            // --- XObject描画 ---
            "Do" => {
                if let Some(operand) = op.operands.first()
                    && let Ok(name_bytes) = operand.as_name()
                {
                    let name = String::from_utf8_lossy(name_bytes).into_owned();
                    let ctm = ctm_stack.last().cloned().unwrap_or_else(Matrix::identity);
                    apply_do_op(doc, resources, fonts, &name, &ctm, depth, &mut holder);
                }
            }

            // --- その他のオペレータは無視 ---
            _ => {}
        }
    }

    Ok(holder)
}

/// Fill colorオペレータ (rg/g/k/sc/scn) を適用する。
fn apply_color_op(op: &lopdf::content::Operation, fill_color_stack: &mut [FillColor]) {
    let Some(fc) = fill_color_stack.last_mut() else {
        return;
    };
    match op.operator.as_str() {
        "rg" => {
            if op.operands.len() == 3
                && let Ok(v) = numeric_operands(&op.operands)
            {
                *fc = FillColor::Rgb(v[0], v[1], v[2]);
            }
        }
        "g" => {
            if op.operands.len() == 1
                && let Ok(gray) = operand_to_f64(&op.operands[0])
            {
                *fc = FillColor::Gray(gray);
            }
        }
        "k" => {
            if op.operands.len() == 4
                && let Ok(v) = numeric_operands(&op.operands)
            {
                *fc = FillColor::Cmyk(v[0], v[1], v[2], v[3]);
            }
        }
        "sc" | "scn" => {
            // 値の数で色空間を判定
            if let Ok(v) = numeric_operands(&op.operands) {
                match v.len() {
                    1 => *fc = FillColor::Gray(v[0]),
                    3 => *fc = FillColor::Rgb(v[0], v[1], v[2]),
                    4 => *fc = FillColor::Cmyk(v[0], v[1], v[2], v[3]),
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

/// テキスト配置オペレータ (Td/TD/Tm/T*/TL) を適用する。
fn apply_text_positioning_op(
    op: &lopdf::content::Operation,
    ts: &mut TextState,
) -> crate::error::Result<()> {
    match op.operator.as_str() {
        "Td" => {
            if op.operands.len() == 2 {
                let tx = operand_to_f64(&op.operands[0])?;
                let ty = operand_to_f64(&op.operands[1])?;
                let translate = Matrix::translation(tx, ty);
                ts.text_line_matrix = translate.multiply(&ts.text_line_matrix);
                ts.text_matrix = ts.text_line_matrix.clone();
            }
        }
        "TD" => {
            // tx ty TD = -ty TL tx ty Td
            if op.operands.len() == 2 {
                let tx = operand_to_f64(&op.operands[0])?;
                let ty = operand_to_f64(&op.operands[1])?;
                ts.text_leading = -ty;
                let translate = Matrix::translation(tx, ty);
                ts.text_line_matrix = translate.multiply(&ts.text_line_matrix);
                ts.text_matrix = ts.text_line_matrix.clone();
            }
        }
        "Tm" => {
            if op.operands.len() == 6 {
                let m = matrix_from_operands(&op.operands)?;
                ts.text_matrix = m.clone();
                ts.text_line_matrix = m;
            }
        }
        "T*" => {
            ts.apply_t_star();
        }
        "TL" => {
            if op.operands.len() == 1 {
                ts.text_leading = operand_to_f64(&op.operands[0])?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// テキスト状態オペレータ (Tf/Tc/Tw/Tz/Ts/Tr) を適用する。
fn apply_text_state_op(
    op: &lopdf::content::Operation,
    ts: &mut TextState,
) -> crate::error::Result<()> {
    match op.operator.as_str() {
        "Tf" => {
            if op.operands.len() == 2 {
                if let Ok(name_bytes) = op.operands[0].as_name() {
                    ts.font_name = String::from_utf8_lossy(name_bytes).into_owned();
                }
                if let Ok(size) = operand_to_f64(&op.operands[1]) {
                    ts.font_size = size;
                }
            }
        }
        "Tc" => {
            if op.operands.len() == 1 {
                ts.char_spacing = operand_to_f64(&op.operands[0])?;
            }
        }
        "Tw" => {
            if op.operands.len() == 1 {
                ts.word_spacing = operand_to_f64(&op.operands[0])?;
            }
        }
        "Tz" | "Ts" | "Tr" => {
            // 水平スケール・ライズ・レンダリングモードはレイアウトに使わない
        }
        _ => {}
    }
    Ok(())
}

/// テキスト描画オペレータ (Tj/TJ/'/") を適用する。
fn apply_text_show_op(
    op: &lopdf::content::Operation,
    ts: &mut TextState,
    fonts: &HashMap<String, Rc<ParsedFont>>,
    ctm_stack: &[Matrix],
    fill_color_stack: &[FillColor],
    holder: &mut ObjectHolder,
) {
    match op.operator.as_str() {
        "Tj" => {
            if let Some(Object::String(bytes, _)) = op.operands.first() {
                push_text_object(ts, fonts, ctm_stack, fill_color_stack, holder, 0.0, vec![bytes.clone()], vec![], 0.0);
            }
        }
        "TJ" => {
            if let Some(Object::Array(arr)) = op.operands.first() {
                let (leading, strings, kernings, trailing) = extract_tj_segments(arr);
                push_text_object(
                    ts,
                    fonts,
                    ctm_stack,
                    fill_color_stack,
                    holder,
                    leading,
                    strings,
                    kernings,
                    trailing,
                );
            }
        }
        "'" => {
            // ' = T* string Tj
            ts.apply_t_star();
            if let Some(Object::String(bytes, _)) = op.operands.first() {
                push_text_object(ts, fonts, ctm_stack, fill_color_stack, holder, 0.0, vec![bytes.clone()], vec![], 0.0);
            }
        }
        "\"" => {
            // aw ac string " = aw Tw ac Tc T* string Tj
            if op.operands.len() == 3 {
                if let Ok(aw) = operand_to_f64(&op.operands[0]) {
                    ts.word_spacing = aw;
                }
                if let Ok(ac) = operand_to_f64(&op.operands[1]) {
                    ts.char_spacing = ac;
                }
                ts.apply_t_star();
                if let Object::String(bytes, _) = &op.operands[2] {
                    push_text_object(ts, fonts, ctm_stack, fill_color_stack, holder, 0.0, vec![bytes.clone()], vec![], 0.0);
                }
            }
        }
        _ => {}
    }
}

/// TJ配列をセグメント列に分解する。
///
/// 戻り値は (先頭の調整値合計, 文字列, セグメント間カーニング, 末尾の調整値合計)。
/// 連続する数値は合算し、数値を挟まない文字列は1セグメントに結合する。
/// いずれも描画結果は元の配列と等価になる。
fn extract_tj_segments(arr: &[Object]) -> (f64, Vec<Vec<u8>>, Vec<f64>, f64) {
    let mut leading = 0.0_f64;
    let mut strings: Vec<Vec<u8>> = Vec::new();
    let mut kernings: Vec<f64> = Vec::new();
    let mut pending = 0.0_f64;
    let mut has_pending = false;

    for item in arr {
        match item {
            Object::String(bytes, _) => {
                if bytes.is_empty() {
                    continue;
                }
                if strings.is_empty() {
                    strings.push(bytes.clone());
                } else if has_pending && pending != 0.0 {
                    kernings.push(pending);
                    strings.push(bytes.clone());
                } else if let Some(last) = strings.last_mut() {
                    last.extend_from_slice(bytes);
                }
                pending = 0.0;
                has_pending = false;
            }
            Object::Integer(n) => {
                if strings.is_empty() {
                    leading += *n as f64;
                } else {
                    pending += *n as f64;
                    has_pending = true;
                }
            }
            Object::Real(r) => {
                if strings.is_empty() {
                    leading += *r as f64;
                } else {
                    pending += *r as f64;
                    has_pending = true;
                }
            }
            _ => {}
        }
    }

    let trailing = if has_pending { pending } else { 0.0 };
    (leading, strings, kernings, trailing)
}

/// 1回のテキスト描画からTextObjectを構築してホルダに追加し、
/// 次の描画に備えてテキストマトリクスを送り量分進める。
#[allow(clippy::too_many_arguments)]
fn push_text_object(
    ts: &mut TextState,
    fonts: &HashMap<String, Rc<ParsedFont>>,
    ctm_stack: &[Matrix],
    fill_color_stack: &[FillColor],
    holder: &mut ObjectHolder,
    leading_adj: f64,
    strings: Vec<Vec<u8>>,
    kernings: Vec<f64>,
    trailing_adj: f64,
) {
    let font = fonts.get(&ts.font_name).cloned();
    let vert = font.as_ref().map(|f| f.is_vert_writing()).unwrap_or(false);
    let fs = ts.font_size;
    let ctm = ctm_stack.last().cloned().unwrap_or_else(Matrix::identity);
    let fill_color = fill_color_stack
        .last()
        .cloned()
        .unwrap_or_else(FillColor::default_black);

    // 正のTJ値は書字方向と逆向き
    let leading_shift = -leading_adj * fs / 1000.0;
    let trailing_shift = -trailing_adj * fs / 1000.0;

    if strings.is_empty() {
        // 数値のみのTJ: オブジェクトは生成せず、位置だけ進める
        let shift = leading_shift + trailing_shift;
        ts.text_matrix = axis_translation(vert, shift).multiply(&ts.text_matrix);
        return;
    }

    // 先頭の調整値はテキストマトリクスに吸収する
    let tm = axis_translation(vert, leading_shift).multiply(&ts.text_matrix);
    let text_matrix = tm.multiply(&ctm);

    let to = TextObject::from_parsed(
        font,
        ts.font_name.clone(),
        fs,
        ts.char_spacing,
        ts.word_spacing,
        text_matrix,
        fill_color,
        strings,
        kernings,
    );

    // 次のshowに備えてTmを送り量分進める（末尾の調整値を含む）
    let advance = leading_shift + to.total_advance() + trailing_shift;
    ts.text_matrix = axis_translation(vert, advance).multiply(&ts.text_matrix);

    holder.push(PageObject::Text(to));
}

/// 書字方向に沿った平行移動行列を返す。
fn axis_translation(vert: bool, shift: f64) -> Matrix {
    if vert {
        Matrix::translation(0.0, shift)
    } else {
        Matrix::translation(shift, 0.0)
    }
}

/// 構築済みパスオペレーションからPathObjectを作りホルダに追加する。
fn finish_path(
    holder: &mut ObjectHolder,
    path_ops: &mut Vec<PathOp>,
    ctm_stack: &[Matrix],
    fill_color_stack: &[FillColor],
    fill_type: FillType,
    stroke: bool,
) {
    if path_ops.is_empty() {
        return;
    }

    let mut path = PathObject::new();
    for op in path_ops.drain(..) {
        path.push_op(op);
    }
    path.set_matrix(ctm_stack.last().cloned().unwrap_or_else(Matrix::identity));
    path.set_fill_type(fill_type);
    path.set_stroke(stroke);
    path.set_fill_color(
        fill_color_stack
            .last()
            .cloned()
            .unwrap_or_else(FillColor::default_black),
    );
    path.calc_bounding_box();
    holder.push(PageObject::Path(path));
}

/// DoオペレータでXObjectを解決し、Image/Formオブジェクトを追加する。
fn apply_do_op(
    doc: &Document,
    resources: Option<&Dictionary>,
    fonts: &HashMap<String, Rc<ParsedFont>>,
    name: &str,
    ctm: &Matrix,
    depth: usize,
    holder: &mut ObjectHolder,
) {
    let Some((id, stream)) = lookup_xobject(doc, resources, name) else {
        tracing::debug!(name, "XObject not found in resources");
        return;
    };

    let subtype = stream
        .dict
        .get(b"Subtype")
        .ok()
        .and_then(|o| o.as_name().ok())
        .unwrap_or(b"");

    match subtype {
        b"Image" => match Image::load(doc, id) {
            Ok(image) => {
                holder.push(PageObject::Image(ImageObject::new(
                    image,
                    ctm.clone(),
                    name,
                )));
            }
            Err(e) => {
                tracing::debug!(name, error = %e, "skipping unloadable image XObject");
            }
        },
        b"Form" => {
            if depth >= MAX_FORM_DEPTH {
                tracing::debug!(name, "form nesting too deep, skipping");
                return;
            }
            match parse_form(doc, resources, fonts, id, stream, depth) {
                Ok(form) => {
                    holder.push(PageObject::Form(FormObject::new(form, ctm.clone(), name)));
                }
                Err(e) => {
                    tracing::debug!(name, error = %e, "skipping unparsable form XObject");
                }
            }
        }
        _ => {}
    }
}

/// フォームXObjectのストリームを再帰的に解析する。
/// 内部オブジェクトはフォームローカル空間（/Matrix適用前）で構築される。
fn parse_form(
    doc: &Document,
    parent_resources: Option<&Dictionary>,
    parent_fonts: &HashMap<String, Rc<ParsedFont>>,
    id: ObjectId,
    stream: &lopdf::Stream,
    depth: usize,
) -> crate::error::Result<FormXObject> {
    let content = stream_filtered_bytes(stream)?;

    let form_matrix = match stream.dict.get(b"Matrix") {
        Ok(obj) => match doc.dereference(obj) {
            Ok((_, Object::Array(arr))) if arr.len() == 6 => matrix_from_operands(arr)?,
            _ => Matrix::identity(),
        },
        Err(_) => Matrix::identity(),
    };

    // フォーム自身のResourcesがあればそれを使い、無ければ親から継承する
    let own_resources: Option<&Dictionary> = stream
        .dict
        .get(b"Resources")
        .ok()
        .and_then(|obj| doc.dereference(obj).ok())
        .and_then(|(_, o)| o.as_dict().ok());

    let (form_fonts_owned, form_resources) = match own_resources {
        Some(res) => (Some(font::parse_fonts(doc, res)), Some(res)),
        None => (None, parent_resources),
    };
    let form_fonts = form_fonts_owned.as_ref().unwrap_or(parent_fonts);

    let inner = parse_holder_depth(doc, &content, form_resources, form_fonts, depth + 1)?;
    Ok(FormXObject::new(inner, form_matrix, Some(id)))
}

/// リソース辞書から名前でXObjectストリームを引く。
/// 間接参照のエントリのみ対応（書き戻し先のIDが必要なため）。
fn lookup_xobject<'a>(
    doc: &'a Document,
    resources: Option<&'a Dictionary>,
    name: &str,
) -> Option<(ObjectId, &'a lopdf::Stream)> {
    let resources = resources?;
    let xobjects = resources.get(b"XObject").ok()?;
    let xobjects = doc.dereference(xobjects).ok()?.1.as_dict().ok()?;
    let entry = xobjects.get(name.as_bytes()).ok()?;
    let id = entry.as_reference().ok()?;
    let stream = doc.get_object(id).ok()?.as_stream().ok()?;
    Some((id, stream))
}

/// lopdfのObjectから数値をf64として取得する。
pub(crate) fn operand_to_f64(obj: &Object) -> crate::error::Result<f64> {
    match obj {
        Object::Integer(i) => Ok(*i as f64),
        Object::Real(r) => Ok(*r as f64),
        _ => Err(PdfRedactError::content_stream(format!(
            "expected numeric operand, got {:?}",
            obj
        ))),
    }
}

fn numeric_operands(operands: &[Object]) -> crate::error::Result<Vec<f64>> {
    operands.iter().map(operand_to_f64).collect()
}

fn matrix_from_operands(operands: &[Object]) -> crate::error::Result<Matrix> {
    let vals = numeric_operands(operands)?;
    if vals.len() != 6 {
        return Err(PdfRedactError::content_stream(format!(
            "expected 6 matrix operands, got {}",
            vals.len()
        )));
    }
    Ok(Matrix {
        a: vals[0],
        b: vals[1],
        c: vals[2],
        d: vals[3],
        e: vals[4],
        f: vals[5],
    })
}
