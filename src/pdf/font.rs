use std::collections::HashMap;
use std::rc::Rc;

use lopdf::{Document, Object};
use ttf_parser::GlyphId;

use crate::error::PdfRedactError;
use crate::geometry::Rect;

/// フォントエンコーディング
#[derive(Debug, Clone)]
pub enum FontEncoding {
    WinAnsi { differences: HashMap<u8, String> },
    IdentityH,
    IdentityV,
}

/// グリフメトリクスが一切得られない場合のフォールバックBBox（1/1000 em単位）。
const DEFAULT_FONT_BBOX: Rect = Rect {
    left: 0.0,
    bottom: -200.0,
    right: 1000.0,
    top: 900.0,
};

/// 縦書きCIDフォントのデフォルトメトリクス（PDF仕様 DW2 の既定値 [880 -1000]）。
const DEFAULT_VERT_ORIGIN_Y: f64 = 880.0;
const DEFAULT_VERT_WIDTH: f64 = -1000.0;

/// 解析済みフォント。
///
/// 幅・BBoxは全て1/1000テキスト空間単位（thousandths of an em）で保持する。
/// 埋込フォントデータがある場合、グリフBBoxはttfアウトラインから取得し、
/// 無い場合は FontDescriptor の /FontBBox と /Widths から近似する。
pub struct ParsedFont {
    font_data: Option<Vec<u8>>,
    encoding: FontEncoding,
    widths: HashMap<u32, f64>,
    default_width: f64,
    glyph_bboxes: HashMap<u32, Rect>,
    font_bbox: Rect,
    vert_widths: HashMap<u16, f64>,
    vert_origins: HashMap<u16, (f64, f64)>,
    default_vert_width: f64,
    default_vert_origin_y: f64,
    units_per_em: u16,
}

impl ParsedFont {
    /// メトリクスから直接構築する。埋込フォントデータ無しの経路
    /// （非埋込フォント、テストフィクスチャ、外部メトリクス源）で使う。
    pub fn from_metrics(
        encoding: FontEncoding,
        widths: HashMap<u32, f64>,
        default_width: f64,
        glyph_bboxes: HashMap<u32, Rect>,
        font_bbox: Rect,
    ) -> Self {
        ParsedFont {
            font_data: None,
            encoding,
            widths,
            default_width,
            glyph_bboxes,
            font_bbox,
            vert_widths: HashMap::new(),
            vert_origins: HashMap::new(),
            default_vert_width: DEFAULT_VERT_WIDTH,
            default_vert_origin_y: DEFAULT_VERT_ORIGIN_Y,
            units_per_em: 1000,
        }
    }

    /// 縦書きメトリクス（/W2相当）を設定する。
    pub fn set_vertical_widths(&mut self, vert_widths: HashMap<u16, f64>, default_vert_width: f64) {
        self.vert_widths = vert_widths;
        self.default_vert_width = default_vert_width;
    }

    pub fn encoding(&self) -> &FontEncoding {
        &self.encoding
    }

    /// CIDフォント（2バイトコード）か。
    pub fn is_cid(&self) -> bool {
        matches!(
            self.encoding,
            FontEncoding::IdentityH | FontEncoding::IdentityV
        )
    }

    /// 縦書きモードか。
    pub fn is_vert_writing(&self) -> bool {
        matches!(self.encoding, FontEncoding::IdentityV)
    }

    /// 1文字コードのバイト数。
    pub fn bytes_per_code(&self) -> usize {
        if self.is_cid() { 2 } else { 1 }
    }

    /// 文字コード→CID変換。Identity CMapなのでコードがそのままCIDになる。
    pub fn cid_from_char_code(&self, code: u32) -> u16 {
        code as u16
    }

    /// 文字コードの横書き送り幅を返す（1/1000単位）。
    pub fn char_width(&self, code: u32) -> f64 {
        self.widths
            .get(&code)
            .copied()
            .unwrap_or(self.default_width)
    }

    /// CIDの縦書き送り幅を返す（1/1000単位、通常は負値）。
    pub fn vert_width(&self, cid: u16) -> f64 {
        self.vert_widths
            .get(&cid)
            .copied()
            .unwrap_or(self.default_vert_width)
    }

    /// CIDの縦書き原点を返す（1/1000単位）。
    /// /W2に無い場合のデフォルトは (幅/2, DW2のvy)。
    pub fn vert_origin(&self, cid: u16) -> (f64, f64) {
        if let Some(origin) = self.vert_origins.get(&cid) {
            return *origin;
        }
        (
            self.char_width(cid as u32) / 2.0,
            self.default_vert_origin_y,
        )
    }

    /// 文字コードのグリフBBoxを返す（1/1000単位）。
    ///
    /// 優先順位: 明示メトリクス → 埋込ttfアウトライン → /FontBBoxと幅の近似。
    pub fn glyph_bbox(&self, code: u32) -> Rect {
        if let Some(r) = self.glyph_bboxes.get(&code) {
            return r.clone();
        }
        if let Some(r) = self.outline_bbox(code) {
            return r;
        }
        Rect {
            left: 0.0,
            bottom: self.font_bbox.bottom,
            right: self.char_width(code),
            top: self.font_bbox.top,
        }
    }

    /// 埋込フォントのアウトラインからBBoxを取得する。
    fn outline_bbox(&self, code: u32) -> Option<Rect> {
        let data = self.font_data.as_ref()?;
        let face = ttf_parser::Face::parse(data, 0).ok()?;
        let gid = self.char_code_to_glyph_id(&face, code)?;
        let bbox = face.glyph_bounding_box(gid)?;
        let scale = 1000.0 / self.units_per_em as f64;
        Some(Rect {
            left: bbox.x_min as f64 * scale,
            bottom: bbox.y_min as f64 * scale,
            right: bbox.x_max as f64 * scale,
            top: bbox.y_max as f64 * scale,
        })
    }

    /// 文字コード→グリフIDを解決
    fn char_code_to_glyph_id(&self, face: &ttf_parser::Face, code: u32) -> Option<GlyphId> {
        match &self.encoding {
            FontEncoding::WinAnsi { differences } => {
                // Differences配列: グリフ名→cmapでUnicode→GID
                if let Some(glyph_name) = differences.get(&(code as u8))
                    && let Some(unicode) = glyph_name_to_unicode(glyph_name)
                {
                    return face.glyph_index(unicode);
                }
                // WinAnsi: char_code → Unicode → cmap lookup
                let unicode_char = win_ansi_to_unicode(code as u8)?;
                face.glyph_index(unicode_char)
            }
            FontEncoding::IdentityH | FontEncoding::IdentityV => {
                // Identity + CIDToGIDMap=Identity: CID = GID
                Some(GlyphId(code as u16))
            }
        }
    }

    /// 文字コードをバイト列にエンコードして追記する。
    /// CIDフォントは2バイト（ビッグエンディアン）、それ以外は1バイト。
    pub fn append_char(&self, out: &mut Vec<u8>, code: u32) {
        if self.is_cid() {
            out.push((code >> 8) as u8);
            out.push((code & 0xFF) as u8);
        } else {
            out.push(code as u8);
        }
    }

    /// バイト列から次の文字コードを読み取り、offsetを進める。
    pub fn next_char(&self, bytes: &[u8], offset: &mut usize) -> u32 {
        if self.is_cid() && *offset + 1 < bytes.len() {
            let code = ((bytes[*offset] as u32) << 8) | bytes[*offset + 1] as u32;
            *offset += 2;
            return code;
        }
        let code = bytes[*offset] as u32;
        *offset += 1;
        code
    }

    /// バイト列全体を文字コード列にデコードする。
    pub fn decode_string(&self, bytes: &[u8]) -> Vec<u32> {
        let mut codes = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            codes.push(self.next_char(bytes, &mut offset));
        }
        codes
    }
}

/// ページのフォントリソースを解析し、ParsedFontのマップを返す。
pub fn parse_page_fonts(
    doc: &Document,
    page_num: u32,
) -> crate::error::Result<HashMap<String, Rc<ParsedFont>>> {
    if page_num == 0 {
        return Err(PdfRedactError::pdf_read("page_num must be >= 1 (1-based)"));
    }

    let page_id = doc
        .get_pages()
        .get(&page_num)
        .copied()
        .ok_or_else(|| PdfRedactError::pdf_read(format!("page {} not found", page_num)))?;

    let page_dict = doc
        .get_dictionary(page_id)
        .map_err(|e| PdfRedactError::pdf_read(e.to_string()))?;
    let resources = get_resources(doc, page_dict)?;
    let resources_dict = resources
        .as_dict()
        .map_err(|e| PdfRedactError::pdf_read(e.to_string()))?;

    Ok(parse_fonts(doc, resources_dict))
}

/// リソース辞書の /Font エントリから全フォントを解析する。
/// 解析できないフォントはスキップされる（該当テキストは編集対象外になる）。
pub fn parse_fonts(doc: &Document, resources: &lopdf::Dictionary) -> HashMap<String, Rc<ParsedFont>> {
    let mut fonts = HashMap::new();

    let font_dict = match resources.get(b"Font") {
        Ok(obj) => match doc.dereference(obj) {
            Ok((_, deref)) => match deref.as_dict() {
                Ok(d) => d,
                Err(_) => return fonts,
            },
            Err(_) => return fonts,
        },
        Err(_) => return fonts,
    };

    for (name_bytes, font_ref) in font_dict.iter() {
        let name = String::from_utf8_lossy(name_bytes).into_owned();
        match parse_single_font(doc, font_ref) {
            Ok(parsed) => {
                fonts.insert(name, Rc::new(parsed));
            }
            Err(e) => {
                tracing::debug!(font = %name, error = %e, "skipping unparsable font");
            }
        }
    }

    fonts
}

/// Resources辞書を取得（ページ直接またはPages親から継承）
pub(crate) fn get_resources<'a>(
    doc: &'a Document,
    page_dict: &'a lopdf::Dictionary,
) -> crate::error::Result<&'a Object> {
    if let Ok(res) = page_dict.get(b"Resources") {
        return match res {
            Object::Reference(id) => doc
                .get_object(*id)
                .map_err(|e| PdfRedactError::pdf_read(e.to_string())),
            _ => Ok(res),
        };
    }

    // 親Pagesノードから継承
    if let Ok(parent_ref) = page_dict.get(b"Parent")
        && let Object::Reference(parent_id) = parent_ref
    {
        let parent = doc
            .get_object(*parent_id)
            .map_err(|e| PdfRedactError::pdf_read(e.to_string()))?;
        if let Ok(parent_dict) = parent.as_dict() {
            return get_resources(doc, parent_dict);
        }
    }

    Err(PdfRedactError::pdf_read("no Resources found"))
}

/// 単一フォント辞書からParsedFontを構築
fn parse_single_font(doc: &Document, font_ref: &Object) -> crate::error::Result<ParsedFont> {
    let font_obj = match font_ref {
        Object::Reference(id) => doc
            .get_object(*id)
            .map_err(|e| PdfRedactError::font(e.to_string()))?,
        other => other,
    };

    let font_dict = font_obj
        .as_dict()
        .map_err(|e| PdfRedactError::font(e.to_string()))?;

    let subtype = font_dict
        .get(b"Subtype")
        .ok()
        .and_then(|o| o.as_name().ok())
        .map(|n| String::from_utf8_lossy(n).into_owned())
        .unwrap_or_default();

    match subtype.as_str() {
        "TrueType" | "Type1" => parse_simple_font(doc, font_dict),
        "Type0" => parse_type0_font(doc, font_dict),
        _ => Err(PdfRedactError::font(format!(
            "unsupported font subtype: {}",
            subtype
        ))),
    }
}

/// 単純フォント（TrueType/Type1）の解析。
/// 埋込フォントデータが無い場合はメトリクスのみのフォントを返す。
fn parse_simple_font(
    doc: &Document,
    font_dict: &lopdf::Dictionary,
) -> crate::error::Result<ParsedFont> {
    let encoding = parse_encoding(doc, font_dict)?;
    let widths = parse_simple_widths(doc, font_dict)?;
    let font_bbox = parse_descriptor_bbox(doc, font_dict).unwrap_or(DEFAULT_FONT_BBOX);

    let font_data = extract_font_file2(doc, font_dict).ok();
    let units_per_em = match &font_data {
        Some(data) => ttf_parser::Face::parse(data, 0)
            .map(|f| f.units_per_em())
            .unwrap_or(1000),
        None => 1000,
    };

    Ok(ParsedFont {
        font_data,
        encoding,
        widths,
        default_width: 1000.0,
        glyph_bboxes: HashMap::new(),
        font_bbox,
        vert_widths: HashMap::new(),
        vert_origins: HashMap::new(),
        default_vert_width: DEFAULT_VERT_WIDTH,
        default_vert_origin_y: DEFAULT_VERT_ORIGIN_Y,
        units_per_em,
    })
}

/// Type0 (CIDFont) フォントの解析
fn parse_type0_font(
    doc: &Document,
    font_dict: &lopdf::Dictionary,
) -> crate::error::Result<ParsedFont> {
    // Encoding名で書字方向を判定。Identity以外のCMapは未対応。
    let encoding = match font_dict.get(b"Encoding") {
        Ok(Object::Name(name)) if name == b"Identity-H" => FontEncoding::IdentityH,
        Ok(Object::Name(name)) if name == b"Identity-V" => FontEncoding::IdentityV,
        Ok(_) => {
            return Err(PdfRedactError::font(
                "only Identity-H/Identity-V CMaps are supported",
            ));
        }
        Err(_) => FontEncoding::IdentityH,
    };

    // DescendantFonts 配列を取得
    let descendants = font_dict
        .get(b"DescendantFonts")
        .map_err(|_| PdfRedactError::font("Type0 font missing DescendantFonts"))?;
    let descendants = doc
        .dereference(descendants)
        .map_err(|e| PdfRedactError::font(e.to_string()))?
        .1;
    let desc_array = descendants
        .as_array()
        .map_err(|e| PdfRedactError::font(e.to_string()))?;

    if desc_array.is_empty() {
        return Err(PdfRedactError::font("DescendantFonts array is empty"));
    }

    let cid_font_obj = match &desc_array[0] {
        Object::Reference(id) => doc
            .get_object(*id)
            .map_err(|e| PdfRedactError::font(e.to_string()))?,
        other => other,
    };

    let cid_font_dict = cid_font_obj
        .as_dict()
        .map_err(|e| PdfRedactError::font(e.to_string()))?;

    // CIDToGIDMapの検証: Identity以外は未対応
    if let Ok(cid_to_gid) = cid_font_dict.get(b"CIDToGIDMap") {
        let cid_to_gid = doc
            .dereference(cid_to_gid)
            .map_err(|e| PdfRedactError::font(e.to_string()))?
            .1;
        if matches!(cid_to_gid, Object::Stream(_)) {
            return Err(PdfRedactError::font(
                "CIDToGIDMap stream not supported (only Identity)",
            ));
        }
    }

    let widths = parse_cid_widths(doc, cid_font_dict)?;
    let default_width = dict_number(cid_font_dict, b"DW").unwrap_or(1000.0);
    let (vert_widths, vert_origins) = parse_cid_vert_widths(doc, cid_font_dict)?;
    let (default_vert_origin_y, default_vert_width) = parse_dw2(doc, cid_font_dict);
    let font_bbox = parse_descriptor_bbox(doc, cid_font_dict).unwrap_or(DEFAULT_FONT_BBOX);

    let font_data = extract_font_file2(doc, cid_font_dict).ok();
    let units_per_em = match &font_data {
        Some(data) => ttf_parser::Face::parse(data, 0)
            .map(|f| f.units_per_em())
            .unwrap_or(1000),
        None => 1000,
    };

    Ok(ParsedFont {
        font_data,
        encoding,
        widths,
        default_width,
        glyph_bboxes: HashMap::new(),
        font_bbox,
        vert_widths,
        vert_origins,
        default_vert_width,
        default_vert_origin_y,
        units_per_em,
    })
}

/// FontDescriptorからFontFile2ストリームを取得・解凍
fn extract_font_file2(
    doc: &Document,
    font_dict: &lopdf::Dictionary,
) -> crate::error::Result<Vec<u8>> {
    let descriptor = get_descriptor(doc, font_dict)?;

    let font_file2_ref = descriptor
        .get(b"FontFile2")
        .map_err(|_| PdfRedactError::font("no FontFile2 in FontDescriptor"))?;

    let font_file2_id = match font_file2_ref {
        Object::Reference(id) => *id,
        _ => return Err(PdfRedactError::font("FontFile2 is not a reference")),
    };

    let stream_obj = doc
        .get_object(font_file2_id)
        .map_err(|e| PdfRedactError::font(e.to_string()))?;

    match stream_obj {
        Object::Stream(stream) => stream
            .decompressed_content()
            .map_err(|e| PdfRedactError::font(format!("FontFile2 decompress failed: {}", e))),
        _ => Err(PdfRedactError::font("FontFile2 is not a stream")),
    }
}

/// FontDescriptor辞書を取得する。
fn get_descriptor<'a>(
    doc: &'a Document,
    font_dict: &'a lopdf::Dictionary,
) -> crate::error::Result<&'a lopdf::Dictionary> {
    let descriptor_obj = font_dict
        .get(b"FontDescriptor")
        .map_err(|_| PdfRedactError::font("no FontDescriptor"))?;
    let descriptor_obj = doc
        .dereference(descriptor_obj)
        .map_err(|e| PdfRedactError::font(e.to_string()))?
        .1;
    descriptor_obj
        .as_dict()
        .map_err(|e| PdfRedactError::font(e.to_string()))
}

/// FontDescriptorの/FontBBoxを取得する。
fn parse_descriptor_bbox(doc: &Document, font_dict: &lopdf::Dictionary) -> Option<Rect> {
    let descriptor = get_descriptor(doc, font_dict).ok()?;
    let bbox_obj = descriptor.get(b"FontBBox").ok()?;
    let bbox_obj = doc.dereference(bbox_obj).ok()?.1;
    let arr = bbox_obj.as_array().ok()?;
    if arr.len() != 4 {
        return None;
    }
    let vals: Vec<f64> = arr.iter().filter_map(|o| object_number(o)).collect();
    if vals.len() != 4 {
        return None;
    }
    let mut r = Rect::new(vals[0], vals[1], vals[2], vals[3]);
    r.normalize();
    Some(r)
}

/// 単純フォントの/Widths配列を解析
fn parse_simple_widths(
    doc: &Document,
    font_dict: &lopdf::Dictionary,
) -> crate::error::Result<HashMap<u32, f64>> {
    let mut result = HashMap::new();

    let first_char = match font_dict.get(b"FirstChar").ok() {
        Some(Object::Integer(i)) => {
            let v = *i;
            if v < 0 || v > u32::MAX as i64 {
                return Err(PdfRedactError::font(format!("FirstChar out of range: {}", v)));
            }
            v as u32
        }
        _ => 0u32,
    };

    let widths_obj = match font_dict.get(b"Widths") {
        Ok(obj) => {
            doc.dereference(obj)
                .map_err(|e| PdfRedactError::font(e.to_string()))?
                .1
        }
        Err(_) => return Ok(result),
    };

    if let Ok(arr) = widths_obj.as_array() {
        for (i, obj) in arr.iter().enumerate() {
            let obj = doc
                .dereference(obj)
                .map_err(|e| PdfRedactError::font(e.to_string()))?
                .1;
            let Some(w) = object_number(obj) else { continue };
            result.insert(first_char + i as u32, w);
        }
    }

    Ok(result)
}

/// CIDFont の /W (Widths) 配列を解析
fn parse_cid_widths(
    doc: &Document,
    cid_font_dict: &lopdf::Dictionary,
) -> crate::error::Result<HashMap<u32, f64>> {
    let mut result = HashMap::new();

    let w_obj = match cid_font_dict.get(b"W") {
        Ok(obj) => {
            doc.dereference(obj)
                .map_err(|e| PdfRedactError::font(e.to_string()))?
                .1
        }
        Err(_) => return Ok(result),
    };

    let arr = match w_obj.as_array() {
        Ok(a) => a,
        Err(_) => return Ok(result),
    };

    // /W 配列: [ cid [w1 w2 ...] ] or [ cid_first cid_last w ]
    let mut i = 0;
    while i < arr.len() {
        let cid_start = match &arr[i] {
            Object::Integer(n) => *n as u32,
            _ => {
                i += 1;
                continue;
            }
        };
        i += 1;

        if i >= arr.len() {
            break;
        }

        match &arr[i] {
            Object::Array(widths) => {
                // [ cid [w1 w2 w3 ...] ]
                for (j, w_obj) in widths.iter().enumerate() {
                    let Some(w) = object_number(w_obj) else { continue };
                    result.insert(cid_start + j as u32, w);
                }
                i += 1;
            }
            Object::Integer(cid_end) => {
                // [ cid_first cid_last w ]
                let cid_end = *cid_end as u32;
                i += 1;
                if i >= arr.len() {
                    break;
                }
                let Some(w) = object_number(&arr[i]) else {
                    i += 1;
                    continue;
                };
                for cid in cid_start..=cid_end {
                    result.insert(cid, w);
                }
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }

    Ok(result)
}

/// CIDFont の /W2 (縦書きメトリクス) 配列を解析する。
///
/// /W2 配列: [ cid [w1y v1x v1y ...] ] or [ cid_first cid_last w1y v1x v1y ]
#[allow(clippy::type_complexity)]
fn parse_cid_vert_widths(
    doc: &Document,
    cid_font_dict: &lopdf::Dictionary,
) -> crate::error::Result<(HashMap<u16, f64>, HashMap<u16, (f64, f64)>)> {
    let mut widths = HashMap::new();
    let mut origins = HashMap::new();

    let w2_obj = match cid_font_dict.get(b"W2") {
        Ok(obj) => {
            doc.dereference(obj)
                .map_err(|e| PdfRedactError::font(e.to_string()))?
                .1
        }
        Err(_) => return Ok((widths, origins)),
    };

    let arr = match w2_obj.as_array() {
        Ok(a) => a,
        Err(_) => return Ok((widths, origins)),
    };

    let mut i = 0;
    while i < arr.len() {
        let cid_start = match &arr[i] {
            Object::Integer(n) => *n as u16,
            _ => {
                i += 1;
                continue;
            }
        };
        i += 1;

        if i >= arr.len() {
            break;
        }

        match &arr[i] {
            Object::Array(triples) => {
                // [ cid [w1y v1x v1y w1y v1x v1y ...] ]
                for (j, chunk) in triples.chunks(3).enumerate() {
                    if chunk.len() != 3 {
                        break;
                    }
                    let (Some(w1y), Some(v1x), Some(v1y)) = (
                        object_number(&chunk[0]),
                        object_number(&chunk[1]),
                        object_number(&chunk[2]),
                    ) else {
                        continue;
                    };
                    let cid = cid_start + j as u16;
                    widths.insert(cid, w1y);
                    origins.insert(cid, (v1x, v1y));
                }
                i += 1;
            }
            Object::Integer(cid_end) => {
                // [ cid_first cid_last w1y v1x v1y ]
                let cid_end = *cid_end as u16;
                i += 1;
                if i + 2 >= arr.len() {
                    break;
                }
                let (Some(w1y), Some(v1x), Some(v1y)) = (
                    object_number(&arr[i]),
                    object_number(&arr[i + 1]),
                    object_number(&arr[i + 2]),
                ) else {
                    i += 3;
                    continue;
                };
                for cid in cid_start..=cid_end {
                    widths.insert(cid, w1y);
                    origins.insert(cid, (v1x, v1y));
                }
                i += 3;
            }
            _ => {
                i += 1;
            }
        }
    }

    Ok((widths, origins))
}

/// /DW2 を解析する。戻り値は (vy, w1y)、既定値は (880, -1000)。
fn parse_dw2(doc: &Document, cid_font_dict: &lopdf::Dictionary) -> (f64, f64) {
    let defaults = (DEFAULT_VERT_ORIGIN_Y, DEFAULT_VERT_WIDTH);
    let Ok(obj) = cid_font_dict.get(b"DW2") else {
        return defaults;
    };
    let Ok((_, obj)) = doc.dereference(obj) else {
        return defaults;
    };
    let Ok(arr) = obj.as_array() else {
        return defaults;
    };
    if arr.len() != 2 {
        return defaults;
    }
    match (object_number(&arr[0]), object_number(&arr[1])) {
        (Some(vy), Some(w1y)) => (vy, w1y),
        _ => defaults,
    }
}

/// エンコーディングの解析
fn parse_encoding(
    doc: &Document,
    font_dict: &lopdf::Dictionary,
) -> crate::error::Result<FontEncoding> {
    let enc_obj = match font_dict.get(b"Encoding") {
        Ok(obj) => obj,
        Err(_) => {
            return Ok(FontEncoding::WinAnsi {
                differences: HashMap::new(),
            });
        }
    };

    match enc_obj {
        Object::Name(_) => {
            // WinAnsiEncoding。MacRomanEncoding等も WinAnsi として近似
            Ok(FontEncoding::WinAnsi {
                differences: HashMap::new(),
            })
        }
        Object::Reference(id) => {
            let obj = doc
                .get_object(*id)
                .map_err(|e| PdfRedactError::font(e.to_string()))?;
            if let Ok(dict) = obj.as_dict() {
                parse_encoding_dict(dict)
            } else {
                Ok(FontEncoding::WinAnsi {
                    differences: HashMap::new(),
                })
            }
        }
        Object::Dictionary(dict) => parse_encoding_dict(dict),
        _ => Ok(FontEncoding::WinAnsi {
            differences: HashMap::new(),
        }),
    }
}

/// エンコーディング辞書の解析（Differences配列を含む）
fn parse_encoding_dict(dict: &lopdf::Dictionary) -> crate::error::Result<FontEncoding> {
    let mut differences = HashMap::new();

    if let Ok(Object::Array(arr)) = dict.get(b"Differences") {
        // [ code name name ... code name ... ]
        let mut current_code: u32 = 0;
        for obj in arr {
            match obj {
                Object::Integer(n) => {
                    current_code = (*n).max(0) as u32;
                }
                Object::Name(name) => {
                    if current_code <= 0xFF {
                        differences.insert(
                            current_code as u8,
                            String::from_utf8_lossy(name).into_owned(),
                        );
                    }
                    current_code += 1;
                }
                _ => {}
            }
        }
    }

    Ok(FontEncoding::WinAnsi { differences })
}

/// lopdf Objectから数値を取得する（数値でなければNone）。
pub(crate) fn object_number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

/// 辞書から数値エントリを取得する。
fn dict_number(dict: &lopdf::Dictionary, key: &[u8]) -> Option<f64> {
    dict.get(key).ok().and_then(object_number)
}

/// /Differences のグリフ名→Unicode変換。
///
/// グリフBBoxの解決に使う範囲のみ対応する: 1文字名、uniXXXX形式、
/// 数字名、頻出する記号名。未知の名前はNone（BBoxは近似にフォールバック）。
fn glyph_name_to_unicode(name: &str) -> Option<char> {
    if name.len() == 1 {
        return name.chars().next();
    }
    if let Some(hex) = name.strip_prefix("uni")
        && hex.len() == 4
    {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }

    const DIGIT_NAMES: [&str; 10] = [
        "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
    ];
    if let Some(i) = DIGIT_NAMES.iter().position(|d| *d == name) {
        return char::from_digit(i as u32, 10);
    }

    let c = match name {
        "space" => ' ',
        "exclam" => '!',
        "quotedbl" => '"',
        "numbersign" => '#',
        "dollar" => '$',
        "percent" => '%',
        "ampersand" => '&',
        "quotesingle" => '\'',
        "parenleft" => '(',
        "parenright" => ')',
        "asterisk" => '*',
        "plus" => '+',
        "comma" => ',',
        "hyphen" | "minus" => '-',
        "period" => '.',
        "slash" => '/',
        "colon" => ':',
        "semicolon" => ';',
        "less" => '<',
        "equal" => '=',
        "greater" => '>',
        "question" => '?',
        "at" => '@',
        "bracketleft" => '[',
        "backslash" => '\\',
        "bracketright" => ']',
        "underscore" => '_',
        _ => return None,
    };
    Some(c)
}

/// CP1252の0x80-0x9F帯のUnicodeコードポイント。0は未割り当てコード。
/// それ以外の帯はASCII/Latin-1とそのまま一致する。
const WIN_ANSI_QUIRKS: [u16; 32] = [
    0x20AC, 0x0000, 0x201A, 0x0192, 0x201E, 0x2026, 0x2020, 0x2021, // 0x80-0x87
    0x02C6, 0x2030, 0x0160, 0x2039, 0x0152, 0x0000, 0x017D, 0x0000, // 0x88-0x8F
    0x0000, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022, 0x2013, 0x2014, // 0x90-0x97
    0x02DC, 0x2122, 0x0161, 0x203A, 0x0153, 0x0000, 0x017E, 0x0178, // 0x98-0x9F
];

/// WinAnsi (CP1252) 文字コード→Unicode変換
fn win_ansi_to_unicode(code: u8) -> Option<char> {
    match code {
        0x20..=0x7E => Some(code as char),
        0x80..=0x9F => {
            let cp = WIN_ANSI_QUIRKS[(code - 0x80) as usize];
            if cp == 0 {
                None
            } else {
                char::from_u32(cp as u32)
            }
        }
        0xA0..=0xFF => Some(code as char),
        _ => None,
    }
}
