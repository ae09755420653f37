use std::rc::Rc;

use lopdf::ObjectId;

use crate::geometry::{Matrix, Rect};
use crate::pdf::font::ParsedFont;
use crate::pdf::image::Image;

/// fill colorの状態
#[derive(Debug, Clone)]
pub enum FillColor {
    Gray(f64),
    Rgb(f64, f64, f64),
    Cmyk(f64, f64, f64, f64),
}

impl FillColor {
    pub(crate) fn default_black() -> Self {
        FillColor::Gray(0.0)
    }
}

/// テキストオブジェクト内の1項目。
/// グリフ（文字コード＋テキスト空間でのローカル原点）、または
/// TJ配列の位置調整値（1/1000 em単位、正値は書字方向と逆向き）。
#[derive(Debug, Clone)]
pub enum TextItem {
    Glyph { code: u32, origin: (f64, f64) },
    Adjustment(f64),
}

/// 1回のテキスト描画（Tj/TJ/'/"）に対応するページオブジェクト。
///
/// セグメント列（バイト文字列とセグメント間カーニング）を正とし、
/// 項目列（グリフ原点込み）はレイアウト計算で導出する。
/// text_matrixは描画時のCTMを合成済みで、ホルダ空間への変換を表す。
pub struct TextObject {
    font: Option<Rc<ParsedFont>>,
    font_name: String,
    font_size: f64,
    char_space: f64,
    word_space: f64,
    text_matrix: Matrix,
    strings: Vec<Vec<u8>>,
    kernings: Vec<f64>,
    items: Vec<TextItem>,
    /// テキスト空間（text_matrix適用前）のBBox
    original_rect: Rect,
    /// 全項目を描画した後の書字方向の送り量（テキスト空間単位）
    total_advance: f64,
    fill_color: FillColor,
    dirty: bool,
}

impl TextObject {
    pub fn new(font: Option<Rc<ParsedFont>>, font_name: impl Into<String>, font_size: f64) -> Self {
        TextObject {
            font,
            font_name: font_name.into(),
            font_size,
            char_space: 0.0,
            word_space: 0.0,
            text_matrix: Matrix::identity(),
            strings: Vec::new(),
            kernings: Vec::new(),
            items: Vec::new(),
            original_rect: Rect::zero(),
            total_advance: 0.0,
            fill_color: FillColor::default_black(),
            dirty: false,
        }
    }

    pub fn font(&self) -> Option<&Rc<ParsedFont>> {
        self.font.as_ref()
    }

    pub fn font_name(&self) -> &str {
        &self.font_name
    }

    pub fn font_size(&self) -> f64 {
        self.font_size
    }

    pub fn char_space(&self) -> f64 {
        self.char_space
    }

    pub fn word_space(&self) -> f64 {
        self.word_space
    }

    pub fn set_char_space(&mut self, v: f64) {
        self.char_space = v;
        self.recompute_origins();
    }

    pub fn set_word_space(&mut self, v: f64) {
        self.word_space = v;
        self.recompute_origins();
    }

    pub fn fill_color(&self) -> &FillColor {
        &self.fill_color
    }

    pub fn set_fill_color(&mut self, color: FillColor) {
        self.fill_color = color;
    }

    pub fn text_matrix(&self) -> Matrix {
        self.text_matrix.clone()
    }

    /// テキストマトリクスを再設定する。
    /// レイアウトを再計算し、オブジェクトをdirtyにする。
    pub fn set_text_matrix(&mut self, m: Matrix) {
        self.text_matrix = m;
        self.recompute_origins();
        self.dirty = true;
    }

    pub fn items(&self) -> &[TextItem] {
        &self.items
    }

    pub fn strings(&self) -> &[Vec<u8>] {
        &self.strings
    }

    pub fn kernings(&self) -> &[f64] {
        &self.kernings
    }

    /// セグメント列を設定する。strings[i]とstrings[i+1]の間に
    /// kernings[i]が入る。|kernings| + 1 == |strings| が前提条件。
    pub fn set_segments(&mut self, strings: &[Vec<u8>], kernings: &[f64]) {
        debug_assert!(!strings.is_empty());
        debug_assert_eq!(strings.len(), kernings.len() + 1);
        self.strings = strings.to_vec();
        self.kernings = kernings.to_vec();
        self.rebuild_items();
        self.recompute_origins();
    }

    pub fn set_text(&mut self, bytes: &[u8]) {
        self.set_segments(&[bytes.to_vec()], &[]);
    }

    /// 項目indexがセグメント間の位置調整値であればその値を返す。
    /// グリフ、または先頭項目の場合はNone。
    pub fn separator_adjustment(&self, index: usize) -> Option<f64> {
        if index == 0 {
            return None;
        }
        match self.items.get(index) {
            Some(TextItem::Adjustment(adj)) => Some(*adj),
            _ => None,
        }
    }

    /// テキスト空間（text_matrix適用前）のBBox。
    pub fn text_space_bbox(&self) -> Rect {
        self.original_rect.clone()
    }

    /// ホルダ空間からページ空間への変換を合成したBBox。
    pub fn bbox_in(&self, parent_to_page: &Matrix) -> Rect {
        self.text_matrix
            .multiply(parent_to_page)
            .transform_rect(&self.original_rect)
    }

    /// 全項目描画後の送り量（テキスト空間単位、書字方向）。
    pub(crate) fn total_advance(&self) -> f64 {
        self.total_advance
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// パーサ用: セグメントと状態を一括設定する。
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parsed(
        font: Option<Rc<ParsedFont>>,
        font_name: String,
        font_size: f64,
        char_space: f64,
        word_space: f64,
        text_matrix: Matrix,
        fill_color: FillColor,
        strings: Vec<Vec<u8>>,
        kernings: Vec<f64>,
    ) -> Self {
        let mut to = TextObject {
            font,
            font_name,
            font_size,
            char_space,
            word_space,
            text_matrix,
            strings,
            kernings,
            items: Vec::new(),
            original_rect: Rect::zero(),
            total_advance: 0.0,
            fill_color,
            dirty: false,
        };
        to.rebuild_items();
        to.recompute_origins();
        to
    }

    fn decode_codes(&self, bytes: &[u8]) -> Vec<u32> {
        match &self.font {
            Some(f) => f.decode_string(bytes),
            // フォント不明の場合は1バイト=1文字コードで近似
            None => bytes.iter().map(|&b| b as u32).collect(),
        }
    }

    fn rebuild_items(&mut self) {
        let mut items = Vec::new();
        for (i, seg) in self.strings.iter().enumerate() {
            for code in self.decode_codes(seg) {
                items.push(TextItem::Glyph {
                    code,
                    origin: (0.0, 0.0),
                });
            }
            if i < self.kernings.len() {
                items.push(TextItem::Adjustment(self.kernings[i]));
            }
        }
        self.items = items;
    }

    /// グリフ原点とBBoxのレイアウト計算（PDF §9.4.4の送り規則）。
    ///
    /// 書字方向に沿ってカーソル位置を進めながら各グリフの原点を確定する。
    /// 縦書きCIDフォントでは縦書き原点の分だけ原点をずらし、送り幅には
    /// 縦書きメトリクスを使う。ASCIIスペースにはword_space（スペースが
    /// 1バイトコードのフォントのみ）、全グリフにchar_spaceが加わる。
    pub(crate) fn recompute_origins(&mut self) {
        let Some(font) = self.font.clone() else {
            self.original_rect = Rect::zero();
            self.total_advance = 0.0;
            return;
        };

        let fs = self.font_size;
        let vert = font.is_vert_writing();
        let word_space_applies = !font.is_cid() || font.bytes_per_code() == 1;

        let mut curpos = 0.0_f64;
        let mut any_glyph = false;
        let mut min_x = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_y = f64::NEG_INFINITY;

        for item in &mut self.items {
            match item {
                TextItem::Adjustment(adj) => {
                    // 正のTJ値は書字方向と逆に動かす
                    curpos -= *adj * fs / 1000.0;
                }
                TextItem::Glyph { code, origin } => {
                    any_glyph = true;
                    let mut char_rect = font.glyph_bbox(*code);
                    let advance;
                    if vert {
                        let cid = font.cid_from_char_code(*code);
                        let (vx, vy) = font.vert_origin(cid);
                        *origin = (-fs * vx / 1000.0, curpos - fs * vy / 1000.0);
                        char_rect.offset(-vx, -vy);
                        // 横方向はフォント単位、縦方向はテキスト空間単位で追跡
                        min_x = min_x.min(char_rect.left).min(char_rect.right);
                        max_x = max_x.max(char_rect.left).max(char_rect.right);
                        let char_top = curpos + char_rect.top * fs / 1000.0;
                        let char_bottom = curpos + char_rect.bottom * fs / 1000.0;
                        min_y = min_y.min(char_top).min(char_bottom);
                        max_y = max_y.max(char_top).max(char_bottom);
                        advance = font.vert_width(cid) * fs / 1000.0;
                    } else {
                        *origin = (curpos, 0.0);
                        min_y = min_y.min(char_rect.top).min(char_rect.bottom);
                        max_y = max_y.max(char_rect.top).max(char_rect.bottom);
                        let char_left = curpos + char_rect.left * fs / 1000.0;
                        let char_right = curpos + char_rect.right * fs / 1000.0;
                        min_x = min_x.min(char_left).min(char_right);
                        max_x = max_x.max(char_left).max(char_right);
                        advance = font.char_width(*code) * fs / 1000.0;
                    }
                    curpos += advance;
                    if *code == 0x20 && word_space_applies {
                        curpos += self.word_space;
                    }
                    curpos += self.char_space;
                }
            }
        }

        if any_glyph {
            // フォント単位のまま追跡していた軸をテキスト空間単位へ
            if vert {
                min_x = min_x * fs / 1000.0;
                max_x = max_x * fs / 1000.0;
            } else {
                min_y = min_y * fs / 1000.0;
                max_y = max_y * fs / 1000.0;
            }
            self.original_rect = Rect::new(min_x, min_y, max_x, max_y);
        } else {
            self.original_rect = Rect::zero();
        }
        self.total_advance = curpos;
    }
}

/// パスの構成オペレーション
#[derive(Debug, Clone)]
pub enum PathOp {
    MoveTo(f64, f64),
    LineTo(f64, f64),
    CurveTo(f64, f64, f64, f64, f64, f64),
    Rect(Rect),
    Close,
}

/// fillの塗り規則
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillType {
    None,
    Winding,
    EvenOdd,
}

/// パスオブジェクト。オペレーション列はパスローカル座標で、
/// matrixがホルダ空間への変換を表す。
pub struct PathObject {
    ops: Vec<PathOp>,
    matrix: Matrix,
    fill_type: FillType,
    stroke: bool,
    fill_color: FillColor,
    /// パスローカル座標のBBox（calc_bounding_boxで更新）
    bbox: Rect,
    dirty: bool,
}

impl Default for PathObject {
    fn default() -> Self {
        Self::new()
    }
}

impl PathObject {
    pub fn new() -> Self {
        PathObject {
            ops: Vec::new(),
            matrix: Matrix::identity(),
            fill_type: FillType::None,
            stroke: false,
            fill_color: FillColor::default_black(),
            bbox: Rect::zero(),
            dirty: false,
        }
    }

    pub fn ops(&self) -> &[PathOp] {
        &self.ops
    }

    pub(crate) fn push_op(&mut self, op: PathOp) {
        self.ops.push(op);
    }

    /// 矩形サブパスを追加する。
    pub fn append_rect(&mut self, rect: Rect) {
        self.ops.push(PathOp::Rect(rect));
    }

    pub fn matrix(&self) -> Matrix {
        self.matrix.clone()
    }

    pub fn set_matrix(&mut self, m: Matrix) {
        self.matrix = m;
    }

    pub fn fill_type(&self) -> FillType {
        self.fill_type
    }

    pub fn set_fill_type(&mut self, ft: FillType) {
        self.fill_type = ft;
    }

    pub fn stroke(&self) -> bool {
        self.stroke
    }

    pub fn set_stroke(&mut self, stroke: bool) {
        self.stroke = stroke;
    }

    pub fn fill_color(&self) -> &FillColor {
        &self.fill_color
    }

    pub fn set_fill_color(&mut self, color: FillColor) {
        self.fill_color = color;
    }

    /// パスローカル座標のBBox。
    pub fn bbox(&self) -> Rect {
        self.bbox.clone()
    }

    /// オペレーション列からBBoxを再計算する。
    /// 曲線は制御点を含めた保守的なBBoxになる。
    pub fn calc_bounding_box(&mut self) {
        let mut bbox: Option<Rect> = None;
        let mut add_point = |bbox: &mut Option<Rect>, x: f64, y: f64| match bbox {
            Some(r) => r.union_point(x, y),
            None => *bbox = Some(Rect::new(x, y, x, y)),
        };

        for op in &self.ops {
            match op {
                PathOp::MoveTo(x, y) | PathOp::LineTo(x, y) => add_point(&mut bbox, *x, *y),
                PathOp::CurveTo(x1, y1, x2, y2, x3, y3) => {
                    add_point(&mut bbox, *x1, *y1);
                    add_point(&mut bbox, *x2, *y2);
                    add_point(&mut bbox, *x3, *y3);
                }
                PathOp::Rect(r) => {
                    add_point(&mut bbox, r.left, r.bottom);
                    add_point(&mut bbox, r.right, r.top);
                }
                PathOp::Close => {}
            }
        }

        self.bbox = bbox.unwrap_or_else(Rect::zero);
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }
}

/// 画像XObjectの配置オブジェクト。
/// matrixは単位正方形をホルダ空間の配置先四角形に写す。
pub struct ImageObject {
    image: Image,
    matrix: Matrix,
    name: String,
    dirty: bool,
}

impl ImageObject {
    pub fn new(image: Image, matrix: Matrix, name: impl Into<String>) -> Self {
        ImageObject {
            image,
            matrix,
            name: name.into(),
            dirty: false,
        }
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut Image {
        &mut self.image
    }

    pub fn matrix(&self) -> Matrix {
        self.matrix.clone()
    }

    pub fn set_matrix(&mut self, m: Matrix) {
        self.matrix = m;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }
}

/// フォームXObjectの実体。ページと同様にオブジェクトを保持し、
/// 単独でコンテンツストリームへ再直列化できる。
/// 内部オブジェクトの座標はフォームローカル空間（/Matrix適用前）。
pub struct FormXObject {
    pub holder: ObjectHolder,
    /// フォーム自身の/Matrix
    matrix: Matrix,
    /// ドキュメント内のストリームオブジェクトID（再直列化先）
    pub(crate) stream_id: Option<ObjectId>,
}

impl FormXObject {
    pub fn new(holder: ObjectHolder, matrix: Matrix, stream_id: Option<ObjectId>) -> Self {
        FormXObject {
            holder,
            matrix,
            stream_id,
        }
    }

    pub fn matrix(&self) -> Matrix {
        self.matrix.clone()
    }

    pub fn stream_id(&self) -> Option<ObjectId> {
        self.stream_id
    }
}

/// フォームXObjectの配置オブジェクト。matrixは描画時のCTM。
pub struct FormObject {
    pub form: FormXObject,
    matrix: Matrix,
    name: String,
}

impl FormObject {
    pub fn new(form: FormXObject, matrix: Matrix, name: impl Into<String>) -> Self {
        FormObject {
            form,
            matrix,
            name: name.into(),
        }
    }

    pub fn matrix(&self) -> Matrix {
        self.matrix.clone()
    }

    /// フォームローカル空間からホルダ空間への変換
    /// （フォーム自身の/Matrixを先に適用し、次に配置CTMを適用）。
    pub fn placement_matrix(&self) -> Matrix {
        self.form.matrix().multiply(&self.matrix)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// ページオブジェクト
pub enum PageObject {
    Text(TextObject),
    Path(PathObject),
    Image(ImageObject),
    Form(FormObject),
}

impl PageObject {
    pub fn as_text(&self) -> Option<&TextObject> {
        match self {
            PageObject::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&PathObject> {
        match self {
            PageObject::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageObject> {
        match self {
            PageObject::Image(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_form(&self) -> Option<&FormObject> {
        match self {
            PageObject::Form(f) => Some(f),
            _ => None,
        }
    }
}

/// ページオブジェクトの順序付きコンテナ。並び順が描画順で、
/// 後のオブジェクトほど上に描画される。
#[derive(Default)]
pub struct ObjectHolder {
    objects: Vec<PageObject>,
}

impl ObjectHolder {
    pub fn new() -> Self {
        ObjectHolder {
            objects: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// 末尾に追加する（最後に＝最前面に描画される）。
    pub fn push(&mut self, obj: PageObject) {
        self.objects.push(obj);
    }

    pub fn get(&self, index: usize) -> Option<&PageObject> {
        self.objects.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PageObject> {
        self.objects.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PageObject> {
        self.objects.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, PageObject> {
        self.objects.iter_mut()
    }

    /// 複数インデックスを一括削除する。残るオブジェクトの描画順は保たれる。
    pub fn remove_indices(&mut self, indices: &[usize]) {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        for &i in sorted.iter().rev() {
            if i < self.objects.len() {
                self.objects.remove(i);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::font::FontEncoding;
    use std::collections::HashMap;

    /// テスト用: 全グリフ幅500、BBox(0, 0, 500, 700)の単純フォント
    fn simple_font() -> Rc<ParsedFont> {
        Rc::new(ParsedFont::from_metrics(
            FontEncoding::WinAnsi {
                differences: HashMap::new(),
            },
            HashMap::new(),
            500.0,
            HashMap::new(),
            Rect::new(0.0, 0.0, 500.0, 700.0),
        ))
    }

    #[test]
    fn test_set_text_computes_origins() {
        let mut to = TextObject::new(Some(simple_font()), "F1", 10.0);
        to.set_text(b"AB");

        let items = to.items();
        assert_eq!(items.len(), 2);
        match &items[0] {
            TextItem::Glyph { code, origin } => {
                assert_eq!(*code, b'A' as u32);
                assert!((origin.0 - 0.0).abs() < 1e-9);
            }
            _ => panic!("expected glyph"),
        }
        match &items[1] {
            TextItem::Glyph { code, origin } => {
                assert_eq!(*code, b'B' as u32);
                // 幅500 * 10 / 1000 = 5.0
                assert!((origin.0 - 5.0).abs() < 1e-9);
            }
            _ => panic!("expected glyph"),
        }
    }

    #[test]
    fn test_adjustment_shifts_following_glyph() {
        let mut to = TextObject::new(Some(simple_font()), "F1", 10.0);
        // AとBの間に-200 (0.2em開く): Bの原点は 5.0 + 200*10/1000 = 7.0
        to.set_segments(&[b"A".to_vec(), b"B".to_vec()], &[-200.0]);

        let items = to.items();
        assert_eq!(items.len(), 3);
        match &items[2] {
            TextItem::Glyph { origin, .. } => {
                assert!((origin.0 - 7.0).abs() < 1e-9);
            }
            _ => panic!("expected glyph"),
        }
    }

    #[test]
    fn test_word_and_char_space_advance() {
        let mut to = TextObject::new(Some(simple_font()), "F1", 10.0);
        to.set_word_space(2.0);
        to.set_char_space(1.0);
        to.set_text(b"A B");

        let items = to.items();
        // A: 0
        // space: 5.0 + 1.0(char)
        // B: 6.0 + 5.0 + 2.0(word) + 1.0(char) = 14.0
        match &items[1] {
            TextItem::Glyph { code, origin } => {
                assert_eq!(*code, 0x20);
                assert!((origin.0 - 6.0).abs() < 1e-9);
            }
            _ => panic!("expected glyph"),
        }
        match &items[2] {
            TextItem::Glyph { origin, .. } => {
                assert!((origin.0 - 14.0).abs() < 1e-9);
            }
            _ => panic!("expected glyph"),
        }
    }

    #[test]
    fn test_separator_adjustment() {
        let mut to = TextObject::new(Some(simple_font()), "F1", 10.0);
        to.set_segments(&[b"A".to_vec(), b"B".to_vec()], &[-120.0]);

        assert_eq!(to.separator_adjustment(0), None);
        assert_eq!(to.separator_adjustment(1), Some(-120.0));
        assert_eq!(to.separator_adjustment(2), None);
    }

    #[test]
    fn test_cid_font_two_byte_segments() {
        let mut font = ParsedFont::from_metrics(
            FontEncoding::IdentityH,
            HashMap::from([(0x0041, 600.0)]),
            1000.0,
            HashMap::new(),
            Rect::new(0.0, -100.0, 1000.0, 800.0),
        );
        font.set_vertical_widths(HashMap::new(), -1000.0);
        let mut to = TextObject::new(Some(Rc::new(font)), "F1", 12.0);
        to.set_segments(&[vec![0x00, 0x41, 0x00, 0x42]], &[]);

        let items = to.items();
        assert_eq!(items.len(), 2);
        match &items[0] {
            TextItem::Glyph { code, .. } => assert_eq!(*code, 0x41),
            _ => panic!("expected glyph"),
        }
        // Identity CIDフォントにはword_spaceが付かない (スペースは2バイト)
    }

    #[test]
    fn test_text_space_bbox() {
        let mut to = TextObject::new(Some(simple_font()), "F1", 10.0);
        to.set_text(b"AB");
        let bbox = to.text_space_bbox();
        // A: x 0..5, B: x 5..10; y 0..7
        assert!((bbox.left - 0.0).abs() < 1e-9);
        assert!((bbox.right - 10.0).abs() < 1e-9);
        assert!((bbox.bottom - 0.0).abs() < 1e-9);
        assert!((bbox.top - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_path_bbox_from_rect() {
        let mut path = PathObject::new();
        path.append_rect(Rect::new(10.0, 20.0, 30.0, 40.0));
        path.calc_bounding_box();
        assert_eq!(path.bbox(), Rect::new(10.0, 20.0, 30.0, 40.0));
    }

    #[test]
    fn test_holder_remove_indices_keeps_order() {
        let mut holder = ObjectHolder::new();
        for i in 0..4 {
            let mut p = PathObject::new();
            p.append_rect(Rect::new(i as f64, 0.0, i as f64 + 1.0, 1.0));
            p.calc_bounding_box();
            holder.push(PageObject::Path(p));
        }
        holder.remove_indices(&[0, 2]);
        assert_eq!(holder.len(), 2);
        let first = holder.get(0).and_then(|o| o.as_path()).unwrap();
        assert!((first.bbox().left - 1.0).abs() < 1e-9);
        let second = holder.get(1).and_then(|o| o.as_path()).unwrap();
        assert!((second.bbox().left - 3.0).abs() < 1e-9);
    }
}
