use crate::geometry::{Matrix, Rect};
use crate::pdf::font::ParsedFont;
use crate::pdf::object::{TextItem, TextObject};

/// テキストオブジェクト書き換えの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactOutcome {
    /// 変更なし
    Unchanged,
    /// 一部のグリフを除去し、セグメントを書き換えた
    Modified,
    /// 全グリフを除去した（オブジェクトごと削除すべき）
    RemovedAll,
}

/// 原点差分からTJ値を合成する際のデッドバンド（1/1000 em単位）。
/// 浮動小数の揺らぎによる余計なTJ数値の発生を抑える。
const TJ_DEADBAND: f64 = 0.25;

/// グリフのページ空間BBoxを計算する。
///
/// 項目の原点は縦書き補正済みなので、ここでは追加の原点補正を行わない。
fn glyph_bbox_in_page(
    to: &TextObject,
    font: &ParsedFont,
    code: u32,
    origin: (f64, f64),
    parent_to_page: &Matrix,
) -> Rect {
    let fb = font.glyph_bbox(code);
    let fs = to.font_size();

    let mut glyph_box = Rect::new(
        fb.left * fs / 1000.0,
        fb.bottom * fs / 1000.0,
        fb.right * fs / 1000.0,
        fb.top * fs / 1000.0,
    );

    // テキストオブジェクトのローカル空間内での位置
    glyph_box.offset(origin.0, origin.1);

    // テキストマトリクスでホルダ空間へ、さらにページ空間へ
    to.text_matrix()
        .multiply(parent_to_page)
        .transform_rect(&glyph_box)
}

/// 1文字コードの送り量を1/1000 em単位で返す。
/// レイアウト時の幅計算とchar/word spacingの適用規則に一致させる。
fn advance_thousandths(to: &TextObject, font: &ParsedFont, code: u32) -> f64 {
    let mut w_th = if font.is_vert_writing() {
        font.vert_width(font.cid_from_char_code(code))
    } else {
        font.char_width(code)
    };

    let fs = to.font_size();

    // word spaceはASCIIスペースかつスペースが1バイトコードの場合のみ
    if code == 0x20 && (!font.is_cid() || font.bytes_per_code() == 1) {
        w_th += to.word_space() * 1000.0 / fs;
    }

    // char spaceは常に適用
    w_th += to.char_space() * 1000.0 / fs;
    w_th
}

/// TJ出力を安定させるため、最近接整数に丸める（タイは0から遠い方へ）。
fn round_thousandths(v: f64) -> i64 {
    if v >= 0.0 {
        (v + 0.5) as i64
    } else {
        (v - 0.5) as i64
    }
}

/// 残存グリフのランからTJ配列を組み立てるための状態。
struct RedactionState<'a> {
    font: &'a ParsedFont,

    /// SetSegments向けの出力バッファ。strings[i]とstrings[i+1]の間に
    /// kernings[i]が入る。
    strings: Vec<Vec<u8>>,
    kernings: Vec<f64>,

    /// 残存ラン間に挟まった元ファイルのTJ値と除去グリフの送り量の累計。
    kerning_accumulator: f64,
    has_explicit_kerning: bool,

    /// 明示TJが無い場合に原点からカーニングを合成するための前回グリフ情報。
    prev_glyph_origin: (f64, f64),
    prev_glyph_code: u32,
}

impl<'a> RedactionState<'a> {
    fn new(font: &'a ParsedFont) -> Self {
        RedactionState {
            font,
            // 最初のランを開いておく
            strings: vec![Vec::new()],
            kernings: Vec::new(),
            kerning_accumulator: 0.0,
            has_explicit_kerning: false,
            prev_glyph_origin: (0.0, 0.0),
            prev_glyph_code: 0,
        }
    }

    fn reset_between_runs(&mut self) {
        self.kerning_accumulator = 0.0;
        self.has_explicit_kerning = false;
    }

    fn append_kept_glyph(&mut self, code: u32, origin: (f64, f64)) {
        debug_assert!(!self.strings.is_empty());
        if let Some(last) = self.strings.last_mut() {
            self.font.append_char(last, code);
        }
        self.prev_glyph_origin = origin;
        self.prev_glyph_code = code;
    }

    /// カーニング（整数1/1000単位）を確定し、新しい空のランを開く。
    /// 丸めて0になる場合は何も出力しない。
    fn flush_segment(&mut self, kerning_mth: f64) {
        let rounded = round_thousandths(kerning_mth);
        if rounded == 0 {
            return;
        }
        self.kernings.push(rounded as f64);
        self.strings.push(Vec::new());
    }
}

/// テキストオブジェクトからリダクション矩形に交差するグリフを除去する。
///
/// 残存グリフは元のページ位置に留まる。除去で生じた間隔はラン間の
/// TJ値として出力し、先頭の除去分はTJで表現できないため
/// テキストマトリクスの平行移動に吸収する。
pub fn redact_text_object(
    to: &mut TextObject,
    page_rects: &[Rect],
    parent_to_page: &Matrix,
) -> RedactOutcome {
    let Some(font) = to.font().cloned() else {
        return RedactOutcome::Unchanged;
    };

    let is_vert = font.is_vert_writing();
    let fs = to.font_size();

    let mut any_kept = false;
    let mut any_removed = false;

    let mut st = RedactionState::new(&font);

    let items: Vec<TextItem> = to.items().to_vec();
    for (i, item) in items.iter().enumerate() {
        // 元ファイル由来のTJ区切り値
        let TextItem::Glyph { code, origin } = item else {
            if let Some(adj) = to.separator_adjustment(i) {
                st.kerning_accumulator += adj; // 符号はPDFのTJ規約のまま
                st.has_explicit_kerning = true;
            }
            continue;
        };

        // 交差判定で残す/除去するを決める
        let gbox = glyph_bbox_in_page(to, &font, *code, *origin, parent_to_page);
        let hit = gbox.intersects_any(page_rects);

        if hit {
            // 除去グリフの送り量を保留中のカーニングに合算する
            st.kerning_accumulator -= advance_thousandths(to, &font, *code);
            any_removed = true;
            continue;
        }

        if !any_kept {
            // オブジェクト内で最初に残るグリフ。
            let leading_offset_user = if st.kerning_accumulator != 0.0 {
                // 先行する間隔はTJの先頭に置けないので、Tmの平行移動で消化する
                let offset = -st.kerning_accumulator * fs / 1000.0;
                st.kerning_accumulator = 0.0;
                st.has_explicit_kerning = false;
                offset
            } else if is_vert {
                // 再レイアウト後も縦書き原点の補正は原点に残るため、
                // 吸収するのは送り位置（補正を戻した値）のみ
                let cid = font.cid_from_char_code(*code);
                origin.1 + fs * font.vert_origin(cid).1 / 1000.0
            } else {
                // 保留中の間隔が無ければ、ランの原点を最初の残存グリフに合わせる
                origin.0
            };

            if leading_offset_user != 0.0 {
                let mut tm = to.text_matrix();
                // 書字軸に沿ってユーザー空間を移動する（回転にも対応）
                if is_vert {
                    tm.e += leading_offset_user * tm.c;
                    tm.f += leading_offset_user * tm.d;
                } else {
                    tm.e += leading_offset_user * tm.a;
                    tm.f += leading_offset_user * tm.b;
                }
                to.set_text_matrix(tm);
            }
        } else if st.has_explicit_kerning {
            // 残存ラン間: 累計したカーニングを出力する
            let mut k = st.kerning_accumulator;
            if k.abs() < TJ_DEADBAND {
                k = 0.0;
            }
            st.flush_segment(k);
        } else {
            // 連続する残存グリフの原点からカーニングを推定する
            let delta_user = if is_vert {
                origin.1 - st.prev_glyph_origin.1
            } else {
                origin.0 - st.prev_glyph_origin.0
            };
            let delta_mth = delta_user * 1000.0 / fs;
            let nominal_advance_mth = advance_thousandths(to, &font, st.prev_glyph_code);
            let mut kerning_mth = nominal_advance_mth - delta_mth;
            if kerning_mth.abs() < TJ_DEADBAND {
                kerning_mth = 0.0;
            }
            st.flush_segment(kerning_mth);
        }

        // このグリフを残す
        st.append_kept_glyph(*code, *origin);
        st.reset_between_runs();
        any_kept = true;
    }

    if !any_kept {
        return if any_removed {
            RedactOutcome::RemovedAll
        } else {
            RedactOutcome::Unchanged
        };
    }

    if !any_removed {
        return RedactOutcome::Unchanged;
    }

    // 末尾でカーニングだけ確定して空のランが開いたままの場合、
    // 対になるカーニングごと捨てて |kernings| + 1 == |strings| を保つ
    if st.strings.last().is_some_and(|s| s.is_empty()) {
        st.strings.pop();
        if !st.kernings.is_empty() {
            st.kernings.pop();
        }
    }

    debug_assert_eq!(st.kernings.len() + 1, st.strings.len());

    to.set_segments(&st.strings, &st.kernings);
    to.set_dirty(true);
    // 数値が同値でも下流のシリアライザが変更に気付けるよう、Tmを明示的に再設定する
    let tm = to.text_matrix();
    to.set_text_matrix(tm);

    RedactOutcome::Modified
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_thousandths_ties_away_from_zero() {
        assert_eq!(round_thousandths(0.4), 0);
        assert_eq!(round_thousandths(0.5), 1);
        assert_eq!(round_thousandths(1.6), 2);
        assert_eq!(round_thousandths(-0.4), 0);
        assert_eq!(round_thousandths(-0.5), -1);
        assert_eq!(round_thousandths(-1.6), -2);
    }

    #[test]
    fn test_flush_segment_skips_zero() {
        use crate::geometry::Rect;
        use crate::pdf::font::{FontEncoding, ParsedFont};
        use std::collections::HashMap;

        let font = ParsedFont::from_metrics(
            FontEncoding::WinAnsi {
                differences: HashMap::new(),
            },
            HashMap::new(),
            500.0,
            HashMap::new(),
            Rect::new(0.0, 0.0, 500.0, 700.0),
        );
        let mut st = RedactionState::new(&font);
        st.flush_segment(0.2);
        assert_eq!(st.strings.len(), 1, "sub-deadband kerning opens no run");
        st.flush_segment(-250.0);
        assert_eq!(st.strings.len(), 2);
        assert_eq!(st.kernings, vec![-250.0]);
    }
}
