//! ページコンテンツの幾何学的リダクション。
//!
//! ページユーザー空間の矩形に掛かるグリフを恒久的に除去し、画像の
//! 該当ピクセルを塗りつぶし、矩形に完全に含まれるパスを削除する。
//! 残るコンテンツの位置（カーニング、字間、テキストマトリクスの連続性、
//! 画像解像度、ソフトマスク透過）は保存される。

pub mod image;
pub mod text;

use lopdf::Document;

use crate::geometry::{Matrix, Rect};
use crate::pdf::generator;
use crate::pdf::object::{FillColor, FillType, ObjectHolder, PageObject, PathObject};
use crate::pdf::page::Page;
use crate::redact::text::RedactOutcome;

/// 単一矩形のリダクション。
///
/// 矩形はページユーザー空間（左下原点）。変更があった場合、または
/// `draw_black_boxes`で覆いを追加した場合にtrueを返す。
pub fn redact_text_in_rect(
    doc: &mut Document,
    page: &mut Page,
    rect: &Rect,
    recurse_forms: bool,
    draw_black_boxes: bool,
) -> bool {
    redact_text_in_rects(
        doc,
        page,
        std::slice::from_ref(rect),
        recurse_forms,
        draw_black_boxes,
    )
}

/// 複数矩形のリダクション。
///
/// 全矩形を正規化してからページのホルダを走査する。空の矩形列は
/// 何もせずfalseを返す。覆いの追加自体も「変更あり」に数える。
pub fn redact_text_in_rects(
    doc: &mut Document,
    page: &mut Page,
    page_space_rects: &[Rect],
    recurse_forms: bool,
    draw_black_boxes: bool,
) -> bool {
    if page_space_rects.is_empty() {
        return false;
    }

    let rects: Vec<Rect> = page_space_rects.iter().map(|r| r.normalized()).collect();
    let identity = Matrix::identity();

    let changed = redact_holder(
        doc,
        &mut page.holder,
        &rects,
        &identity,
        recurse_forms,
        draw_black_boxes,
    );

    if draw_black_boxes {
        add_cover_paths(page, &rects); // 末尾に追加 = 最前面に描画
    }

    if changed {
        page.clear_render_context();
    }

    tracing::debug!(
        rects = rects.len(),
        recurse_forms,
        draw_black_boxes,
        changed,
        "redaction pass finished"
    );

    // 覆いの追加も変更として報告する
    changed || draw_black_boxes
}

/// ホルダ（ページまたはフォーム）内の全ページオブジェクトを処理する。
///
/// `to_page` はホルダローカル空間からページユーザー空間への変換。
/// `recurse_forms` の場合はネストしたフォームXObjectにも配置行列を
/// 合成しながら降りていき、変更されたフォームはその場で再直列化する。
fn redact_holder(
    doc: &mut Document,
    holder: &mut ObjectHolder,
    page_rects: &[Rect],
    to_page: &Matrix,
    recurse_forms: bool,
    fill_black: bool,
) -> bool {
    let mut changed = false;
    let mut to_remove: Vec<usize> = Vec::new();

    for i in 0..holder.len() {
        let Some(obj) = holder.get_mut(i) else {
            continue;
        };

        match obj {
            PageObject::Text(to) => {
                match text::redact_text_object(to, page_rects, to_page) {
                    RedactOutcome::RemovedAll => {
                        to_remove.push(i);
                        changed = true;
                    }
                    RedactOutcome::Modified => {
                        changed = true;
                    }
                    RedactOutcome::Unchanged => {}
                }
            }

            PageObject::Image(io) => {
                if image::redact_image_object(doc, io, page_rects, to_page, fill_black) {
                    changed = true;
                }
            }

            PageObject::Path(path) => {
                // パスのBBoxをページ座標に変換し、いずれかの矩形に
                // 完全に含まれる場合のみ除去する。部分的な交差は残す
                let total_transform = path.matrix().multiply(to_page);
                let mut bbox_page = total_transform.transform_rect(&path.bbox());
                bbox_page.normalize();

                if page_rects.iter().any(|r| bbox_page.contained_in(r)) {
                    to_remove.push(i);
                    changed = true;
                }
            }

            PageObject::Form(fo) => {
                if !recurse_forms {
                    continue;
                }
                let next_to_page = fo.placement_matrix().multiply(to_page);
                let form_changed = redact_holder(
                    doc,
                    &mut fo.form.holder,
                    page_rects,
                    &next_to_page,
                    true,
                    fill_black,
                );

                if form_changed {
                    // 呼び出し側にフックが無いため、変更されたフォームは即時再直列化する
                    if let Err(e) = generator::regenerate_form_content(doc, &fo.form) {
                        tracing::debug!(name = fo.name(), error = %e, "form regeneration failed");
                    } else {
                        tracing::debug!(name = fo.name(), "regenerated form content stream");
                    }
                    changed = true;
                }
            }
        }
    }

    // 空になったテキストと被覆されたパスを一括で物理削除する
    if !to_remove.is_empty() {
        holder.remove_indices(&to_remove);
        changed = true;
    }

    changed
}

/// リダクション矩形を覆う黒塗りパスをページ末尾に追加する。
fn add_cover_paths(page: &mut Page, rects_page_space: &[Rect]) {
    for r in rects_page_space {
        let mut po = PathObject::new();
        po.set_stroke(false);
        po.set_fill_type(FillType::Winding);
        po.set_fill_color(FillColor::Gray(0.0));
        po.append_rect(r.clone()); // ページユーザー空間のleft/bottom/right/top
        po.set_matrix(Matrix::identity());
        po.calc_bounding_box();
        po.set_dirty(true);
        page.holder.push(PageObject::Path(po)); // 末尾に追加 = 最前面
    }
}
