use lopdf::{Document, Object, ObjectId};

use crate::error::PdfRedactError;
use crate::geometry::Rect;
use crate::pdf::content;
use crate::pdf::font;
use crate::pdf::object::{ObjectHolder, PageObject};

/// 1ページ分のページオブジェクトとメタ情報。
///
/// ホルダの並びが描画順になる。ドキュメントに由来するページは
/// 書き戻し用にページオブジェクトIDを保持する。
pub struct Page {
    id: Option<ObjectId>,
    media_box: Rect,
    pub holder: ObjectHolder,
}

impl Page {
    /// ドキュメントに紐付かない空ページを作る。
    pub fn new(media_box: Rect) -> Self {
        Page {
            id: None,
            media_box,
            holder: ObjectHolder::new(),
        }
    }

    /// 指定ページ(1-indexed)のコンテンツとリソースを解析してPageを構築する。
    pub fn load(doc: &Document, page_num: u32) -> crate::error::Result<Page> {
        let page_id = doc
            .get_pages()
            .get(&page_num)
            .copied()
            .ok_or_else(|| PdfRedactError::pdf_read(format!("page {} not found", page_num)))?;

        let page_dict = doc
            .get_dictionary(page_id)
            .map_err(|e| PdfRedactError::pdf_read(e.to_string()))?;

        let media_box =
            parse_media_box(doc, page_dict).unwrap_or_else(|| Rect::new(0.0, 0.0, 612.0, 792.0));

        let resources = font::get_resources(doc, page_dict)
            .ok()
            .and_then(|obj| obj.as_dict().ok());
        let fonts = resources
            .map(|r| font::parse_fonts(doc, r))
            .unwrap_or_default();

        let content_bytes = doc
            .get_page_content(page_id)
            .map_err(|e| PdfRedactError::pdf_read(e.to_string()))?;
        let holder = content::parse_holder(doc, &content_bytes, resources, &fonts)?;

        Ok(Page {
            id: Some(page_id),
            media_box,
            holder,
        })
    }

    pub fn id(&self) -> Option<ObjectId> {
        self.id
    }

    pub fn media_box(&self) -> Rect {
        self.media_box.clone()
    }

    /// 描画キャッシュを無効化する。ページ直下とネストしたフォーム内の
    /// 全画像のデコードキャッシュを破棄する。
    pub fn clear_render_context(&mut self) {
        clear_holder_caches(&self.holder);
    }
}

fn clear_holder_caches(holder: &ObjectHolder) {
    for obj in holder.iter() {
        match obj {
            PageObject::Image(image) => image.image().reset_cache(),
            PageObject::Form(form) => clear_holder_caches(&form.form.holder),
            _ => {}
        }
    }
}

/// /MediaBoxを取得する（ページ直接またはPages親から継承）。
fn parse_media_box(doc: &Document, page_dict: &lopdf::Dictionary) -> Option<Rect> {
    if let Ok(obj) = page_dict.get(b"MediaBox") {
        let obj = doc.dereference(obj).ok()?.1;
        let arr = obj.as_array().ok()?;
        if arr.len() == 4 {
            let vals: Vec<f64> = arr
                .iter()
                .filter_map(|o| crate::pdf::font::object_number(o))
                .collect();
            if vals.len() == 4 {
                let mut r = Rect::new(vals[0], vals[1], vals[2], vals[3]);
                r.normalize();
                return Some(r);
            }
        }
        return None;
    }

    // 親Pagesノードから継承
    if let Ok(Object::Reference(parent_id)) = page_dict.get(b"Parent")
        && let Ok(parent_dict) = doc.get_dictionary(*parent_id)
    {
        return parse_media_box(doc, parent_dict);
    }

    None
}
