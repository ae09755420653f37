use lopdf::{Document, Object, Stream, dictionary};

use crate::geometry::{Matrix, Rect};
use crate::pdf::image::DibFormat;
use crate::pdf::object::ImageObject;

/// 下上がりピクセル座標の整数ボックス
struct PixelBox {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

/// ページ空間の矩形列を画像のサンプルグリッド（画像ローカル、下上がり）へ写す。
///
/// ページ→単位正方形→ピクセルの2段変換を行い、[0,W]×[0,H]にクランプする。
/// 空になった矩形は捨てる。
fn page_rects_to_image_grid(
    image_to_page: &Matrix,
    img_w: u32,
    img_h: u32,
    page_rects: &[Rect],
) -> Vec<Rect> {
    let mut out = Vec::new();
    if img_w == 0 || img_h == 0 || page_rects.is_empty() {
        return out;
    }

    let Some(page_to_unit) = image_to_page.invert() else {
        return out;
    };

    let w = img_w as f64;
    let h = img_h as f64;
    for pr in page_rects {
        // ページ → 単位正方形
        let mut ur = page_to_unit.transform_rect(pr);
        ur.normalize();

        // 単位正方形 → ピクセル
        let mut ir = Rect::new(ur.left * w, ur.bottom * h, ur.right * w, ur.top * h);
        ir.normalize();

        ir.left = ir.left.clamp(0.0, w);
        ir.right = ir.right.clamp(0.0, w);
        ir.bottom = ir.bottom.clamp(0.0, h);
        ir.top = ir.top.clamp(0.0, h);

        if ir.right > ir.left && ir.top > ir.bottom {
            out.push(ir);
        }
    }
    out
}

/// ピクセル矩形をfloor/ceilで整数ボックスに広げる。
fn integer_boxes(img_rects: &[Rect], img_w: u32, img_h: u32) -> Vec<PixelBox> {
    let w = img_w as f64;
    let h = img_h as f64;
    let mut boxes = Vec::with_capacity(img_rects.len());
    for r in img_rects {
        let x0 = r.left.floor().clamp(0.0, w) as u32;
        let x1 = r.right.ceil().clamp(0.0, w) as u32;
        let y0 = r.bottom.floor().clamp(0.0, h) as u32;
        let y1 = r.top.ceil().clamp(0.0, h) as u32;
        if x1 > x0 && y1 > y0 {
            boxes.push(PixelBox { x0, y0, x1, y1 });
        }
    }
    boxes
}

/// 画像オブジェクトのリダクション矩形に掛かるピクセルを塗りつぶす。
///
/// 画像をデコードして8-bit RGBに変換し、矩形内のピクセルを塗り値で
/// 上書きして、新しいデコード済みストリームとして再インストールする。
/// アルファ面が必要な場合は新しいソフトマスクをドキュメントに追加する。
/// ストリームを書き換えた場合にtrueを返す。
pub fn redact_image_object(
    doc: &mut Document,
    iobj: &mut ImageObject,
    page_rects: &[Rect],
    parent_to_page: &Matrix,
    fill_black: bool,
) -> bool {
    let w = iobj.image().width();
    let h = iobj.image().height();
    if w == 0 || h == 0 {
        return false;
    }

    // このオブジェクトのローカル空間 → ページ空間
    let img_to_page = iobj.matrix().multiply(parent_to_page);

    // 単位正方形のページ空間BBoxで早期リジェクト
    let img_bbox_page = img_to_page.transform_rect(&Rect::new(0.0, 0.0, 1.0, 1.0));
    if !img_bbox_page.intersects_any(page_rects) {
        return false;
    }

    // ソースのデコード
    let Ok(dib) = iobj.image().load_dib() else {
        return false;
    };
    if dib.width() != w || dib.height() != h {
        return false;
    }

    let format = dib.format();
    let palette = dib.palette();
    let is_indexed8 = format == DibFormat::Indexed8 && !palette.is_empty();
    if format == DibFormat::Indexed8 && !is_indexed8 {
        // パレットの無いインデックス画像は未対応
        return false;
    }
    let palette_has_alpha = is_indexed8 && palette.iter().any(|c| (c >> 24) != 0xFF);

    let has_smask = iobj.image().smask_stream().is_some();

    // ページ空間の矩形を画像ピクセル空間（下上がり）へ
    let img_rects = page_rects_to_image_grid(&img_to_page, w, h, page_rects);
    if img_rects.is_empty() {
        return false;
    }
    let boxes = integer_boxes(&img_rects, w, h);
    if boxes.is_empty() {
        return false;
    }

    let fill_val: u8 = if fill_black { 0x00 } else { 0xFF };

    let npix = w as usize * h as usize;
    let mut out_rgb = vec![0u8; npix * 3];

    // アルファ面が要るのは: 元がRGBA、SMaskあり、またはパレットがアルファを持つ場合
    let process_alpha = format == DibFormat::Rgba32 || has_smask || palette_has_alpha;
    let mut out_a: Vec<u8> = Vec::new();
    if process_alpha {
        out_a = vec![0xFF; npix];
        if has_smask && format != DibFormat::Rgba32 {
            // 元のソフトマスクを引き継ぐ。足りない分は不透明のまま
            if let Ok(smask_bytes) = iobj.image().smask_filtered_bytes() {
                let n = smask_bytes.len().min(npix);
                out_a[..n].copy_from_slice(&smask_bytes[..n]);
            }
        }
    }

    let mut total_redacted_px: usize = 0;

    for row_top in 0..h {
        let y_img = (h - 1 - row_top) as f64; // 下上がりインデックスへ変換
        let sline = dib.scanline(row_top);
        let row_off = row_top as usize * w as usize;

        if sline.is_empty() {
            // デコーダ防御: 行全体をリダクション扱いで塗る
            out_rgb[row_off * 3..(row_off + w as usize) * 3].fill(fill_val);
            if process_alpha {
                out_a[row_off..row_off + w as usize].fill(0xFF);
            }
            total_redacted_px += w as usize;
            continue;
        }

        for x in 0..w as usize {
            let px_rect = Rect::new(x as f64, y_img, x as f64 + 1.0, y_img + 1.0);
            let red = px_rect.intersects_any(&img_rects);

            let o = (row_off + x) * 3;
            if red {
                out_rgb[o] = fill_val;
                out_rgb[o + 1] = fill_val;
                out_rgb[o + 2] = fill_val;
                if process_alpha {
                    // 上塗りなので強制的に不透明へ
                    out_a[row_off + x] = 0xFF;
                }
                total_redacted_px += 1;
                continue;
            }

            match format {
                DibFormat::Indexed8 => {
                    // パレット展開 (エントリは0xAARRGGBB)
                    let argb = palette
                        .get(sline[x] as usize)
                        .copied()
                        .unwrap_or(0xFF00_0000);
                    out_rgb[o] = ((argb >> 16) & 0xFF) as u8;
                    out_rgb[o + 1] = ((argb >> 8) & 0xFF) as u8;
                    out_rgb[o + 2] = (argb & 0xFF) as u8;
                    if process_alpha && !has_smask && palette_has_alpha {
                        out_a[row_off + x] = ((argb >> 24) & 0xFF) as u8;
                    }
                }
                DibFormat::Gray8 => {
                    let v = sline[x];
                    out_rgb[o] = v;
                    out_rgb[o + 1] = v;
                    out_rgb[o + 2] = v;
                    // アルファはSMask経由で設定済み
                }
                DibFormat::Rgb24 => {
                    out_rgb[o..o + 3].copy_from_slice(&sline[3 * x..3 * x + 3]);
                }
                DibFormat::Rgba32 => {
                    out_rgb[o..o + 3].copy_from_slice(&sline[4 * x..4 * x + 3]);
                    if process_alpha {
                        out_a[row_off + x] = sline[4 * x + 3];
                    }
                }
                DibFormat::Rgbx32 => {
                    out_rgb[o..o + 3].copy_from_slice(&sline[4 * x..4 * x + 3]);
                }
            }
        }
    }

    if total_redacted_px == 0 {
        return false;
    }

    // リダクション領域内のアルファを強制的に不透明へ。
    // 引き継いだソフトマスクが透明でも塗りが透けないようにする。
    if process_alpha {
        for b in &boxes {
            for y in b.y0..b.y1 {
                let row_top = h - 1 - y;
                let off = row_top as usize * w as usize;
                out_a[off + b.x0 as usize..off + b.x1 as usize].fill(0xFF);
            }
        }
    }

    // 新しい画像辞書（デコード済みRGB）
    let mut ndict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => w as i64,
        "Height" => h as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
    };

    // アルファ面があればソフトマスクを付ける
    if process_alpha {
        let smask_dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => w as i64,
            "Height" => h as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        };
        let smask_id = doc.add_object(Object::Stream(Stream::new(smask_dict, out_a)));
        ndict.set("SMask", Object::Reference(smask_id));
    }

    tracing::debug!(
        redacted_px = total_redacted_px,
        width = w,
        height = h,
        "rewriting image stream"
    );

    match iobj
        .image_mut()
        .overwrite_stream_in_place(doc, out_rgb, ndict, true)
    {
        Ok(()) => {
            iobj.image().reset_cache();
            iobj.set_dirty(true);
            true
        }
        Err(e) => {
            tracing::debug!(error = %e, "image stream overwrite failed");
            false
        }
    }
}
