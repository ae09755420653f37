use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;

use flate2::read::ZlibDecoder;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

use crate::error::PdfRedactError;

/// デコード済みビットマップのピクセル形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DibFormat {
    /// 8-bitグレースケール
    Gray8,
    /// 24-bit RGB
    Rgb24,
    /// 32-bit RGBA（アルファあり）
    Rgba32,
    /// 32-bit RGB + 詰め物バイト（アルファなし）
    Rgbx32,
    /// 8-bitインデックス（ARGBパレット参照）
    Indexed8,
}

impl DibFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            DibFormat::Gray8 | DibFormat::Indexed8 => 1,
            DibFormat::Rgb24 => 3,
            DibFormat::Rgba32 | DibFormat::Rgbx32 => 4,
        }
    }
}

/// デコード済みビットマップ。行は上から下へ格納される。
pub struct Dib {
    width: u32,
    height: u32,
    format: DibFormat,
    /// Indexed8用パレット（0xAARRGGBB）。他形式では空。
    palette: Vec<u32>,
    data: Vec<u8>,
}

impl Dib {
    pub fn new(width: u32, height: u32, format: DibFormat, palette: Vec<u32>, data: Vec<u8>) -> Self {
        Dib {
            width,
            height,
            format,
            palette,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> DibFormat {
        self.format
    }

    pub fn palette(&self) -> &[u32] {
        &self.palette
    }

    pub fn has_alpha(&self) -> bool {
        self.format == DibFormat::Rgba32
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 上からrow_top行目のスキャンラインを返す。
    /// データが不足している行は空スライスを返す。
    pub fn scanline(&self, row_top: u32) -> &[u8] {
        let stride = self.width as usize * self.format.bytes_per_pixel();
        let start = row_top as usize * stride;
        let end = start + stride;
        if end > self.data.len() {
            return &[];
        }
        &self.data[start..end]
    }
}

/// 画像のカラースペース種別（デコードに必要な範囲のみ）
#[derive(Debug, Clone, PartialEq, Eq)]
enum ColorKind {
    Gray,
    Rgb,
    Indexed,
    Unsupported,
}

/// 画像XObject。ストリーム辞書・データとデコードキャッシュ、
/// 解決済みソフトマスクを保持する。
pub struct Image {
    stream: Stream,
    /// ドキュメント内のストリームオブジェクトID（上書き書き戻し先）
    stream_id: Option<ObjectId>,
    smask: Option<Stream>,
    cs_kind: ColorKind,
    palette: Option<Vec<u32>>,
    dib_cache: RefCell<Option<Rc<Dib>>>,
}

impl Image {
    /// ドキュメント内の画像XObjectから構築する。
    /// カラースペースとSMask参照はここで解決する。
    pub fn load(doc: &Document, id: ObjectId) -> crate::error::Result<Image> {
        let obj = doc
            .get_object(id)
            .map_err(|e| PdfRedactError::image(e.to_string()))?;
        let stream = obj
            .as_stream()
            .map_err(|e| PdfRedactError::image(e.to_string()))?
            .clone();

        let (cs_kind, palette) = resolve_colorspace(Some(doc), &stream.dict);
        let smask = resolve_smask(Some(doc), &stream.dict);

        Ok(Image {
            stream,
            stream_id: Some(id),
            smask,
            cs_kind,
            palette,
            dib_cache: RefCell::new(None),
        })
    }

    /// ドキュメント外のストリームから構築する（直接参照のみ解決可能）。
    pub fn from_stream(stream: Stream) -> Image {
        let (cs_kind, palette) = resolve_colorspace(None, &stream.dict);
        let smask = resolve_smask(None, &stream.dict);
        Image {
            stream,
            stream_id: None,
            smask,
            cs_kind,
            palette,
            dib_cache: RefCell::new(None),
        }
    }

    /// デコード済みビットマップから構築する。
    ///
    /// 外部デコーダ由来の形式をそのまま扱える。PDFネイティブのデコードが
    /// 作らない形式（Rgbx32、アルファ付きパレットのIndexed8など）は
    /// この経路でのみ入ってくる。
    pub fn from_dib(dib: Dib) -> Image {
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => dib.width() as i64,
            "Height" => dib.height() as i64,
            "BitsPerComponent" => 8,
        };
        let stream = Stream::new(dict, Vec::new());
        Image {
            stream,
            stream_id: None,
            smask: None,
            cs_kind: ColorKind::Rgb,
            palette: None,
            dib_cache: RefCell::new(Some(Rc::new(dib))),
        }
    }

    pub fn width(&self) -> u32 {
        dict_get_u32(&self.stream.dict, b"Width").unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        dict_get_u32(&self.stream.dict, b"Height").unwrap_or(0)
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn dict(&self) -> &Dictionary {
        &self.stream.dict
    }

    pub fn stream_id(&self) -> Option<ObjectId> {
        self.stream_id
    }

    /// ソフトマスクを差し替える（外部デコーダ経由の構築用）。
    pub fn set_smask(&mut self, smask: Option<Stream>) {
        self.smask = smask;
    }

    pub fn smask_stream(&self) -> Option<&Stream> {
        self.smask.as_ref()
    }

    /// ソフトマスクのフィルタ解除済みバイト列を返す。
    pub fn smask_filtered_bytes(&self) -> crate::error::Result<Vec<u8>> {
        let smask = self
            .smask
            .as_ref()
            .ok_or_else(|| PdfRedactError::image("no SMask attached"))?;
        stream_filtered_bytes(smask)
    }

    /// 画像をデコードしてDIBを返す。結果はキャッシュされる。
    ///
    /// 対応フィルタ:
    /// - DCTDecode (JPEG)
    /// - FlateDecode (raw pixels + zlib)
    /// - 非圧縮 (raw pixels)
    pub fn load_dib(&self) -> crate::error::Result<Rc<Dib>> {
        {
            let cache = self.dib_cache.borrow();
            if let Some(dib) = cache.as_ref() {
                return Ok(Rc::clone(dib));
            }
        }
        let dib = Rc::new(self.decode()?);
        *self.dib_cache.borrow_mut() = Some(Rc::clone(&dib));
        Ok(dib)
    }

    /// デコードキャッシュを破棄する。
    pub fn reset_cache(&self) {
        *self.dib_cache.borrow_mut() = None;
    }

    /// ストリームを新しい辞書とデータで置き換える。
    ///
    /// `data_is_decoded` の場合はFlateDecodeで圧縮して格納する。
    /// ドキュメント内のオブジェクトIDが分かっている場合は書き戻す。
    pub fn overwrite_stream_in_place(
        &mut self,
        doc: &mut Document,
        data: Vec<u8>,
        mut dict: Dictionary,
        data_is_decoded: bool,
    ) -> crate::error::Result<()> {
        let stream = if data_is_decoded {
            let compressed = flate_encode(&data)?;
            dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
            Stream::new(dict, compressed)
        } else {
            Stream::new(dict, data)
        };

        if let Some(id) = self.stream_id {
            doc.objects.insert(id, Object::Stream(stream.clone()));
        }

        let (cs_kind, palette) = resolve_colorspace(Some(doc), &stream.dict);
        self.cs_kind = cs_kind;
        self.palette = palette;
        self.smask = resolve_smask(Some(doc), &stream.dict);
        self.stream = stream;
        Ok(())
    }

    fn decode(&self) -> crate::error::Result<Dib> {
        let filter = first_filter(&self.stream.dict);
        match filter.as_deref() {
            Some("DCTDecode") => self.decode_jpeg(&self.stream.content),
            Some("FlateDecode") => {
                let raw = flate_decode(&self.stream.content)?;
                self.decode_raw(&raw)
            }
            None => self.decode_raw(&self.stream.content),
            Some(other) => Err(PdfRedactError::image(format!(
                "unsupported image filter: {}",
                other
            ))),
        }
    }

    /// JPEGデータをデコード
    fn decode_jpeg(&self, data: &[u8]) -> crate::error::Result<Dib> {
        let reader = image::ImageReader::new(std::io::Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| PdfRedactError::image(format!("JPEG decode error: {}", e)))?;
        let decoded = reader
            .decode()
            .map_err(|e| PdfRedactError::image(format!("JPEG decode error: {}", e)))?;

        let (w, h) = (decoded.width(), decoded.height());
        let dib = match decoded {
            image::DynamicImage::ImageLuma8(img) => {
                Dib::new(w, h, DibFormat::Gray8, Vec::new(), img.into_raw())
            }
            image::DynamicImage::ImageRgb8(img) => {
                Dib::new(w, h, DibFormat::Rgb24, Vec::new(), img.into_raw())
            }
            image::DynamicImage::ImageRgba8(img) => {
                Dib::new(w, h, DibFormat::Rgba32, Vec::new(), img.into_raw())
            }
            other => Dib::new(w, h, DibFormat::Rgb24, Vec::new(), other.to_rgb8().into_raw()),
        };
        Ok(dib)
    }

    /// Raw pixelデータからDIBを構築
    fn decode_raw(&self, data: &[u8]) -> crate::error::Result<Dib> {
        let w = self.width();
        let h = self.height();
        let bpc = match self.stream.dict.get(b"BitsPerComponent") {
            Ok(_) => dict_get_u32(&self.stream.dict, b"BitsPerComponent")? as u8,
            Err(_) => 8,
        };

        match (&self.cs_kind, bpc) {
            (ColorKind::Rgb, 8) => {
                let expected = (w as usize) * (h as usize) * 3;
                if data.len() < expected {
                    return Err(PdfRedactError::image(format!(
                        "RGB data too short: expected {}, got {}",
                        expected,
                        data.len()
                    )));
                }
                Ok(Dib::new(w, h, DibFormat::Rgb24, Vec::new(), data[..expected].to_vec()))
            }
            (ColorKind::Gray, 8) => {
                let expected = (w as usize) * (h as usize);
                if data.len() < expected {
                    return Err(PdfRedactError::image(format!(
                        "Gray data too short: expected {}, got {}",
                        expected,
                        data.len()
                    )));
                }
                Ok(Dib::new(w, h, DibFormat::Gray8, Vec::new(), data[..expected].to_vec()))
            }
            (ColorKind::Indexed, 8) => {
                let palette = self
                    .palette
                    .clone()
                    .ok_or_else(|| PdfRedactError::image("indexed image without palette"))?;
                let expected = (w as usize) * (h as usize);
                if data.len() < expected {
                    return Err(PdfRedactError::image(format!(
                        "indexed data too short: expected {}, got {}",
                        expected,
                        data.len()
                    )));
                }
                Ok(Dib::new(w, h, DibFormat::Indexed8, palette, data[..expected].to_vec()))
            }
            (cs, bpc) => Err(PdfRedactError::image(format!(
                "unsupported color space / BPC combination: {:?} / {}",
                cs, bpc
            ))),
        }
    }
}

/// 辞書からu32値を取得するヘルパー（負の値はエラー）
fn dict_get_u32(dict: &Dictionary, key: &[u8]) -> crate::error::Result<u32> {
    match dict.get(key) {
        Ok(Object::Integer(i)) => {
            let val = *i;
            if val < 0 || val > u32::MAX as i64 {
                Err(PdfRedactError::image(format!(
                    "value out of u32 range for {:?}: {}",
                    String::from_utf8_lossy(key),
                    val
                )))
            } else {
                Ok(val as u32)
            }
        }
        Ok(other) => Err(PdfRedactError::image(format!(
            "expected integer for {:?}, got {:?}",
            String::from_utf8_lossy(key),
            other
        ))),
        Err(_) => Err(PdfRedactError::image(format!(
            "missing required key: {:?}",
            String::from_utf8_lossy(key),
        ))),
    }
}

/// /Filterの先頭フィルタ名を取得する（フィルタ連鎖は先頭のみ）。
fn first_filter(dict: &Dictionary) -> Option<String> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => Some(String::from_utf8_lossy(name).to_string()),
        Ok(Object::Array(arr)) => arr.first().and_then(|obj| {
            if let Object::Name(name) = obj {
                Some(String::from_utf8_lossy(name).to_string())
            } else {
                None
            }
        }),
        _ => None,
    }
}

/// /ColorSpaceを解決する。Indexedの場合はARGBパレットも構築する。
fn resolve_colorspace(doc: Option<&Document>, dict: &Dictionary) -> (ColorKind, Option<Vec<u32>>) {
    // ImageMask画像はピクセル書き換え対象外
    if let Ok(Object::Boolean(true)) = dict.get(b"ImageMask") {
        return (ColorKind::Unsupported, None);
    }

    let cs_obj = match dict.get(b"ColorSpace") {
        Ok(obj) => obj,
        // ColorSpace未指定はDeviceRGB扱い
        Err(_) => return (ColorKind::Rgb, None),
    };
    let cs_obj = deref(doc, cs_obj);

    match cs_obj {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" => (ColorKind::Gray, None),
            b"DeviceRGB" => (ColorKind::Rgb, None),
            _ => (ColorKind::Unsupported, None),
        },
        Object::Array(arr) => resolve_indexed(doc, arr),
        _ => (ColorKind::Unsupported, None),
    }
}

/// [/Indexed base hival lookup] 形式のカラースペースを解決する。
fn resolve_indexed(doc: Option<&Document>, arr: &[Object]) -> (ColorKind, Option<Vec<u32>>) {
    if arr.len() != 4 {
        return (ColorKind::Unsupported, None);
    }
    let is_indexed = matches!(&arr[0], Object::Name(n) if n == b"Indexed");
    if !is_indexed {
        return (ColorKind::Unsupported, None);
    }

    // ベースカラースペースはDeviceRGBのみ対応
    let base = deref(doc, &arr[1]);
    let base_is_rgb = matches!(base, Object::Name(n) if n == b"DeviceRGB");
    if !base_is_rgb {
        return (ColorKind::Unsupported, None);
    }

    let hival = match &arr[2] {
        Object::Integer(n) if *n >= 0 => *n as usize,
        _ => return (ColorKind::Unsupported, None),
    };

    let lookup_bytes: Vec<u8> = match deref(doc, &arr[3]) {
        Object::String(bytes, _) => bytes.clone(),
        Object::Stream(stream) => match stream_filtered_bytes(stream) {
            Ok(bytes) => bytes,
            Err(_) => return (ColorKind::Unsupported, None),
        },
        _ => return (ColorKind::Unsupported, None),
    };

    // RGBトリプルをARGB (0xAARRGGBB, アルファ0xFF) に展開
    let mut palette = Vec::with_capacity(hival + 1);
    for i in 0..=hival {
        let off = i * 3;
        if off + 2 >= lookup_bytes.len() {
            break;
        }
        let r = lookup_bytes[off] as u32;
        let g = lookup_bytes[off + 1] as u32;
        let b = lookup_bytes[off + 2] as u32;
        palette.push(0xFF00_0000 | (r << 16) | (g << 8) | b);
    }

    (ColorKind::Indexed, Some(palette))
}

/// /SMask参照を解決してストリームのコピーを返す。
fn resolve_smask(doc: Option<&Document>, dict: &Dictionary) -> Option<Stream> {
    let obj = dict.get(b"SMask").ok()?;
    match deref(doc, obj) {
        Object::Stream(stream) => Some(stream.clone()),
        _ => None,
    }
}

/// ストリームのフィルタ解除済みバイト列を返す。
/// /Filterが無い場合はそのままの内容を返す。
pub(crate) fn stream_filtered_bytes(stream: &Stream) -> crate::error::Result<Vec<u8>> {
    if stream.dict.get(b"Filter").is_err() {
        return Ok(stream.content.clone());
    }
    stream
        .decompressed_content()
        .map_err(|e| PdfRedactError::image(format!("stream decode failed: {}", e)))
}

fn deref<'a>(doc: Option<&'a Document>, obj: &'a Object) -> &'a Object {
    if let (Some(doc), Object::Reference(id)) = (doc, obj) {
        if let Ok(target) = doc.get_object(*id) {
            return target;
        }
    }
    obj
}

/// zlibで圧縮
pub(crate) fn flate_encode(data: &[u8]) -> crate::error::Result<Vec<u8>> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| PdfRedactError::image(format!("flate encode error: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| PdfRedactError::image(format!("flate encode error: {}", e)))
}

/// zlibを解凍
pub(crate) fn flate_decode(data: &[u8]) -> crate::error::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| PdfRedactError::image(format!("FlateDecode error: {}", e)))?;
    Ok(decompressed)
}
