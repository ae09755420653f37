//! PDFページコンテンツの幾何学的リダクションコア。
//!
//! ページユーザー空間の矩形を指定すると、矩形に交差するグリフを
//! コンテンツから恒久的に除去し、画像の該当ピクセルを塗りつぶし、
//! 矩形に完全に含まれるパスオブジェクトを削除する。残るコンテンツの
//! 見た目の位置は保存される。

pub mod error;
pub mod geometry;
pub mod pdf;
pub mod redact;

pub use error::{PdfRedactError, Result};
pub use geometry::{Matrix, Rect};
pub use redact::{redact_text_in_rect, redact_text_in_rects};
