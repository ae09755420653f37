use thiserror::Error;

#[derive(Debug, Error)]
pub enum PdfRedactError {
    #[error("PDF read error: {0}")]
    PdfReadError(String),

    #[error("PDF write error: {0}")]
    PdfWriteError(String),

    #[error("Content stream error: {0}")]
    ContentStreamError(String),

    #[error("Font error: {0}")]
    FontError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PdfRedactError {
    pub fn pdf_read(msg: impl Into<String>) -> Self {
        Self::PdfReadError(msg.into())
    }

    pub fn pdf_write(msg: impl Into<String>) -> Self {
        Self::PdfWriteError(msg.into())
    }

    pub fn content_stream(msg: impl Into<String>) -> Self {
        Self::ContentStreamError(msg.into())
    }

    pub fn font(msg: impl Into<String>) -> Self {
        Self::FontError(msg.into())
    }

    pub fn image(msg: impl Into<String>) -> Self {
        Self::ImageError(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PdfRedactError>;
