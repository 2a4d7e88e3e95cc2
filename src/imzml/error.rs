/// Errors that can occur while parsing an imzML header.
#[derive(Debug, thiserror::Error)]
pub enum ImzMLError {
    /// Error parsing XML
    #[error("XML parsing error: {0}")]
    XmlError(#[from] quick_xml::Error),

    /// I/O error during file operations
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// UTF-8 encoding error in attribute content
    #[error("UTF-8 encoding error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    /// Invalid imzML document structure
    #[error("Invalid imzML structure: {0}")]
    InvalidStructure(String),

    /// Header declares zero or two binary layout modes
    #[error(
        "invalid layout mode: expected exactly one of 'continuous' or 'processed' \
         (continuous={continuous}, processed={processed})"
    )]
    InvalidLayoutMode { continuous: bool, processed: bool },
}
