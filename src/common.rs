use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Not a PE file: {0}")]
    WrongFileFormat(String),

    #[error("PE header parse error: {0}")]
    MalformedHeader(String),

    #[error("Scan error: {0}")]
    ScanError(String),

    #[error("Search path file parse error: {0}")]
    ParseError(String),

    #[error("Lookup context building error: {0}")]
    ContextDeductionError(String),

    #[error("Could not resolve {0} in any directory of the search path")]
    RootUnresolved(String),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// Lossy conversion of a path for display purposes
pub fn path_to_string<P: AsRef<Path>>(p: P) -> String {
    p.as_ref().to_string_lossy().into_owned()
}

/// Remove the extended-length prefix that std::fs::canonicalize adds on Windows
pub fn decanonicalize(s: &str) -> String {
    s.strip_prefix(r"\\?\").unwrap_or(s).to_owned()
}

/// Canonicalize a path, and render it without the extended-length prefix
pub fn readable_canonical_path<P: AsRef<Path>>(p: P) -> Result<String, LookupError> {
    let canonical = fs_err::canonicalize(p.as_ref())?;
    Ok(decanonicalize(&path_to_string(canonical)))
}
