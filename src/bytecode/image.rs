use std::fs;
use std::path::Path;

/// Error raised when a container file cannot be read or is malformed.
#[derive(Debug)]
pub struct ImageError {
    pub message: String,
}

impl ImageError {
    fn new(message: impl Into<String>) -> Self {
        ImageError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ImageError {}

/// The on-disk bytecode container: a string table followed by the code
/// segment.
///
/// Layout (all scalars little-endian u32):
///
/// ```text
/// string_count
/// repeat string_count:
///     length
///     bytes[length]        raw string bytes, not zero-terminated
/// code_size
/// bytes[code_size]         opcode stream
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub strings: Vec<String>,
    pub code: Vec<u8>,
}

impl Image {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(&(self.strings.len() as u32).to_le_bytes());
        for s in &self.strings {
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }

        out.extend_from_slice(&(self.code.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.code);

        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Image, ImageError> {
        let mut pos = 0usize;

        let string_count = read_u32(bytes, &mut pos, "string table size")?;

        let mut strings = Vec::with_capacity(string_count as usize);
        for _ in 0..string_count {
            let len = read_u32(bytes, &mut pos, "string length")? as usize;
            if pos + len > bytes.len() {
                return Err(ImageError::new("Failed to read string data"));
            }
            strings.push(String::from_utf8_lossy(&bytes[pos..pos + len]).into_owned());
            pos += len;
        }

        let code_size = read_u32(bytes, &mut pos, "bytecode size")? as usize;
        if pos + code_size > bytes.len() {
            return Err(ImageError::new("Failed to read bytecode"));
        }
        let code = bytes[pos..pos + code_size].to_vec();

        Ok(Image { strings, code })
    }

    pub fn write_file(&self, path: &Path) -> Result<(), ImageError> {
        fs::write(path, self.to_bytes())
            .map_err(|e| ImageError::new(format!("Could not write {}: {}", path.display(), e)))
    }

    pub fn read_file(path: &Path) -> Result<Image, ImageError> {
        let bytes = fs::read(path)
            .map_err(|e| ImageError::new(format!("Failed to open file {}: {}", path.display(), e)))?;
        Image::from_bytes(&bytes)
    }
}

fn read_u32(bytes: &[u8], pos: &mut usize, what: &str) -> Result<u32, ImageError> {
    if *pos + 4 > bytes.len() {
        return Err(ImageError::new(format!("Failed to read {}", what)));
    }
    let value = u32::from_le_bytes([bytes[*pos], bytes[*pos + 1], bytes[*pos + 2], bytes[*pos + 3]]);
    *pos += 4;
    Ok(value)
}
