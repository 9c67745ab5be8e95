//! Encoding and line-ending detection for files the guard touches.

const UTF16LE_BOM: [u8; 2] = [0xFF, 0xFE];
const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf16Le,
    /// `bom` records whether the file started with a UTF-8 byte order mark.
    Utf8 { bom: bool },
    /// Bytes that are not valid UTF-8, decoded one byte per char (Latin-1) so
    /// that writing the text back reproduces the bytes exactly.
    Ascii,
}

impl TextEncoding {
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(&UTF16LE_BOM) {
            return Self::Utf16Le;
        }
        if bytes.starts_with(&UTF8_BOM) {
            return Self::Utf8 { bom: true };
        }
        if std::str::from_utf8(bytes).is_ok() {
            return Self::Utf8 { bom: false };
        }
        Self::Ascii
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Utf16Le => "utf16le",
            Self::Utf8 { .. } => "utf8",
            Self::Ascii => "ascii",
        }
    }

    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf16Le => {
                let body = bytes.strip_prefix(&UTF16LE_BOM).unwrap_or(bytes);
                let units: Vec<u16> = body
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            Self::Utf8 { .. } => {
                let body = bytes.strip_prefix(&UTF8_BOM).unwrap_or(bytes);
                String::from_utf8_lossy(body).into_owned()
            }
            Self::Ascii => bytes.iter().map(|&byte| char::from(byte)).collect(),
        }
    }

    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf16Le => {
                let mut out = Vec::with_capacity(2 + text.len() * 2);
                out.extend_from_slice(&UTF16LE_BOM);
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
                out
            }
            Self::Utf8 { bom } => {
                let mut out = Vec::with_capacity(text.len() + 3);
                if bom {
                    out.extend_from_slice(&UTF8_BOM);
                }
                out.extend_from_slice(text.as_bytes());
                out
            }
            Self::Ascii => text
                .chars()
                .map(|ch| u8::try_from(u32::from(ch)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

impl Default for TextEncoding {
    fn default() -> Self {
        Self::Utf8 { bom: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    Crlf,
}

impl LineEnding {
    /// CRLF wins only when it strictly outnumbers bare LF; ties go to LF.
    pub fn detect(text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut crlf = 0usize;
        let mut lf = 0usize;
        for (index, &byte) in bytes.iter().enumerate() {
            if byte != b'\n' {
                continue;
            }
            if index > 0 && bytes[index - 1] == b'\r' {
                crlf += 1;
            } else {
                lf += 1;
            }
        }
        if crlf > lf {
            Self::Crlf
        } else {
            Self::Lf
        }
    }

    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::Crlf
        } else {
            Self::Lf
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::Crlf => "\r\n",
        }
    }

    /// Rewrites every line break in `text` (CRLF, lone CR, LF) to `self`.
    pub fn normalize(self, text: &str) -> String {
        let unified = text.replace("\r\n", "\n").replace('\r', "\n");
        match self {
            Self::Lf => unified,
            Self::Crlf => unified.replace('\n', "\r\n"),
        }
    }
}
