/// Normalizes a declared content type to its canonical lowercase form,
/// stripping parameters such as `; charset=utf-8`.
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase()
}

/// Sniffs the content type from the leading bytes of a payload.
///
/// Proxy uploads must not trust the caller-declared MIME, so the type fed
/// into policy checks comes from the bytes themselves.
pub fn sniff_content_type(header: &[u8]) -> Option<String> {
    infer::get(header).map(|kind| kind.mime_type().to_string())
}

/// Checks if a payload appears to be an executable
pub fn is_executable_content(header: &[u8]) -> bool {
    if header.len() < 4 {
        return false;
    }

    // ELF binary (Linux)
    if header.starts_with(&[0x7F, 0x45, 0x4C, 0x46]) {
        return true;
    }

    // PE/COFF (Windows .exe, .dll)
    if header.starts_with(&[0x4D, 0x5A]) {
        return true;
    }

    // Mach-O (macOS)
    if header.starts_with(&[0xFE, 0xED, 0xFA, 0xCE])
        || header.starts_with(&[0xFE, 0xED, 0xFA, 0xCF])
        || header.starts_with(&[0xCE, 0xFA, 0xED, 0xFE])
        || header.starts_with(&[0xCF, 0xFA, 0xED, 0xFE])
    {
        return true;
    }

    // Shebang (shell scripts)
    if header.starts_with(b"#!") {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_content_type() {
        assert_eq!(normalize_content_type("image/PNG"), "image/png");
        assert_eq!(
            normalize_content_type("text/plain; charset=utf-8"),
            "text/plain"
        );
        assert_eq!(normalize_content_type("  image/jpeg  "), "image/jpeg");
    }

    #[test]
    fn test_sniff_content_type() {
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00];
        assert_eq!(sniff_content_type(&png).as_deref(), Some("image/png"));

        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];
        assert_eq!(sniff_content_type(&jpeg).as_deref(), Some("image/jpeg"));

        assert_eq!(sniff_content_type(b"plain text"), None);
    }

    #[test]
    fn test_is_executable_content() {
        // ELF header
        assert!(is_executable_content(&[0x7F, 0x45, 0x4C, 0x46, 0x00]));
        // PE header
        assert!(is_executable_content(&[0x4D, 0x5A, 0x00, 0x00]));
        // Shebang
        assert!(is_executable_content(b"#!/bin/bash"));
        // Regular content
        assert!(!is_executable_content(b"Hello World"));
        assert!(!is_executable_content(&[0x89, 0x50, 0x4E, 0x47])); // PNG
    }
}
