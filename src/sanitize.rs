//! 文件名净化：把任意客户端文件名转换为磁盘安全的 slug。

use slug::slugify;

use crate::config::MAX_FILE_NAME_LEN;

/// Stem used when a name sanitizes down to nothing.
const FALLBACK_NAME: &str = "file";

/// Reduce an arbitrary client-supplied filename to a filesystem-safe name:
/// lowercase ASCII letters, digits, hyphens, and at most one dot-delimited
/// extension segment, bounded to [`MAX_FILE_NAME_LEN`].
///
/// Pure and deterministic; never fails. Idempotent, so re-sanitizing an
/// already-legal name returns it unchanged.
pub fn sanitize_file_name(raw: &str) -> String {
    // Only the last path segment counts; clients may send full paths.
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let base = base.trim_matches(|c: char| c.is_whitespace() || c == '.');

    let (stem, extension) = split_extension(base);
    let stem = slugify(stem);
    let extension = extension.map(slugify).filter(|ext| !ext.is_empty());

    if stem.is_empty() {
        // Extension-only input ("---.pdf") still yields a usable name.
        return match extension {
            Some(ext) => bounded(ext, MAX_FILE_NAME_LEN),
            None => FALLBACK_NAME.to_string(),
        };
    }

    match extension {
        // Truncation eats into the stem; the extension survives intact.
        Some(ext) if ext.len() + 2 <= MAX_FILE_NAME_LEN => {
            let budget = MAX_FILE_NAME_LEN - ext.len() - 1;
            format!("{}.{ext}", bounded(stem, budget))
        }
        // An extension too long to leave room for any stem folds into an
        // extension-less name so the length bound still holds.
        Some(ext) => bounded(format!("{stem}-{ext}"), MAX_FILE_NAME_LEN),
        None => bounded(stem, MAX_FILE_NAME_LEN),
    }
}

/// Rebuild an already-sanitized `name` with a collision-breaking `token`
/// appended to the stem. The result is run through the sanitizer again so
/// the combined name still satisfies the legality rules, and the stem is
/// shortened first so truncation can never drop the token.
pub fn disambiguate_file_name(name: &str, token: &str) -> String {
    let (stem, extension) = split_extension(name);
    let reserve = token.len() + 1 + extension.map_or(0, |ext| ext.len() + 1);
    let budget = MAX_FILE_NAME_LEN.saturating_sub(reserve).max(1);
    let stem = bounded(slugify(stem), budget);

    let combined = match extension {
        Some(ext) => format!("{stem}-{token}.{ext}"),
        None => format!("{stem}-{token}"),
    };
    sanitize_file_name(&combined)
}

/// Split at the last dot into stem and extension, when both are non-empty.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

/// Cut a slug down to `limit` without leaving a dangling hyphen. Slug
/// output is pure ASCII, so byte indexing is safe here.
fn bounded(value: String, limit: usize) -> String {
    if value.len() <= limit {
        return value;
    }
    let mut truncated = value[..limit].to_string();
    while truncated.ends_with('-') {
        truncated.pop();
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_diacritics_and_lowercases() {
        assert_eq!(
            sanitize_file_name("Résumé Côte d'Ivoire.pdf"),
            "resume-cote-d-ivoire.pdf"
        );
    }

    #[test]
    fn output_alphabet_is_restricted() {
        let sanitized = sanitize_file_name("Über CRAZY (file) [v2]!!.TXT");
        let (stem, extension) = sanitized.rsplit_once('.').expect("extension kept");
        assert!(
            stem.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
            "unexpected stem {stem:?}"
        );
        assert_eq!(extension, "txt");
    }

    #[test]
    fn collapses_whitespace_and_hyphen_runs() {
        assert_eq!(sanitize_file_name("a   b --- c.txt"), "a-b-c.txt");
    }

    #[test]
    fn keeps_only_last_path_segment() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\temp\\Report.PDF"), "report.pdf");
    }

    #[test]
    fn multiple_dots_collapse_to_single_extension() {
        assert_eq!(sanitize_file_name("archive.tar.gz"), "archive-tar.gz");
        assert_eq!(sanitize_file_name("weird..name..txt"), "weird-name.txt");
    }

    #[test]
    fn empty_and_dot_only_names_never_fail() {
        assert_eq!(sanitize_file_name(""), "file");
        assert_eq!(sanitize_file_name("..."), "file");
        assert_eq!(sanitize_file_name("???"), "file");
        assert_eq!(sanitize_file_name(".pdf"), "pdf");
    }

    #[test]
    fn is_idempotent() {
        for raw in [
            "Résumé Côte d'Ivoire.pdf",
            "UPPER case & symbols!.jpeg",
            "no-extension",
            "...",
            &"x".repeat(200),
        ] {
            let once = sanitize_file_name(raw);
            assert_eq!(sanitize_file_name(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn truncates_stem_but_keeps_extension() {
        let long = format!("{}.jpeg", "a".repeat(200));
        let sanitized = sanitize_file_name(&long);
        assert_eq!(sanitized.len(), MAX_FILE_NAME_LEN);
        assert!(sanitized.ends_with(".jpeg"));
    }

    #[test]
    fn oversized_extension_still_respects_bound() {
        let sanitized = sanitize_file_name(&format!("name.{}", "x".repeat(200)));
        assert!(sanitized.len() <= MAX_FILE_NAME_LEN);
        assert!(sanitized.starts_with("name-x"));
        assert_eq!(sanitize_file_name(&sanitized), sanitized);

        let sanitized = sanitize_file_name(&format!(".{}", "y".repeat(200)));
        assert!(sanitized.len() <= MAX_FILE_NAME_LEN);
    }

    #[test]
    fn extension_less_names_are_bounded() {
        let sanitized = sanitize_file_name(&"b".repeat(500));
        assert_eq!(sanitized.len(), MAX_FILE_NAME_LEN);
    }

    #[test]
    fn disambiguation_preserves_token_and_extension() {
        let renamed = disambiguate_file_name("report.pdf", "deadbeef1234");
        assert_eq!(renamed, "report-deadbeef1234.pdf");

        let long = sanitize_file_name(&format!("{}.pdf", "c".repeat(200)));
        let renamed = disambiguate_file_name(&long, "deadbeef1234");
        assert!(renamed.len() <= MAX_FILE_NAME_LEN);
        assert!(renamed.contains("deadbeef1234"));
        assert!(renamed.ends_with(".pdf"));
    }

    #[test]
    fn disambiguation_without_extension() {
        assert_eq!(
            disambiguate_file_name("notes", "deadbeef1234"),
            "notes-deadbeef1234"
        );
    }
}
