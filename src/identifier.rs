//! Storage-key correction for teacher-final documents.
//!
//! The upload flow that saves teacher revisions sometimes appends the
//! `老师修改终稿` suffix twice (`X老师修改终稿-老师修改终稿.docx`) or glues it
//! to the stem without a separator (`X老师修改终稿.docx`). Keys written that
//! way do not match the ones other producers compute, so every lookup
//! passes through [`correct_identifier`] first.
//!
//! The correction only touches occurrences of the suffix token. Any key
//! that does not contain it is returned unchanged, and the transform is
//! idempotent.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Suffix appended to teacher-revised documents.
pub const TEACHER_FINAL_SUFFIX: &str = "老师修改终稿";

/// Separator inserted in front of the suffix.
pub const SUFFIX_SEPARATOR: char = '-';

/// Two or more suffix tokens separated only by whitespace, dashes, or underscores.
static DOUBLED_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"[-_\s]*{t}(?:[-_\s]*{t})+",
        t = regex::escape(TEACHER_FINAL_SUFFIX)
    ))
    .expect("doubled-suffix pattern is a valid regex")
});

/// A suffix token directly glued to a non-separator character.
static UNSEPARATED_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"([^-_/\s]){t}",
        t = regex::escape(TEACHER_FINAL_SUFFIX)
    ))
    .expect("unseparated-suffix pattern is a valid regex")
});

/// Correct a storage key produced by the faulty upload path.
///
/// 1. Collapse a doubled suffix into one occurrence preceded by `-`
///    (no separator at the start of the key or of a path segment).
/// 2. Insert `-` before any suffix that directly follows a non-separator.
///
/// ```
/// use essay_review::identifier::correct_identifier;
///
/// assert_eq!(
///     correct_identifier("X老师修改终稿-老师修改终稿.docx"),
///     "X-老师修改终稿.docx"
/// );
/// assert_eq!(correct_identifier("u1/我的暑假-初稿.docx"), "u1/我的暑假-初稿.docx");
/// ```
pub fn correct_identifier(identifier: &str) -> Cow<'_, str> {
    if !identifier.contains(TEACHER_FINAL_SUFFIX) {
        return Cow::Borrowed(identifier);
    }

    let collapsed = DOUBLED_SUFFIX.replace_all(identifier, |caps: &Captures| {
        let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let at_segment_start = start == 0 || identifier[..start].ends_with('/');
        if at_segment_start {
            TEACHER_FINAL_SUFFIX.to_string()
        } else {
            format!("{}{}", SUFFIX_SEPARATOR, TEACHER_FINAL_SUFFIX)
        }
    });

    let separated = UNSEPARATED_SUFFIX
        .replace_all(&collapsed, |caps: &Captures| {
            format!("{}{}{}", &caps[1], SUFFIX_SEPARATOR, TEACHER_FINAL_SUFFIX)
        })
        .into_owned();

    if separated == identifier {
        Cow::Borrowed(identifier)
    } else {
        Cow::Owned(separated)
    }
}

/// Whether [`correct_identifier`] would change this key.
pub fn needs_correction(identifier: &str) -> bool {
    matches!(correct_identifier(identifier), Cow::Owned(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        "plain.docx",
        "u1/我的暑假-初稿.docx",
        "u1/我的暑假-老师修改终稿.docx",
        "u1/我的暑假老师修改终稿.docx",
        "X老师修改终稿-老师修改终稿.docx",
        "X老师修改终稿老师修改终稿.docx",
        "X - 老师修改终稿 - 老师修改终稿.docx",
        "X_老师修改终稿_老师修改终稿_老师修改终稿.docx",
        "u1/老师修改终稿老师修改终稿.docx",
        "老师修改终稿-老师修改终稿.docx",
        "a老师修改终稿b老师修改终稿.docx",
        "初稿老师修改终稿.docx",
        "u1/老师修改终稿.docx",
        "X_老师修改终稿.docx",
    ];

    #[test]
    fn doubled_suffix_with_separator() {
        assert_eq!(
            correct_identifier("X老师修改终稿-老师修改终稿.docx"),
            "X-老师修改终稿.docx"
        );
    }

    #[test]
    fn doubled_suffix_without_separator() {
        assert_eq!(
            correct_identifier("X老师修改终稿老师修改终稿.docx"),
            "X-老师修改终稿.docx"
        );
        assert_eq!(
            correct_identifier("X - 老师修改终稿 - 老师修改终稿.docx"),
            "X-老师修改终稿.docx"
        );
    }

    #[test]
    fn tripled_suffix_collapses_to_one() {
        assert_eq!(
            correct_identifier("X_老师修改终稿_老师修改终稿_老师修改终稿.docx"),
            "X-老师修改终稿.docx"
        );
    }

    #[test]
    fn missing_separator_is_inserted() {
        assert_eq!(
            correct_identifier("u1/我的暑假老师修改终稿.docx"),
            "u1/我的暑假-老师修改终稿.docx"
        );
        assert_eq!(
            correct_identifier("初稿老师修改终稿.docx"),
            "初稿-老师修改终稿.docx"
        );
    }

    #[test]
    fn doubled_suffix_at_segment_start_gets_no_leading_separator() {
        assert_eq!(
            correct_identifier("u1/老师修改终稿老师修改终稿.docx"),
            "u1/老师修改终稿.docx"
        );
        assert_eq!(
            correct_identifier("老师修改终稿-老师修改终稿.docx"),
            "老师修改终稿.docx"
        );
    }

    #[test]
    fn unrelated_keys_are_untouched() {
        for key in ["", "plain.docx", "u1/我的暑假-初稿.docx", "u1/老师修改终稿.docx"] {
            assert!(matches!(correct_identifier(key), Cow::Borrowed(_)), "{}", key);
            assert!(!needs_correction(key));
        }
        assert_eq!(
            correct_identifier("u1/我的暑假-老师修改终稿.docx"),
            "u1/我的暑假-老师修改终稿.docx"
        );
        assert_eq!(correct_identifier("X_老师修改终稿.docx"), "X_老师修改终稿.docx");
    }

    #[test]
    fn correction_is_idempotent() {
        for key in SAMPLES {
            let once = correct_identifier(key).into_owned();
            let twice = correct_identifier(&once).into_owned();
            assert_eq!(once, twice, "not idempotent for {:?}", key);
        }
    }
}
