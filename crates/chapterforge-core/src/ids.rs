//! Deterministic stable-id derivation (spec §3, §9).
//!
//! Chapter/section/paragraph ids are derived from their position in the
//! hierarchy plus a slug of the title, never from a counter or random uuid,
//! so replaying the same multiset of events (crash-resume, reordering)
//! always lands on the same keys in `WorkflowState`'s flat maps.

/// Lowercase, `-`-joined slug, truncated to `max_len` bytes on a char boundary.
pub fn slug(input: &str, max_len: usize) -> String {
    let mut out = String::new();
    let mut prev_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash && !out.is_empty() {
            out.push('-');
            prev_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.len() > max_len {
        let mut end = max_len;
        while end > 0 && !out.is_char_boundary(end) {
            end -= 1;
        }
        out.truncate(end);
        while out.ends_with('-') {
            out.pop();
        }
    }
    if out.is_empty() {
        "untitled".to_string()
    } else {
        out
    }
}

/// `"chapter_" + level + "_" + slug(title)[:30]`
pub fn chapter_id(level: u8, title: &str) -> String {
    format!("chapter_{level}_{}", slug(title, 30))
}

/// Section id includes the owning chapter's index.
pub fn section_id(chapter_index: usize, level: u8, title: &str) -> String {
    format!("section_{chapter_index}_{level}_{}", slug(title, 30))
}

/// Paragraph id includes chapter, section, and paragraph indices.
pub fn paragraph_id(chapter_index: usize, section_index: usize, paragraph_index: usize) -> String {
    format!("paragraph_{chapter_index}_{section_index}_{paragraph_index}")
}

/// Content item id: derived from its source paragraph id and kind so the
/// same (paragraph, kind) pair always maps to the same item, making sink
/// writes idempotent under retry (spec §5 "no shared external writes").
pub fn content_item_id(paragraph_id: &str, kind: &str) -> String {
    format!("content_{paragraph_id}_{kind}")
}

/// Processed-image id: derived from the owning content item id and the
/// diagram's position within that item's body.
pub fn image_id(content_item_id: &str, diagram_index: usize) -> String {
    format!("image_{content_item_id}_{diagram_index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_lowercases_and_dashes() {
        assert_eq!(slug("Hello, World!", 30), "hello-world");
    }

    #[test]
    fn slug_truncates() {
        let long = "a".repeat(50);
        assert_eq!(slug(&long, 30).len(), 30);
    }

    #[test]
    fn slug_empty_falls_back() {
        assert_eq!(slug("!!!", 30), "untitled");
    }

    #[test]
    fn chapter_id_is_deterministic() {
        assert_eq!(chapter_id(1, "Intro"), chapter_id(1, "Intro"));
        assert_ne!(chapter_id(1, "Intro"), chapter_id(1, "Outro"));
    }

    #[test]
    fn paragraph_id_includes_all_indices() {
        assert_eq!(paragraph_id(0, 0, 0), "paragraph_0_0_0");
        assert_ne!(paragraph_id(0, 0, 0), paragraph_id(0, 0, 1));
    }
}
