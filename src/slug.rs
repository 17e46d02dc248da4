//! Slug helpers for identifiers derived from free text (conversation ids,
//! checkpoint directories, timer keys).

/// Maximum length for truncated slugs
const MAX_SLUG_LENGTH: usize = 30;

/// Convert a string to a URL-friendly slug (basic conversion).
///
/// Does NOT truncate - use `slugify_truncate` for length-limited slugs.
pub fn slugify(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();

    // Collapse consecutive dashes and trim leading/trailing dashes
    let mut result = String::new();
    let mut prev_dash = true;
    for c in slug.chars() {
        if c == '-' {
            if !prev_dash {
                result.push(c);
            }
            prev_dash = true;
        } else {
            result.push(c);
            prev_dash = false;
        }
    }

    if result.ends_with('-') {
        result.pop();
    }

    result
}

/// Convert a string to a slug, truncated at a word boundary to stay under
/// `MAX_SLUG_LENGTH`.
pub fn slugify_truncate(text: &str) -> String {
    let mut result = slugify(text);

    if result.len() > MAX_SLUG_LENGTH {
        let cut = floor_char_boundary(&result, MAX_SLUG_LENGTH);
        if let Some(pos) = result[..cut].rfind('-') {
            result.truncate(pos);
        } else {
            result.truncate(cut);
        }
    }

    if result.ends_with('-') {
        result.pop();
    }

    result
}

/// Largest char boundary <= `index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Slug that is never empty, for use as a file or directory name.
///
/// Text that is already a slug maps to itself. Anything else gets a hash of
/// the original text appended, so distinct inputs that slugify alike
/// (`Inst_1`, `inst-1`) still land in distinct files.
pub fn file_slug(text: &str) -> String {
    let slug = slugify(text);
    if !slug.is_empty() && slug == text {
        return slug;
    }

    let base = if slug.is_empty() { "unnamed" } else { &slug };
    format!("{}-{:08x}", base, fnv1a(text.as_bytes()))
}

/// 32-bit FNV-1a; stable across builds and platforms.
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5, |hash: u32, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(0x0100_0193)
    })
}
