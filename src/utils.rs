use std::path::{Path, PathBuf};

/// Diffusers directory of `model` inside the host's models tree, always with `/`.
pub fn local_diffusers_path(file_path: &Path, model: &str) -> PathBuf {
    let joined = file_path.join("models").join("diffusers").join(model);
    PathBuf::from(joined.to_string_lossy().replace('\\', "/"))
}

pub fn contains_brackets(s: &str) -> bool {
    s.contains('[') || s.contains(']')
}

/// True when a `(`...`)` pair appears in order on one line.
pub fn has_parentheses(s: &str) -> bool {
    s.lines().any(|line| {
        line.find('(')
            .map(|open| line[open + 1..].contains(')'))
            .unwrap_or(false)
    })
}

/// Contents of every `[...]` pair, non-greedy, in order of appearance.
/// A pair never spans a line break.
pub fn extract_bracketed(text: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        match after.find(|c: char| c == ']' || c == '\n') {
            Some(close) if after[close..].starts_with(']') => {
                found.push(&after[..close]);
                rest = &after[close + 1..];
            }
            Some(_) => rest = after,
            None => break,
        }
    }
    found
}

/// Drops trailing characters that are neither alphanumeric nor `_`.
pub fn strip_trailing_punctuation(s: &str) -> &str {
    s.trim_end_matches(|c: char| !(c.is_alphanumeric() || c == '_'))
}

/// Expands an `(l, t, r, b)` face box to the enclosing square around its center.
pub fn face_bbox_to_square(bbox: [f32; 4]) -> [f32; 4] {
    let [l, t, r, b] = bbox;
    let (cx, cy) = ((l + r) / 2., (t + b) / 2.);
    let half = (r - l).max(b - t) / 2.;
    [cx - half, cy - half, cx + half, cy + half]
}

/// Crop box `(left, top, right, bottom)` of a centered `new_width` x `new_height` region.
pub fn center_crop_box(width: u32, height: u32, new_width: u32, new_height: u32) -> [f32; 4] {
    let (w, h) = (width as f32, height as f32);
    let (nw, nh) = (new_width as f32, new_height as f32);
    [(w - nw) / 2., (h - nh) / 2., (w + nw) / 2., (h + nh) / 2.]
}

/// Centered square crop box of the largest square that fits.
pub fn center_square_box(width: u32, height: u32) -> [f32; 4] {
    let side = width.min(height);
    center_crop_box(width, height, side, side)
}
