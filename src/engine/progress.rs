use once_cell::sync::Lazy;
use regex::Regex;

/// The engine announces the end of a processing stage with this exact
/// frame count in its stream. Brittle, but it is the only completion
/// protocol the engine offers; keep every consumer behind the detector
/// below so a format change lands in one place.
const FRAME_RUN_COMPLETE_MARKER: &str = "55/55 frames";

static PERCENT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:100|[1-9]?[0-9])\b").expect("valid percent regex"));

/// Extracts a percentage from frame-ratio output of the shape
/// `...| <current>/<total> frames...`. Anything that does not parse is
/// indeterminate progress, not an error; a zero total is likewise
/// indeterminate.
#[must_use]
pub fn frame_ratio_percent(text: &str) -> Option<String> {
    let before = &text[..text.find("frames")?];
    let mut halves = before.split('/');
    let left = halves.next()?;
    let right = halves.next()?;

    let current: u64 = left.rsplit('|').next()?.trim().parse().ok()?;
    let total: u64 = right.trim().parse().ok()?;
    if total == 0 {
        return None;
    }
    Some(format!("{:.2}", current as f64 / total as f64 * 100.0))
}

/// Standalone integer in 0..=100 from the engine's init output. The
/// percentage is the final bare number on the line (step indices come
/// earlier), so the last in-range token wins. Word-boundary delimited:
/// `150` yields nothing.
#[must_use]
pub fn percent_token(text: &str) -> Option<String> {
    PERCENT_TOKEN
        .find_iter(text)
        .last()
        .map(|found| found.as_str().to_string())
}

#[must_use]
pub fn is_frame_run_complete(text: &str) -> bool {
    text.contains(FRAME_RUN_COMPLETE_MARKER)
}

#[must_use]
pub fn is_init_complete(text: &str) -> bool {
    text.contains("complete")
}
