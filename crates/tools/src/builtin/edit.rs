//! Unified-diff application for the `file` tool's `edit` action.
//!
//! Hunks are located by their context and deletion lines, not by the `@@`
//! line numbers (those are only an ambiguity-breaking hint). Location
//! strategies, in order: exact match, indent-normalised match, fuzzy match
//! at >= 85 % similarity. Models emit slightly-off context all the time;
//! a byte-exact requirement would bounce most of their edits.

use similar::{ChangeTag, TextDiff};

/// Minimum similarity ratio (0..1) for a fuzzy window to be accepted.
const FUZZY_THRESHOLD: f64 = 0.85;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hunk model + parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
enum HunkLine {
    /// Unchanged line: must exist in the file, kept verbatim.
    Context(String),
    /// Line removed from the file.
    Del(String),
    /// Line inserted into the file.
    Add(String),
}

#[derive(Debug, Clone)]
struct Hunk {
    /// 1-based old-file start from `@@ -N,..`; a hint only.
    old_start_hint: Option<usize>,
    lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines that must already be present (Context + Del), in order.
    fn anchor_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Del(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }
}

/// Strip a wrapping ```` ```diff ```` markdown fence if present.
fn strip_fence(diff: &str) -> &str {
    let t = diff.trim_start();
    if t.starts_with("```") {
        if let Some(nl) = t.find('\n') {
            let body = &t[nl + 1..];
            if let Some(close) = body.rfind("\n```") {
                return &body[..close + 1];
            }
            return body;
        }
    }
    diff
}

/// Parse unified-diff hunks. Accepts standard `@@ -N,M +N,M @@` headers
/// and bare `@@ @@` headers without line numbers.
fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, String> {
    let diff = strip_fence(diff);
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in diff.lines() {
        if line.starts_with("--- ") || line.starts_with("+++ ") || line.starts_with("\\ ") {
            continue;
        }
        if line.starts_with("@@") {
            if let Some(h) = current.take() {
                if !h.lines.is_empty() {
                    hunks.push(h);
                }
            }
            current = Some(Hunk {
                old_start_hint: parse_old_start(line),
                lines: Vec::new(),
            });
            continue;
        }
        if let Some(h) = current.as_mut() {
            if let Some(rest) = line.strip_prefix(' ') {
                h.lines.push(HunkLine::Context(rest.to_owned()));
            } else if let Some(rest) = line.strip_prefix('-') {
                h.lines.push(HunkLine::Del(rest.to_owned()));
            } else if let Some(rest) = line.strip_prefix('+') {
                h.lines.push(HunkLine::Add(rest.to_owned()));
            } else if line.is_empty() {
                // Blank diff line without a prefix = empty context line.
                h.lines.push(HunkLine::Context(String::new()));
            }
        }
    }
    if let Some(h) = current {
        if !h.lines.is_empty() {
            hunks.push(h);
        }
    }

    if hunks.is_empty() {
        return Err("no hunks found in diff; use @@ headers".into());
    }
    Ok(hunks)
}

/// 1-based old-file start from `@@ -N[,M] +N[,M] @@`; `None` for `@@ @@`.
fn parse_old_start(header: &str) -> Option<usize> {
    let inner = header
        .trim_start_matches('@')
        .trim()
        .split("@@")
        .next()
        .unwrap_or("")
        .trim();
    for part in inner.split_whitespace() {
        if let Some(rest) = part.strip_prefix('-') {
            if let Ok(n) = rest.split(',').next().unwrap_or(rest).parse::<usize>() {
                return Some(n);
            }
        }
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Matching
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Similarity in [0,1] via character-level diff (2 x matching / total).
fn similarity_ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let diff = TextDiff::from_chars(a, b);
    let matching: usize = diff
        .iter_all_changes()
        .filter(|c| c.tag() == ChangeTag::Equal)
        .map(|c| c.value().len())
        .sum();
    (matching * 2) as f64 / total as f64
}

/// Minimum leading-space count across non-empty lines.
fn common_indent(lines: &[&str]) -> usize {
    lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0)
}

fn strip_indent(lines: &[&str], indent: usize) -> Vec<String> {
    lines
        .iter()
        .map(|l| {
            if l.len() >= indent {
                l[indent..].to_owned()
            } else {
                l.trim_start().to_owned()
            }
        })
        .collect()
}

/// Locate a hunk's anchor lines in the file.
///
/// Returns `(pos, indent_delta)`: the 0-based index of the first anchor
/// line and the spaces to add (positive) or remove (negative) from Add
/// lines when the match needed indent normalisation or fuzzy logic.
fn locate(
    file_lines: &[String],
    anchor: &[&str],
    hint: Option<usize>,
) -> Result<(usize, i64), String> {
    // Pure insertion: nothing to locate, drop at the hint or the end.
    if anchor.is_empty() {
        let pos = hint
            .map(|h| h.saturating_sub(1).min(file_lines.len()))
            .unwrap_or(file_lines.len());
        return Ok((pos, 0));
    }

    let n = anchor.len();
    let file_refs: Vec<&str> = file_lines.iter().map(String::as_str).collect();
    if file_refs.len() < n {
        return Err(format!(
            "file has {} lines but the hunk needs {} context/deletion lines",
            file_refs.len(),
            n
        ));
    }

    // ── Strategy 1: exact ──────────────────────────────────────────
    let exact: Vec<usize> = (0..=(file_refs.len() - n))
        .filter(|&i| file_refs[i..i + n] == *anchor)
        .collect();
    if !exact.is_empty() {
        return Ok((pick_closest(&exact, hint), 0));
    }

    // ── Strategy 2: indent-normalised ──────────────────────────────
    let hunk_indent = common_indent(anchor) as i64;
    let norm_anchor = strip_indent(anchor, hunk_indent as usize);

    let indent_hits: Vec<(usize, i64)> = (0..=(file_refs.len() - n))
        .filter_map(|i| {
            let win = &file_refs[i..i + n];
            let file_ind = common_indent(win) as i64;
            if strip_indent(win, file_ind as usize) == norm_anchor {
                Some((i, file_ind - hunk_indent))
            } else {
                None
            }
        })
        .collect();
    if !indent_hits.is_empty() {
        let positions: Vec<usize> = indent_hits.iter().map(|(p, _)| *p).collect();
        let best = pick_closest(&positions, hint);
        let delta = indent_hits
            .iter()
            .find(|(p, _)| *p == best)
            .map(|(_, d)| *d)
            .unwrap_or(0);
        return Ok((best, delta));
    }

    // ── Strategy 3: fuzzy ──────────────────────────────────────────
    let anchor_joined = anchor.join("\n");
    let fuzzy_hits: Vec<(f64, usize, i64)> = (0..=(file_refs.len() - n))
        .filter_map(|i| {
            let win = &file_refs[i..i + n];
            let ratio = similarity_ratio(&anchor_joined, &win.join("\n"));
            if ratio >= FUZZY_THRESHOLD {
                Some((ratio, i, common_indent(win) as i64 - hunk_indent))
            } else {
                None
            }
        })
        .collect();
    if !fuzzy_hits.is_empty() {
        let best_ratio = fuzzy_hits.iter().map(|(r, _, _)| *r).fold(0.0_f64, f64::max);
        let best_hits: Vec<_> = fuzzy_hits
            .iter()
            .filter(|(r, _, _)| (r - best_ratio).abs() < 1e-9)
            .collect();
        let positions: Vec<usize> = best_hits.iter().map(|(_, p, _)| *p).collect();
        let best = pick_closest(&positions, hint);
        let delta = best_hits
            .iter()
            .find(|(_, p, _)| *p == best)
            .map(|(_, _, d)| *d)
            .unwrap_or(0);
        return Ok((best, delta));
    }

    // All strategies failed: name the expected context and the nearest
    // block so the model can fix its hunk.
    let mut msg = String::from("context not found; expected:\n");
    for l in anchor {
        msg.push_str(&format!("  |{l}|\n"));
    }
    if let Some((ratio, line_no, block)) = nearest_block(&file_refs, anchor) {
        msg.push_str(&format!(
            "nearest match at line {line_no} ({:.0}%):\n",
            ratio * 100.0
        ));
        for l in &block {
            msg.push_str(&format!("  |{l}|\n"));
        }
    }
    msg.push_str("re-read the file, fix the context lines, and retry");
    Err(msg)
}

/// Among equal-quality matches, pick the one closest to the header hint.
fn pick_closest(matches: &[usize], hint: Option<usize>) -> usize {
    if matches.len() == 1 {
        return matches[0];
    }
    if let Some(h) = hint {
        let target = h.saturating_sub(1);
        return *matches
            .iter()
            .min_by_key(|&&p| (p as isize - target as isize).unsigned_abs())
            .unwrap_or(&matches[0]);
    }
    matches[0]
}

/// The single most similar window (> 30 %), for failure messages.
fn nearest_block(file_lines: &[&str], anchor: &[&str]) -> Option<(f64, usize, Vec<String>)> {
    let n = anchor.len().max(1);
    if file_lines.len() < n {
        return None;
    }
    let anchor_joined = anchor.join("\n");
    file_lines
        .windows(n)
        .enumerate()
        .map(|(i, win)| {
            let ratio = similarity_ratio(&anchor_joined, &win.join("\n"));
            (ratio, i + 1, win.iter().map(|s| s.to_string()).collect())
        })
        .filter(|(r, _, _)| *r > 0.3)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Application
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shift leading spaces on `line` by `delta`.
fn adjust_indent(line: &str, delta: i64) -> String {
    if delta == 0 || line.trim().is_empty() {
        return line.to_owned();
    }
    if delta > 0 {
        format!("{}{line}", " ".repeat(delta as usize))
    } else {
        let remove = (-delta) as usize;
        if line.len() >= remove && line[..remove].bytes().all(|b| b == b' ') {
            line[remove..].to_owned()
        } else {
            line.trim_start_matches(' ').to_owned()
        }
    }
}

/// Apply one hunk at `pos`, adjusting Add lines by `indent_delta`.
fn splice(file_lines: &[String], hunk: &Hunk, pos: usize, indent_delta: i64) -> Vec<String> {
    let mut result = file_lines[..pos].to_vec();
    let mut file_idx = pos;

    for line in &hunk.lines {
        match line {
            HunkLine::Context(_) => {
                // Keep the real file line; it owns its indentation.
                result.push(file_lines[file_idx].clone());
                file_idx += 1;
            }
            HunkLine::Del(_) => {
                file_idx += 1;
            }
            HunkLine::Add(s) => {
                result.push(adjust_indent(s, indent_delta));
            }
        }
    }

    result.extend_from_slice(&file_lines[file_idx..]);
    result
}

/// Apply a unified diff to `content`. Returns the new content and the
/// number of hunks applied.
pub fn apply_diff(content: &str, diff: &str) -> Result<(String, usize), String> {
    let hunks = parse_hunks(diff)?;
    let had_trailing_newline = content.ends_with('\n') || content.is_empty();
    let mut lines: Vec<String> = content.lines().map(str::to_owned).collect();

    for (index, hunk) in hunks.iter().enumerate() {
        let anchor = hunk.anchor_lines();
        let (pos, delta) = locate(&lines, &anchor, hunk.old_start_hint)
            .map_err(|e| format!("hunk {}: {e}", index + 1))?;
        lines = splice(&lines, hunk, pos, delta);
    }

    let mut out = lines.join("\n");
    if had_trailing_newline && !out.is_empty() {
        out.push('\n');
    }
    Ok((out, hunks.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "fn main() {\n    let x = 1;\n    println!(\"{x}\");\n}\n";

    #[test]
    fn exact_hunk_applies() {
        let diff = "@@ -2,1 +2,1 @@\n-    let x = 1;\n+    let x = 2;\n";
        let (out, applied) = apply_diff(FILE, diff).unwrap();
        assert_eq!(applied, 1);
        assert!(out.contains("let x = 2;"));
        assert!(!out.contains("let x = 1;"));
    }

    #[test]
    fn indent_drift_is_normalised() {
        // The hunk's context has no indentation; the file is indented.
        let diff = "@@ @@\n-let x = 1;\n+let x = 2;\n";
        let (out, _) = apply_diff(FILE, diff).unwrap();
        // The replacement picked up the file's real indentation.
        assert!(out.contains("    let x = 2;"));
    }

    #[test]
    fn fuzzy_match_tolerates_small_drift() {
        // Context line differs slightly from the file (extra space removed).
        let diff = "@@ -3,1 +3,1 @@\n-    println!(\"{x}\") ;\n+    println!(\"x = {x}\");\n";
        let (out, _) = apply_diff(FILE, diff).unwrap();
        assert!(out.contains("x = {x}"));
    }

    #[test]
    fn hint_breaks_ambiguity() {
        let file = "a\nmarker\nb\nmarker\nc\n";
        let diff = "@@ -4,1 +4,1 @@\n-marker\n+edited\n";
        let (out, _) = apply_diff(file, diff).unwrap();
        assert_eq!(out, "a\nmarker\nb\nedited\nc\n");
    }

    #[test]
    fn fenced_diff_accepted() {
        let diff = "```diff\n@@ -2,1 +2,1 @@\n-    let x = 1;\n+    let x = 9;\n```";
        let (out, _) = apply_diff(FILE, diff).unwrap();
        assert!(out.contains("let x = 9;"));
    }

    #[test]
    fn pure_insertion_without_context() {
        let diff = "@@ -2 @@\n+// inserted\n";
        let (out, _) = apply_diff(FILE, diff).unwrap();
        assert_eq!(out.lines().nth(1), Some("// inserted"));
    }

    #[test]
    fn multiple_hunks_apply_in_order() {
        let diff = "@@ -1,1 +1,1 @@\n-fn main() {\n+fn main() { // entry\n@@ -3,1 +3,1 @@\n-    println!(\"{x}\");\n+    println!(\"{}\", x);\n";
        let (out, applied) = apply_diff(FILE, diff).unwrap();
        assert_eq!(applied, 2);
        assert!(out.contains("// entry"));
        assert!(out.contains("println!(\"{}\", x);"));
    }

    #[test]
    fn missing_context_reports_nearest() {
        let diff = "@@ @@\n-let y = 99;\n+let y = 100;\n";
        let err = apply_diff(FILE, diff).unwrap_err();
        assert!(err.contains("context not found"));
        assert!(err.contains("nearest match"));
    }

    #[test]
    fn garbage_diff_rejected() {
        assert!(apply_diff(FILE, "not a diff at all").is_err());
    }
}
