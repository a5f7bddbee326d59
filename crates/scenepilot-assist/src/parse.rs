use regex::Regex;
use std::sync::LazyLock;

static FENCE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[^\n`]*\n?(.*?)```").ok()
});

const CODE_TAGS: &[&str] = &["", "python", "py", "python3", "nuke"];

/// Whether a line or block touches the host API.
pub(crate) fn references_host(code: &str) -> bool {
    code.contains("nuke.") || code.contains("import nuke")
}

/// Extract candidate code blocks from an assistant response.
///
/// Fenced blocks tagged as Python (or untagged) come first. When none reference
/// the host API, contiguous runs of host-API lines are collected instead.
pub(crate) fn extract_code_blocks(text: &str) -> Vec<String> {
    let fenced: Vec<String> = FENCE
        .as_ref()
        .map(|re| {
            re.captures_iter(text)
                .filter(|caps| {
                    let tag = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                    CODE_TAGS.contains(&tag.to_ascii_lowercase().as_str())
                })
                .filter_map(|caps| caps.get(2).map(|m| dedent(m.as_str())))
                .filter(|code| !code.is_empty() && references_host(code))
                .collect()
        })
        .unwrap_or_default();
    if !fenced.is_empty() {
        return fenced;
    }
    inline_runs(text)
}

/// Number of fence markers on a line. An even count opens and closes on
/// the same line and leaves the fence state unchanged.
fn fence_count(line: &str) -> usize {
    line.matches("```").count()
}

fn inline_runs(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut run: Vec<&str> = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        let line = line.trim();
        let fences = fence_count(line);
        if fences % 2 == 1 {
            in_fence = !in_fence;
        }
        if !in_fence && fences == 0 && references_host(line) {
            run.push(line);
        } else if !run.is_empty() {
            blocks.push(run.join("\n"));
            run.clear();
        }
    }
    if !run.is_empty() {
        blocks.push(run.join("\n"));
    }
    blocks
}

/// Strip the common leading whitespace and surrounding blank lines.
pub(crate) fn dedent(code: &str) -> String {
    let indent = code
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let lines: Vec<&str> = code
        .lines()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start()))
        .map(str::trim_end)
        .collect();
    lines.join("\n").trim_matches('\n').to_string()
}

/// Up to three prose lines from outside code fences, or a block count.
pub(crate) fn describe_response(text: &str, block_count: usize) -> String {
    let mut in_fence = false;
    let mut picked = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let fences = fence_count(line);
        if fences > 0 {
            if fences % 2 == 1 {
                in_fence = !in_fence;
            }
            continue;
        }
        if in_fence || line.starts_with('#') || references_host(line) {
            continue;
        }
        if line.chars().count() > 10 {
            picked.push(line);
            if picked.len() >= 3 {
                break;
            }
        }
    }
    if picked.is_empty() {
        format!("Execute {} code block(s)", block_count)
    } else {
        truncate(&picked.join(" "), 300)
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", head)
}
