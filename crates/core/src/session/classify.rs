//! Matching of signing tool output.
//!
//! Every string the tool is known to print lives here.

const SUCCESS_MARKERS: &[&str] = &["Installation Succeeded", "Installation complete"];

const ACCOUNT_INVALID_MARKERS: &[&str] = &["Can't log-in", "DeveloperSession creation failed"];

const TRANSPORT_MARKERS: &[&str] = &[
    "LOCKDOWN_E_MUX_ERROR",
    "AFC_E_MUX_ERROR",
    "lookup_image returned -256",
];

/// Prompt the tool prints before waiting for a keypress.
pub const CONTINUE_PROMPT: &str = "Press any key to continue";

/// What a finished attempt's output says about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Succeeded,
    AccountInvalid,
    Transport,
    Failed,
}

/// Classify combined tool output. Checked in order: success, account, transport.
pub fn classify(output: &str) -> Classification {
    if contains_any(output, SUCCESS_MARKERS) {
        Classification::Succeeded
    } else if contains_any(output, ACCOUNT_INVALID_MARKERS) {
        Classification::AccountInvalid
    } else if contains_any(output, TRANSPORT_MARKERS) {
        Classification::Transport
    } else {
        Classification::Failed
    }
}

fn contains_any(output: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| output.contains(m))
}

/// Lines starting with "error", case-insensitively.
pub fn error_log(output: &str) -> String {
    output
        .lines()
        .filter(|line| {
            line.get(..5)
                .map(|prefix| prefix.eq_ignore_ascii_case("error"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The transport marker found in `output`, if any.
pub fn transport_marker(output: &str) -> Option<&'static str> {
    TRANSPORT_MARKERS.iter().copied().find(|m| output.contains(m))
}

/// Counts prompts in `buffer[from..]`.
///
/// Returns the number found and the offset to resume scanning from, so a
/// prompt split across chunks is still seen exactly once.
pub fn scan_prompts(buffer: &[u8], from: usize) -> (usize, usize) {
    let needle = CONTINUE_PROMPT.as_bytes();
    let mut count = 0;
    let mut pos = from.min(buffer.len());

    while let Some(idx) = find(&buffer[pos..], needle) {
        count += 1;
        pos += idx + needle.len();
    }

    let tail = buffer.len().saturating_sub(needle.len() - 1);
    (count, pos.max(tail))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
