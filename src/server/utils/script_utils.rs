//! Helpers for pulling the packed player script out of a stream host page and getting it ready
//! for the sandbox. All of these are pure so the selection policy can be tested on its own.

use once_cell::sync::Lazy;
use regex::Regex;

static SCRIPT_BLOCK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script[^>]*>(.*?)</script>").expect("script regex should compile")
});

static DATA_SRC_MANIFEST_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"data-src="([^"]+\.m3u8[^"]*)""#).expect("data-src regex should compile")
});

static DOCUMENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bdocument\b").expect("document regex should compile"));

// the packer keeps its payload in a top level `q`
static PAYLOAD_DECLARATION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:var|let|const)\s+q\s*=").expect("payload regex should compile")
});

/// marker for the deferred execution the packer wraps everything in
pub const EVAL_MARKER: &str = "eval(";

/// any of these in an eval block means it is almost certainly the player setup
pub const RELEVANCE_SIGNALS: [&str; 3] = ["source", ".m3u8", "Plyr"];

pub const DOCUMENT_STUB: &str = "DOC_STUB";

pub const PAYLOAD_MISSING_MESSAGE: &str = "Variable q not found";

/// bodies of every inline `<script>` in page order
pub fn extract_script_blocks(html: &str) -> Vec<&str> {
    SCRIPT_BLOCK_REGEX
        .captures_iter(html)
        .filter_map(|captures| captures.get(1).map(|body| body.as_str()))
        .collect()
}

/// which rule picked the script, rules are tried top to bottom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptCandidate {
    /// first eval block with a relevance signal
    Relevant(usize),
    /// no relevant block, longest eval block instead. Ties go to the earliest block
    LongestEval(usize),
}

impl ScriptCandidate {
    pub fn index(&self) -> usize {
        match self {
            Self::Relevant(index) | Self::LongestEval(index) => *index,
        }
    }
}

pub fn select_script_candidate(scripts: &[&str]) -> Option<ScriptCandidate> {
    let eval_blocks = || {
        scripts
            .iter()
            .enumerate()
            .filter(|(_, script)| script.contains(EVAL_MARKER))
    };

    if let Some((index, _)) = eval_blocks().find(|(_, script)| {
        RELEVANCE_SIGNALS
            .iter()
            .any(|signal| script.contains(signal))
    }) {
        return Some(ScriptCandidate::Relevant(index));
    }

    // max_by_key keeps the last max, fold so the first one wins
    eval_blocks()
        .fold(None, |best: Option<(usize, usize)>, (index, script)| match best {
            Some((_, len)) if len >= script.len() => best,
            _ => Some((index, script.len())),
        })
        .map(|(index, _)| ScriptCandidate::LongestEval(index))
}

/// last resort when no script qualifies, a player element carrying the manifest directly
pub fn find_data_src_manifest(html: &str) -> Option<String> {
    DATA_SRC_MANIFEST_REGEX
        .captures(html)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// stub out `document`, hoist the payload onto `window` and print it when the script is done
pub fn prepare_script(script: &str) -> String {
    let stubbed = DOCUMENT_REGEX.replace_all(script, DOCUMENT_STUB);
    let hoisted = PAYLOAD_DECLARATION_REGEX.replacen(&stubbed, 1, "window.q =");

    format!(
        "{hoisted}\ntry {{ console.log(typeof window.q === 'undefined' ? \"{missing}\" : window.q); }} \
         catch (e) {{ console.log(\"{missing}\"); }}\n",
        missing = PAYLOAD_MISSING_MESSAGE
    )
}
