//! Parsing of repair oracle replies into a single script payload.
//!
//! Replies are free text. Reasoning models prefix them with a
//! `<think>...</think>` block, and the code usually sits in a fenced block
//! tagged with the script's language. [`parse_response`] classifies a reply
//! into a [`ParsedResponse`]; only [`ParsedResponse::into_patch`] decides what
//! becomes the new script content.

/// Opens a reasoning block in the reply.
pub const REASONING_OPEN: &str = "<think>";
/// Closes a reasoning block; everything before it is commentary.
pub const REASONING_CLOSE: &str = "</think>";

const FENCE: &str = "```";

/// Classified oracle reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    /// A reasoning block was stripped; `reply` classifies what followed it.
    ReasoningPrefixed {
        reasoning: String,
        reply: Box<ParsedResponse>,
    },
    /// Fenced block whose info string matched one of the runtime's tags.
    FencedTyped(String),
    /// First fenced block when none carried a matching tag.
    FencedGeneric(String),
    /// No fences at all; the whole reply is taken as code.
    Bare(String),
    /// Nothing usable. Carries a short description for the report.
    Malformed(String),
}

impl ParsedResponse {
    /// The payload to persist, if any.
    pub fn patch(&self) -> Option<&str> {
        match self {
            ParsedResponse::ReasoningPrefixed { reply, .. } => reply.patch(),
            ParsedResponse::FencedTyped(code)
            | ParsedResponse::FencedGeneric(code)
            | ParsedResponse::Bare(code) => Some(code),
            ParsedResponse::Malformed(_) => None,
        }
    }

    pub fn into_patch(self) -> Option<String> {
        match self {
            ParsedResponse::ReasoningPrefixed { reply, .. } => reply.into_patch(),
            ParsedResponse::FencedTyped(code)
            | ParsedResponse::FencedGeneric(code)
            | ParsedResponse::Bare(code) => Some(code),
            ParsedResponse::Malformed(_) => None,
        }
    }

    /// Why no patch could be recovered, when that is the case.
    pub fn malformed_reason(&self) -> Option<&str> {
        match self {
            ParsedResponse::ReasoningPrefixed { reply, .. } => reply.malformed_reason(),
            ParsedResponse::Malformed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Classify an oracle reply.
///
/// `fence_tags` are the info strings that mark code in the script's own
/// language (e.g. `python`, `py`), compared case-insensitively.
pub fn parse_response(text: &str, fence_tags: &[String]) -> ParsedResponse {
    if let Some(close) = text.find(REASONING_CLOSE) {
        let head = &text[..close];
        let reasoning = match head.find(REASONING_OPEN) {
            Some(open) => &head[open + REASONING_OPEN.len()..],
            None => head,
        };
        let reply = parse_reply(&text[close + REASONING_CLOSE.len()..], fence_tags);
        return ParsedResponse::ReasoningPrefixed {
            reasoning: reasoning.trim().to_string(),
            reply: Box::new(reply),
        };
    }
    parse_reply(text, fence_tags)
}

fn parse_reply(text: &str, fence_tags: &[String]) -> ParsedResponse {
    let scan = scan_fences(text);

    if let Some(block) = scan
        .blocks
        .iter()
        .find(|block| matches_tag(block.info, fence_tags))
    {
        return code_or_malformed(block.code, ParsedResponse::FencedTyped);
    }
    if let Some(block) = scan.blocks.first() {
        return code_or_malformed(block.code, ParsedResponse::FencedGeneric);
    }
    if scan.unterminated {
        return ParsedResponse::Malformed("fenced block opened but never closed".to_string());
    }
    code_or_malformed(text, ParsedResponse::Bare)
}

fn code_or_malformed(code: &str, wrap: fn(String) -> ParsedResponse) -> ParsedResponse {
    let code = code.trim();
    if code.is_empty() {
        return ParsedResponse::Malformed("response contained no code".to_string());
    }
    let mut owned = code.to_string();
    owned.push('\n');
    wrap(owned)
}

fn matches_tag(info: &str, fence_tags: &[String]) -> bool {
    let Some(tag) = info.split_whitespace().next() else {
        return false;
    };
    fence_tags
        .iter()
        .any(|wanted| wanted.eq_ignore_ascii_case(tag))
}

struct FencedBlock<'a> {
    info: &'a str,
    code: &'a str,
}

struct FenceScan<'a> {
    /// Complete blocks in order of appearance.
    blocks: Vec<FencedBlock<'a>>,
    /// A fence was opened after the last complete block and never closed.
    unterminated: bool,
}

/// Pair fences in order: an opening fence and its info string run to the end
/// of the line, the next fence closes. A fence closed on its own opening line
/// (```` ```code``` ````) is an untagged block.
fn scan_fences(text: &str) -> FenceScan<'_> {
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(rel) = text[cursor..].find(FENCE) {
        let open = cursor + rel + FENCE.len();
        let line_end = text[open..]
            .find('\n')
            .map(|nl| open + nl)
            .unwrap_or(text.len());
        let line = &text[open..line_end];

        if let Some(inline_close) = line.find(FENCE) {
            blocks.push(FencedBlock {
                info: "",
                code: &line[..inline_close],
            });
            cursor = open + inline_close + FENCE.len();
            continue;
        }
        if line_end == text.len() {
            return FenceScan {
                blocks,
                unterminated: true,
            };
        }

        let body_start = line_end + 1;
        match text[body_start..].find(FENCE) {
            Some(close) => {
                blocks.push(FencedBlock {
                    info: line.trim(),
                    code: &text[body_start..body_start + close],
                });
                cursor = body_start + close + FENCE.len();
            }
            None => {
                return FenceScan {
                    blocks,
                    unterminated: true,
                };
            }
        }
    }

    FenceScan {
        blocks,
        unterminated: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python() -> Vec<String> {
        vec!["python".to_string(), "py".to_string()]
    }

    #[test]
    fn typed_block_after_reasoning_is_extracted() {
        let reply = "<think>\nThe call has a typo.\n</think>\n\nHere you go:\n```python\nprint(calculate_factorial(5))\n```\n";
        let parsed = parse_response(reply, &python());

        let ParsedResponse::ReasoningPrefixed { reasoning, reply } = &parsed else {
            panic!("expected reasoning prefix, got {parsed:?}");
        };
        assert_eq!(reasoning, "The call has a typo.");
        assert_eq!(
            **reply,
            ParsedResponse::FencedTyped("print(calculate_factorial(5))\n".to_string())
        );
        assert_eq!(parsed.patch(), Some("print(calculate_factorial(5))\n"));
    }

    #[test]
    fn fences_inside_reasoning_are_ignored() {
        let reply = "<think>maybe ```python\nwrong()\n``` no</think>```python\nright()\n```";
        let parsed = parse_response(reply, &python());
        assert_eq!(parsed.into_patch().as_deref(), Some("right()\n"));
    }

    #[test]
    fn closing_marker_without_opener_still_strips_reasoning() {
        let reply = "thinking out loud\n</think>\nprint('ok')";
        let parsed = parse_response(reply, &python());
        assert_eq!(parsed.patch(), Some("print('ok')\n"));
    }

    #[test]
    fn unclosed_reasoning_falls_through_to_fences() {
        let parsed = parse_response("<think>\nok, done.\n```python\nprint(1)\n```\n", &python());
        assert_eq!(parsed, ParsedResponse::FencedTyped("print(1)\n".to_string()));
    }

    #[test]
    fn typed_block_wins_over_earlier_generic_block() {
        let reply = "Run it with:\n```bash\npython3 main.py\n```\nFixed code:\n```Python\nmain()\n```";
        let parsed = parse_response(reply, &python());
        assert_eq!(parsed, ParsedResponse::FencedTyped("main()\n".to_string()));
    }

    #[test]
    fn generic_block_is_used_without_typed_block() {
        let reply = "```\nimport sys\nsys.exit(0)\n```\ntrailing words";
        let parsed = parse_response(reply, &python());
        assert_eq!(
            parsed,
            ParsedResponse::FencedGeneric("import sys\nsys.exit(0)\n".to_string())
        );
    }

    #[test]
    fn first_generic_block_is_used() {
        let reply = "```text\nfirst\n```\n```\nsecond\n```";
        let parsed = parse_response(reply, &python());
        assert_eq!(parsed, ParsedResponse::FencedGeneric("first\n".to_string()));
    }

    #[test]
    fn bare_reply_is_trimmed() {
        let parsed = parse_response("\n\n  x = 1\nprint(x)  \n\n", &python());
        assert_eq!(parsed, ParsedResponse::Bare("x = 1\nprint(x)\n".to_string()));
    }

    #[test]
    fn unterminated_typed_fence_is_malformed() {
        let parsed = parse_response("```python\ndef main():\n    print(", &python());
        assert_eq!(parsed.patch(), None);
        assert_eq!(
            parsed.malformed_reason(),
            Some("fenced block opened but never closed")
        );
    }

    #[test]
    fn unterminated_generic_fence_is_malformed() {
        let parsed = parse_response("Here:\n```\nprint(1)\n", &python());
        assert!(matches!(parsed, ParsedResponse::Malformed(_)));
    }

    #[test]
    fn fence_on_last_line_is_malformed() {
        let parsed = parse_response("print(1)\n```python", &python());
        assert!(matches!(parsed, ParsedResponse::Malformed(_)));
    }

    #[test]
    fn complete_typed_block_survives_trailing_stray_fence() {
        let reply = "```python\nok()\n```\nand then ```";
        let parsed = parse_response(reply, &python());
        assert_eq!(parsed.patch(), Some("ok()\n"));
    }

    #[test]
    fn complete_generic_block_survives_trailing_stray_fence() {
        let reply = "```\nprint(1)\n```\nrun it with ```";
        let parsed = parse_response(reply, &python());
        assert_eq!(parsed, ParsedResponse::FencedGeneric("print(1)\n".to_string()));
    }

    #[test]
    fn inline_fence_is_generic() {
        let parsed = parse_response("use ```print(2)``` instead", &python());
        assert_eq!(parsed, ParsedResponse::FencedGeneric("print(2)\n".to_string()));
    }

    #[test]
    fn empty_replies_are_malformed() {
        assert!(matches!(
            parse_response("   \n", &python()),
            ParsedResponse::Malformed(_)
        ));
        assert!(matches!(
            parse_response("```python\n\n```", &python()),
            ParsedResponse::Malformed(_)
        ));
        assert_eq!(parse_response("<think>hm</think>", &python()).patch(), None);
    }
}
