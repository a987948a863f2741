//! Single-pass lexical scan that rewrites raw positions to non-trivia ones
//!
//! The scanner is not a real tokenizer: it only needs to classify every
//! character as trivia (whitespace, comments) or code, while staying
//! synchronized across the lexically tricky parts of TypeScript sources:
//! strings, template literals and their interpolation holes, regular
//! expressions and their character classes, and shebang lines.

use super::{NormalizedPosition, RawPosition};

/// Rewrite each raw position to the first non-trivia character at or after it
///
/// Results come back in request order. Positions that no non-trivia
/// character follows bind just past the last character of the file.
pub fn normalize_positions(source: &str, requests: &[RawPosition]) -> Vec<NormalizedPosition> {
    // The two request classes are ordered independently: offsets by value,
    // line/column pairs lexicographically. Each remembers its request slot
    // so results can be written back in request order.
    let mut offsets = Vec::new();
    let mut pairs = Vec::new();
    for (slot, request) in requests.iter().enumerate() {
        match *request {
            RawPosition::Offset(offset) => offsets.push((offset.unsigned_abs(), slot)),
            RawPosition::LineCol { line, column } => pairs.push(((line, column), slot)),
        }
    }
    offsets.sort_by_key(|&(target, _)| target);
    pairs.sort_by_key(|&(target, _)| target);

    let mut results: Vec<Option<NormalizedPosition>> = vec![None; requests.len()];
    let mut next_offset = 0;
    let mut next_pair = 0;

    let mut state = LexState::Code;
    let mut holes = HoleTracker::default();
    let (mut line, mut column) = (1_u64, 1_u64);
    let mut in_crlf = false;

    let mut chars = source.char_indices().peekable();
    while let Some((offset, c)) = chars.next() {
        if next_offset == offsets.len() && next_pair == pairs.len() {
            break;
        }
        let next = chars.peek().map(|&(_, next)| next);
        let (new_state, comment) = transition(state, c, next, offset == 0, &mut holes);

        if !comment && !c.is_whitespace() {
            let here = NormalizedPosition {
                line,
                column,
                offset: offset as u64,
            };
            // Every pending request at or before this character binds here
            while let Some(&(target, slot)) = offsets.get(next_offset) {
                if target > here.offset {
                    break;
                }
                results[slot] = Some(here);
                next_offset += 1;
            }
            while let Some(&(target, slot)) = pairs.get(next_pair) {
                if target > (line, column) {
                    break;
                }
                results[slot] = Some(here);
                next_pair += 1;
            }
        }

        state = new_state;
        match c {
            // \r\n wraps the line once, on the \r
            '\r' => {
                line += 1;
                column = 1;
                in_crlf = next == Some('\n');
            }
            '\n' if in_crlf => in_crlf = false,
            '\n' => {
                line += 1;
                column = 1;
            }
            _ => {
                column += 1;
                in_crlf = false;
            }
        }
    }

    let eof = NormalizedPosition {
        line,
        column,
        offset: source.len() as u64,
    };
    results
        .into_iter()
        .map(|result| result.unwrap_or(eof))
        .collect()
}

/// Lexical context of the character being scanned
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LexState {
    /// Plain code, the initial state
    Code,

    /// First `/` of a `//` opener
    LineCommentOpen,

    /// Inside a `//` comment
    LineComment,

    /// First `/` of a `/*` opener
    BlockCommentOpen,

    /// Inside a `/* */` comment
    BlockComment,

    /// Inside a `/* */` comment, just after a `*` that may close it
    BlockCommentStar,

    /// `#` of a `#!` line, only recognized at the very start of the file
    ShebangOpen,

    /// Inside a `#!` line
    Shebang,

    /// Inside a single-quoted string
    SingleQuote,

    /// Single-quoted string, at the `\` of an escaped quote
    SingleQuoteEscapedQuote,

    /// Single-quoted string, at the `\` of an escaped backslash
    SingleQuoteEscapedBackslash,

    /// Inside a double-quoted string
    DoubleQuote,

    /// Double-quoted string, at the `\` of an escaped quote
    DoubleQuoteEscapedQuote,

    /// Double-quoted string, at the `\` of an escaped backslash
    DoubleQuoteEscapedBackslash,

    /// Inside a template literal
    Template,

    /// Template literal, at the `\` of an escaped backtick
    TemplateEscapedBacktick,

    /// Template literal, at the `\` of an escaped backslash
    TemplateEscapedBackslash,

    /// At the `$` of a `${` interpolation opener
    TemplateHoleOpen,

    /// Inside a regular expression literal
    Regex,

    /// Regular expression, at the `\` of an escaped `/`
    RegexEscapedSlash,

    /// Regular expression, at the `\` of an escaped backslash
    RegexEscapedBackslash,

    /// Regular expression, at the `\` of an escaped `[`
    RegexEscapedOpenBracket,

    /// Inside a regular expression character class
    CharClass,

    /// Character class, at the `\` of an escaped `]`
    CharClassEscapedCloseBracket,

    /// Character class, at the `\` of an escaped backslash
    CharClassEscapedBackslash,
}

/// Brace accounting for template-literal interpolation holes
#[derive(Debug, Default)]
struct HoleTracker {
    /// Brace depth at which each enclosing hole was opened, innermost last
    depths: Vec<u64>,

    /// Braces currently open in code context
    open_braces: u64,
}
//
impl HoleTracker {
    /// Record that `${` opened a hole at the current depth
    fn open_hole(&mut self) {
        self.depths.push(self.open_braces);
    }

    fn on_open_brace(&mut self) {
        self.open_braces += 1;
    }

    /// Truth that this `}` closes the innermost hole
    ///
    /// A stray `}` with no open brace and no hole to close is absorbed.
    fn on_close_brace(&mut self) -> bool {
        match self.depths.last() {
            Some(&depth) if depth == self.open_braces => {
                self.depths.pop();
                true
            }
            _ => {
                self.open_braces = self.open_braces.saturating_sub(1);
                false
            }
        }
    }
}

/// Process one character: next state, and whether it belongs to a comment
///
/// The second component drives trivia classification together with
/// whitespace; the scanner never aborts, unterminated single-line forms
/// simply reset on the next line terminator.
fn transition(
    state: LexState,
    c: char,
    next: Option<char>,
    at_file_start: bool,
    holes: &mut HoleTracker,
) -> (LexState, bool) {
    use LexState::*;

    // Line terminators end every single-line form. Escape states need no
    // entry here: each one is entered only when the following character is
    // the escaped one, which is never a terminator.
    if c == '\n' || c == '\r' {
        let reset = match state {
            LineComment | Shebang | SingleQuote | DoubleQuote | Regex | CharClass => Code,
            BlockCommentStar => BlockComment,
            other => other,
        };
        return (reset, is_comment_state(state));
    }

    match state {
        Code => match c {
            '/' if next == Some('/') => (LineCommentOpen, true),
            '/' if next == Some('*') => (BlockCommentOpen, true),
            // Any other slash is taken to start a regular expression.
            // Misreading division costs little, while missing a regex
            // would desynchronize the scan on everything that follows.
            '/' => (Regex, false),
            '#' if at_file_start && next == Some('!') => (ShebangOpen, true),
            '\'' => (SingleQuote, false),
            '"' => (DoubleQuote, false),
            '`' => (Template, false),
            '{' => {
                holes.on_open_brace();
                (Code, false)
            }
            '}' => {
                if holes.on_close_brace() {
                    (Template, false)
                } else {
                    (Code, false)
                }
            }
            _ => (Code, false),
        },

        LineCommentOpen => (LineComment, true),
        LineComment => (LineComment, true),

        BlockCommentOpen => (BlockComment, true),
        BlockComment => match c {
            '*' => (BlockCommentStar, true),
            _ => (BlockComment, true),
        },
        BlockCommentStar => match c {
            '/' => (Code, true),
            '*' => (BlockCommentStar, true),
            _ => (BlockComment, true),
        },

        ShebangOpen => (Shebang, true),
        Shebang => (Shebang, true),

        SingleQuote => match (c, next) {
            ('\'', _) => (Code, false),
            ('\\', Some('\'')) => (SingleQuoteEscapedQuote, false),
            ('\\', Some('\\')) => (SingleQuoteEscapedBackslash, false),
            _ => (SingleQuote, false),
        },
        SingleQuoteEscapedQuote | SingleQuoteEscapedBackslash => (SingleQuote, false),

        DoubleQuote => match (c, next) {
            ('"', _) => (Code, false),
            ('\\', Some('"')) => (DoubleQuoteEscapedQuote, false),
            ('\\', Some('\\')) => (DoubleQuoteEscapedBackslash, false),
            _ => (DoubleQuote, false),
        },
        DoubleQuoteEscapedQuote | DoubleQuoteEscapedBackslash => (DoubleQuote, false),

        Template => match (c, next) {
            ('`', _) => (Code, false),
            ('\\', Some('`')) => (TemplateEscapedBacktick, false),
            ('\\', Some('\\')) => (TemplateEscapedBackslash, false),
            ('$', Some('{')) => (TemplateHoleOpen, false),
            _ => (Template, false),
        },
        TemplateEscapedBacktick | TemplateEscapedBackslash => (Template, false),
        TemplateHoleOpen => {
            holes.open_hole();
            (Code, false)
        }

        Regex => match (c, next) {
            ('/', _) => (Code, false),
            ('[', _) => (CharClass, false),
            ('\\', Some('/')) => (RegexEscapedSlash, false),
            ('\\', Some('\\')) => (RegexEscapedBackslash, false),
            ('\\', Some('[')) => (RegexEscapedOpenBracket, false),
            _ => (Regex, false),
        },
        RegexEscapedSlash | RegexEscapedBackslash | RegexEscapedOpenBracket => (Regex, false),

        CharClass => match (c, next) {
            (']', _) => (Regex, false),
            ('\\', Some(']')) => (CharClassEscapedCloseBracket, false),
            ('\\', Some('\\')) => (CharClassEscapedBackslash, false),
            _ => (CharClass, false),
        },
        CharClassEscapedCloseBracket | CharClassEscapedBackslash => (CharClass, false),
    }
}

/// States whose characters count as comment trivia
fn is_comment_state(state: LexState) -> bool {
    use LexState::*;
    matches!(
        state,
        LineCommentOpen
            | LineComment
            | BlockCommentOpen
            | BlockComment
            | BlockCommentStar
            | ShebangOpen
            | Shebang
    )
}
