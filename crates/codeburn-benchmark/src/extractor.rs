//! Pulls a single candidate solution out of free-form generator text.
//!
//! The scanner walks the text line by line in one of two states, outside a
//! fence or inside one. The first fenced block wins; text with no fence is
//! taken as bare code. Extraction never fails.

/// Opening/closing fence: three or more backticks or tildes.
#[derive(Debug, Clone, Copy)]
struct Fence {
    ch: char,
    len: usize,
}

impl Fence {
    fn open(line: &str) -> Option<(Fence, &str)> {
        let trimmed = line.trim_start();
        let ch = trimmed.chars().next()?;
        if ch != '`' && ch != '~' {
            return None;
        }
        let len = trimmed.chars().take_while(|c| *c == ch).count();
        if len < 3 {
            return None;
        }
        // Fence chars are ASCII, so `len` is also a byte offset.
        let info = trimmed[len..].trim();
        if ch == '`' && info.contains('`') {
            return None;
        }
        Some((Fence { ch, len }, info))
    }

    fn closes(&self, line: &str) -> bool {
        let trimmed = line.trim();
        trimmed.len() >= self.len && trimmed.chars().all(|c| c == self.ch)
    }

    /// Code followed by the closing fence on the same line, e.g. `return x```.
    fn trailing<'a>(&self, line: &'a str) -> Option<&'a str> {
        let marker: String = std::iter::repeat(self.ch).take(self.len).collect();
        line.trim_end().strip_suffix(marker.as_str())
    }
}

enum ScanState<'a> {
    Outside,
    Inside {
        fence: Fence,
        info: &'a str,
        body: Vec<&'a str>,
    },
}

#[derive(Debug)]
struct FencedBlock<'a> {
    info: &'a str,
    body: String,
}

fn first_block(text: &str) -> Option<FencedBlock<'_>> {
    let mut state = ScanState::Outside;

    for line in text.lines() {
        state = match state {
            ScanState::Outside => match Fence::open(line) {
                Some((fence, info)) => ScanState::Inside {
                    fence,
                    info,
                    body: Vec::new(),
                },
                None => ScanState::Outside,
            },
            ScanState::Inside {
                fence,
                info,
                mut body,
            } => {
                if fence.closes(line) {
                    return Some(FencedBlock {
                        info,
                        body: body.join("\n"),
                    });
                }
                if let Some(code) = fence.trailing(line) {
                    body.push(code);
                    return Some(FencedBlock {
                        info,
                        body: body.join("\n"),
                    });
                }
                body.push(line);
                ScanState::Inside { fence, info, body }
            }
        };
    }

    // An unterminated fence runs to the end of the text.
    match state {
        ScanState::Inside { info, body, .. } => Some(FencedBlock {
            info,
            body: body.join("\n"),
        }),
        ScanState::Outside => None,
    }
}

/// Best-guess solution source for the given generator output.
pub fn extract_solution(text: &str) -> String {
    match first_block(text) {
        Some(block) => block.body.trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Language hint of the first fenced block, if it has one.
pub fn fence_language(text: &str) -> Option<&str> {
    first_block(text)
        .and_then(|block| block.info.split_whitespace().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_block() {
        let text = "Here:\n```python\ndef f(x): return x+1\n```";
        assert_eq!(extract_solution(text), "def f(x): return x+1");
        assert_eq!(fence_language(text), Some("python"));
    }

    #[test]
    fn test_bare_code_returned_trimmed() {
        let text = "\n\n  def f(x):\n    return x\n\n";
        assert_eq!(extract_solution(text), "def f(x):\n    return x");
        assert_eq!(fence_language(text), None);
    }

    #[test]
    fn test_untagged_and_unknown_tags_accepted() {
        assert_eq!(extract_solution("```\nint main() {}\n```"), "int main() {}");
        assert_eq!(extract_solution("```text\nplain\n```"), "plain");
        assert_eq!(extract_solution("~~~cpp\nint x;\n~~~"), "int x;");
    }

    #[test]
    fn test_first_block_wins() {
        let text = "Solution:\n```python\nfirst()\n```\nTests:\n```python\nsecond()\n```\n";
        assert_eq!(extract_solution(text), "first()");
    }

    #[test]
    fn test_longer_outer_fence_keeps_inner_fences() {
        let text = "````markdown\n```python\ninner()\n```\n````\n```python\nlater()\n```";
        assert_eq!(extract_solution(text), "```python\ninner()\n```");
    }

    #[test]
    fn test_tagged_line_does_not_close() {
        let text = "```\nfoo()\n```python\nbar()\n```";
        assert_eq!(extract_solution(text), "foo()\n```python\nbar()");
    }

    #[test]
    fn test_unterminated_fence_takes_rest() {
        let text = "```js\nfunction f() {\n  return 1;\n}\n";
        assert_eq!(extract_solution(text), "function f() {\n  return 1;\n}");
    }

    #[test]
    fn test_closing_fence_on_code_line() {
        let text = "```python\ndef f():\n    return 1```\nthanks";
        assert_eq!(extract_solution(text), "def f():\n    return 1");
    }

    #[test]
    fn test_indented_fence() {
        let text = "1. Code:\n   ```go\n   func f() {}\n   ```";
        assert_eq!(extract_solution(text), "func f() {}");
    }

    #[test]
    fn test_crlf_input() {
        let text = "```python\r\nx = 1\r\n```\r\n";
        assert_eq!(extract_solution(text), "x = 1");
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let text = "Sure!\n```rust\nfn f() -> u32 { 1 }\n```\nDone.";
        let once = extract_solution(text);
        assert_eq!(extract_solution(text), once);
        assert_eq!(extract_solution(&once), once);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(extract_solution(""), "");
        assert_eq!(extract_solution("```\n```"), "");
    }
}
