//! Extraction of file blocks from builder output.
//!
//! The builder emits files as fenced code blocks whose first in-fence line
//! is `// filepath: <path>`. Everything outside such blocks, and any fence
//! without the marker, is ignored.

/// One extracted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    pub path: String,
    pub content: String,
}

const FENCE: &str = "```";
const FILEPATH_MARKER: &str = "// filepath:";

/// Scan builder output for `// filepath:`-marked fenced code blocks.
pub fn extract_file_blocks(text: &str) -> Vec<FileBlock> {
    let mut blocks = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        if !line.trim_start().starts_with(FENCE) {
            continue;
        }

        // First line inside the fence must carry the marker; otherwise the
        // whole fence is skipped.
        let path = match lines.peek() {
            Some(first) if first.trim().starts_with(FILEPATH_MARKER) => {
                let path = first.trim()[FILEPATH_MARKER.len()..].trim().to_string();
                lines.next();
                path
            }
            _ => {
                // Consume up to the closing fence.
                for skipped in lines.by_ref() {
                    if skipped.trim_start().starts_with(FENCE) {
                        break;
                    }
                }
                continue;
            }
        };

        // An unterminated fence still yields its body; the path marker was
        // explicit, so the content is intentional.
        let mut body = Vec::new();
        for content_line in lines.by_ref() {
            if content_line.trim_start().starts_with(FENCE) {
                break;
            }
            body.push(content_line);
        }

        if path.is_empty() {
            continue;
        }
        let mut content = body.join("\n");
        content.push('\n');
        blocks.push(FileBlock { path, content });
    }

    blocks
}
