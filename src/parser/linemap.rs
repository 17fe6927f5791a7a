//! Line-marker handling for C-preprocessed sources.
//!
//! A preprocessor emits markers such as `# 12 "lib.bbj" 1 3` saying that the
//! next line is line 12 of `lib.bbj`. Markers are removed from the text handed
//! to the parser and remembered so diagnostics can point at the original file.

use std::collections::BTreeMap;

use regex::Regex;

lazy_static::lazy_static! {
    static ref LINE_MARKER: Regex =
        Regex::new(r#"^#(?:line)?\s*(\d+)\s+"(.*?)"((?:\s+[1-4])*)"#).unwrap();
}

/// Origin of a processed line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    /// Original file name as written in the marker
    pub file: String,
    /// Line number inside that file
    pub line: usize,
    /// Marker flags (1 = enter include, 2 = return, 3 = system header, 4 = extern "C")
    pub flags: Vec<u8>,
}

/// Processed text with its markers stripped
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Text for the parser
    pub text: String,
    /// Mapping back to original positions
    pub line_map: LineMap,
}

/// Sorted map from processed line numbers to the marker in effect there
#[derive(Debug, Clone, Default)]
pub struct LineMap {
    markers: BTreeMap<usize, LineInfo>,
}

impl LineMap {
    /// Strips line markers from `source` and records them.
    ///
    /// Line 1 of the output maps to line 1 of `input_file` until the first
    /// marker says otherwise.
    pub fn preprocess(source: &str, input_file: &str) -> Preprocessed {
        let mut markers = BTreeMap::new();
        markers.insert(
            1,
            LineInfo {
                file: input_file.to_string(),
                line: 1,
                flags: Vec::new(),
            },
        );

        let mut text = String::with_capacity(source.len());
        let mut next_line = 1;
        for line in source.lines() {
            if let Some(caps) = LINE_MARKER.captures(line) {
                let Ok(number) = caps[1].parse::<usize>() else {
                    tracing::warn!(marker = line, "ignoring line marker with oversized line number");
                    continue;
                };
                let flags = caps[3]
                    .split_whitespace()
                    .filter_map(|flag| flag.parse::<u8>().ok())
                    .collect();
                markers.insert(
                    next_line,
                    LineInfo {
                        file: caps[2].to_string(),
                        line: number,
                        flags,
                    },
                );
                continue;
            }
            text.push_str(line);
            text.push('\n');
            next_line += 1;
        }

        Preprocessed {
            text,
            line_map: LineMap { markers },
        }
    }

    /// Original file and line for processed line `line`.
    ///
    /// Uses the nearest marker at or before `line` and offsets from it.
    pub fn lookup(&self, line: usize) -> Option<LineInfo> {
        let (&marked, info) = self.markers.range(..=line).next_back()?;
        Some(LineInfo {
            file: info.file.clone(),
            line: info.line + (line - marked),
            flags: info.flags.clone(),
        })
    }

    /// Number of recorded markers, including the implicit first one
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_markers_is_identity() {
        let pre = LineMap::preprocess("a\nb\nc", "main.bbj");
        assert_eq!(pre.text, "a\nb\nc\n");
        let info = pre.line_map.lookup(3).unwrap();
        assert_eq!(info.file, "main.bbj");
        assert_eq!(info.line, 3);
    }

    #[test]
    fn test_markers_are_stripped_and_mapped() {
        let source = "let a = 1;\n# 1 \"lib.bbj\" 1\nlet b = 2;\nlet c = 3;\n#line 2 \"main.bbj\" 2\nlet d = 4;\n";
        let pre = LineMap::preprocess(source, "main.bbj");
        assert_eq!(pre.text, "let a = 1;\nlet b = 2;\nlet c = 3;\nlet d = 4;\n");
        assert_eq!(pre.line_map.len(), 3);

        let first = pre.line_map.lookup(1).unwrap();
        assert_eq!((first.file.as_str(), first.line), ("main.bbj", 1));

        let b = pre.line_map.lookup(2).unwrap();
        assert_eq!((b.file.as_str(), b.line), ("lib.bbj", 1));
        assert_eq!(b.flags, vec![1]);

        let c = pre.line_map.lookup(3).unwrap();
        assert_eq!((c.file.as_str(), c.line), ("lib.bbj", 2));

        let d = pre.line_map.lookup(4).unwrap();
        assert_eq!((d.file.as_str(), d.line), ("main.bbj", 2));
        assert_eq!(d.flags, vec![2]);
    }

    #[test]
    fn test_lines_past_last_marker_offset_from_it() {
        let pre = LineMap::preprocess("# 40 \"x.bbj\" 1 3\na\nb\nc\nd\n", "main.bbj");
        let info = pre.line_map.lookup(4).unwrap();
        assert_eq!(info.line, 43);
        assert_eq!(info.flags, vec![1, 3]);
    }

    #[test]
    fn test_line_zero_has_no_origin() {
        let pre = LineMap::preprocess("a\n", "main.bbj");
        assert!(pre.line_map.lookup(0).is_none());
    }
}
