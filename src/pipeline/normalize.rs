//! Response normalisation: repaired text → validated [`DocumentTree`].
//!
//! [`normalize`] runs the repair pass from [`crate::pipeline::repair`] and
//! then crosses the strict boundary: the text is parsed as JSON once and the
//! resulting value is walked into typed output. No string surgery happens
//! after the parse.
//!
//! ## Leniency
//!
//! Models are sloppy about the small things and the walk forgives them,
//! recording a warning each time:
//!
//! * `*_number` fields accept `2`, `2.0` and `"2"`. A missing, zero or
//!   non-numeric value becomes the item's 1-based position.
//! * Missing or `null` `tables` / `lists` / `images` become `[]`.
//! * Scalar table cells and list items are rendered as strings, `null` as `""`.
//! * Page numbers that skip or repeat are reported but kept as emitted.
//!
//! Anything structurally wrong (no `pages` array, a non-string `summary`, a
//! nested object inside a table cell) fails with
//! [`Doc2JsonError::MalformedResponse`] carrying the cleaned text.

use crate::config::{FenceStrip, RepairStrategy};
use crate::error::Doc2JsonError;
use crate::output::{DocumentTree, ImageDescription, ListBlock, Page, Table};
use crate::pipeline::repair::{repair, Repaired};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// A normalised response plus what it took to get there.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub document: DocumentTree,
    pub repair: Repaired,
    /// Schema leniencies applied during the walk, in document order.
    pub warnings: Vec<String>,
}

/// Repair, parse and validate a raw completion.
pub fn normalize(
    raw: &str,
    fence: FenceStrip,
    strategy: RepairStrategy,
) -> Result<Normalized, Doc2JsonError> {
    let repaired = repair(raw, fence, strategy);
    let (document, warnings) = parse_document(&repaired.text)?;

    debug!(
        "Normalised {} pages, {} tables, {} warnings",
        document.page_count(),
        document.table_count(),
        warnings.len()
    );

    Ok(Normalized {
        document,
        repair: repaired,
        warnings,
    })
}

/// Parse already-repaired text into a [`DocumentTree`].
///
/// Returns the tree and the list of leniency warnings.
pub fn parse_document(text: &str) -> Result<(DocumentTree, Vec<String>), Doc2JsonError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| malformed(text, format!("invalid JSON: {e}")))?;

    let mut walker = Walker {
        text,
        warnings: Vec::new(),
    };
    let document = walker.document(&value)?;
    Ok((document, walker.warnings))
}

fn malformed(text: &str, reason: impl Into<String>) -> Doc2JsonError {
    Doc2JsonError::MalformedResponse {
        reason: reason.into(),
        cleaned_text: text.to_string(),
    }
}

// ── Schema walk ──────────────────────────────────────────────────────────

struct Walker<'a> {
    text: &'a str,
    warnings: Vec<String>,
}

impl Walker<'_> {
    fn fail(&self, path: &str, what: &str) -> Doc2JsonError {
        malformed(self.text, format!("{path}: {what}"))
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    fn document(&mut self, value: &Value) -> Result<DocumentTree, Doc2JsonError> {
        let root = value
            .as_object()
            .ok_or_else(|| self.fail("$", "expected an object"))?;

        let pages = match root.get("pages") {
            Some(Value::Array(pages)) => pages,
            Some(_) => return Err(self.fail("pages", "expected an array")),
            None => return Err(self.fail("$", "missing field `pages`")),
        };

        let pages = pages
            .iter()
            .enumerate()
            .map(|(i, page)| self.page(i, page))
            .collect::<Result<Vec<_>, _>>()?;

        self.check_page_sequence(&pages);
        Ok(DocumentTree { pages })
    }

    fn page(&mut self, index: usize, value: &Value) -> Result<Page, Doc2JsonError> {
        let path = format!("pages[{index}]");
        let obj = value
            .as_object()
            .ok_or_else(|| self.fail(&path, "expected an object"))?;

        let page_number = self.number(obj, "page_number", index, &path);
        let summary = self.string(obj, "summary", &path)?;

        let tables = self
            .array(obj, "tables", &path)?
            .iter()
            .enumerate()
            .map(|(i, v)| self.table(i, v, &format!("{path}.tables[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;

        let lists = self
            .array(obj, "lists", &path)?
            .iter()
            .enumerate()
            .map(|(i, v)| self.list(i, v, &format!("{path}.lists[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;

        let images = self
            .array(obj, "images", &path)?
            .iter()
            .enumerate()
            .map(|(i, v)| self.image(i, v, &format!("{path}.images[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            page_number,
            summary,
            tables,
            lists,
            images,
        })
    }

    fn table(&mut self, index: usize, value: &Value, path: &str) -> Result<Table, Doc2JsonError> {
        let obj = value
            .as_object()
            .ok_or_else(|| self.fail(path, "expected an object"))?;
        let table_number = self.number(obj, "table_number", index, path);

        let rows = match obj.get("content") {
            Some(Value::Array(rows)) => rows,
            Some(Value::Null) | None => {
                self.warn(format!("{path}.content: missing, using an empty table"));
                return Ok(Table {
                    table_number,
                    content: Vec::new(),
                });
            }
            Some(_) => {
                return Err(self.fail(&format!("{path}.content"), "expected an array of rows"))
            }
        };

        let mut content = Vec::with_capacity(rows.len());
        for (r, row) in rows.iter().enumerate() {
            let row_path = format!("{path}.content[{r}]");
            let cells = row
                .as_array()
                .ok_or_else(|| self.fail(&row_path, "expected an array of cells"))?;
            content.push(
                cells
                    .iter()
                    .enumerate()
                    .map(|(c, cell)| self.scalar(cell, &format!("{row_path}[{c}]")))
                    .collect::<Result<Vec<_>, _>>()?,
            );
        }

        Ok(Table {
            table_number,
            content,
        })
    }

    fn list(
        &mut self,
        index: usize,
        value: &Value,
        path: &str,
    ) -> Result<ListBlock, Doc2JsonError> {
        let obj = value
            .as_object()
            .ok_or_else(|| self.fail(path, "expected an object"))?;
        let list_number = self.number(obj, "list_number", index, path);

        let items = match obj.get("items") {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.scalar(item, &format!("{path}.items[{i}]")))
                .collect::<Result<Vec<_>, _>>()?,
            Some(Value::Null) | None => {
                self.warn(format!("{path}.items: missing, using an empty list"));
                Vec::new()
            }
            Some(_) => return Err(self.fail(&format!("{path}.items"), "expected an array")),
        };

        Ok(ListBlock { list_number, items })
    }

    fn image(
        &mut self,
        index: usize,
        value: &Value,
        path: &str,
    ) -> Result<ImageDescription, Doc2JsonError> {
        let obj = value
            .as_object()
            .ok_or_else(|| self.fail(path, "expected an object"))?;
        let image_number = self.number(obj, "image_number", index, path);
        let description = self.string(obj, "description", path)?;
        Ok(ImageDescription {
            image_number,
            description,
        })
    }

    // ── Field helpers ────────────────────────────────────────────────────

    /// A 1-based number, or `position + 1` with a warning.
    fn number(
        &mut self,
        obj: &Map<String, Value>,
        field: &str,
        position: usize,
        path: &str,
    ) -> u32 {
        let fallback = u32::try_from(position + 1).unwrap_or(u32::MAX);
        match obj.get(field) {
            Some(v) => match coerce_number(v) {
                Some(n) if n > 0 => n,
                _ => {
                    self.warn(format!(
                        "{path}.{field}: {v} is not a positive number, using position {fallback}"
                    ));
                    fallback
                }
            },
            None => {
                self.warn(format!("{path}.{field}: missing, using position {fallback}"));
                fallback
            }
        }
    }

    fn string(
        &self,
        obj: &Map<String, Value>,
        field: &str,
        path: &str,
    ) -> Result<String, Doc2JsonError> {
        match obj.get(field) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(self.fail(&format!("{path}.{field}"), "expected a string")),
            None => Err(self.fail(path, &format!("missing field `{field}`"))),
        }
    }

    /// An optional array; missing or `null` is empty.
    fn array<'v>(
        &self,
        obj: &'v Map<String, Value>,
        field: &str,
        path: &str,
    ) -> Result<&'v [Value], Doc2JsonError> {
        match obj.get(field) {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) | None => Ok(&[]),
            Some(_) => Err(self.fail(&format!("{path}.{field}"), "expected an array")),
        }
    }

    fn scalar(&self, value: &Value, path: &str) -> Result<String, Doc2JsonError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Null => Ok(String::new()),
            Value::Array(_) | Value::Object(_) => Err(self.fail(path, "expected a scalar value")),
        }
    }

    fn check_page_sequence(&mut self, pages: &[Page]) {
        let mut seen = BTreeSet::new();
        let mut prev: Option<u32> = None;
        for page in pages {
            let n = page.page_number;
            if !seen.insert(n) {
                self.warn(format!("page_number {n} appears more than once"));
            } else if let Some(p) = prev {
                if p.checked_add(1) != Some(n) {
                    self.warn(format!("page_number jumps from {p} to {n}"));
                }
            }
            prev = Some(n);
        }
    }
}

fn coerce_number(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u32::MAX as f64)
                .map(|f| f as u64)
        })?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    u32::try_from(n).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::repair::FencePath;

    const TWO_PAGES: &str = r#"{"pages": [
        {"page_number": 1, "summary": "Cover", "tables": [], "lists": [], "images": []},
        {"page_number": 2, "summary": "Figures",
         "tables": [{"table_number": 1, "content": [["Year", "Revenue"], ["2023", "10"]]}],
         "lists": [{"list_number": 1, "items": ["alpha", "beta"]}],
         "images": [{"image_number": 1, "description": "A bar chart"}]}
    ]}"#;

    fn default_normalize(raw: &str) -> Result<Normalized, Doc2JsonError> {
        normalize(raw, FenceStrip::SuffixMatch, RepairStrategy::V1)
    }

    fn doc(json: &str) -> DocumentTree {
        parse_document(json).unwrap().0
    }

    #[test]
    fn fenced_response_equals_direct_parse() {
        let wrapped = format!("```json\n{TWO_PAGES}\n```");
        let n = default_normalize(&wrapped).unwrap();
        assert_eq!(n.document, doc(TWO_PAGES));
        assert_eq!(n.document.pages[1].tables[0].content[1], vec!["2023", "10"]);
        assert!(n.warnings.is_empty(), "{:?}", n.warnings);
    }

    #[test]
    fn prefilled_response_without_opening_fence() {
        // The prefill is ours, so the completion itself starts at the JSON.
        let n = default_normalize(&format!("\n{TWO_PAGES}\n```")).unwrap();
        assert_eq!(n.document.page_count(), 2);
        assert_eq!(n.repair.fence_path, FencePath::SuffixMatched);
    }

    #[test]
    fn literal_newline_inside_summary_is_joined() {
        let raw = "{\"pages\": [{\"page_number\": 1, \"summary\": \"line1\nline2\"}]}\n```";
        let n = default_normalize(raw).unwrap();
        assert_eq!(n.document.pages[0].summary, "line1line2");
    }

    #[test]
    fn escaped_nested_quote_fails_to_parse() {
        let raw = r#"{"pages": [{"page_number": 1, "summary": "he said \"hi\""}]}```"#;
        let err = default_normalize(raw).unwrap_err();
        match err {
            Doc2JsonError::MalformedResponse { cleaned_text, reason } => {
                assert!(reason.starts_with("invalid JSON"), "{reason}");
                assert!(cleaned_text.contains(r#""he said "hi"""#), "{cleaned_text}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn escaped_nested_quote_survives_passthrough() {
        let raw = r#"{"pages": [{"page_number": 1, "summary": "he said \"hi\""}]}```"#;
        let n = normalize(raw, FenceStrip::SuffixMatch, RepairStrategy::Passthrough).unwrap();
        assert_eq!(n.document.pages[0].summary, "he said \"hi\"");
    }

    #[test]
    fn missing_optional_arrays_default_to_empty() {
        let (tree, warnings) = parse_document(
            r#"{"pages": [{"page_number": 1, "summary": "s", "tables": null}]}"#,
        )
        .unwrap();
        let page = &tree.pages[0];
        assert!(page.tables.is_empty());
        assert!(page.lists.is_empty());
        assert!(page.images.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn numbers_are_coerced() {
        let (tree, warnings) = parse_document(
            r#"{"pages": [
                {"page_number": "1", "summary": "a"},
                {"page_number": 2.0, "summary": "b", "tables": [{"table_number": " 3 ", "content": []}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(tree.pages[0].page_number, 1);
        assert_eq!(tree.pages[1].page_number, 2);
        assert_eq!(tree.pages[1].tables[0].table_number, 3);
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn missing_page_number_falls_back_to_position() {
        let (tree, warnings) = parse_document(
            r#"{"pages": [{"page_number": 1, "summary": "a"}, {"summary": "b"}, {"page_number": "iii", "summary": "c"}]}"#,
        )
        .unwrap();
        let numbers: Vec<u32> = tree.pages.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("pages[1].page_number: missing"));
        assert!(warnings[1].starts_with("pages[2].page_number"));
    }

    #[test]
    fn zero_page_number_is_replaced() {
        let (tree, warnings) =
            parse_document(r#"{"pages": [{"page_number": 0, "summary": "a"}]}"#).unwrap();
        assert_eq!(tree.pages[0].page_number, 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn max_page_number_followed_by_another_page_only_warns() {
        let (tree, warnings) = parse_document(
            r#"{"pages": [{"page_number": 4294967295, "summary": "a"}, {"page_number": 1, "summary": "b"}]}"#,
        )
        .unwrap();
        assert_eq!(tree.pages[0].page_number, u32::MAX);
        assert_eq!(tree.pages[1].page_number, 1);
        assert_eq!(
            warnings,
            vec!["page_number jumps from 4294967295 to 1".to_string()]
        );
    }

    #[test]
    fn page_gaps_and_duplicates_warn_but_keep_order() {
        let (tree, warnings) = parse_document(
            r#"{"pages": [{"page_number": 1, "summary": "a"}, {"page_number": 3, "summary": "b"}, {"page_number": 3, "summary": "c"}]}"#,
        )
        .unwrap();
        let summaries: Vec<&str> = tree.pages.iter().map(|p| p.summary.as_str()).collect();
        assert_eq!(summaries, vec!["a", "b", "c"]);
        assert_eq!(
            warnings,
            vec![
                "page_number jumps from 1 to 3".to_string(),
                "page_number 3 appears more than once".to_string(),
            ]
        );
    }

    #[test]
    fn scalar_cells_become_strings() {
        let (tree, _) = parse_document(
            r#"{"pages": [{"page_number": 1, "summary": "s",
                "tables": [{"table_number": 1, "content": [["a", 1, 2.5, true, null]]}],
                "lists": [{"list_number": 1, "items": [7, "x"]}]}]}"#,
        )
        .unwrap();
        assert_eq!(tree.pages[0].tables[0].content[0], vec!["a", "1", "2.5", "true", ""]);
        assert_eq!(tree.pages[0].lists[0].items, vec!["7", "x"]);
    }

    #[test]
    fn ragged_rows_are_kept() {
        let (tree, _) = parse_document(
            r#"{"pages": [{"page_number": 1, "summary": "s", "tables": [{"table_number": 1, "content": [["a", "b"], ["c"]]}]}]}"#,
        )
        .unwrap();
        assert_eq!(tree.pages[0].tables[0].content[1], vec!["c"]);
    }

    #[test]
    fn nested_cell_is_malformed_with_path() {
        let err = parse_document(
            r#"{"pages": [{"page_number": 1, "summary": "s"}, {"page_number": 2, "summary": "t",
                "tables": [{"table_number": 1, "content": [["ok"], [{"x": 1}]]}]}]}"#,
        )
        .unwrap_err();
        match err {
            Doc2JsonError::MalformedResponse { reason, .. } => {
                assert_eq!(reason, "pages[1].tables[0].content[1][0]: expected a scalar value");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn structural_violations_are_malformed() {
        for bad in [
            r#"[]"#,
            r#"{}"#,
            r#"{"pages": {}}"#,
            r#"{"pages": [1]}"#,
            r#"{"pages": [{"page_number": 1}]}"#,
            r#"{"pages": [{"page_number": 1, "summary": 5}]}"#,
            r#"{"pages": [{"page_number": 1, "summary": "s", "tables": "none"}]}"#,
            r#"{"pages": [{"page_number": 1, "summary": "s", "tables": [{"content": "a,b"}]}]}"#,
            r#"{"pages": [{"page_number": 1, "summary": "s", "images": [{"image_number": 1}]}]}"#,
        ] {
            let err = parse_document(bad).unwrap_err();
            assert!(matches!(err, Doc2JsonError::MalformedResponse { .. }), "{bad}: {err:?}");
        }
    }

    #[test]
    fn malformed_carries_cleaned_text() {
        let err = default_normalize("{\"pages\": [\n```").unwrap_err();
        match err {
            Doc2JsonError::MalformedResponse { cleaned_text, .. } => {
                assert_eq!(cleaned_text, "{\"pages\": [")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_pages_is_valid() {
        let n = default_normalize("{\"pages\": []}```").unwrap();
        assert_eq!(n.document, DocumentTree::default());
    }
}
