//! Deterministic cleanup and parsing of reasoning-service replies.
//!
//! Models are told to return bare JSON but still wrap it in fences, prepend
//! a sentence, or return the cell array without its `cells` wrapper. These
//! rules normalise all of that before the reply touches a table. Only the
//! text of cells that already exist is updated. Geometry and header flags
//! stay as detected, and any `is_header` key in a reply is ignored.

use crate::error::RefinementError;
use crate::model::MergedTable;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// One cell as returned by the reasoning service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplyCell {
    pub row_id: u32,
    pub col_id: u32,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplyShape {
    Wrapped { cells: Vec<ReplyCell> },
    Bare(Vec<ReplyCell>),
}

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n(.*?)\n?```").unwrap());

/// Strip a surrounding code fence, or any prose before the first `{` / `[`.
pub fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    if let Some(caps) = RE_FENCED.captures(trimmed) {
        if let Some(inner) = caps.get(1) {
            return inner.as_str().trim();
        }
    }
    match trimmed.find(['{', '[']) {
        Some(start) => &trimmed[start..],
        None => trimmed,
    }
}

/// Parse a reply into cells.
pub fn parse_reply(reply: &str) -> Result<Vec<ReplyCell>, RefinementError> {
    let body = strip_fences(reply);
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| RefinementError::InvalidReply(e.to_string()))?;
    let shape: ReplyShape = serde_json::from_value(value)
        .map_err(|e| RefinementError::Schema(format!("expected {{\"cells\": [...]}}: {}", e)))?;
    Ok(match shape {
        ReplyShape::Wrapped { cells } => cells,
        ReplyShape::Bare(cells) => cells,
    })
}

/// Apply reply cells onto a copy of `table`.
///
/// Cells are matched on `(row_id, col_id)`; unknown positions are ignored. A
/// reply that matches no cell at all is a schema failure.
pub fn apply_reply(
    table: &MergedTable,
    cells: &[ReplyCell],
) -> Result<MergedTable, RefinementError> {
    let mut refined = table.clone();
    let mut matched = 0usize;

    for reply in cells {
        let Some(cell) = refined.cell_mut(reply.row_id, reply.col_id) else {
            continue;
        };
        matched += 1;
        if let Some(ref text) = reply.text {
            cell.text = normalise_text(text);
        }
    }

    if matched == 0 {
        return Err(RefinementError::Schema(format!(
            "reply with {} cells matched none of the table's {} cells",
            cells.len(),
            table.cell_count()
        )));
    }
    Ok(refined)
}

static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapse runs of whitespace (including newlines) to single spaces.
fn normalise_text(text: &str) -> String {
    RE_WS.replace_all(text.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BBox, Cell, RefinedTable, TableFragment};
    use crate::pipeline::DocumentAssembler;

    fn table() -> MergedTable {
        MergedTable::from_fragment(TableFragment {
            page: 1,
            bbox: BBox::new(0.0, 0.0, 100.0, 40.0),
            cells: (0..2)
                .flat_map(|r| {
                    (0..2).map(move |c| Cell {
                        row_id: r,
                        col_id: c,
                        bbox: BBox::new(
                            c as f32 * 50.0,
                            r as f32 * 20.0,
                            c as f32 * 50.0 + 50.0,
                            r as f32 * 20.0 + 20.0,
                        ),
                        is_header: false,
                        text: String::new(),
                    })
                })
                .collect(),
        })
    }

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"cells\": []}\n```";
        assert_eq!(strip_fences(raw), "{\"cells\": []}");
    }

    #[test]
    fn strips_leading_prose() {
        assert_eq!(strip_fences("Here you go: [1]"), "[1]");
    }

    #[test]
    fn parses_wrapped_and_bare() {
        let wrapped = parse_reply(r#"{"cells":[{"row_id":0,"col_id":1,"text":"x"}]}"#).unwrap();
        let bare = parse_reply(r#"[{"row_id":0,"col_id":1,"text":"x"}]"#).unwrap();
        assert_eq!(wrapped, bare);
        assert_eq!(wrapped[0].text.as_deref(), Some("x"));
    }

    #[test]
    fn non_json_is_invalid_reply() {
        assert!(matches!(parse_reply("sorry, I can't"), Err(RefinementError::InvalidReply(_))));
    }

    #[test]
    fn wrong_shape_is_schema_error() {
        assert!(matches!(
            parse_reply(r#"{"rows":[["a","b"]]}"#),
            Err(RefinementError::Schema(_))
        ));
    }

    #[test]
    fn applies_text_only() {
        let cells = parse_reply(
            r#"{"cells":[
                {"row_id":0,"col_id":0,"text":"Name\n ","is_header":true},
                {"row_id":1,"col_id":1,"text":"  42  "},
                {"row_id":9,"col_id":9,"text":"ghost"}
            ]}"#,
        )
        .unwrap();
        let original = table();
        let refined = apply_reply(&original, &cells).unwrap();

        let by_pos = |r, c| {
            refined
                .cells()
                .find(|(_, x)| x.row_id == r && x.col_id == c)
                .map(|(_, x)| x.clone())
                .unwrap()
        };
        assert_eq!(by_pos(0, 0).text, "Name");
        assert!(!by_pos(0, 0).is_header);
        assert_eq!(by_pos(1, 1).text, "42");
        assert_eq!(refined.cell_count(), original.cell_count());
        assert_eq!(by_pos(1, 1).bbox, BBox::new(50.0, 20.0, 100.0, 40.0));
    }

    #[test]
    fn no_matching_cells_is_schema_error() {
        let cells = vec![ReplyCell {
            row_id: 5,
            col_id: 5,
            text: Some("x".into()),
        }];
        assert!(matches!(apply_reply(&table(), &cells), Err(RefinementError::Schema(_))));
    }

    #[test]
    fn reply_cannot_move_rows_between_headers_and_data() {
        let mut detected = table();
        for col in 0..2 {
            if let Some(cell) = detected.cell_mut(0, col) {
                cell.is_header = true;
            }
        }
        let cells = parse_reply(
            r#"{"cells":[
                {"row_id":0,"col_id":0,"text":"A","is_header":false},
                {"row_id":1,"col_id":0,"text":"B","is_header":true}
            ]}"#,
        )
        .unwrap();
        let refined = apply_reply(&detected, &cells).unwrap();

        let result = RefinedTable::from_result(detected, Ok(refined));
        let tables = DocumentAssembler::new().assemble(&[result], &[]);
        assert_eq!(tables[0].headers, vec![vec!["A".to_string(), String::new()]]);
        assert_eq!(tables[0].rows, vec![vec!["B".to_string(), String::new()]]);
    }
}
